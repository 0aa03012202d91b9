//! Pairing of images with their ground-truth masks
//!
//! An image matches a mask when both have the same file stem (`cell_01.tif`
//! pairs with `masks/cell_01.tif` but not with `masks/cell_010.tif`).

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Find the single mask whose file stem equals the image's
pub fn pair_mask<'a>(image: &Path, masks: &'a [PathBuf]) -> Result<&'a Path> {
    let stem = image.file_stem();
    let matches: Vec<&PathBuf> = masks
        .iter()
        .filter(|mask| stem.is_some() && mask.file_stem() == stem)
        .collect();

    match matches.as_slice() {
        [mask] => Ok(mask.as_path()),
        _ => Err(Error::MaskMatch {
            image: display_name(image),
            matches: matches.len(),
        }),
    }
}

/// File name of `path` for logs and result rows
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_else(|| OsStr::new(""))
        .to_string_lossy()
        .into_owned()
}

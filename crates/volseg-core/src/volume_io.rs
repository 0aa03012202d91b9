//! Volume codec: multi-page grayscale TIFF
//!
//! A volume is stored as one TIFF page per Z slice, each page Y rows by X
//! columns. All pages must share dimensions. Label volumes are written as 32-bit
//! signed grayscale.

use crate::error::{Error, Result};
use crate::volume::{LabelVolume, Shape, Volume};
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;
use tracing::debug;

/// Reads intensity and label volumes, writes label volumes
pub trait VolumeCodec {
    fn read_volume(&self, path: &Path) -> Result<Volume>;

    fn read_labels(&self, path: &Path) -> Result<LabelVolume>;

    fn write_labels(&self, path: &Path, labels: &LabelVolume) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TiffCodec;

impl TiffCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Write an intensity volume as 32-bit float pages
    pub fn write_volume(&self, path: &Path, volume: &Volume) -> Result<()> {
        let (_, height, width) = volume.dim();
        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
        for page in volume.outer_iter() {
            let data: Vec<f32> = page.iter().copied().collect();
            encoder.write_image::<colortype::Gray32Float>(
                page_extent(width)?,
                page_extent(height)?,
                &data,
            )?;
        }
        Ok(())
    }
}

impl VolumeCodec for TiffCodec {
    fn read_volume(&self, path: &Path) -> Result<Volume> {
        read_pages(path, intensities)
    }

    fn read_labels(&self, path: &Path) -> Result<LabelVolume> {
        read_pages(path, labels)
    }

    fn write_labels(&self, path: &Path, labels: &LabelVolume) -> Result<()> {
        let (_, height, width) = labels.dim();
        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
        for page in labels.outer_iter() {
            let data: Vec<i32> = page.iter().copied().collect();
            encoder.write_image::<colortype::GrayI32>(
                page_extent(width)?,
                page_extent(height)?,
                &data,
            )?;
        }
        debug!("Wrote {} label volume to {}", Shape::of(labels), path.display());
        Ok(())
    }
}

fn page_extent(extent: usize) -> Result<u32> {
    u32::try_from(extent).map_err(|_| Error::Codec(format!("page extent {extent} exceeds u32")))
}

fn read_pages<T: Clone>(
    path: &Path,
    convert: fn(DecodingResult) -> Result<Vec<T>>,
) -> Result<Array3<T>> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let mut page_dims: Option<(u32, u32)> = None;
    let mut pages = 0usize;
    let mut values: Vec<T> = Vec::new();

    loop {
        let dims = decoder.dimensions()?;
        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(Error::Codec(format!(
                    "{}: expected single-channel pages, got {other:?}",
                    path.display()
                )))
            }
        }

        match page_dims {
            None => page_dims = Some(dims),
            Some(first) if first != dims => {
                return Err(Error::Codec(format!(
                    "{}: page {} is {}x{}, expected {}x{}",
                    path.display(),
                    pages,
                    dims.0,
                    dims.1,
                    first.0,
                    first.1
                )))
            }
            Some(_) => {}
        }

        values.extend(convert(decoder.read_image()?)?);
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let (width, height) = page_dims.unwrap_or((0, 0));
    let shape = (pages, height as usize, width as usize);
    debug!("Read {} pages of {}x{} from {}", pages, width, height, path.display());

    Array3::from_shape_vec(shape, values)
        .map_err(|e| Error::Codec(format!("{}: {e}", path.display())))
}

fn intensities(result: DecodingResult) -> Result<Vec<f32>> {
    let values = match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(Error::Codec("unsupported TIFF sample format".to_string())),
    };
    Ok(values)
}

fn labels(result: DecodingResult) -> Result<Vec<i32>> {
    fn checked<V: Copy + std::fmt::Display>(buf: Vec<V>) -> Result<Vec<i32>>
    where
        i32: TryFrom<V>,
    {
        buf.into_iter()
            .map(|v| {
                i32::try_from(v).map_err(|_| Error::Codec(format!("label {v} exceeds i32 range")))
            })
            .collect()
    }

    fn integral(buf: impl IntoIterator<Item = f64>) -> Result<Vec<i32>> {
        buf.into_iter()
            .map(|v| {
                if v.fract() == 0.0 && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) {
                    Ok(v as i32)
                } else {
                    Err(Error::Codec(format!("label {v} is not an i32 integer")))
                }
            })
            .collect()
    }

    match result {
        DecodingResult::U8(buf) => Ok(buf.into_iter().map(i32::from).collect()),
        DecodingResult::U16(buf) => Ok(buf.into_iter().map(i32::from).collect()),
        DecodingResult::I8(buf) => Ok(buf.into_iter().map(i32::from).collect()),
        DecodingResult::I16(buf) => Ok(buf.into_iter().map(i32::from).collect()),
        DecodingResult::I32(buf) => Ok(buf),
        DecodingResult::U32(buf) => checked(buf),
        DecodingResult::U64(buf) => checked(buf),
        DecodingResult::I64(buf) => checked(buf),
        DecodingResult::F32(buf) => integral(buf.into_iter().map(f64::from)),
        DecodingResult::F64(buf) => integral(buf),
        #[allow(unreachable_patterns)]
        _ => Err(Error::Codec("unsupported TIFF label format".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_roundtrip_preserves_shape_and_values() {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("labels.tif");
        let labels = LabelVolume::from_shape_fn((3, 5, 7), |(z, y, x)| {
            if (y + x) % 3 == 0 {
                (z * 100 + y * 10 + x) as i32
            } else {
                0
            }
        });

        let codec = TiffCodec::new();
        codec.write_labels(&path, &labels).unwrap();
        let read = codec.read_labels(&path).unwrap();

        assert_eq!(read.dim(), (3, 5, 7));
        assert_eq!(read, labels);
    }

    #[test]
    fn test_intensity_volume_roundtrip() {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("volume.tif");
        let volume = Volume::from_shape_fn((4, 2, 3), |(z, y, x)| (z + y * 2 + x) as f32 * 0.5);

        let codec = TiffCodec::new();
        codec.write_volume(&path, &volume).unwrap();
        let read = codec.read_volume(&path).unwrap();

        assert_eq!(read, volume);
    }

    #[test]
    fn test_pages_of_different_size_are_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("ragged.tif");
        {
            let file = BufWriter::new(File::create(&path).unwrap());
            let mut encoder = TiffEncoder::new(file).unwrap();
            encoder
                .write_image::<colortype::Gray32Float>(4, 3, &[0.5f32; 12])
                .unwrap();
            encoder
                .write_image::<colortype::Gray32Float>(5, 3, &[0.5f32; 15])
                .unwrap();
        }

        let err = TiffCodec::new().read_volume(&path).unwrap_err();
        assert!(matches!(err, Error::Codec(_)), "unexpected error: {err}");
        assert!(err.to_string().contains("page 1 is 5x3"));
    }

    #[test]
    fn test_missing_file_is_codec_error() {
        let err = TiffCodec::new()
            .read_volume(Path::new("/nonexistent/volume.tif"))
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Codec);
    }
}

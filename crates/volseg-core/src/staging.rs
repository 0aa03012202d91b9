//! Disk-backed label volume used while a volume is segmented blockwise
//!
//! A [`StagingBuffer`] owns a fresh temporary directory holding one memory-mapped
//! `i32` file with the shape of the volume being segmented. The segmentation
//! capability writes into it through [`StagingBuffer::view_mut`]. The scheduler
//! then calls [`StagingBuffer::into_labels`], which flushes the mapping, reads
//! the file back and deletes it.
//!
//! The backing file and directory are removed when the buffer is dropped, on
//! every exit path. A failed removal is logged as a warning and never
//! propagated.

use crate::error::{Error, Result};
use crate::volume::{LabelVolume, Shape};
use memmap2::MmapMut;
use ndarray::{ArrayView3, ArrayViewMut3};
use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const LABEL_FILE_NAME: &str = "temp_labels.dat";
const LABEL_BYTES: usize = std::mem::size_of::<i32>();

pub struct StagingBuffer {
    shape: Shape,
    path: PathBuf,
    /// Dropped before the directory is removed
    mmap: Option<MmapMut>,
    dir: Option<TempDir>,
}

impl StagingBuffer {
    /// Create a zero-filled buffer in the system temporary directory
    pub fn create(shape: Shape) -> Result<Self> {
        Self::create_in(std::env::temp_dir(), shape)
    }

    /// Create a zero-filled buffer inside `parent`
    pub fn create_in(parent: impl AsRef<Path>, shape: Shape) -> Result<Self> {
        let parent = parent.as_ref();
        let invalid = |message: String| Error::Staging {
            path: parent.to_path_buf(),
            source: io::Error::new(ErrorKind::InvalidInput, message),
        };
        if !shape.is_positive() {
            return Err(invalid(format!("staging buffer needs a positive shape, got {shape}")));
        }

        let byte_len = shape
            .voxel_count()
            .checked_mul(LABEL_BYTES)
            .ok_or_else(|| invalid(format!("staging buffer for {shape} overflows")))?;

        let dir = tempfile::Builder::new()
            .prefix("volseg-staging-")
            .tempdir_in(parent)
            .map_err(|source| Error::Staging {
                path: parent.to_path_buf(),
                source,
            })?;
        let path = dir.path().join(LABEL_FILE_NAME);
        let staging_err = |source| Error::Staging {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(staging_err)?;
        file.set_len(byte_len as u64).map_err(staging_err)?;

        // SAFETY: the file lives in a private temporary directory created above and
        // is only accessed through this buffer for its whole lifetime.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(staging_err)?;

        info!("Created staging label buffer at {} ({})", path.display(), shape);

        Ok(Self {
            shape,
            path,
            mmap: Some(mmap),
            dir: Some(dir),
        })
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only view of the staged labels
    pub fn view(&self) -> Result<ArrayView3<'_, i32>> {
        let bytes = self.mapped()?;
        let labels: &[i32] = bytemuck::try_cast_slice(&bytes[..])
            .map_err(|e| self.corrupt(format!("staging buffer is not i32-aligned: {e}")))?;
        ArrayView3::from_shape(self.shape.as_tuple(), labels)
            .map_err(|e| self.corrupt(format!("staging buffer view: {e}")))
    }

    /// Writable view; the single writer is the segmentation capability
    pub fn view_mut(&mut self) -> Result<ArrayViewMut3<'_, i32>> {
        let shape = self.shape;
        let path = &self.path;
        let corrupt = |message: String| Error::Staging {
            path: path.clone(),
            source: io::Error::other(message),
        };
        let bytes = self
            .mmap
            .as_mut()
            .ok_or_else(|| corrupt("staging buffer already released".to_string()))?;
        let labels: &mut [i32] = bytemuck::try_cast_slice_mut(&mut bytes[..])
            .map_err(|e| corrupt(format!("staging buffer is not i32-aligned: {e}")))?;
        ArrayViewMut3::from_shape(shape.as_tuple(), labels)
            .map_err(|e| corrupt(format!("staging buffer view: {e}")))
    }

    /// Sync pending writes to the backing file
    pub fn flush(&self) -> Result<()> {
        self.mapped()?.flush().map_err(|source| Error::Staging {
            path: self.path.clone(),
            source,
        })
    }

    /// Flush, read the whole file back into memory and delete the backing storage
    pub fn into_labels(mut self) -> Result<LabelVolume> {
        self.flush()?;
        // Unmap before reading so the read goes through the file, not the mapping
        self.mmap = None;

        let labels = self.read_back()?;
        self.release();
        Ok(labels)
    }

    fn read_back(&self) -> Result<LabelVolume> {
        let staging_err = |source| Error::Staging {
            path: self.path.clone(),
            source,
        };

        let mut file = std::fs::File::open(&self.path).map_err(staging_err)?;
        let mut values = vec![0i32; self.shape.voxel_count()];
        file.read_exact(bytemuck::cast_slice_mut(&mut values))
            .map_err(staging_err)?;

        debug!("Read back {} staged labels from {}", values.len(), self.path.display());

        LabelVolume::from_shape_vec(self.shape.as_tuple(), values)
            .map_err(|e| self.corrupt(format!("staged labels do not fit {}: {e}", self.shape)))
    }

    fn mapped(&self) -> Result<&MmapMut> {
        self.mmap
            .as_ref()
            .ok_or_else(|| self.corrupt("staging buffer already released".to_string()))
    }

    fn corrupt(&self, message: String) -> Error {
        Error::Staging {
            path: self.path.clone(),
            source: io::Error::other(message),
        }
    }

    /// Unmap and delete the backing directory; failures only warn
    fn release(&mut self) {
        self.mmap = None;

        let Some(dir) = self.dir.take() else {
            return;
        };
        let dir_path = dir.path().to_path_buf();

        if let Err(e) = dir.close() {
            warn!(
                "Failed to delete staging directory {}: {}",
                dir_path.display(),
                e
            );
        }
        if self.path.exists() {
            warn!(
                "Staging file still exists, delete it manually: {}",
                self.path.display()
            );
        } else {
            debug!("Removed staging buffer {}", self.path.display());
        }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("shape", &self.shape)
            .field("path", &self.path)
            .field("mapped", &self.mmap.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_write_and_read_back() {
        let scratch = tempfile::tempdir().unwrap();
        let shape = Shape::new(3, 4, 5);
        let mut buffer = StagingBuffer::create_in(scratch.path(), shape).unwrap();
        let path = buffer.path().to_path_buf();
        assert!(path.exists());

        {
            let mut view = buffer.view_mut().unwrap();
            assert!(view.iter().all(|&v| v == 0));
            view[[0, 0, 0]] = 1;
            view[[2, 3, 4]] = 42;
            view[[1, 2, 3]] = -7;
        }
        assert_eq!(buffer.view().unwrap()[[2, 3, 4]], 42);

        let labels = buffer.into_labels().unwrap();
        assert_eq!(labels.dim(), (3, 4, 5));
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[2, 3, 4]], 42);
        assert_eq!(labels[[1, 2, 3]], -7);
        assert_eq!(labels.iter().filter(|&&v| v != 0).count(), 3);

        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn test_drop_removes_backing_file() {
        let scratch = tempfile::tempdir().unwrap();
        let buffer = StagingBuffer::create_in(scratch.path(), Shape::new(2, 2, 2)).unwrap();
        let path = buffer.path().to_path_buf();
        assert!(path.exists());

        drop(buffer);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_empty_shape() {
        let scratch = tempfile::tempdir().unwrap();
        let err = StagingBuffer::create_in(scratch.path(), Shape::new(0, 4, 4)).unwrap_err();
        assert!(matches!(err, Error::Staging { .. }));
        assert_eq!(err.category(), ErrorCategory::Resource);
    }

    #[test]
    fn test_oversized_shape_is_resource_error() {
        let scratch = tempfile::tempdir().unwrap();
        let huge = Shape::new(usize::MAX / 2, 1, 1);
        let err = StagingBuffer::create_in(scratch.path(), huge).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Resource);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_after_external_removal_only_warns() {
        let scratch = tempfile::tempdir().unwrap();
        let mut buffer = StagingBuffer::create_in(scratch.path(), Shape::new(2, 3, 4)).unwrap();
        buffer.view_mut().unwrap()[[1, 1, 1]] = 3;
        let path = buffer.path().to_path_buf();

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
        drop(buffer);

        assert!(!path.exists());
    }

    #[test]
    fn test_read_back_after_external_removal_is_resource_error() {
        let scratch = tempfile::tempdir().unwrap();
        let buffer = StagingBuffer::create_in(scratch.path(), Shape::new(2, 2, 2)).unwrap();
        std::fs::remove_dir_all(buffer.path().parent().unwrap()).unwrap();

        let err = buffer.into_labels().unwrap_err();
        assert!(matches!(err, Error::Staging { .. }));
        assert_eq!(err.category(), ErrorCategory::Resource);
    }

    #[test]
    fn test_missing_parent_is_resource_error() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("does-not-exist");
        let err = StagingBuffer::create_in(&missing, Shape::new(1, 1, 1)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Resource);
    }
}

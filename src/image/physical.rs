//! Physical file backend for memory-mapped I/O.
//!
//! Provides the [`Physical`] backend implementing [`crate::Backend`] over a read-only
//! memory mapping of a file on disk. It exists for the operations that look at a
//! module's *backing file* rather than its loaded form, the content checksum in
//! [`crate::checksum`] in particular, where paging the file in on demand beats
//! reading it into an owned buffer.
//!
//! Mapping never interprets the bytes; offsets here are plain file offsets, not RVAs.

use super::Backend;
use crate::{Error::OutOfBounds, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
///
/// The file is mapped read-only and shared; all access operations include bounds
/// checking. Note that an empty file cannot be mapped and is reported as an error by
/// [`Physical::new`]; callers that want the "unreadable file" sentinel behavior (the
/// checksum does) treat that error as such.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the file on disk. Accepts `&Path`, `&str`, `String`, or `PathBuf`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped
    /// (including the zero-length case).
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;

        let mmap = unsafe { Mmap::map(&file) }?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

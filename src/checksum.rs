//! Backing-file content checksum.
//!
//! A content fingerprint only: the sum of every byte of the module's on-disk file,
//! wrapped into 32 bits. This is neither a cryptographic digest nor the PE header
//! checksum algorithm; it exists so an embedder can cheaply ask "is this the same
//! file I shipped".
//!
//! Failure is silent by contract: a file that cannot be opened or mapped (including
//! an empty one) checksums to 0.

use std::path::Path;

use crate::image::{Backend, Physical};

/// Sum every byte of `data` as an unsigned 8-bit value into a wrapping 32-bit
/// accumulator.
///
/// For any byte sequence, `content_checksum(bytes) == sum(bytes) mod 2^32`.
///
/// # Examples
///
/// ```rust
/// use modscope::checksum::content_checksum;
///
/// assert_eq!(content_checksum(&[]), 0);
/// assert_eq!(content_checksum(&[1, 2, 3]), 6);
/// ```
#[must_use]
pub fn content_checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |accumulator, &byte| accumulator.wrapping_add(u32::from(byte)))
}

/// Checksum the file at `path`, mapping it read-only.
///
/// Returns 0 if the file cannot be opened or mapped.
#[must_use]
pub fn file_checksum(path: impl AsRef<Path>) -> u32 {
    match Physical::new(path) {
        Ok(file) => content_checksum(file.data()),
        Err(_) => 0,
    }
}

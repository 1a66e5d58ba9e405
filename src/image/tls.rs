//! Thread-local-storage callback enumeration.
//!
//! The TLS data directory points at a `TlsDirectory` structure whose
//! `AddressOfCallBacks` field holds the absolute address of a null-terminated array of
//! initializer function pointers, one slot per callback, slot width decided by the
//! image kind. TLS use is optional: an absent directory yields an empty sequence.
//!
//! The walk is exposed as [`TlsCallbacks`], a lazy, restartable iterator. Unlike the
//! raw layout it is finite by construction: every slot read is bounds-checked against
//! the image extent and the iteration count is capped, so a corrupted terminator
//! produces a truncated sequence and a diagnostic instead of an unbounded scan.

use log::warn;

use crate::image::{headers::DirectoryType, headers::PeKind, io::read_le, Image};

/// Upper bound on TLS callback slots walked before failing closed.
pub(crate) const MAX_TLS_CALLBACKS: usize = 4096;

/// Offset of `AddressOfCallBacks` inside the 32-bit TLS directory.
const CALLBACKS_FIELD_PE32: usize = 12;
/// Offset of `AddressOfCallBacks` inside the 64-bit TLS directory.
const CALLBACKS_FIELD_PE64: usize = 24;

impl Image {
    /// Enumerate the TLS initializer callbacks registered by this image, in array
    /// order.
    ///
    /// Returns an empty sequence when the TLS directory is absent, its virtual
    /// address is 0, or no callback array is registered. A callback array that runs
    /// out of the image or past the iteration cap ends the sequence with a `warn!`
    /// diagnostic.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # let image: modscope::Image = unimplemented!();
    /// let callbacks: Vec<usize> = image.tls_callbacks().collect();
    /// ```
    #[must_use]
    pub fn tls_callbacks(&self) -> TlsCallbacks<'_> {
        TlsCallbacks {
            image: self,
            cursor: Self::locate_callback_array(self),
            yielded: 0,
        }
    }

    /// Find the image-relative offset of the callback array, if any.
    fn locate_callback_array(image: &Image) -> Option<usize> {
        let directory = image.directory(DirectoryType::Tls)?;
        let directory_offset = directory.virtual_address as usize;

        let callbacks_va = match image.kind() {
            PeKind::Pe32 => {
                let bytes = image.data_slice(directory_offset + CALLBACKS_FIELD_PE32, 4);
                match bytes.and_then(read_le::<u32>) {
                    Ok(va) => u64::from(va),
                    Err(_) => {
                        warn!("TLS directory at rva {:#x} lies outside the image", directory.virtual_address);
                        return None;
                    }
                }
            }
            PeKind::Pe64 => {
                let bytes = image.data_slice(directory_offset + CALLBACKS_FIELD_PE64, 8);
                match bytes.and_then(read_le::<u64>) {
                    Ok(va) => va,
                    Err(_) => {
                        warn!("TLS directory at rva {:#x} lies outside the image", directory.virtual_address);
                        return None;
                    }
                }
            }
        };

        if callbacks_va == 0 {
            return None;
        }

        match image.va_to_offset(callbacks_va) {
            Some(offset) => Some(offset),
            None => {
                warn!("TLS callback array at {callbacks_va:#x} lies outside the image");
                None
            }
        }
    }
}

/// Lazy iterator over the non-null entries of the TLS callback array.
///
/// Yields each callback's absolute address until the null terminator, an
/// out-of-bounds slot, or [`MAX_TLS_CALLBACKS`] entries, whichever comes first.
pub struct TlsCallbacks<'a> {
    image: &'a Image,
    /// Offset of the next slot to read; `None` once exhausted.
    cursor: Option<usize>,
    yielded: usize,
}

impl Iterator for TlsCallbacks<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let offset = self.cursor?;

        if self.yielded >= MAX_TLS_CALLBACKS {
            warn!("TLS callback array exceeds {MAX_TLS_CALLBACKS} entries; truncating");
            self.cursor = None;
            return None;
        }

        let width = self.image.kind().thunk_size();
        let value = match self.image.data_slice(offset, width) {
            Ok(bytes) => match self.image.kind() {
                PeKind::Pe32 => read_le::<u32>(bytes).map(u64::from),
                PeKind::Pe64 => read_le::<u64>(bytes),
            },
            Err(error) => Err(error),
        };

        let Ok(value) = value else {
            warn!("unterminated TLS callback array runs out of the image at offset {offset:#x}");
            self.cursor = None;
            return None;
        };

        if value == 0 {
            self.cursor = None;
            return None;
        }

        self.cursor = Some(offset + width);
        self.yielded += 1;
        Some(value as usize)
    }
}

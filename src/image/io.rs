//! Low-level byte order and safe reading/writing utilities for PE image parsing.
//!
//! This module provides bounds-checked, little-endian access to primitive values inside a
//! byte buffer. PE/COFF structures are little-endian on every platform the format exists
//! on, so unlike general binary toolkits there is no big-endian twin to each function.
//!
//! # Key Components
//!
//! - [`RawIo`] - Trait implemented by the primitive types that appear in PE headers
//! - [`read_le`] / [`read_le_at`] - Bounds-checked reads (the `_at` variant advances an
//!   offset cursor)
//! - [`write_le`] / [`write_le_at`] - Bounds-checked writes, used by synthetic image
//!   construction in tests
//!
//! # Error Handling
//!
//! All functions return [`crate::Result`] and fail with [`crate::Error::OutOfBounds`] when
//! the buffer does not hold enough bytes, preventing buffer overruns on malformed images.

use crate::{Error::OutOfBounds, Result};

/// Trait for the primitive types that can be read from and written to PE image bytes.
///
/// Each implementation ties a numeric type to its fixed-size byte array and to the
/// little-endian conversions the standard library provides for it. The reading and
/// writing free functions in this module are generic over this trait.
pub trait RawIo: Sized {
    /// Fixed-size byte array matching this type's width.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Decode from little-endian bytes.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode to little-endian bytes.
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_raw_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl RawIo for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_raw_io! {
    u8 => 1,
    u16 => 2,
    u32 => 4,
    u64 => 8,
    i32 => 4,
}

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
///
/// # Examples
///
/// ```rust,ignore
/// let data = [0x4D, 0x5A];
/// let magic: u16 = read_le(&data)?;
/// assert_eq!(magic, 0x5A4D);
/// ```
pub fn read_le<T: RawIo>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the number of bytes consumed.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes; `offset` is left
/// untouched in that case.
pub fn read_le_at<T: RawIo>(data: &[u8], offset: &mut usize) -> Result<T> {
    let len = std::mem::size_of::<T>();

    let Some(end) = offset.checked_add(len) else {
        return Err(OutOfBounds);
    };

    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(bytes) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(bytes))
}

/// Safely writes a value of type `T` in little-endian byte order to the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le<T: RawIo>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Safely writes a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the number of bytes produced.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small; `offset` is left
/// untouched in that case.
pub fn write_le_at<T: RawIo>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let len = std::mem::size_of::<T>();

    let Some(end) = offset.checked_add(len) else {
        return Err(OutOfBounds);
    };

    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());

    *offset = end;
    Ok(())
}

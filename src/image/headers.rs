//! Typed views over the fixed PE/COFF headers.
//!
//! Everything here is a pure function of the bytes it is given: the structures hold
//! plain values copied out of the image, never pointers into it. Field offsets follow
//! the PE/COFF layout exactly; this is an external wire format the crate must parse
//! faithfully, not something it may redefine.
//!
//! Parsing order matters on hostile input. [`DosHeader::read`] deliberately has no
//! validity gate (mirroring the fact that a module handle may point at garbage), and
//! it is the caller's job, in [`crate::Image`], to check the magic, bounds-check
//! `nt_offset` against a conservative probe window, and only then walk further.

use strum::{EnumCount, EnumIter};

use crate::{
    image::parser::Parser,
    Error::{NotSupported, OutOfBounds},
    Result,
};

/// The two-byte `MZ` magic that opens every DOS header.
pub const DOS_MAGIC: u16 = 0x5A4D;

/// The four-byte `PE\0\0` signature that opens the NT headers.
pub const NT_SIGNATURE: u32 = 0x0000_4550;

/// Size of the DOS header in bytes; `nt_offset` lives in its last dword.
pub(crate) const DOS_HEADER_SIZE: usize = 0x40;

/// File offset of the `e_lfanew` field inside the DOS header.
pub(crate) const NT_OFFSET_FIELD: usize = 0x3C;

/// Size of the COFF file header in bytes.
pub(crate) const FILE_HEADER_SIZE: usize = 20;

/// The PE/COFF data-directory array holds at most this many entries.
pub(crate) const MAX_DATA_DIRECTORIES: usize = 16;

/// The legacy leading header: a magic value and the offset to the NT headers.
///
/// Reading one performs no validation beyond buffer length; per the layout contract a
/// DOS header "view" may be taken of garbage memory, and callers must check
/// [`DosHeader::magic`] before trusting [`DosHeader::nt_offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    /// The two-byte magic, [`DOS_MAGIC`] for a valid image.
    pub magic: u16,
    /// Signed offset from the image base to the NT headers (`e_lfanew`). Untrusted
    /// until bounds-checked.
    pub nt_offset: i32,
}

impl DosHeader {
    /// Read a DOS header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the DOS header.
    pub fn read(data: &[u8]) -> Result<DosHeader> {
        if data.len() < DOS_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_le::<u16>()?;

        parser.seek(NT_OFFSET_FIELD)?;
        let nt_offset = parser.read_le::<i32>()?;

        Ok(DosHeader { magic, nt_offset })
    }

    /// `true` if the magic equals [`DOS_MAGIC`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == DOS_MAGIC
    }
}

/// The COFF file header, directly after the NT signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Target machine identifier.
    pub machine: u16,
    /// Number of records in the section table.
    pub section_count: u16,
    /// Declared size of the optional header that follows; positions the section table.
    pub optional_header_size: u16,
    /// Image characteristic flags.
    pub characteristics: u16,
}

impl FileHeader {
    /// Read a file header at the parser's current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on a truncated header.
    pub fn read(parser: &mut Parser<'_>) -> Result<FileHeader> {
        let machine = parser.read_le::<u16>()?;
        let section_count = parser.read_le::<u16>()?;

        // TimeDateStamp, PointerToSymbolTable, NumberOfSymbols
        parser.advance_by(12)?;

        let optional_header_size = parser.read_le::<u16>()?;
        let characteristics = parser.read_le::<u16>()?;

        Ok(FileHeader {
            machine,
            section_count,
            optional_header_size,
            characteristics,
        })
    }
}

/// Width of the image, decided by the optional-header magic.
///
/// The kind decides the thunk width of the import tables and the field layout of the
/// TLS directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeKind {
    /// PE32 (optional-header magic 0x10B): 32-bit fields, 4-byte thunks.
    Pe32,
    /// PE32+ (optional-header magic 0x20B): 64-bit fields, 8-byte thunks.
    Pe64,
}

impl PeKind {
    /// Width in bytes of one thunk (import name/address table entry) or TLS callback
    /// slot for this image kind.
    #[must_use]
    pub fn thunk_size(&self) -> usize {
        match self {
            PeKind::Pe32 => 4,
            PeKind::Pe64 => 8,
        }
    }
}

/// One `(virtual_address, size)` entry of the optional header's data-directory array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// RVA of the directory's payload; 0 means the directory is absent.
    pub virtual_address: u32,
    /// Declared size of the payload in bytes.
    pub size: u32,
}

/// Well-known indices into the data-directory array.
///
/// Only a few of these are consumed by this crate ([`DirectoryType::Import`] and
/// [`DirectoryType::Tls`]), but the array is indexed by position so the full set is
/// spelled out, the same way the wire format defines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter)]
pub enum DirectoryType {
    /// Export table.
    Export = 0,
    /// Import descriptor table.
    Import = 1,
    /// Resource table.
    Resource = 2,
    /// Exception handling table.
    Exception = 3,
    /// Certificate (security) table.
    Security = 4,
    /// Base relocation table.
    BaseRelocation = 5,
    /// Debug data.
    Debug = 6,
    /// Architecture-specific data.
    Architecture = 7,
    /// Global pointer register value.
    GlobalPointer = 8,
    /// Thread-local-storage directory.
    Tls = 9,
    /// Load configuration.
    LoadConfig = 10,
    /// Bound import table.
    BoundImport = 11,
    /// Import address table.
    ImportAddress = 12,
    /// Delay-load import descriptors.
    DelayImport = 13,
    /// CLR runtime header.
    ClrRuntime = 14,
    /// Reserved, must be zero.
    Reserved = 15,
}

/// The values this crate consumes from the optional header.
///
/// The full optional header has many more fields; these are the ones that position
/// every other view over the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    /// PE32 or PE32+.
    pub kind: PeKind,
    /// RVA of the image entry point.
    pub entry_point_rva: u32,
    /// Declared size of the mapped image in bytes; the extent every RVA is validated
    /// against.
    pub image_size: u32,
    /// The data-directory array, truncated to [`MAX_DATA_DIRECTORIES`].
    pub directories: Vec<DataDirectory>,
}

impl OptionalHeader {
    /// Read an optional header at the parser's current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for an unknown magic and
    /// [`crate::Error::OutOfBounds`] on a truncated header.
    pub fn read(parser: &mut Parser<'_>) -> Result<OptionalHeader> {
        let kind = match parser.read_le::<u16>()? {
            0x10B => PeKind::Pe32,
            0x20B => PeKind::Pe64,
            _ => return Err(NotSupported),
        };

        // Linker versions and code/data sizes up to AddressOfEntryPoint (+16)
        parser.advance_by(14)?;
        let entry_point_rva = parser.read_le::<u32>()?;

        // Up to SizeOfImage (+56), identical offset for PE32 and PE32+
        parser.advance_by(36)?;
        let image_size = parser.read_le::<u32>()?;

        // Up to NumberOfRvaAndSizes: +92 for PE32, +108 for PE32+
        match kind {
            PeKind::Pe32 => parser.advance_by(32)?,
            PeKind::Pe64 => parser.advance_by(48)?,
        }
        let directory_count = parser.read_le::<u32>()? as usize;

        let mut directories = Vec::with_capacity(directory_count.min(MAX_DATA_DIRECTORIES));
        for _ in 0..directory_count.min(MAX_DATA_DIRECTORIES) {
            directories.push(DataDirectory {
                virtual_address: parser.read_le::<u32>()?,
                size: parser.read_le::<u32>()?,
            });
        }

        Ok(OptionalHeader {
            kind,
            entry_point_rva,
            image_size,
            directories,
        })
    }
}

//! Loaded-image abstraction and PE structural parsing.
//!
//! This module provides the [`Image`] type: a read-side view over an executable image
//! that is already laid out in its virtual (loaded) form, whether that layout lives in
//! a buffer this process owns or at the base address the OS loader mapped a module at.
//!
//! # Architecture
//!
//! - **Backend system** - [`Backend`] abstracts the byte source: [`Memory`] (owned
//!   buffer), [`Mapped`] (borrowed live mapping), [`Physical`] (memory-mapped file,
//!   used by the checksum only).
//! - **Validated layout** - construction parses and bounds-checks the DOS header, NT
//!   headers and optional header exactly once into a [`Layout`] of plain values; the
//!   accessors that follow never chase an unvalidated offset.
//! - **Lazy tables** - the section table, TLS callback array and import tables are
//!   decoded on demand with per-record bounds checks and hard iteration caps, so a
//!   corrupted sentinel fails closed instead of scanning unboundedly.
//!
//! # Bootstrapping order
//!
//! The extent every RVA must be validated against (`SizeOfImage`) lives in the optional
//! header, which can only be found by following the untrusted `e_lfanew` field of the
//! DOS header. [`Image::from_base`] therefore probes a conservative single page first:
//! DOS magic, then `e_lfanew` bounded to that page, then the NT signature and optional
//! header inside it, and only after `SizeOfImage` has been read and sanity-checked does
//! the view widen to the full image range.
//!
//! # Address spaces
//!
//! `Image` interprets the image in **virtual layout**: an RVA is an offset from the
//! base. Raw PE files on disk (file layout, sections at `PointerToRawData`) are not
//! this crate's subject; the only file-backed operation is the module checksum, which
//! treats the file as opaque bytes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modscope::Image;
//!
//! // Safety: 0x7FF6_0000_0000 must be the base of a loaded module
//! let image = unsafe { Image::from_base(0x7FF6_0000_0000)? };
//!
//! println!("image spans {:#x} bytes, {} sections", image.image_size(), image.sections().len());
//! for callback in image.tls_callbacks() {
//!     println!("TLS callback at {:#x}", callback);
//! }
//! # Ok::<(), modscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod headers;
mod imports;
mod mapped;
mod memory;
mod physical;
mod sections;
mod tls;

use log::warn;

use crate::{Error::Empty, Result};
use parser::Parser;

pub use headers::{
    DataDirectory, DirectoryType, DosHeader, FileHeader, OptionalHeader, PeKind, DOS_MAGIC,
    NT_SIGNATURE,
};
pub use imports::{IatSlot, ImportDescriptor, Imports, ThunkPair, Thunks};
pub use mapped::Mapped;
pub use memory::Memory;
pub use physical::Physical;
pub use sections::{SectionCharacteristics, SectionHeader};
pub use tls::TlsCallbacks;

use headers::DOS_HEADER_SIZE;
use sections::SECTION_HEADER_SIZE;

/// Size of the bootstrap probe window: one minimum page.
///
/// All fixed headers (DOS, NT, optional, data directories) must fit inside this window
/// before the image's declared size is trusted. Loader mappings are page-granular, so a
/// one-page read at a mapped base is always in bounds.
pub(crate) const PROBE_SIZE: usize = 0x1000;

/// Backend trait for image byte sources.
///
/// This trait abstracts over where an image's bytes live, allowing the same parsing
/// code to serve owned buffers, live loader mappings and memory-mapped files. All
/// implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;

    /// Returns the base address of the image, i.e. the address its offset 0 lives at.
    ///
    /// Absolute pointer fields inside an image (the TLS callback array address, bound
    /// IAT entries) are interpreted relative to this.
    fn base(&self) -> usize {
        self.data().as_ptr() as usize
    }
}

/// The validated positions and values every other view derives from.
///
/// Parsed once at construction; holding plain values (no borrows into the image) is
/// what keeps [`Image`] free of self-references.
#[derive(Debug)]
pub(crate) struct Layout {
    pub(crate) dos: DosHeader,
    pub(crate) nt_offset: u32,
    pub(crate) file_header: FileHeader,
    pub(crate) optional: OptionalHeader,
    pub(crate) section_table_offset: usize,
}

impl Layout {
    /// Parse and validate the fixed headers from the front of `data`.
    ///
    /// `data` may be a probe window rather than the full image; every offset is
    /// validated against its length, which is what bounds the untrusted `e_lfanew`
    /// before `SizeOfImage` is known.
    pub(crate) fn parse(data: &[u8]) -> Result<Layout> {
        let dos = DosHeader::read(data)?;
        if !dos.is_valid() {
            return Err(malformed_error!(
                "DOS magic mismatch: {:#06x}",
                dos.magic
            ));
        }

        if dos.nt_offset < DOS_HEADER_SIZE as i32 {
            return Err(malformed_error!(
                "NT header offset {:#x} overlaps the DOS header",
                dos.nt_offset
            ));
        }
        let nt_offset = dos.nt_offset as usize;

        let mut parser = Parser::new(data);
        parser.seek(nt_offset)?;

        let signature = parser.read_le::<u32>()?;
        if signature != NT_SIGNATURE {
            return Err(malformed_error!(
                "NT signature mismatch at {:#x}: {:#010x}",
                nt_offset,
                signature
            ));
        }

        let file_header = FileHeader::read(&mut parser)?;

        let optional_offset = parser.pos();
        let optional = OptionalHeader::read(&mut parser)?;
        let headers_end = parser.pos();

        if (optional.image_size as usize) < headers_end {
            return Err(malformed_error!(
                "declared image size {:#x} does not cover the headers ({:#x} bytes)",
                optional.image_size,
                headers_end
            ));
        }

        // The section table may legitimately extend past the probe window; its records
        // are bounds-checked individually during enumeration instead.
        let section_table_offset =
            optional_offset + usize::from(file_header.optional_header_size);

        Ok(Layout {
            dos,
            nt_offset: nt_offset as u32,
            file_header,
            optional,
            section_table_offset,
        })
    }
}

/// A parsed, bounds-checked view over an executable image in virtual layout.
///
/// `Image` pairs a byte source ([`Backend`]) with the [`Layout`] validated from it.
/// It is a *view*: it never allocates or frees the underlying image, and every table
/// it exposes is a pure function of (base address, bytes at that address).
///
/// # Examples
///
/// Parsing an owned buffer (as the test suite does with synthetic images):
///
/// ```rust,no_run
/// use modscope::Image;
///
/// let buffer: Vec<u8> = std::fs::read("image.bin")?;
/// let image = Image::from_memory(buffer)?;
/// println!("entry point rva: {:#x}", image.entry_point_rva());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Image {
    data: Box<dyn Backend>,
    layout: Layout,
}

impl Image {
    /// Parse an image from an owned buffer holding its virtual layout.
    ///
    /// The buffer's own address serves as the image base for interpreting absolute
    /// pointer fields.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] for an empty buffer, [`crate::Error::Malformed`]
    /// / [`crate::Error::OutOfBounds`] / [`crate::Error::NotSupported`] for a buffer
    /// that fails header validation, including one whose declared `SizeOfImage`
    /// exceeds the buffer.
    pub fn from_memory(data: Vec<u8>) -> Result<Image> {
        if data.is_empty() {
            return Err(Empty);
        }

        let layout = Layout::parse(&data)?;
        if layout.optional.image_size as usize > data.len() {
            return Err(malformed_error!(
                "declared image size {:#x} exceeds the {:#x}-byte backing buffer",
                layout.optional.image_size,
                data.len()
            ));
        }

        Ok(Image {
            data: Box::new(Memory::new(data)),
            layout,
        })
    }

    /// Parse the image a loader mapped at `base`, performing the conservative
    /// one-page bootstrap before trusting the image's declared extent.
    ///
    /// # Safety
    ///
    /// `base` must be the base address of a module currently mapped by the OS loader
    /// (or an equally trusted mapping): readable at page granularity, starting with
    /// the image headers, and staying mapped for the lifetime of the returned value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] for a null base, or the header-validation
    /// errors of [`Image::from_memory`] for a mapping that is not a parseable image.
    pub unsafe fn from_base(base: usize) -> Result<Image> {
        if base == 0 {
            return Err(Empty);
        }

        let probe = std::slice::from_raw_parts(base as *const u8, PROBE_SIZE);
        let layout = Layout::parse(probe)?;

        let backend = Mapped::new(base as *const u8, layout.optional.image_size as usize);
        Ok(Image {
            data: Box::new(backend),
            layout,
        })
    }

    /// The image base address.
    #[must_use]
    pub fn base(&self) -> usize {
        self.data.base()
    }

    /// Length in bytes of the backing view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` if the backing view is empty (never the case for a parsed image).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Whether this is a PE32 or PE32+ image.
    #[must_use]
    pub fn kind(&self) -> PeKind {
        self.layout.optional.kind
    }

    /// The DOS header view.
    #[must_use]
    pub fn dos_header(&self) -> DosHeader {
        self.layout.dos
    }

    /// Offset from the base to the NT headers (the validated `e_lfanew`).
    #[must_use]
    pub fn nt_offset(&self) -> u32 {
        self.layout.nt_offset
    }

    /// The COFF file header.
    #[must_use]
    pub fn file_header(&self) -> &FileHeader {
        &self.layout.file_header
    }

    /// The parsed optional-header values.
    #[must_use]
    pub fn optional_header(&self) -> &OptionalHeader {
        &self.layout.optional
    }

    /// RVA of the image entry point.
    #[must_use]
    pub fn entry_point_rva(&self) -> u32 {
        self.layout.optional.entry_point_rva
    }

    /// Absolute address of the image entry point (`base + rva`).
    ///
    /// A degenerate entry-point RVA of 0 yields the base itself, mirroring how the
    /// loader would treat it.
    #[must_use]
    pub fn entry_point(&self) -> usize {
        self.base()
            .wrapping_add(self.layout.optional.entry_point_rva as usize)
    }

    /// Declared size of the mapped image.
    #[must_use]
    pub fn image_size(&self) -> u32 {
        self.layout.optional.image_size
    }

    /// The data-directory entry for `which`, or `None` if it is absent (index beyond
    /// the declared count, or a zero virtual address).
    #[must_use]
    pub fn directory(&self, which: DirectoryType) -> Option<DataDirectory> {
        self.layout
            .optional
            .directories
            .get(which as usize)
            .copied()
            .filter(|directory| directory.virtual_address != 0)
    }

    /// Bounds-checked access to `len` bytes starting at `offset`.
    ///
    /// In virtual layout an RVA is an offset, so this doubles as RVA-relative access.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// The full backing bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Translate an absolute address into an offset within this image, if it falls
    /// inside the mapped range.
    pub(crate) fn va_to_offset(&self, va: u64) -> Option<usize> {
        let offset = va.checked_sub(self.base() as u64)?;
        let offset = usize::try_from(offset).ok()?;
        (offset < self.data.len()).then_some(offset)
    }

    /// Enumerate the section table in on-disk order.
    ///
    /// Best-effort: a record whose bytes fall outside the image is skipped with a
    /// diagnostic, so the result holds `section_count` entries unless records were
    /// skipped.
    #[must_use]
    pub fn sections(&self) -> Vec<SectionHeader> {
        let count = usize::from(self.layout.file_header.section_count);
        let mut sections = Vec::with_capacity(count);

        for index in 0..count {
            let offset = self.layout.section_table_offset + index * SECTION_HEADER_SIZE;
            let record = self
                .data
                .data_slice(offset, SECTION_HEADER_SIZE)
                .and_then(|bytes| SectionHeader::read(&mut Parser::new(bytes)));

            match record {
                Ok(section) => sections.push(section),
                Err(_) => {
                    warn!("section header {index} lies outside the image; skipping");
                }
            }
        }

        sections
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len())
            .field("layout", &self.layout)
            .finish()
    }
}

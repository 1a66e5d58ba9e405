//! Import descriptor and thunk table walking, and the import-slot search.
//!
//! The import data directory points at an array of [`ImportDescriptor`] records, one
//! per dependency module, terminated by an all-zero record. Each descriptor carries
//! two parallel, null-terminated thunk arrays: the *lookup* table (original first
//! thunk: names/ordinals as the linker wrote them) and the *address* table (first
//! thunk: the slots the loader patched with resolved addresses, i.e. the IAT).
//!
//! [`Image::locate_iat_slot`] implements the search this crate exists for: given a
//! dependency module name and the resolved address of one of its exports, find the
//! IAT slot currently bound to that export so the caller may redirect it. Matching is
//! two-pass per slot: by bound address first, then by resolving the lookup entry's
//! ordinal and comparing the result. Every descriptor whose module name matches is
//! scanned; only a found slot ends the search early, since a module may legitimately
//! be imported through more than one descriptor.
//!
//! As with the other sentinel-terminated tables, both walks are lazy, bounds-checked
//! and capped, so corrupted sentinels fail closed.

use log::{debug, warn};

use crate::{
    image::{
        headers::{DirectoryType, PeKind},
        io::read_le,
        parser::Parser,
        Image,
    },
    Result,
};

/// Upper bound on import descriptors walked before failing closed.
pub(crate) const MAX_IMPORT_DESCRIPTORS: usize = 4096;

/// Upper bound on thunk pairs walked per descriptor before failing closed.
pub(crate) const MAX_IMPORT_THUNKS: usize = 65536;

/// Upper bound in bytes on an import module name string.
pub(crate) const MAX_IMPORT_NAME: usize = 512;

/// Size of one import descriptor record in bytes.
pub(crate) const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// Mask applied to a lookup entry before deciding whether it encodes an ordinal.
///
/// Kept bit-for-bit from the behavior this crate reimplements: the low 28 bits are
/// taken and treated as an ordinal when they fit in 16 bits, without consulting the
/// architecture's ordinal flag bit.
const ORDINAL_MASK: u64 = 0x0FFF_FFFF;

/// Largest value the masked lookup entry may take and still be an ordinal.
const MAX_ORDINAL: u64 = 0xFFFF;

/// One record of the import descriptor table, describing all symbols imported from
/// one dependency module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportDescriptor {
    /// RVA of the lookup (original first thunk) array.
    pub original_first_thunk: u32,
    /// Bind timestamp.
    pub time_date_stamp: u32,
    /// Forwarder chain index.
    pub forwarder_chain: u32,
    /// RVA of the dependency module's NUL-terminated name.
    pub name_rva: u32,
    /// RVA of the address (first thunk) array, the IAT portion for this module.
    pub first_thunk: u32,
}

impl ImportDescriptor {
    /// Read a descriptor at the parser's current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on a truncated record.
    pub fn read(parser: &mut Parser<'_>) -> Result<ImportDescriptor> {
        Ok(ImportDescriptor {
            original_first_thunk: parser.read_le::<u32>()?,
            time_date_stamp: parser.read_le::<u32>()?,
            forwarder_chain: parser.read_le::<u32>()?,
            name_rva: parser.read_le::<u32>()?,
            first_thunk: parser.read_le::<u32>()?,
        })
    }

    /// `true` for the all-zero record that terminates the descriptor array.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.original_first_thunk == 0
            && self.time_date_stamp == 0
            && self.forwarder_chain == 0
            && self.name_rva == 0
            && self.first_thunk == 0
    }
}

/// One lock-step position in a descriptor's lookup and address tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThunkPair {
    /// Zero-based position within the descriptor's import list.
    pub index: usize,
    /// Raw value of the lookup (name table) entry.
    pub lookup: u64,
    /// Raw value of the address table entry, the currently bound address.
    pub bound: u64,
    /// RVA of the address table slot itself.
    pub slot_rva: u32,
}

impl ThunkPair {
    /// The ordinal this lookup entry encodes, if its masked value fits one.
    #[must_use]
    pub fn ordinal(&self) -> Option<u16> {
        let masked = self.lookup & ORDINAL_MASK;
        (masked <= MAX_ORDINAL).then(|| masked as u16)
    }
}

/// The located, patchable import-address-table slot.
///
/// Locating a slot reads nothing but the image; mutating it is the caller's move,
/// via [`crate::SlotPatch`] and under a [`crate::WritableImage`] guard for a live
/// module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IatSlot {
    /// RVA of the slot within its image.
    pub rva: u32,
    /// Absolute address of the slot.
    pub va: usize,
    /// The address the slot was bound to when located.
    pub bound: u64,
    /// Image kind, deciding the slot width.
    pub kind: PeKind,
}

/// Lazy iterator over the import descriptor table.
///
/// Ends at the all-zero terminator; a record that runs out of the image or past
/// [`MAX_IMPORT_DESCRIPTORS`] ends the walk with a diagnostic.
pub struct Imports<'a> {
    image: &'a Image,
    cursor: Option<usize>,
    index: usize,
}

impl Iterator for Imports<'_> {
    type Item = ImportDescriptor;

    fn next(&mut self) -> Option<ImportDescriptor> {
        let offset = self.cursor?;

        if self.index >= MAX_IMPORT_DESCRIPTORS {
            warn!("import descriptor table exceeds {MAX_IMPORT_DESCRIPTORS} records; truncating");
            self.cursor = None;
            return None;
        }

        let record = self
            .image
            .data_slice(offset, IMPORT_DESCRIPTOR_SIZE)
            .and_then(|bytes| ImportDescriptor::read(&mut Parser::new(bytes)));

        let Ok(descriptor) = record else {
            warn!("unterminated import descriptor table runs out of the image at offset {offset:#x}");
            self.cursor = None;
            return None;
        };

        if descriptor.is_terminator() {
            self.cursor = None;
            return None;
        }

        self.cursor = Some(offset + IMPORT_DESCRIPTOR_SIZE);
        self.index += 1;
        Some(descriptor)
    }
}

/// Lazy lock-step iterator over one descriptor's lookup and address tables.
///
/// Ends when the lookup entry is 0; a slot that runs out of the image or past
/// [`MAX_IMPORT_THUNKS`] ends the walk with a diagnostic.
pub struct Thunks<'a> {
    image: &'a Image,
    width: usize,
    lookup_cursor: Option<usize>,
    slot_cursor: usize,
    index: usize,
}

impl Thunks<'_> {
    fn read_entry(&self, offset: usize) -> Result<u64> {
        let bytes = self.image.data_slice(offset, self.width)?;
        match self.image.kind() {
            PeKind::Pe32 => read_le::<u32>(bytes).map(u64::from),
            PeKind::Pe64 => read_le::<u64>(bytes),
        }
    }
}

impl Iterator for Thunks<'_> {
    type Item = ThunkPair;

    fn next(&mut self) -> Option<ThunkPair> {
        let lookup_offset = self.lookup_cursor?;

        if self.index >= MAX_IMPORT_THUNKS {
            warn!("import thunk array exceeds {MAX_IMPORT_THUNKS} entries; truncating");
            self.lookup_cursor = None;
            return None;
        }

        let Ok(lookup) = self.read_entry(lookup_offset) else {
            warn!("unterminated import thunk array runs out of the image at offset {lookup_offset:#x}");
            self.lookup_cursor = None;
            return None;
        };

        if lookup == 0 {
            self.lookup_cursor = None;
            return None;
        }

        let Ok(bound) = self.read_entry(self.slot_cursor) else {
            warn!("import address table runs out of the image at offset {:#x}", self.slot_cursor);
            self.lookup_cursor = None;
            return None;
        };

        let pair = ThunkPair {
            index: self.index,
            lookup,
            bound,
            slot_rva: self.slot_cursor as u32,
        };

        self.lookup_cursor = Some(lookup_offset + self.width);
        self.slot_cursor += self.width;
        self.index += 1;
        Some(pair)
    }
}

impl Image {
    /// Walk the import descriptor table, one record per dependency module.
    ///
    /// Empty when the import directory is absent.
    #[must_use]
    pub fn imports(&self) -> Imports<'_> {
        let cursor = self
            .directory(DirectoryType::Import)
            .map(|directory| directory.virtual_address as usize);

        Imports {
            image: self,
            cursor,
            index: 0,
        }
    }

    /// Read a descriptor's dependency module name.
    ///
    /// The string is read NUL-terminated at `name_rva`, bounded to
    /// [`MAX_IMPORT_NAME`] bytes and the image extent. `None` if no terminated
    /// string fits those bounds.
    #[must_use]
    pub fn import_name(&self, descriptor: &ImportDescriptor) -> Option<String> {
        let offset = descriptor.name_rva as usize;
        if offset >= self.len() {
            return None;
        }

        let window = MAX_IMPORT_NAME.min(self.len() - offset);
        let bytes = self.data_slice(offset, window).ok()?;
        Parser::new(bytes).read_string_utf8().ok()
    }

    /// Walk a descriptor's lookup and address thunk arrays in lock-step.
    ///
    /// Empty when either array RVA is 0: a degenerate descriptor the walk fails
    /// closed on rather than interpreting header bytes as thunks.
    #[must_use]
    pub fn thunks(&self, descriptor: &ImportDescriptor) -> Thunks<'_> {
        let cursor = (descriptor.original_first_thunk != 0 && descriptor.first_thunk != 0)
            .then_some(descriptor.original_first_thunk as usize);

        Thunks {
            image: self,
            width: self.kind().thunk_size(),
            lookup_cursor: cursor,
            slot_cursor: descriptor.first_thunk as usize,
            index: 0,
        }
    }

    /// Locate the import-address-table slot of this image that is bound to `target`,
    /// an address exported by the dependency module `module_name`.
    ///
    /// Implements the two-pass match: a slot is found when its bound address equals
    /// `target`, or when its lookup entry encodes an ordinal and `resolve_ordinal`
    /// maps that ordinal to `target`. All descriptors whose module name matches
    /// case-insensitively are scanned; only a found slot returns early.
    ///
    /// Read-only: the returned [`IatSlot`] is the interception point, mutating it is
    /// the caller's responsibility (see [`crate::SlotPatch`]).
    pub fn locate_iat_slot<F>(
        &self,
        module_name: &str,
        target: usize,
        mut resolve_ordinal: F,
    ) -> Option<IatSlot>
    where
        F: FnMut(u16) -> Option<usize>,
    {
        for descriptor in self.imports() {
            let Some(name) = self.import_name(&descriptor) else {
                warn!(
                    "import descriptor with unreadable module name at rva {:#x}; skipping",
                    descriptor.name_rva
                );
                continue;
            };

            if !name.eq_ignore_ascii_case(module_name) {
                continue;
            }

            for pair in self.thunks(&descriptor) {
                if pair.bound == target as u64 {
                    debug!(
                        "import slot for {module_name} found at rva {:#x} (bound address match)",
                        pair.slot_rva
                    );
                    return Some(self.slot_of(pair));
                }

                if let Some(ordinal) = pair.ordinal() {
                    if resolve_ordinal(ordinal) == Some(target) {
                        debug!(
                            "import slot for {module_name} found at rva {:#x} (ordinal {ordinal} match)",
                            pair.slot_rva
                        );
                        return Some(self.slot_of(pair));
                    }
                }
            }
            // No break: the module may appear in further descriptors.
        }

        None
    }

    fn slot_of(&self, pair: ThunkPair) -> IatSlot {
        IatSlot {
            rva: pair.slot_rva,
            va: self.base().wrapping_add(pair.slot_rva as usize),
            bound: pair.bound,
            kind: self.kind(),
        }
    }
}

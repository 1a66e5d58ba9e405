//! Shared functionality which is used in unit-tests: a synthetic-image builder in
//! virtual layout plus fake implementations of the collaborator traits.
//!
//! The builder produces minimal but structurally honest PE32/PE32+ images: real DOS
//! and NT headers, a data-directory array, section records, import descriptor/thunk
//! tables and a TLS directory, all at fixed offsets inside a default 0x4000-byte
//! image. Absolute pointer fields (the TLS callback array address) are fixed up once
//! the buffer's final address is known, so the buffer's own address is the image
//! base exactly as for a loader mapping.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{
    image::{
        io::{write_le_at, RawIo},
        Image, PeKind, DOS_MAGIC, NT_SIGNATURE,
    },
    module::{ExportResolver, Loader, Module},
    protect::{MemoryProtection, ProtectionToken},
};

const E_LFANEW: usize = 0x80;
const DEFAULT_SIZE: usize = 0x4000;

const IMPORT_DESC_RVA: usize = 0x1000;
const IMPORT_NAMES_RVA: usize = 0x1200;
const IMPORT_LOOKUP_RVA: usize = 0x1400;
const IMPORT_IAT_RVA: usize = 0x1800;
const TLS_DIR_RVA: usize = 0x2000;
const TLS_CALLBACKS_RVA: usize = 0x2080;

fn put<T: RawIo>(data: &mut [u8], offset: usize, value: T) {
    let mut cursor = offset;
    write_le_at(data, &mut cursor, value).expect("synthetic image layout overflow");
}

fn put_thunk(data: &mut [u8], offset: usize, width: usize, value: u64) {
    match width {
        4 => put(data, offset, value as u32),
        _ => put(data, offset, value),
    }
}

/// How one import entry's lookup (name table) value is encoded.
enum LookupSpec {
    /// A hint/name RVA above 0xFFFF, so the masked value is never an ordinal.
    Name,
    /// The ordinal flag bit plus the ordinal, as a linker writes it.
    Ordinal(u16),
}

/// One import entry: a lookup encoding plus the address the loader "bound" the
/// matching IAT slot to.
pub(crate) struct ImportEntrySpec {
    lookup: LookupSpec,
    bound: u64,
}

impl ImportEntrySpec {
    /// A by-name import whose IAT slot is bound to `bound`.
    pub(crate) fn named(bound: u64) -> ImportEntrySpec {
        ImportEntrySpec {
            lookup: LookupSpec::Name,
            bound,
        }
    }

    /// A by-ordinal import whose IAT slot is bound to `bound`.
    pub(crate) fn ordinal(ordinal: u16, bound: u64) -> ImportEntrySpec {
        ImportEntrySpec {
            lookup: LookupSpec::Ordinal(ordinal),
            bound,
        }
    }
}

struct ImportSpec {
    module: String,
    entries: Vec<ImportEntrySpec>,
}

struct SectionSpec {
    name: Vec<u8>,
    virtual_address: u32,
    virtual_size: u32,
}

/// Builder for synthetic images in virtual layout.
pub(crate) struct SyntheticImage {
    kind: PeKind,
    declared_size: Option<u32>,
    entry_point_rva: u32,
    sections: Vec<SectionSpec>,
    section_count_override: Option<u16>,
    imports: Vec<ImportSpec>,
    tls: Option<Vec<u64>>,
    tls_array_va: Option<u64>,
    tls_unterminated: bool,
}

impl SyntheticImage {
    pub(crate) fn pe64() -> SyntheticImage {
        SyntheticImage {
            kind: PeKind::Pe64,
            declared_size: None,
            entry_point_rva: 0,
            sections: Vec::new(),
            section_count_override: None,
            imports: Vec::new(),
            tls: None,
            tls_array_va: None,
            tls_unterminated: false,
        }
    }

    pub(crate) fn pe32() -> SyntheticImage {
        SyntheticImage {
            kind: PeKind::Pe32,
            ..SyntheticImage::pe64()
        }
    }

    /// Override the declared `SizeOfImage` without growing the buffer.
    pub(crate) fn image_size(mut self, size: u32) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub(crate) fn entry_point_rva(mut self, rva: u32) -> Self {
        self.entry_point_rva = rva;
        self
    }

    pub(crate) fn section(mut self, name: &[u8], virtual_address: u32, virtual_size: u32) -> Self {
        self.sections.push(SectionSpec {
            name: name.to_vec(),
            virtual_address,
            virtual_size,
        });
        self
    }

    /// Claim a section count unrelated to the records actually written.
    pub(crate) fn section_count_override(mut self, count: u16) -> Self {
        self.section_count_override = Some(count);
        self
    }

    pub(crate) fn import(mut self, module: &str, entries: Vec<ImportEntrySpec>) -> Self {
        self.imports.push(ImportSpec {
            module: module.to_string(),
            entries,
        });
        self
    }

    pub(crate) fn tls_callbacks(mut self, callbacks: &[u64]) -> Self {
        self.tls = Some(callbacks.to_vec());
        self
    }

    /// Corruption knob: write a fixed callback array address instead of fixing one
    /// up against the real base. A PE32 directory can only hold a 32-bit address,
    /// so this is also the only way to express its out-of-image cases portably.
    pub(crate) fn tls_array_va(mut self, va: u64) -> Self {
        self.tls = Some(Vec::new());
        self.tls_array_va = Some(va);
        self
    }

    /// Corruption knob: a TLS callback array with no terminator before the end of
    /// the image.
    pub(crate) fn tls_unterminated(mut self) -> Self {
        self.tls = Some(Vec::new());
        self.tls_unterminated = true;
        self
    }

    fn optional_header_size(&self) -> usize {
        match self.kind {
            PeKind::Pe32 => 224,
            PeKind::Pe64 => 240,
        }
    }

    fn assemble(&self) -> Vec<u8> {
        let mut data = vec![0u8; DEFAULT_SIZE];
        let width = self.kind.thunk_size();

        put(&mut data, 0, DOS_MAGIC);
        put(&mut data, 0x3C, E_LFANEW as u32);
        put(&mut data, E_LFANEW, NT_SIGNATURE);

        let file_header = E_LFANEW + 4;
        let machine: u16 = match self.kind {
            PeKind::Pe32 => 0x014C,
            PeKind::Pe64 => 0x8664,
        };
        let section_count = self
            .section_count_override
            .unwrap_or(self.sections.len() as u16);
        put(&mut data, file_header, machine);
        put(&mut data, file_header + 2, section_count);
        put(
            &mut data,
            file_header + 16,
            self.optional_header_size() as u16,
        );
        put(&mut data, file_header + 18, 0x0022_u16);

        let optional = file_header + 20;
        let magic: u16 = match self.kind {
            PeKind::Pe32 => 0x10B,
            PeKind::Pe64 => 0x20B,
        };
        put(&mut data, optional, magic);
        put(&mut data, optional + 16, self.entry_point_rva);
        put(
            &mut data,
            optional + 56,
            self.declared_size.unwrap_or(DEFAULT_SIZE as u32),
        );

        let (count_offset, directories) = match self.kind {
            PeKind::Pe32 => (92, 96),
            PeKind::Pe64 => (108, 112),
        };
        put(&mut data, optional + count_offset, 16_u32);

        if !self.imports.is_empty() {
            put(&mut data, optional + directories + 8, IMPORT_DESC_RVA as u32);
            put(
                &mut data,
                optional + directories + 12,
                ((self.imports.len() + 1) * 20) as u32,
            );
        }
        if self.tls.is_some() {
            put(&mut data, optional + directories + 8 * 9, TLS_DIR_RVA as u32);
            put(
                &mut data,
                optional + directories + 8 * 9 + 4,
                match self.kind {
                    PeKind::Pe32 => 24_u32,
                    PeKind::Pe64 => 40_u32,
                },
            );
        }

        let table = optional + self.optional_header_size();
        for (index, section) in self.sections.iter().enumerate() {
            let record = table + index * 40;
            let name_len = section.name.len().min(8);
            data[record..record + name_len].copy_from_slice(&section.name[..name_len]);
            put(&mut data, record + 8, section.virtual_size);
            put(&mut data, record + 12, section.virtual_address);
            put(&mut data, record + 36, 0x4000_0040_u32);
        }

        let mut name_cursor = IMPORT_NAMES_RVA;
        let mut lookup_cursor = IMPORT_LOOKUP_RVA;
        let mut iat_cursor = IMPORT_IAT_RVA;
        for (index, import) in self.imports.iter().enumerate() {
            let descriptor = IMPORT_DESC_RVA + index * 20;
            put(&mut data, descriptor, lookup_cursor as u32);
            put(&mut data, descriptor + 12, name_cursor as u32);
            put(&mut data, descriptor + 16, iat_cursor as u32);

            let name = import.module.as_bytes();
            data[name_cursor..name_cursor + name.len()].copy_from_slice(name);
            name_cursor += name.len() + 1;

            for (entry_index, entry) in import.entries.iter().enumerate() {
                let lookup = match entry.lookup {
                    LookupSpec::Name => (0x0001_0000 + (index << 8) + entry_index * 8) as u64,
                    LookupSpec::Ordinal(ordinal) => {
                        let flag = match self.kind {
                            PeKind::Pe32 => 0x8000_0000_u64,
                            PeKind::Pe64 => 0x8000_0000_0000_0000_u64,
                        };
                        flag | u64::from(ordinal)
                    }
                };
                put_thunk(&mut data, lookup_cursor, width, lookup);
                put_thunk(&mut data, iat_cursor, width, entry.bound);
                lookup_cursor += width;
                iat_cursor += width;
            }

            // null terminators for both arrays (bytes are already zero)
            lookup_cursor += width;
            iat_cursor += width;
        }

        if self.tls_unterminated {
            for byte in &mut data[TLS_CALLBACKS_RVA..] {
                *byte = 0x01;
            }
        } else if let Some(callbacks) = &self.tls {
            let mut cursor = TLS_CALLBACKS_RVA;
            for &callback in callbacks {
                put_thunk(&mut data, cursor, width, callback);
                cursor += width;
            }
        }

        data
    }

    /// Patch the absolute-address fields once the buffer's final address is known.
    fn finalize(&self, data: &mut [u8], base: usize) {
        if self.tls.is_some() {
            let array = self
                .tls_array_va
                .unwrap_or((base + TLS_CALLBACKS_RVA) as u64);
            match self.kind {
                PeKind::Pe32 => put(data, TLS_DIR_RVA + 12, array as u32),
                PeKind::Pe64 => put(data, TLS_DIR_RVA + 24, array),
            }
        }
    }

    /// The raw bytes, fixups applied against the vector's current address.
    pub(crate) fn build_vec(&self) -> Vec<u8> {
        let mut data = self.assemble();
        let base = data.as_ptr() as usize;
        self.finalize(&mut data, base);
        data
    }

    /// A parsed [`Image`] over the assembled buffer.
    pub(crate) fn build_image(&self) -> Image {
        Image::from_memory(self.build_vec()).expect("synthetic image must parse")
    }

    /// The assembled buffer pinned in a box, for base-address style access.
    pub(crate) fn build_pinned(&self) -> PinnedImage {
        let mut data = self.assemble().into_boxed_slice();
        let base = data.as_ptr() as usize;
        self.finalize(&mut data, base);
        PinnedImage { data }
    }
}

/// An assembled image pinned at a stable address, standing in for a loader mapping.
pub(crate) struct PinnedImage {
    data: Box<[u8]>,
}

impl PinnedImage {
    pub(crate) fn from_bytes(data: Vec<u8>) -> PinnedImage {
        PinnedImage {
            data: data.into_boxed_slice(),
        }
    }

    pub(crate) fn base(&self) -> usize {
        self.data.as_ptr() as usize
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Read an 8-byte value back out, for asserting on patched slots.
    pub(crate) fn read_u64(&self, offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }
}

struct FakeModule {
    name: String,
    path: Option<PathBuf>,
    image: PinnedImage,
}

/// Loader fake over a fixed set of pinned images.
pub(crate) struct FakeLoader {
    modules: Vec<FakeModule>,
    freed: Cell<usize>,
}

impl FakeLoader {
    pub(crate) fn new() -> FakeLoader {
        FakeLoader {
            modules: Vec::new(),
            freed: Cell::new(0),
        }
    }

    pub(crate) fn module(mut self, name: &str, image: PinnedImage) -> Self {
        self.modules.push(FakeModule {
            name: name.to_string(),
            path: None,
            image,
        });
        self
    }

    pub(crate) fn module_with_path(mut self, name: &str, path: &str, image: PinnedImage) -> Self {
        self.modules.push(FakeModule {
            name: name.to_string(),
            path: Some(PathBuf::from(path)),
            image,
        });
        self
    }

    /// A "module" whose mapping is arbitrary bytes, for invalid-image cases.
    pub(crate) fn raw_module(self, name: &str, data: Vec<u8>) -> Self {
        self.module(name, PinnedImage::from_bytes(data))
    }

    pub(crate) fn freed(&self) -> usize {
        self.freed.get()
    }

    fn lookup(&self, name: &str) -> usize {
        self.modules
            .iter()
            .find(|module| module.name.eq_ignore_ascii_case(name))
            .map_or(0, |module| module.image.base())
    }
}

// Safety: every non-zero base handed out is the address of a pinned, owned buffer
// that lives as long as the loader itself.
unsafe impl Loader for FakeLoader {
    fn load(&self, name: &str) -> usize {
        self.lookup(name)
    }

    fn find(&self, name: &str) -> usize {
        self.lookup(name)
    }

    fn owner_of(&self, address: usize) -> usize {
        self.modules
            .iter()
            .find(|module| {
                let base = module.image.base();
                address >= base && address < base + module.image.len()
            })
            .map_or(0, |module| module.image.base())
    }

    fn main_module(&self) -> usize {
        self.modules.first().map_or(0, |module| module.image.base())
    }

    fn free(&self, _base: usize) {
        self.freed.set(self.freed.get() + 1);
    }

    fn path_of(&self, base: usize) -> Option<PathBuf> {
        self.modules
            .iter()
            .find(|module| module.image.base() == base)
            .and_then(|module| module.path.clone())
    }
}

/// Export-resolver fake over explicit (module base, name/ordinal) tables.
pub(crate) struct FakeResolver {
    names: HashMap<(usize, String), usize>,
    ordinals: HashMap<(usize, u16), usize>,
}

impl FakeResolver {
    pub(crate) fn new() -> FakeResolver {
        FakeResolver {
            names: HashMap::new(),
            ordinals: HashMap::new(),
        }
    }

    pub(crate) fn export(mut self, module_base: usize, symbol: &str, address: usize) -> Self {
        self.names.insert((module_base, symbol.to_string()), address);
        self
    }

    pub(crate) fn ordinal(mut self, module_base: usize, ordinal: u16, address: usize) -> Self {
        self.ordinals.insert((module_base, ordinal), address);
        self
    }
}

impl ExportResolver for FakeResolver {
    fn by_name(&self, module: &Module<'_>, symbol: &str) -> Option<usize> {
        self.names
            .get(&(module.base(), symbol.to_string()))
            .copied()
    }

    fn by_ordinal(&self, module: &Module<'_>, ordinal: u16) -> Option<usize> {
        self.ordinals.get(&(module.base(), ordinal)).copied()
    }
}

/// What a [`RecordingProtection`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtectionEvent {
    MakeWritable {
        base: usize,
        len: usize,
    },
    Restore {
        base: usize,
        len: usize,
        token: ProtectionToken,
    },
}

/// Protection fake that records every call.
pub(crate) struct RecordingProtection {
    events: RefCell<Vec<ProtectionEvent>>,
    refuse: bool,
}

impl RecordingProtection {
    /// The fake "prior protection" value handed out and expected back.
    pub(crate) const PRIOR: ProtectionToken = ProtectionToken(0x20);

    pub(crate) fn new() -> RecordingProtection {
        RecordingProtection {
            events: RefCell::new(Vec::new()),
            refuse: false,
        }
    }

    /// A protection capability that refuses every change.
    pub(crate) fn refusing() -> RecordingProtection {
        RecordingProtection {
            refuse: true,
            ..RecordingProtection::new()
        }
    }

    pub(crate) fn events(&self) -> Vec<ProtectionEvent> {
        self.events.borrow().clone()
    }
}

impl MemoryProtection for RecordingProtection {
    fn make_writable(&self, base: usize, len: usize) -> Option<ProtectionToken> {
        self.events
            .borrow_mut()
            .push(ProtectionEvent::MakeWritable { base, len });
        (!self.refuse).then_some(Self::PRIOR)
    }

    fn restore(&self, base: usize, len: usize, token: ProtectionToken) -> bool {
        self.events
            .borrow_mut()
            .push(ProtectionEvent::Restore { base, len, token });
        true
    }
}

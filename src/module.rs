//! Module handles and the collaborator seams around them.
//!
//! A [`Module`] is an opaque reference to a loaded image: a base address plus the
//! [`Loader`] that produced it. It owns nothing (the backing image's lifetime is
//! governed by the OS loader), and every query about it is a pure function of the
//! bytes mapped at its base.
//!
//! The OS-specific capabilities this crate deliberately does not implement live
//! behind traits at this seam:
//!
//! - [`Loader`] - acquiring and releasing module handles, resolving the module that
//!   owns an address, and mapping a handle back to its on-disk path.
//! - [`ExportResolver`] - resolving an exported symbol's absolute address by name or
//!   by ordinal within some module.
//!
//! # Sentinel contract
//!
//! A `Module` may be invalid (null base, or garbage where the DOS magic should be):
//! constructors "fail" by producing such a handle, matching loader semantics. Every
//! query on an invalid handle returns its empty/`None`/zero sentinel instead of an
//! error, so callers check results, not exceptions.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modscope::{Loader, Module};
//!
//! fn dump(loader: &dyn Loader) {
//!     let module = Module::current(loader);
//!     if !module.is_valid() {
//!         return;
//!     }
//!     for section in module.sections() {
//!         println!("{:8} {:#010x}", section.name_str(), section.virtual_address);
//!     }
//! }
//! ```

use std::path::PathBuf;

use log::debug;

use crate::{
    checksum::file_checksum,
    image::{DosHeader, IatSlot, Image, SectionHeader},
    protect::{MemoryProtection, WritableImage},
};

/// Size of the validity probe: just the DOS header.
const VALIDITY_PROBE: usize = 0x40;

/// The OS loader capability this crate builds on.
///
/// Handles are plain base addresses with `0` as the invalid sentinel, matching how
/// loaders report failure ("fails silently to an invalid handle").
///
/// # Safety
///
/// Implementations guarantee that every non-zero base they return is the start of a
/// readable, page-granular mapping holding a loaded image, and that it stays mapped
/// until passed to [`Loader::free`]. The crate dereferences these bases (validity
/// probes, header parsing), so a loader handing out dangling addresses is undefined
/// behavior, which is why the trait is `unsafe` to implement.
pub unsafe trait Loader {
    /// Load the named module, returning its base or 0 on failure. May increment the
    /// module's reference count, to be released with [`Loader::free`].
    fn load(&self, name: &str) -> usize;

    /// Find an already-loaded module by name without affecting its reference count,
    /// returning its base or 0.
    fn find(&self, name: &str) -> usize;

    /// Resolve the base of the module whose mapping contains `address`, without
    /// affecting its reference count. 0 if no module owns the address.
    fn owner_of(&self, address: usize) -> usize;

    /// The base of the current process's main image, or 0.
    fn main_module(&self) -> usize;

    /// Release a handle previously returned by [`Loader::load`].
    fn free(&self, base: usize);

    /// The filesystem path of the module's backing file, if the loader knows it.
    fn path_of(&self, base: usize) -> Option<PathBuf>;
}

/// Export resolution capability: mapping a symbol name or ordinal to the absolute
/// address it is exported at within a given module.
pub trait ExportResolver {
    /// Resolve `symbol` within `module`, returning its absolute address.
    fn by_name(&self, module: &Module<'_>, symbol: &str) -> Option<usize>;

    /// Resolve export `ordinal` within `module`, returning its absolute address.
    fn by_ordinal(&self, module: &Module<'_>, ordinal: u16) -> Option<usize>;
}

/// An opaque reference to a loaded module: base address plus originating loader.
///
/// Copyable and cheap; compares equal by base address alone.
#[derive(Clone, Copy)]
pub struct Module<'l> {
    base: usize,
    loader: &'l dyn Loader,
}

impl<'l> Module<'l> {
    /// Load a module by name. On failure the returned handle is invalid; no error is
    /// raised.
    pub fn load(loader: &'l dyn Loader, name: &str) -> Module<'l> {
        Module {
            base: loader.load(name),
            loader,
        }
    }

    /// Reference an already-loaded module by name, without extending its lifetime.
    pub fn named(loader: &'l dyn Loader, name: &str) -> Module<'l> {
        Module {
            base: loader.find(name),
            loader,
        }
    }

    /// Reference the module owning an arbitrary code or data address, without
    /// extending its lifetime.
    pub fn from_address(loader: &'l dyn Loader, address: usize) -> Module<'l> {
        Module {
            base: loader.owner_of(address),
            loader,
        }
    }

    /// Reference the current process's main image.
    pub fn current(loader: &'l dyn Loader) -> Module<'l> {
        Module {
            base: loader.main_module(),
            loader,
        }
    }

    /// The module's base address; 0 for an invalid handle.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// The DOS header view at the module base, read without a validity gate.
    ///
    /// The bytes there may be garbage; callers must check [`DosHeader::magic`]
    /// before trusting [`DosHeader::nt_offset`]. `None` only for a null handle.
    #[must_use]
    pub fn dos_header(&self) -> Option<DosHeader> {
        if self.base == 0 {
            return None;
        }

        // Safety: per the Loader contract, a non-zero base is readable at page granularity,
        // which covers the 0x40-byte DOS header.
        let probe = unsafe { std::slice::from_raw_parts(self.base as *const u8, VALIDITY_PROBE) };
        DosHeader::read(probe).ok()
    }

    /// `true` if the base is non-null and the mapping starts with the DOS magic.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.dos_header()
            .map_or(false, |header| header.is_valid())
    }

    /// Parse the module's image. `None` on an invalid handle or an unparseable
    /// mapping.
    #[must_use]
    pub fn image(&self) -> Option<Image> {
        if !self.is_valid() {
            return None;
        }

        // Safety: Loader contract, see `is_valid`.
        unsafe { Image::from_base(self.base) }.ok()
    }

    /// Release the handle via the loader and invalidate it. No-op when already
    /// invalid.
    pub fn free(&mut self) {
        if self.is_valid() {
            self.loader.free(self.base);
            self.base = 0;
        }
    }

    /// The filesystem path of the module's backing file.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        if !self.is_valid() {
            return None;
        }
        self.loader.path_of(self.base)
    }

    /// The file name of the module's backing file.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.path()?
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// The directory the module's backing file lives in.
    #[must_use]
    pub fn folder(&self) -> Option<PathBuf> {
        self.path()?.parent().map(PathBuf::from)
    }

    /// RVA of the module's entry point; 0 on an invalid handle.
    #[must_use]
    pub fn entry_point_rva(&self) -> u32 {
        self.image().map_or(0, |image| image.entry_point_rva())
    }

    /// Absolute address of the module's entry point; `None` on an invalid handle.
    #[must_use]
    pub fn entry_point(&self) -> Option<usize> {
        self.image().map(|image| image.entry_point())
    }

    /// The module's section table in stored order; empty on an invalid handle.
    #[must_use]
    pub fn sections(&self) -> Vec<SectionHeader> {
        self.image().map(|image| image.sections()).unwrap_or_default()
    }

    /// The module's TLS initializer callbacks in array order; empty on an invalid
    /// handle or without TLS use.
    #[must_use]
    pub fn tls_callbacks(&self) -> Vec<usize> {
        self.image()
            .map(|image| image.tls_callbacks().collect())
            .unwrap_or_default()
    }

    /// Locate the slot in this module's import address table bound to `symbol` as
    /// exported by `module_name`.
    ///
    /// Resolves the target via `resolver`, then performs the two-pass scan over this
    /// module's import tables (see [`crate::Image::locate_iat_slot`]). `None` when
    /// this handle is invalid, the target module is not loaded, the symbol does not
    /// resolve, or no slot is bound to it.
    pub fn iat_slot(
        &self,
        resolver: &dyn ExportResolver,
        module_name: &str,
        symbol: &str,
    ) -> Option<IatSlot> {
        let image = self.image()?;

        let target_module = Module::named(self.loader, module_name);
        if !target_module.is_valid() {
            debug!("import target module {module_name} is not loaded");
            return None;
        }

        let target = resolver.by_name(&target_module, symbol)?;
        debug!("resolved {module_name}!{symbol} to {target:#x}");

        image.locate_iat_slot(module_name, target, |ordinal| {
            resolver.by_ordinal(&target_module, ordinal)
        })
    }

    /// Byte-sum checksum of the module's backing file; 0 on an invalid handle or an
    /// unreadable file.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.path().map_or(0, file_checksum)
    }

    /// Request writability of the whole image range `[base, base + image_size)`.
    ///
    /// The returned [`WritableImage`] guard restores the prior protection when
    /// dropped; call [`WritableImage::leak`] to keep the range writable instead.
    /// `None` on an invalid handle (a no-op, per the sentinel contract) or when the
    /// protection change is refused.
    pub fn unprotect<'p>(
        &self,
        protection: &'p dyn MemoryProtection,
    ) -> Option<WritableImage<'p>> {
        let image = self.image()?;
        WritableImage::acquire(protection, image.base(), image.image_size() as usize)
    }
}

impl PartialEq for Module<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
    }
}

impl Eq for Module<'_> {}

impl std::fmt::Debug for Module<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("base", &format_args!("{:#x}", self.base))
            .field("valid", &self.is_valid())
            .finish()
    }
}

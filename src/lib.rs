// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'image/mapped.rs' builds a byte view over a live loader mapping
// - 'image/mod.rs' probes one page at a module base during bootstrap
// - 'module.rs' probes the DOS header for the validity predicate
// - 'patch.rs' writes through a raw slot address

//! # modscope
//!
//! [![Crates.io](https://img.shields.io/crates/v/modscope.svg)](https://crates.io/crates/modscope)
//! [![Documentation](https://docs.rs/modscope/badge.svg)](https://docs.rs/modscope)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/modscope/blob/main/LICENSE-APACHE)
//!
//! A cross-platform framework for introspecting and patching the import bindings of loaded
//! PE module images. Built in pure Rust, `modscope` parses the structural headers of an
//! image already mapped in memory (DOS header, NT/optional headers, section table),
//! enumerates its TLS initialization callbacks, and locates the one import-address-table
//! slot bound to a chosen export so that callers can redirect it.
//!
//! ## Features
//!
//! - **🔍 Bounds-checked header views** - every offset a hostile image controls is
//!   validated against the image extent before it is chased
//! - **🧵 TLS callback enumeration** - the null-terminated callback array as a finite,
//!   capped iterator
//! - **🎯 Import slot location** - the two-pass (bound address, then ordinal) search over
//!   import descriptors and their lock-step thunk tables
//! - **🔧 Cross-platform core** - parsing works on any Rust target; OS specifics live
//!   behind the [`Loader`], [`ExportResolver`] and [`MemoryProtection`] seams
//! - **🛡️ Scoped side effects** - image writability and slot patches are RAII guards
//!   that restore what they changed
//! - **📦 Borrowed, never owned** - images are views over memory the OS loader governs;
//!   nothing here allocates or frees a mapping
//!
//! ## Quick Start
//!
//! Add `modscope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! modscope = "0.2"
//! ```
//!
//! ### Using the Prelude
//!
//! For convenient access to the most commonly used types, import the prelude:
//!
//! ```rust,no_run
//! use modscope::prelude::*;
//!
//! fn redirect(loader: &dyn Loader, resolver: &dyn ExportResolver, hook: usize) {
//!     let module = Module::current(loader);
//!     if let Some(slot) = module.iat_slot(resolver, "kernel32.dll", "CreateFileW") {
//!         // Safety: the image was made writable and stays mapped
//!         let patch = unsafe { SlotPatch::apply(&slot, hook) };
//!         patch.commit();
//!     }
//! }
//! ```
//!
//! ### Basic Usage
//!
//! ```rust,no_run
//! use modscope::{Loader, Module};
//!
//! fn inspect(loader: &dyn Loader) {
//!     let module = Module::current(loader);
//!     if !module.is_valid() {
//!         return;
//!     }
//!
//!     for section in module.sections() {
//!         println!("{:8} rva={:#010x}", section.name_str(), section.virtual_address);
//!     }
//!     for callback in module.tls_callbacks() {
//!         println!("TLS callback at {:#x}", callback);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! `modscope` is organized into a few focused pieces:
//!
//! - [`Image`] - bounds-checked view over an image in virtual layout, with the section,
//!   TLS and import table walks
//! - [`Module`] - opaque handle (base address + [`Loader`]) with sentinel-returning
//!   queries; invalid handles yield empty/`None`/zero, never errors
//! - [`SlotPatch`] / [`WritableImage`] - scoped mutation: patches restore the original
//!   binding on drop, protection changes restore the prior protection on drop
//! - [`checksum`] - byte-sum fingerprint of a module's backing file
//! - [`Error`] and [`Result`] - error handling for the parsing layer
//!
//! ## The collaborator seams
//!
//! Acquiring module handles, resolving exports and flipping page protection are OS
//! loader capabilities, not image parsing; they enter through the [`Loader`],
//! [`ExportResolver`] and [`MemoryProtection`] traits so the core stays portable and
//! testable against synthetic images.
//!
//! ## Concurrency model
//!
//! All operations are synchronous. Locating a slot is read-only; the mutations the
//! guards perform are process-global, unsynchronized side effects; a concurrent reader
//! of a slot being patched may observe a torn value, and callers needing atomicity must
//! serialize externally.

#[macro_use]
pub(crate) mod error;
pub(crate) mod image;
pub(crate) mod module;
pub(crate) mod patch;
pub(crate) mod protect;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use modscope::prelude::*;
///
/// fn entry(loader: &dyn Loader) -> Option<usize> {
///     Module::current(loader).entry_point()
/// }
/// ```
pub mod prelude;

/// Backing-file content checksum.
///
/// See [`checksum::file_checksum`] and [`checksum::content_checksum`].
pub mod checksum;

/// `modscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. This is used consistently throughout the crate for all fallible
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `modscope` Error type
///
/// The main error type for all operations in this crate. Handle-level queries on
/// [`Module`] do not surface it (they sentinel instead); image construction and the
/// byte-level readers do.
pub use error::Error;

/// Bounds-checked view over a loaded image in virtual layout.
///
/// # Example
///
/// ```rust,no_run
/// use modscope::Image;
///
/// let image = Image::from_memory(std::fs::read("dump.bin")?)?;
/// println!("{} sections", image.sections().len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub use image::Image;

/// Byte sources an [`Image`] can be viewed over.
pub use image::{Backend, Mapped, Memory, Physical};

/// Typed views over the fixed PE/COFF headers and their constants.
pub use image::{
    DataDirectory, DirectoryType, DosHeader, FileHeader, OptionalHeader, PeKind,
    SectionCharacteristics, SectionHeader, DOS_MAGIC, NT_SIGNATURE,
};

/// Import table structures and the located, patchable slot.
pub use image::{IatSlot, ImportDescriptor, Imports, ThunkPair, Thunks};

/// TLS callback enumeration.
pub use image::TlsCallbacks;

/// Provides access to the low-level byte parsing utilities.
///
/// # Example
///
/// ```rust
/// use modscope::Parser;
///
/// let data = [0x4D, 0x5A];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_le::<u16>()?, modscope::DOS_MAGIC);
/// # Ok::<(), modscope::Error>(())
/// ```
pub use image::parser::Parser;

/// Module handles and the collaborator seams around them.
pub use module::{ExportResolver, Loader, Module};

/// Scoped import-slot patching.
pub use patch::SlotPatch;

/// Scoped image-writability capability.
pub use protect::{MemoryProtection, ProtectionToken, WritableImage};

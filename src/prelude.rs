//! # modscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits, allowing a single glob import to bring the working set into scope.
//!
//! # Example
//!
//! ```rust,no_run
//! use modscope::prelude::*;
//!
//! fn locate(loader: &dyn Loader, resolver: &dyn ExportResolver) -> Option<IatSlot> {
//!     Module::current(loader).iat_slot(resolver, "kernel32.dll", "GetProcAddress")
//! }
//! ```

pub use crate::{
    checksum::{content_checksum, file_checksum},
    DirectoryType, Error, ExportResolver, IatSlot, Image, Loader, MemoryProtection, Module,
    PeKind, Result, SectionHeader, SlotPatch, WritableImage,
};

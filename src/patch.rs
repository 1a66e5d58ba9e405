//! Scoped import-slot patching.
//!
//! [`crate::Image::locate_iat_slot`] hands back an [`crate::IatSlot`], the address
//! of the one IAT entry bound to the export the caller wants to intercept. The
//! mutation itself goes through [`SlotPatch`]: applying a patch captures the slot's
//! original value and installs the replacement; dropping the patch restores the
//! original, so a hook cannot outlive the code that installed it by accident.
//! Keeping the redirection installed is an explicit [`SlotPatch::commit`].
//!
//! Writes are plain unaligned stores. Per the image's concurrency model they are
//! unsynchronized: a thread calling through the IAT while the patch lands may
//! observe a torn value, and callers needing atomicity must serialize externally.

use crate::image::{IatSlot, PeKind};

/// RAII handle over one patched import-address-table slot.
///
/// Created by [`SlotPatch::apply`]. Holds the original bound value; unless
/// [`committed`](SlotPatch::commit), dropping the handle writes the original back.
///
/// # Examples
///
/// ```rust,no_run
/// use modscope::SlotPatch;
/// # let slot: modscope::IatSlot = unimplemented!();
/// # let hook_address: usize = 0;
///
/// // Safety: slot was located in a live image made writable beforehand
/// let patch = unsafe { SlotPatch::apply(&slot, hook_address) };
/// // ... intercepted calls flow to `hook_address` ...
/// drop(patch); // original binding restored
/// ```
pub struct SlotPatch {
    address: usize,
    kind: PeKind,
    original: u64,
    armed: bool,
}

impl SlotPatch {
    /// Install `replacement` into the slot, capturing the value it held.
    ///
    /// For a PE32 image the slot is 4 bytes wide and `replacement` is truncated to
    /// 32 bits.
    ///
    /// # Safety
    ///
    /// The slot's address must be valid for reads and writes of the slot width for
    /// the lifetime of the returned handle; for a live module that means the image
    /// was made writable (see [`crate::Module::unprotect`]) and stays mapped.
    /// Concurrent readers of the slot are not synchronized against.
    #[must_use]
    pub unsafe fn apply(slot: &IatSlot, replacement: usize) -> SlotPatch {
        let original = Self::read(slot.va, slot.kind);
        Self::write(slot.va, slot.kind, replacement as u64);

        SlotPatch {
            address: slot.va,
            kind: slot.kind,
            original,
            armed: true,
        }
    }

    /// The value the slot held before the patch.
    #[must_use]
    pub fn original(&self) -> u64 {
        self.original
    }

    /// The patched slot's absolute address.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Keep the replacement installed: consume the handle without restoring the
    /// original value.
    pub fn commit(mut self) {
        self.armed = false;
    }

    unsafe fn read(address: usize, kind: PeKind) -> u64 {
        match kind {
            PeKind::Pe32 => u64::from((address as *const u32).read_unaligned()),
            PeKind::Pe64 => (address as *const u64).read_unaligned(),
        }
    }

    unsafe fn write(address: usize, kind: PeKind, value: u64) {
        match kind {
            PeKind::Pe32 => (address as *mut u32).write_unaligned(value as u32),
            PeKind::Pe64 => (address as *mut u64).write_unaligned(value),
        }
    }
}

impl Drop for SlotPatch {
    fn drop(&mut self) {
        if self.armed {
            // Safety: upheld by the contract of `apply` for the handle's lifetime
            unsafe { Self::write(self.address, self.kind, self.original) };
        }
    }
}

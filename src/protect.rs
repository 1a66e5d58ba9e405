//! Scoped image-writability capability.
//!
//! Locating an import slot is read-only; installing a redirection writes to memory
//! the loader mapped read-execute. The protection change that enables the write is a
//! process-wide side effect, so instead of a one-way "unprotect" call this crate
//! models it as a capability ([`MemoryProtection`], implemented by the embedder over
//! whatever the platform offers) and a guard ([`WritableImage`]) that restores the
//! prior protection when it goes out of scope.
//!
//! Leaving the image writable on purpose (the behavior of the one-way call this
//! replaces) is still expressible, but must be said out loud via
//! [`WritableImage::leak`].

use log::warn;

/// A prior-protection value as reported by the platform, round-tripped opaquely
/// between [`MemoryProtection::make_writable`] and [`MemoryProtection::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionToken(
    /// The raw prior-protection value, meaningful only to the capability that
    /// produced it.
    pub u32,
);

/// Platform capability for changing memory protection on a mapped range.
///
/// All addresses are absolute; `len` is in bytes and implementations round to page
/// granularity as their platform requires. No synchronization is implied: flipping
/// protection under code that is concurrently executing from the range is the
/// caller's hazard to manage.
pub trait MemoryProtection {
    /// Make `[base, base + len)` readable, writable and executable. Returns the
    /// prior protection for later restoration, or `None` if the change was refused.
    fn make_writable(&self, base: usize, len: usize) -> Option<ProtectionToken>;

    /// Restore a prior protection over `[base, base + len)`. Returns `false` if the
    /// restoration failed.
    fn restore(&self, base: usize, len: usize, token: ProtectionToken) -> bool;
}

/// RAII guard over a temporarily writable image range.
///
/// Obtained from [`crate::Module::unprotect`]. While the guard lives, the whole
/// image range it covers is writable; dropping it restores the protection captured
/// at acquisition. A failed restoration is logged, not raised; by then the write
/// has already happened and the caller's cleanup path must not panic.
pub struct WritableImage<'p> {
    protection: &'p dyn MemoryProtection,
    base: usize,
    len: usize,
    token: Option<ProtectionToken>,
}

impl<'p> WritableImage<'p> {
    /// Acquire writability over `[base, base + len)`, capturing the prior
    /// protection.
    pub(crate) fn acquire(
        protection: &'p dyn MemoryProtection,
        base: usize,
        len: usize,
    ) -> Option<WritableImage<'p>> {
        protection
            .make_writable(base, len)
            .map(|token| WritableImage {
                protection,
                base,
                len,
                token: Some(token),
            })
    }

    /// Start of the writable range.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Length of the writable range in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the guarded range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Keep the range writable: consume the guard without restoring the prior
    /// protection. This reproduces the irreversible behavior of a bare unprotect
    /// call; undoing it becomes the caller's problem.
    pub fn leak(mut self) {
        self.token = None;
    }
}

impl Drop for WritableImage<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if !self.protection.restore(self.base, self.len, token) {
                warn!(
                    "failed to restore protection over [{:#x}, {:#x})",
                    self.base,
                    self.base + self.len
                );
            }
        }
    }
}

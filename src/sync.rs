//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections and the semaphore lock byte. Every
//! thread-mode mutation of scheduler state goes through
//! [`critical_section`] so that it appears atomic to the tick and switch
//! handlers. On the host (unit tests) the masking collapses to plain
//! closure calls; tests drive the kernel single-threaded.

use core::sync::atomic::{AtomicU8, Ordering};

/// Execute a closure with interrupts disabled.
///
/// Keep the body short: everything in it runs with the tick and switch
/// handlers locked out.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_| f())
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// Disable interrupts (set PRIMASK), stopping preemption outright.
#[inline]
pub fn mask() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::interrupt::disable();
}

/// Re-enable interrupts (clear PRIMASK).
///
/// # Safety
/// Must pair with a preceding [`mask`]; enabling interrupts inside someone
/// else's critical section breaks their atomicity.
#[inline]
pub unsafe fn unmask() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::interrupt::enable();
}

// ---------------------------------------------------------------------------
// Lock byte
// ---------------------------------------------------------------------------

const UNLOCKED: u8 = 0x00;
const LOCKED: u8 = 0xFF;

/// One-byte lock guarding a semaphore's value and wait queue.
///
/// Acquisition masks interrupts for the duration of the hold, then claims
/// the byte with a compare-and-swap. Masking first means a holder can
/// neither be preempted nor interrupted mid-update, so the CAS never spins
/// in practice; it remains as a cheap tripwire for re-entry bugs. The
/// guard releases the byte and restores the interrupt state on every exit
/// path.
pub(crate) struct LockByte(AtomicU8);

impl LockByte {
    pub const fn new() -> Self {
        Self(AtomicU8::new(UNLOCKED))
    }

    /// Acquire the lock, returning a guard that releases on drop.
    pub fn acquire(&self) -> LockGuard<'_> {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        let restore = {
            let was_active = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            was_active
        };
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        let restore = false;

        while self
            .0
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        LockGuard {
            byte: &self.0,
            restore,
        }
    }

    /// Whether the lock is currently held. Diagnostics only.
    #[allow(dead_code)]
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Relaxed) == LOCKED
    }
}

/// Scoped hold of a [`LockByte`].
pub(crate) struct LockGuard<'a> {
    byte: &'a AtomicU8,
    restore: bool,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.byte.store(UNLOCKED, Ordering::Release);
        if self.restore {
            // The lock was taken with interrupts enabled; give them back.
            unsafe { unmask() };
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

//! # Error Codes
//!
//! Status values returned by the thread-mode kernel API. Handler-mode code
//! never reports errors to a caller; invariant violations there go through
//! [`crate::kernel::fatal`] instead.

/// Kernel status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Invalid parameter: out-of-range priority, stale or foreign handle,
    /// destroy of a semaphore with queued waiters.
    BadParam,
    /// Allocation failure: TCB arena exhausted or the kernel heap could not
    /// satisfy a stack or control-block request.
    NoMem,
    /// Resource already claimed (e.g. the core peripherals were taken before
    /// `rtos_start`).
    InUse,
    /// Hardware-level failure reported by a collaborator.
    Device,
    /// The requested feature is not implemented in this build.
    NotSupported,
    /// A timed `semaphore_pend` elapsed without a post. This is a documented
    /// status, not a failure of the primitive: the semaphore value was not
    /// consumed.
    Timeout,
    /// The kernel has not been started yet.
    NotInit,
    /// Scheduler misuse (starting twice) or a detected scheduler invariant
    /// violation.
    Scheduler,
}

/// Convenience alias used throughout the kernel.
pub type Result<T> = core::result::Result<T, KernelError>;

//! # Task Control Block
//!
//! Per-task kernel state. TCBs live in a fixed arena inside the kernel
//! singleton; a task handle is an opaque index into that arena. Queue
//! membership is threaded through two intrusive links embedded here: `link`
//! for the scheduler's state queues (ready/delayed/blocked/exited) and
//! `wait_link` for a semaphore's wait queue. Each link puts the TCB in at
//! most one list at a time, and the scheduler keeps `state` in agreement
//! with which queue holds the task.

use core::ptr::NonNull;

use crate::config::{DEFAULT_PRIORITY, DEFAULT_STACK_SIZE, STACK_GUARD_FILL, STACK_GUARD_SIZE};
use crate::list::Link;
use crate::semaphore::SemaphoreState;

/// Task entry point. The argument rides in r0 per the AAPCS, so the
/// signature is fixed to the C ABI. Returning from the entry function
/// terminates the task cleanly through the exit trampoline.
pub type TaskEntry = extern "C" fn(arg: *mut ());

/// Smallest stack the kernel will accept: room for the guard pad, the
/// initial exception frame, and a little headroom.
pub(crate) const MIN_STACK_SIZE: usize = STACK_GUARD_SIZE + 128;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///          create
///            │
///            ▼
///         READY ◄──────────────┐
///          ▲ │                 │ unblock /
/// schedule │ │ schedule        │ delay elapsed
///          │ ▼                 │
///        ACTIVE ── delay ──► DELAYED
///          │ │
///          │ └──── block ──► BLOCKED ──┘
///          │
///          └─ exit/destroy ─► EXITED ──(reap)──► slot freed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable, waiting in the ready queue of its priority.
    Ready,
    /// Currently executing in thread mode. Exactly one task is Active while
    /// the kernel runs, and it is in no queue.
    Active,
    /// Waiting out a tick count in the delayed queue.
    Delayed,
    /// Waiting indefinitely in the blocked queue.
    Blocked,
    /// Terminated, awaiting the idle reaper in the exited queue.
    Exited,
}

/// Why a task is delayed or blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked.
    None,
    /// Waiting on a semaphore pend.
    Semaphore,
    /// Waiting out a plain `task_delay`.
    Timer,
}

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// Creation-time task parameters.
///
/// The default configuration mirrors what the kernel assumes when a field
/// is left alone: no caller stack (the kernel allocates one of
/// `DEFAULT_STACK_SIZE` bytes), `DEFAULT_PRIORITY`, empty name.
pub struct TaskConfig {
    /// Caller-provided stack buffer. When `None` the kernel allocates
    /// `stack_size` bytes from its heap and owns the memory.
    pub stack: Option<&'static mut [u8]>,
    /// Desired stack size in bytes. Ignored when `stack` is provided (the
    /// buffer's own length wins).
    pub stack_size: usize,
    /// Priority in `1..N_PRIORITIES`. Higher runs first; 0 is reserved for
    /// the idle task.
    pub priority: u8,
    /// Human-readable label used in diagnostics.
    pub name: Option<&'static str>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            stack: None,
            stack_size: DEFAULT_STACK_SIZE,
            priority: DEFAULT_PRIORITY,
            name: None,
        }
    }
}

/// Opaque handle to a created task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(pub(crate) usize);

// ---------------------------------------------------------------------------
// TCB
// ---------------------------------------------------------------------------

/// Task control block: one arena slot per task.
pub(crate) struct Tcb {
    /// Saved top of the task's stack while the task is not running.
    /// This is the contract with the context-switch handler, which stores
    /// the outgoing PSP here and loads the incoming one. Kept as the first
    /// field; nothing outside the switch path depends on its position.
    pub stack_pointer: *mut u32,
    /// Lowest address of the stack region (`stack_end` in the overflow
    /// bookkeeping: stacks grow down toward it).
    pub stack_base: *mut u8,
    /// Stack region size in bytes.
    pub stack_size: usize,
    /// Whether the kernel allocated the stack (and must release it on
    /// destroy) or the caller provided it.
    pub stack_owned: bool,
    /// Entry function. `None` only in a free slot.
    pub entry: Option<TaskEntry>,
    /// Opaque argument passed to the entry function.
    pub arg: *mut (),
    /// Diagnostic label.
    pub name: &'static str,
    /// Priority in `0..N_PRIORITIES`; 0 is the idle task.
    pub priority: u8,
    /// Scheduler state. Agrees with queue membership at all times.
    pub state: TaskState,
    /// Why the task left the ready set.
    pub block_reason: BlockReason,
    /// Ticks left on a delay. Meaningful while `state == Delayed`, and read
    /// back by a timed semaphore pend after a cancelled delay to decide how
    /// long is left to wait.
    pub delay_remaining: u32,
    /// Semaphore whose wait queue holds this task's `wait_link`, if any.
    /// Lets `task_destroy` detach the waiter record.
    pub waiting_on: Option<NonNull<SemaphoreState>>,
    /// Linkage for the ready/delayed/blocked/exited queues.
    pub link: Link,
    /// Linkage for a semaphore wait queue.
    pub wait_link: Link,
    /// Slot allocation flag.
    pub in_use: bool,
}

// Safety: TCBs contain raw pointers into stack memory and semaphore control
// blocks, but the arena is only reached through the kernel singleton, whose
// access is serialized by critical sections or handler mode.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Tcb {
    /// A free arena slot.
    pub const EMPTY: Tcb = Tcb {
        stack_pointer: core::ptr::null_mut(),
        stack_base: core::ptr::null_mut(),
        stack_size: 0,
        stack_owned: false,
        entry: None,
        arg: core::ptr::null_mut(),
        name: "",
        priority: 0,
        state: TaskState::Ready,
        block_reason: BlockReason::None,
        delay_remaining: 0,
        waiting_on: None,
        link: Link::EMPTY,
        wait_link: Link::EMPTY,
        in_use: false,
    };

    /// Claim this slot for a new task. The stack is attached separately.
    pub fn init(&mut self, entry: TaskEntry, arg: *mut (), name: &'static str, priority: u8) {
        self.entry = Some(entry);
        self.arg = arg;
        self.name = name;
        self.priority = priority;
        self.state = TaskState::Ready;
        self.block_reason = BlockReason::None;
        self.delay_remaining = 0;
        self.waiting_on = None;
        self.link = Link::EMPTY;
        self.wait_link = Link::EMPTY;
        self.in_use = true;
    }

    /// Attach the stack region and fill the overflow pad with the sentinel.
    pub fn attach_stack(&mut self, base: *mut u8, size: usize, owned: bool) {
        self.stack_base = base;
        self.stack_size = size;
        self.stack_owned = owned;
        if STACK_GUARD_SIZE > 0 {
            // The pad is the *low* end of the region: the last bytes a
            // descending stack would clobber before escaping entirely.
            unsafe { core::ptr::write_bytes(base, STACK_GUARD_FILL, STACK_GUARD_SIZE) };
        }
    }

    /// One past the highest address of the stack region; the initial top.
    #[inline]
    pub fn stack_start(&self) -> *mut u8 {
        self.stack_base.wrapping_add(self.stack_size)
    }

    /// First address above the overflow pad. A saved stack pointer at or
    /// below this means the task overflowed.
    #[inline]
    pub fn stack_soft_end(&self) -> *mut u8 {
        self.stack_base.wrapping_add(STACK_GUARD_SIZE)
    }

    /// Whether the saved stack pointer has entered the overflow pad.
    /// Meaningless (and false) until both a stack and a saved pointer
    /// exist.
    pub fn saved_sp_overflowed(&self) -> bool {
        STACK_GUARD_SIZE > 0
            && !self.stack_base.is_null()
            && !self.stack_pointer.is_null()
            && (self.stack_pointer as usize) <= (self.stack_soft_end() as usize)
    }

    /// Verify the sentinel bytes in the overflow pad.
    pub fn guard_intact(&self) -> bool {
        if STACK_GUARD_SIZE == 0 || self.stack_base.is_null() {
            return true;
        }
        (0..STACK_GUARD_SIZE)
            .all(|i| unsafe { self.stack_base.add(i).read_volatile() } == STACK_GUARD_FILL)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn nop_entry(_arg: *mut ()) {}

    #[test]
    fn init_claims_slot_in_ready_state() {
        let mut tcb = Tcb::EMPTY;
        assert!(!tcb.in_use);
        tcb.init(nop_entry, core::ptr::null_mut(), "worker", 3);
        assert!(tcb.in_use);
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.block_reason, BlockReason::None);
        assert_eq!(tcb.priority, 3);
        assert_eq!(tcb.name, "worker");
        assert!(!tcb.link.is_linked());
        assert!(!tcb.wait_link.is_linked());
    }

    #[test]
    fn attach_stack_fills_guard_with_sentinel() {
        let mut buf = [0u8; 256];
        let mut tcb = Tcb::EMPTY;
        tcb.init(nop_entry, core::ptr::null_mut(), "", 1);
        tcb.attach_stack(buf.as_mut_ptr(), buf.len(), false);
        assert!(tcb.guard_intact());
        for b in &buf[..STACK_GUARD_SIZE] {
            assert_eq!(*b, STACK_GUARD_FILL);
        }
        // The rest of the stack is untouched.
        assert_eq!(buf[STACK_GUARD_SIZE], 0);
    }

    #[test]
    fn guard_detects_overwrite() {
        let mut buf = [0u8; 256];
        let mut tcb = Tcb::EMPTY;
        tcb.init(nop_entry, core::ptr::null_mut(), "", 1);
        tcb.attach_stack(buf.as_mut_ptr(), buf.len(), false);
        buf[STACK_GUARD_SIZE / 2] = 0x00;
        assert!(!tcb.guard_intact());
    }

    #[test]
    fn saved_sp_bounds() {
        let mut buf = [0u8; 256];
        let mut tcb = Tcb::EMPTY;
        tcb.init(nop_entry, core::ptr::null_mut(), "", 1);
        tcb.attach_stack(buf.as_mut_ptr(), buf.len(), true);
        tcb.stack_pointer = tcb.stack_start().cast();
        assert!(!tcb.saved_sp_overflowed());
        tcb.stack_pointer = tcb.stack_soft_end().cast();
        assert!(tcb.saved_sp_overflowed());
        tcb.stack_pointer = tcb.stack_base.cast();
        assert!(tcb.saved_sp_overflowed());
    }

    #[test]
    fn default_config_matches_kernel_defaults() {
        let cfg = TaskConfig::default();
        assert!(cfg.stack.is_none());
        assert_eq!(cfg.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(cfg.priority, DEFAULT_PRIORITY);
        assert!(cfg.name.is_none());
    }
}

//! # Semaphores
//!
//! Counting and binary semaphores with FIFO waiter wakeup and optional
//! pend timeouts.
//!
//! Each semaphore guards its value and wait queue with its own
//! [`LockByte`](crate::sync::LockByte); the scoped guard masks interrupts
//! for the few instructions the lock is held, so posts may come from
//! interrupt handlers. The wait queue is threaded through the waiting
//! TCBs' embedded `wait_link`s — a task pends on at most one semaphore at
//! a time, so no waiter records are allocated.
//!
//! A post never consumes the value on a waiter's behalf. It wakes the head
//! waiter and lets it race for the value in its own critical section; a
//! timed waiter that loses the race goes back to sleep for whatever was
//! left of its timeout.

use core::ptr::NonNull;

use crate::error::{KernelError, Result};
use crate::kernel;
use crate::list::List;
use crate::sched::{Kernel, WaitLinks};
use crate::sync::LockByte;
use crate::task::BlockReason;
use crate::{arch, heap};

/// Semaphore flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreKind {
    /// Value counts up without bound.
    Counting,
    /// Value saturates at 1; surplus posts are dropped.
    Binary,
}

/// Semaphore control block. Heap-allocated; reached only through the
/// opaque handle.
pub(crate) struct SemaphoreState {
    pub lock: LockByte,
    pub kind: SemaphoreKind,
    pub value: u32,
    /// FIFO queue of waiting tasks, threaded through TCB `wait_link`s.
    pub waiters: List,
}

impl SemaphoreState {
    pub(crate) fn new(kind: SemaphoreKind, value: u32) -> Self {
        Self {
            lock: LockByte::new(),
            kind,
            value,
            waiters: List::EMPTY,
        }
    }
}

/// Opaque handle to a semaphore.
///
/// Copyable and shareable across tasks and interrupt handlers. The handle
/// stays valid until `semaphore_destroy`; using it afterwards is a caller
/// contract violation, as with any raw OS handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreHandle(pub(crate) NonNull<SemaphoreState>);

// Safety: the control block is interior-locked by its lock byte.
unsafe impl Send for SemaphoreHandle {}
unsafe impl Sync for SemaphoreHandle {}

// ---------------------------------------------------------------------------
// Creation / destruction
// ---------------------------------------------------------------------------

fn create(kind: SemaphoreKind, value: u32) -> Result<SemaphoreHandle> {
    let raw = heap::allocate(core::mem::size_of::<SemaphoreState>()).ok_or(KernelError::NoMem)?;
    let ptr = raw.cast::<SemaphoreState>();
    // Safety: freshly allocated, properly sized and aligned for the write.
    unsafe { ptr.as_ptr().write(SemaphoreState::new(kind, value)) };
    Ok(SemaphoreHandle(ptr))
}

/// Create a counting semaphore with the given starting value.
pub fn semaphore_create_counting(start: u32) -> Result<SemaphoreHandle> {
    create(SemaphoreKind::Counting, start)
}

/// Create a binary semaphore. Binary semaphores always start at 0.
pub fn semaphore_create_binary() -> Result<SemaphoreHandle> {
    create(SemaphoreKind::Binary, 0)
}

/// Destroy a semaphore.
///
/// Refused with `BadParam` while any task is waiting on it; the waiters
/// must be woken (or destroyed) first.
pub fn semaphore_destroy(sem: SemaphoreHandle) -> Result<()> {
    // Safety: handle validity is the caller's contract.
    let state = unsafe { &mut *sem.0.as_ptr() };
    {
        let _guard = state.lock.acquire();
        if !state.waiters.is_empty() {
            log::debug!("semaphore destroy refused: tasks are pending");
            return Err(KernelError::BadParam);
        }
    }
    // Safety: allocated by `create` with this exact size; no waiters can
    // appear between the check and here without a new pend on a handle
    // that is already contractually dead.
    unsafe { heap::release(sem.0.cast(), core::mem::size_of::<SemaphoreState>()) };
    Ok(())
}

// ---------------------------------------------------------------------------
// Pend / post cores
// ---------------------------------------------------------------------------
//
// The state transitions live in lock-held helper functions operating on
// explicit kernel and semaphore references, so the host test suite can
// drive the same code the target runs.

/// What one pass through the pend state machine decided.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PendOutcome {
    /// The value was consumed; the pend succeeded.
    Acquired,
    /// The timeout budget is exhausted; the pend failed without consuming.
    TimedOut,
    /// The task was queued and marked blocked or delayed; it must switch
    /// away and run another pass when it wakes.
    MustWait,
}

/// One pass of the pend state machine for `slot`. Called with the
/// semaphore lock held.
///
/// `first` distinguishes the initial pass (which uses `initial_ticks` as
/// the timeout budget) from a wake-up pass (which reads the unspent budget
/// back out of the TCB, where a cancelled delay left it).
pub(crate) fn pend_once(
    k: &mut Kernel,
    sem: &mut SemaphoreState,
    slot: usize,
    infinite: bool,
    initial_ticks: u32,
    first: bool,
) -> PendOutcome {
    if sem.value > 0 {
        sem.value -= 1;
        detach_waiter(k, sem, slot);
        return PendOutcome::Acquired;
    }
    if !infinite {
        let remaining = if first {
            initial_ticks
        } else {
            k.tcbs[slot].delay_remaining
        };
        if remaining == 0 {
            detach_waiter(k, sem, slot);
            return PendOutcome::TimedOut;
        }
        enqueue_waiter(k, sem, slot);
        k.delay_active(remaining, BlockReason::Semaphore);
    } else {
        enqueue_waiter(k, sem, slot);
        k.block_active(BlockReason::Semaphore);
    }
    PendOutcome::MustWait
}

/// Post core. Called with the semaphore lock held. Returns the woken slot,
/// if any waiter was dequeued.
pub(crate) fn post_locked(k: &mut Kernel, sem: &mut SemaphoreState) -> Option<usize> {
    if sem.kind == SemaphoreKind::Binary && sem.value == 1 {
        return None;
    }
    sem.value += 1;
    let head = sem.waiters.head()?;
    sem.waiters.remove(&mut WaitLinks(&mut k.tcbs), head);
    k.tcbs[head].waiting_on = None;
    // An indefinite waiter is parked on the blocked queue; a timed one is
    // on the delayed queue and keeps its unspent ticks for a possible
    // re-wait.
    if !k.unblock(head, BlockReason::Semaphore) {
        k.cancel_delay(head);
    }
    Some(head)
}

fn enqueue_waiter(k: &mut Kernel, sem: &mut SemaphoreState, slot: usize) {
    if !k.tcbs[slot].wait_link.is_linked() {
        sem.waiters.append(&mut WaitLinks(&mut k.tcbs), slot);
        k.tcbs[slot].waiting_on = Some(NonNull::from(&mut *sem));
    }
}

fn detach_waiter(k: &mut Kernel, sem: &mut SemaphoreState, slot: usize) {
    if k.tcbs[slot].wait_link.is_linked() {
        sem.waiters.remove(&mut WaitLinks(&mut k.tcbs), slot);
    }
    k.tcbs[slot].waiting_on = None;
}

// ---------------------------------------------------------------------------
// Public operations
// ---------------------------------------------------------------------------

/// Pend on a semaphore (P).
///
/// Decrements the value if it is positive, otherwise waits until a post
/// arrives. Waiters succeed in the order their pends blocked.
///
/// `timeout_ms` bounds the wait: a positive value gives up after roughly
/// that many milliseconds (the pend then returns `Timeout` without having
/// consumed anything); any value `<= 0` — canonically
/// [`TIMEOUT_INFINITE`](crate::config::TIMEOUT_INFINITE) — waits forever.
///
/// Must be called from task context, after the kernel has started.
pub fn semaphore_pend(sem: SemaphoreHandle, timeout_ms: i32) -> Result<()> {
    let infinite = timeout_ms <= 0;
    let initial_ticks = timeout_ticks(timeout_ms);
    let mut first = true;
    loop {
        // Safety: handle validity is the caller's contract.
        let sem_ptr = sem.0.as_ptr();
        let guard = unsafe { (*sem_ptr).lock.acquire() };
        let state = unsafe { &mut *sem_ptr };
        // Safety: the lock guard masks interrupts, serializing kernel
        // access on this single core.
        let k = unsafe { kernel::kernel_mut() };
        let Some(slot) = k.active() else {
            drop(guard);
            return Err(KernelError::NotInit);
        };
        match pend_once(k, state, slot, infinite, initial_ticks, first) {
            PendOutcome::Acquired => return Ok(()),
            PendOutcome::TimedOut => return Err(KernelError::Timeout),
            PendOutcome::MustWait => {
                // Raise the switch while still masked; it is taken the
                // moment the guard drops, so the wake cannot be missed.
                arch::trigger_pendsv();
                drop(guard);
                // Execution resumes here once a post or the timeout makes
                // this task runnable again.
                first = false;
            }
        }
    }
}

/// Post to a semaphore (V). Never blocks.
///
/// Increments the value (a binary semaphore saturates at 1 and the post is
/// then dropped) and wakes the head waiter, if any. The woken task
/// consumes the value itself; this call only makes it runnable. Safe to
/// call from interrupt handlers.
pub fn semaphore_post(sem: SemaphoreHandle) {
    // Safety: handle validity is the caller's contract.
    let sem_ptr = sem.0.as_ptr();
    let guard = unsafe { (*sem_ptr).lock.acquire() };
    let state = unsafe { &mut *sem_ptr };
    // Safety: serialized by the masking lock guard, as above.
    let k = unsafe { kernel::kernel_mut() };
    let woken = post_locked(k, state);
    if let Some(slot) = woken {
        // Strictly-higher wake preempts the running task immediately.
        if crate::config::PREEMPTION {
            if let Some(active) = k.active() {
                if k.tcbs[slot].priority > k.tcbs[active].priority {
                    k.mark_active_ready();
                    arch::trigger_pendsv();
                }
            }
        }
    }
    drop(guard);
}

/// Timeout budget in ticks. The extra tick makes the lower bound
/// inclusive: the first decrement lands before a full tick interval has
/// elapsed. Zero means the pend is infinite.
pub(crate) fn timeout_ticks(timeout_ms: i32) -> u32 {
    if timeout_ms <= 0 {
        0
    } else {
        kernel::ms_to_ticks(timeout_ms as u32).saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    extern "C" fn nop_entry(_arg: *mut ()) {}

    fn kernel_with_idle() -> Kernel {
        let mut k = Kernel::new();
        k.install_task(nop_entry, core::ptr::null_mut(), "idle", 0)
            .unwrap();
        k
    }

    fn spawn(k: &mut Kernel, name: &'static str, prio: u8) -> usize {
        k.install_task(nop_entry, core::ptr::null_mut(), name, prio)
            .unwrap()
    }

    #[test]
    fn available_value_is_consumed_immediately() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 3);
        assert_eq!(k.select_next_active(), t);
        let mut sem = SemaphoreState::new(SemaphoreKind::Counting, 2);
        assert_eq!(
            pend_once(&mut k, &mut sem, t, true, 0, true),
            PendOutcome::Acquired
        );
        assert_eq!(sem.value, 1);
        assert_eq!(k.tcbs[t].state, TaskState::Active);
    }

    #[test]
    fn waiters_succeed_in_pend_order() {
        let mut k = kernel_with_idle();
        let a = spawn(&mut k, "a", 3);
        let b = spawn(&mut k, "b", 3);
        let c = spawn(&mut k, "c", 3);
        let mut sem = SemaphoreState::new(SemaphoreKind::Binary, 0);

        // a, b, c pend in order; all block.
        for expected in [a, b, c] {
            let slot = k.select_next_active();
            assert_eq!(slot, expected);
            assert_eq!(
                pend_once(&mut k, &mut sem, slot, true, 0, true),
                PendOutcome::MustWait
            );
        }
        k.select_next_active(); // idle takes over
        assert_eq!(sem.waiters.len(&WaitLinks(&mut k.tcbs)), 3);

        // Three posts wake a, b, c in FIFO order; each post wakes at most
        // one waiter. The idle task steps aside once; every consumer exits
        // after acquiring so it leaves circulation.
        k.mark_active_ready();
        for expected in [a, b, c] {
            assert_eq!(post_locked(&mut k, &mut sem), Some(expected));
            let slot = k.select_next_active();
            assert_eq!(slot, expected);
            assert_eq!(
                pend_once(&mut k, &mut sem, slot, true, 0, false),
                PendOutcome::Acquired
            );
            k.mark_active_exited();
        }
        assert_eq!(sem.value, 0);
        assert!(sem.waiters.is_empty());
    }

    #[test]
    fn binary_value_saturates_at_one() {
        let mut k = kernel_with_idle();
        let mut sem = SemaphoreState::new(SemaphoreKind::Binary, 0);
        assert_eq!(post_locked(&mut k, &mut sem), None);
        assert_eq!(sem.value, 1);
        // Surplus post is dropped entirely.
        assert_eq!(post_locked(&mut k, &mut sem), None);
        assert_eq!(sem.value, 1);
    }

    #[test]
    fn counting_value_accumulates() {
        let mut k = kernel_with_idle();
        let mut sem = SemaphoreState::new(SemaphoreKind::Counting, 0);
        for expected in 1..=3 {
            post_locked(&mut k, &mut sem);
            assert_eq!(sem.value, expected);
        }
    }

    #[test]
    fn timed_pend_expires_without_consuming() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 3);
        assert_eq!(k.select_next_active(), t);
        let mut sem = SemaphoreState::new(SemaphoreKind::Binary, 0);

        assert_eq!(
            pend_once(&mut k, &mut sem, t, false, 3, true),
            PendOutcome::MustWait
        );
        assert_eq!(k.tcbs[t].state, TaskState::Delayed);
        k.select_next_active(); // idle
        for _ in 0..3 {
            assert_eq!(k.tcbs[t].state, TaskState::Delayed);
            k.tick();
        }
        // Delay expired; the task resumes and finds nothing was posted.
        assert_eq!(k.tcbs[t].state, TaskState::Ready);
        assert_eq!(k.select_next_active(), t);
        assert_eq!(
            pend_once(&mut k, &mut sem, t, false, 3, false),
            PendOutcome::TimedOut
        );
        assert!(sem.waiters.is_empty());
        assert_eq!(sem.value, 0);

        // A post after the timeout is kept for the next pend.
        assert_eq!(post_locked(&mut k, &mut sem), None);
        assert_eq!(
            pend_once(&mut k, &mut sem, t, true, 0, true),
            PendOutcome::Acquired
        );
    }

    #[test]
    fn post_cancels_timed_waiters_delay() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 3);
        assert_eq!(k.select_next_active(), t);
        let mut sem = SemaphoreState::new(SemaphoreKind::Binary, 0);

        pend_once(&mut k, &mut sem, t, false, 10, true);
        k.select_next_active(); // idle
        k.tick();
        k.tick();
        assert_eq!(post_locked(&mut k, &mut sem), Some(t));
        assert_eq!(k.tcbs[t].state, TaskState::Ready);
        // 10 - 2 elapsed ticks remain unspent.
        assert_eq!(k.tcbs[t].delay_remaining, 8);

        k.mark_active_ready();
        assert_eq!(k.select_next_active(), t);
        assert_eq!(
            pend_once(&mut k, &mut sem, t, false, 10, false),
            PendOutcome::Acquired
        );
    }

    #[test]
    fn woken_waiter_losing_the_race_rewaits_for_remainder() {
        let mut k = kernel_with_idle();
        let slow = spawn(&mut k, "slow", 2);
        let fast = spawn(&mut k, "fast", 4);
        let mut sem = SemaphoreState::new(SemaphoreKind::Binary, 0);

        // fast parks on a long delay so slow can start its timed pend.
        assert_eq!(k.select_next_active(), fast);
        k.delay_active(100, BlockReason::Timer);
        assert_eq!(k.select_next_active(), slow);
        pend_once(&mut k, &mut sem, slow, false, 10, true);
        k.select_next_active(); // idle
        k.tick();
        k.tick();

        // A post wakes slow with 8 unspent ticks, but fast wakes too and,
        // being higher priority, runs first and steals the value.
        assert_eq!(post_locked(&mut k, &mut sem), Some(slow));
        assert!(k.cancel_delay(fast));
        k.mark_active_ready();
        assert_eq!(k.select_next_active(), fast);
        assert_eq!(
            pend_once(&mut k, &mut sem, fast, true, 0, true),
            PendOutcome::Acquired
        );
        k.mark_active_exited();

        // slow resumes, finds the value gone, and goes back to sleep for
        // exactly what was left of its timeout.
        assert_eq!(k.select_next_active(), slow);
        assert_eq!(
            pend_once(&mut k, &mut sem, slow, false, 10, false),
            PendOutcome::MustWait
        );
        assert_eq!(k.tcbs[slow].state, TaskState::Delayed);
        assert_eq!(k.tcbs[slow].delay_remaining, 8);
        assert_eq!(sem.waiters.head(), Some(slow));
    }

    #[test]
    fn create_and_destroy_release_the_control_block() {
        let _serial = heap::counter_test_guard();
        let outstanding = heap::outstanding();
        let sem = semaphore_create_binary().unwrap();
        assert_eq!(heap::outstanding(), outstanding + 1);
        semaphore_destroy(sem).unwrap();
        assert_eq!(heap::outstanding(), outstanding);
    }

    #[test]
    fn destroy_with_waiters_is_refused() {
        let _serial = heap::counter_test_guard();
        // Build the waiter bookkeeping against a local kernel, then point a
        // heap-allocated control block at it.
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 3);
        assert_eq!(k.select_next_active(), t);
        let sem = semaphore_create_binary().unwrap();
        // Safety: freshly created; each borrow is dropped before the next.
        pend_once(&mut k, unsafe { &mut *sem.0.as_ptr() }, t, true, 0, true);
        assert_eq!(semaphore_destroy(sem), Err(KernelError::BadParam));
        // Draining the waiter makes destroy legal.
        assert_eq!(
            post_locked(&mut k, unsafe { &mut *sem.0.as_ptr() }),
            Some(t)
        );
        assert_eq!(k.select_next_active(), t);
        assert_eq!(
            pend_once(&mut k, unsafe { &mut *sem.0.as_ptr() }, t, true, 0, false),
            PendOutcome::Acquired
        );
        semaphore_destroy(sem).unwrap();
    }

    #[test]
    fn timeout_conversion_adds_the_boundary_tick() {
        assert_eq!(timeout_ticks(0), 0);
        assert_eq!(timeout_ticks(-5), 0);
        // 1500 ms at 1 kHz -> 1500 ticks + the boundary tick.
        assert_eq!(timeout_ticks(1500), 1501);
    }
}

//! # Scheduler Core
//!
//! The kernel's central state machine: the TCB arena, one ready queue per
//! priority, the delayed/blocked/exited queues, and the active-task cell.
//! Everything here is plain state manipulation — no architecture access —
//! so the whole module is exercised by host-side unit tests.
//!
//! ## Invariants maintained
//!
//! - Exactly one task is `Active` while the kernel runs; it is in no queue.
//! - Every other live task is in exactly one queue, and that queue matches
//!   its `state` (ready queue at its priority, or delayed/blocked/exited).
//! - The idle task (priority 0) never blocks, delays, or exits, so
//!   selection always finds a runnable task.
//!
//! All mutation happens with interrupts masked or from handler mode; the
//! public API in [`crate::kernel`] wraps every entry point in a critical
//! section.

use core::ops::ControlFlow;

use crate::config::{MAX_TASKS, N_PRIORITIES, PREEMPTION};
use crate::error::{KernelError, Result};
use crate::list::{Link, LinkAccess, List};
use crate::task::{BlockReason, TaskEntry, TaskState, Tcb};

// ---------------------------------------------------------------------------
// Link projections
// ---------------------------------------------------------------------------

/// Projects the scheduler-queue link out of the TCB arena.
pub(crate) struct StateLinks<'a>(pub &'a mut [Tcb; MAX_TASKS]);

impl LinkAccess for StateLinks<'_> {
    fn link(&self, slot: usize) -> &Link {
        &self.0[slot].link
    }
    fn link_mut(&mut self, slot: usize) -> &mut Link {
        &mut self.0[slot].link
    }
}

/// Projects the semaphore wait-queue link out of the TCB arena.
pub(crate) struct WaitLinks<'a>(pub &'a mut [Tcb; MAX_TASKS]);

impl LinkAccess for WaitLinks<'_> {
    fn link(&self, slot: usize) -> &Link {
        &self.0[slot].wait_link
    }
    fn link_mut(&mut self, slot: usize) -> &mut Link {
        &mut self.0[slot].wait_link
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping counters
// ---------------------------------------------------------------------------

/// Lifecycle counters, kept for diagnostics and the reap accounting tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelStats {
    pub tasks_created: u32,
    pub tasks_reaped: u32,
}

// ---------------------------------------------------------------------------
// Kernel state
// ---------------------------------------------------------------------------

/// Process-wide scheduler state. One instance lives in a static cell in
/// [`crate::kernel`]; tests build their own.
pub(crate) struct Kernel {
    /// TCB arena. Task handles are indices into this table.
    pub tcbs: [Tcb; MAX_TASKS],
    /// One FIFO ready queue per priority level.
    ready: [List; N_PRIORITIES],
    /// Tasks waiting out a tick count.
    delayed: List,
    /// Tasks blocked indefinitely.
    blocked: List,
    /// Terminated tasks awaiting the idle reaper.
    exited: List,
    /// The running task, once the kernel has started. Not in any queue.
    active: Option<usize>,
    /// Set by `rtos_start`; guards against double starts and stray ticks.
    pub started: bool,
    /// Monotonic tick counter.
    ticks: u64,
    pub stats: KernelStats,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            tcbs: [Tcb::EMPTY; MAX_TASKS],
            ready: [List::EMPTY; N_PRIORITIES],
            delayed: List::EMPTY,
            blocked: List::EMPTY,
            exited: List::EMPTY,
            active: None,
            started: false,
            ticks: 0,
            stats: KernelStats {
                tasks_created: 0,
                tasks_reaped: 0,
            },
        }
    }

    #[inline]
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    // -----------------------------------------------------------------------
    // Task creation
    // -----------------------------------------------------------------------

    /// Claim a free TCB slot and register the task as ready.
    ///
    /// The caller has already validated the priority and resolved the stack;
    /// this installs the bookkeeping and queues the task. It will not run
    /// before the scheduler next selects.
    pub fn install_task(
        &mut self,
        entry: TaskEntry,
        arg: *mut (),
        name: &'static str,
        priority: u8,
    ) -> Result<usize> {
        let slot = self
            .tcbs
            .iter()
            .position(|t| !t.in_use)
            .ok_or(KernelError::NoMem)?;
        self.tcbs[slot].init(entry, arg, name, priority);
        self.enqueue_ready(slot);
        self.stats.tasks_created += 1;
        Ok(slot)
    }

    /// Append `slot` to the tail of the ready queue at its priority and mark
    /// it ready. Tail insertion is what gives equal-priority FIFO and
    /// round-robin on yield.
    pub fn enqueue_ready(&mut self, slot: usize) {
        let prio = self.tcbs[slot].priority as usize;
        self.tcbs[slot].state = TaskState::Ready;
        self.tcbs[slot].block_reason = BlockReason::None;
        self.ready[prio].append(&mut StateLinks(&mut self.tcbs), slot);
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Dispose of the outgoing task and pick the next one to run.
    ///
    /// Invoked only with interrupts masked, from the switch and start
    /// handlers. The outgoing task (if any) is parked on the queue its
    /// recorded state calls for *before* scanning, so a sole runnable task
    /// that yields is simply picked again. Scanning goes from the highest
    /// priority down; the idle queue (priority 0) is reached last.
    ///
    /// Returns the incoming slot, now marked `Active`.
    pub fn select_next_active(&mut self) -> usize {
        if let Some(out) = self.active.take() {
            match self.tcbs[out].state {
                TaskState::Blocked => {
                    self.blocked.append(&mut StateLinks(&mut self.tcbs), out);
                }
                TaskState::Delayed => {
                    self.delayed.append(&mut StateLinks(&mut self.tcbs), out);
                }
                TaskState::Ready => self.enqueue_ready(out),
                TaskState::Exited => {
                    self.exited.append(&mut StateLinks(&mut self.tcbs), out);
                }
                // Every suspension path re-marks the active task before
                // pending a switch, so an Active outgoing task means the
                // scheduler state is corrupt.
                TaskState::Active => crate::kernel::fatal("active task reached selection"),
            }
        }

        let mut incoming = None;
        for prio in (0..N_PRIORITIES).rev() {
            if let Some(head) = self.ready[prio].head() {
                self.ready[prio].remove(&mut StateLinks(&mut self.tcbs), head);
                incoming = Some(head);
                break;
            }
        }
        // The idle task is always ready or active, so an empty scan means
        // it was lost.
        let incoming = match incoming {
            Some(slot) => slot,
            None => crate::kernel::fatal("no runnable task"),
        };
        self.tcbs[incoming].state = TaskState::Active;
        self.active = Some(incoming);
        incoming
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the delay queue by one tick and decide whether a preemptive
    /// switch is due.
    ///
    /// Every delayed task's remaining count drops by one; tasks reaching
    /// zero move to their ready queue in FIFO order. With preemption
    /// enabled, returns `true` when a *strictly* higher priority than the
    /// active task's has a ready member; the active task is re-marked Ready
    /// so the switch handler can requeue it.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;

        // Snapshot the delayed ring first; expiry moves members between
        // lists, which cannot happen mid-iteration.
        let mut members = [0usize; MAX_TASKS];
        let mut count = 0;
        self.delayed.iterate(&StateLinks(&mut self.tcbs), |slot| {
            members[count] = slot;
            count += 1;
            ControlFlow::Continue(())
        });
        for &slot in &members[..count] {
            let tcb = &mut self.tcbs[slot];
            tcb.delay_remaining = tcb.delay_remaining.saturating_sub(1);
            if tcb.delay_remaining == 0 {
                self.delayed.remove(&mut StateLinks(&mut self.tcbs), slot);
                self.enqueue_ready(slot);
            }
        }

        if !PREEMPTION {
            return false;
        }
        let Some(active) = self.active else {
            return false;
        };
        if self.ready_above(self.tcbs[active].priority) {
            // Keep the displaced task runnable; selection will park it at
            // the tail of its own queue.
            if self.tcbs[active].state == TaskState::Active {
                self.tcbs[active].state = TaskState::Ready;
            }
            return true;
        }
        false
    }

    /// Whether any priority strictly greater than `prio` has a ready task.
    fn ready_above(&self, prio: u8) -> bool {
        self.ready[(prio as usize + 1)..N_PRIORITIES]
            .iter()
            .any(|q| !q.is_empty())
    }

    // -----------------------------------------------------------------------
    // Suspension marks
    // -----------------------------------------------------------------------
    //
    // These only re-mark the active task; the switch handler's selection
    // pass moves it onto the matching queue. Between the mark and the
    // switch the task is still running with its new state recorded, and the
    // wake paths below tolerate that window.

    /// Active → Ready (yield).
    pub fn mark_active_ready(&mut self) {
        if let Some(a) = self.active {
            self.tcbs[a].state = TaskState::Ready;
            self.tcbs[a].block_reason = BlockReason::None;
        }
    }

    /// Active → Delayed for `ticks` ticks.
    pub fn delay_active(&mut self, ticks: u32, reason: BlockReason) {
        if let Some(a) = self.active {
            self.tcbs[a].state = TaskState::Delayed;
            self.tcbs[a].block_reason = reason;
            self.tcbs[a].delay_remaining = ticks;
        }
    }

    /// Active → Blocked with the given reason.
    pub fn block_active(&mut self, reason: BlockReason) {
        if let Some(a) = self.active {
            self.tcbs[a].state = TaskState::Blocked;
            self.tcbs[a].block_reason = reason;
        }
    }

    /// Active → Exited (self-destroy and the exit trampoline).
    pub fn mark_active_exited(&mut self) {
        if let Some(a) = self.active {
            self.tcbs[a].state = TaskState::Exited;
            self.tcbs[a].block_reason = BlockReason::None;
        }
    }

    // -----------------------------------------------------------------------
    // Wake paths
    // -----------------------------------------------------------------------

    /// Make a task blocked for `reason` runnable again.
    ///
    /// Returns `false` when the task is not blocked for that reason (e.g. a
    /// destroy got there first). A task that marked itself blocked but has
    /// not switched out yet is simply re-marked Ready; the pending switch
    /// requeues it.
    pub fn unblock(&mut self, slot: usize, reason: BlockReason) -> bool {
        if slot >= MAX_TASKS
            || !self.tcbs[slot].in_use
            || self.tcbs[slot].block_reason != reason
        {
            return false;
        }
        if self.active == Some(slot) {
            self.tcbs[slot].state = TaskState::Ready;
            self.tcbs[slot].block_reason = BlockReason::None;
            return true;
        }
        if self.tcbs[slot].state != TaskState::Blocked {
            return false;
        }
        self.blocked.remove(&mut StateLinks(&mut self.tcbs), slot);
        self.enqueue_ready(slot);
        true
    }

    /// Cut a delay short (a semaphore post reached a timed waiter).
    ///
    /// The remaining tick count is left in the TCB so the waiter can tell
    /// how much of its timeout was unspent.
    pub fn cancel_delay(&mut self, slot: usize) -> bool {
        if slot >= MAX_TASKS || !self.tcbs[slot].in_use {
            return false;
        }
        if self.active == Some(slot) {
            if self.tcbs[slot].state == TaskState::Delayed {
                self.tcbs[slot].state = TaskState::Ready;
                self.tcbs[slot].block_reason = BlockReason::None;
                return true;
            }
            return false;
        }
        if self.tcbs[slot].state != TaskState::Delayed {
            return false;
        }
        self.delayed.remove(&mut StateLinks(&mut self.tcbs), slot);
        // enqueue_ready leaves delay_remaining alone; the waiter reads it
        // back out after it resumes.
        self.enqueue_ready(slot);
        true
    }

    // -----------------------------------------------------------------------
    // Destroy / reap
    // -----------------------------------------------------------------------

    /// Remove a non-active task from whichever queue its state says holds
    /// it.
    pub fn detach(&mut self, slot: usize) {
        match self.tcbs[slot].state {
            TaskState::Ready => {
                let prio = self.tcbs[slot].priority as usize;
                self.ready[prio].remove(&mut StateLinks(&mut self.tcbs), slot);
            }
            TaskState::Delayed => self.delayed.remove(&mut StateLinks(&mut self.tcbs), slot),
            TaskState::Blocked => self.blocked.remove(&mut StateLinks(&mut self.tcbs), slot),
            TaskState::Exited => self.exited.remove(&mut StateLinks(&mut self.tcbs), slot),
            TaskState::Active => {}
        }
    }

    /// Pop the next exited task, if any. The reaper releases its resources.
    pub fn reap_next(&mut self) -> Option<usize> {
        self.exited.pop_head(&mut StateLinks(&mut self.tcbs))
    }

    /// Terminate a task on the spot (stack-guard violation). A queued task
    /// moves straight to the exited list; the active task is only
    /// re-marked, since the switch path disposes it.
    pub fn force_exit(&mut self, slot: usize) {
        self.tcbs[slot].block_reason = BlockReason::None;
        if self.active == Some(slot) {
            self.tcbs[slot].state = TaskState::Exited;
            return;
        }
        self.detach(slot);
        self.tcbs[slot].state = TaskState::Exited;
        self.exited.append(&mut StateLinks(&mut self.tcbs), slot);
    }

    /// Release a TCB slot, returning the stack parameters so the caller can
    /// free owned memory outside the critical section.
    ///
    /// The slot must already be detached from every queue.
    pub fn free_slot(&mut self, slot: usize) -> (*mut u8, usize, bool) {
        debug_assert!(!self.tcbs[slot].link.is_linked());
        debug_assert!(!self.tcbs[slot].wait_link.is_linked());
        let stack = (
            self.tcbs[slot].stack_base,
            self.tcbs[slot].stack_size,
            self.tcbs[slot].stack_owned,
        );
        self.tcbs[slot] = Tcb::EMPTY;
        self.stats.tasks_reaped += 1;
        stack
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Slots of all live tasks, for the idle task's opportunistic guard
    /// sweep.
    pub fn live_slots(&self, out: &mut [usize; MAX_TASKS]) -> usize {
        let mut n = 0;
        for (slot, tcb) in self.tcbs.iter().enumerate() {
            if tcb.in_use {
                out[n] = slot;
                n += 1;
            }
        }
        n
    }

    /// Verify that queue membership agrees with every live task's state.
    /// Test instrumentation only.
    #[cfg(test)]
    pub fn check_invariants(&mut self) {
        for slot in 0..MAX_TASKS {
            if !self.tcbs[slot].in_use {
                assert!(!self.tcbs[slot].link.is_linked(), "free slot {slot} linked");
                continue;
            }
            let state = self.tcbs[slot].state;
            let prio = self.tcbs[slot].priority as usize;
            if self.active == Some(slot) {
                // The active task may carry a suspension mark, but it must
                // not sit in any queue yet.
                assert!(
                    !self.tcbs[slot].link.is_linked(),
                    "active slot {slot} is queued"
                );
                continue;
            }
            let in_ready = self.ready[prio].contains(&StateLinks(&mut self.tcbs), slot);
            let in_delayed = self.delayed.contains(&StateLinks(&mut self.tcbs), slot);
            let in_blocked = self.blocked.contains(&StateLinks(&mut self.tcbs), slot);
            let in_exited = self.exited.contains(&StateLinks(&mut self.tcbs), slot);
            let memberships =
                [in_ready, in_delayed, in_blocked, in_exited].iter().filter(|&&m| m).count();
            assert_eq!(memberships, 1, "slot {slot} in {memberships} queues");
            let expected = match state {
                TaskState::Ready => in_ready,
                TaskState::Delayed => in_delayed,
                TaskState::Blocked => in_blocked,
                TaskState::Exited => in_exited,
                TaskState::Active => false,
            };
            assert!(expected, "slot {slot} state {state:?} disagrees with queue");
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

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
    fn first_selection_picks_highest_priority() {
        let mut k = kernel_with_idle();
        let low = spawn(&mut k, "low", 2);
        let high = spawn(&mut k, "high", 5);
        let picked = k.select_next_active();
        assert_eq!(picked, high);
        assert_eq!(k.tcbs[high].state, TaskState::Active);
        assert_eq!(k.active(), Some(high));
        assert_ne!(picked, low);
        k.check_invariants();
    }

    #[test]
    fn equal_priority_yield_round_robin() {
        let mut k = kernel_with_idle();
        let t1 = spawn(&mut k, "t1", 4);
        let t2 = spawn(&mut k, "t2", 4);
        let t3 = spawn(&mut k, "t3", 4);

        // Drive three yield cycles; creation order must repeat.
        let mut order = std::vec::Vec::new();
        k.select_next_active();
        for _ in 0..9 {
            order.push(k.active().unwrap());
            k.mark_active_ready();
            k.select_next_active();
            k.check_invariants();
        }
        assert_eq!(order, [t1, t2, t3, t1, t2, t3, t1, t2, t3]);
    }

    #[test]
    fn sole_task_yield_reselects_it() {
        let mut k = kernel_with_idle();
        // Only the idle task exists; yielding must pick it again rather
        // than come up empty.
        let idle = k.select_next_active();
        k.mark_active_ready();
        assert_eq!(k.select_next_active(), idle);
    }

    #[test]
    fn tick_moves_expired_delays_to_ready_fifo() {
        let mut k = kernel_with_idle();
        let a = spawn(&mut k, "a", 3);
        let b = spawn(&mut k, "b", 3);
        k.select_next_active(); // a runs
        k.delay_active(2, BlockReason::Timer);
        k.select_next_active(); // b runs
        k.delay_active(2, BlockReason::Timer);
        let idle = k.select_next_active();
        assert_eq!(k.tcbs[idle].priority, 0);
        k.check_invariants();

        assert!(!k.tick()); // 1 tick left each
        assert_eq!(k.tcbs[a].state, TaskState::Delayed);
        let preempt = k.tick(); // both expire
        assert!(preempt, "waking a higher priority task must preempt idle");
        assert_eq!(k.tcbs[a].state, TaskState::Ready);
        assert_eq!(k.tcbs[b].state, TaskState::Ready);
        k.check_invariants();

        // FIFO: a delayed first, so a runs first.
        assert_eq!(k.select_next_active(), a);
    }

    #[test]
    fn delay_made_ready_within_bounds() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 3);
        k.select_next_active();
        k.delay_active(3, BlockReason::Timer);
        k.select_next_active(); // idle takes over
        for elapsed in 1..=2 {
            k.tick();
            assert_eq!(
                k.tcbs[t].state,
                TaskState::Delayed,
                "woke early at tick {elapsed}"
            );
        }
        k.tick();
        assert_eq!(k.tcbs[t].state, TaskState::Ready);
    }

    #[test]
    fn tick_preempts_only_for_strictly_higher_priority() {
        let mut k = kernel_with_idle();
        let active = spawn(&mut k, "active", 3);
        let equal = spawn(&mut k, "equal", 3);
        assert_eq!(k.select_next_active(), active);
        k.check_invariants();

        // Equal priority ready: no preemption request.
        assert!(!k.tick());
        assert_eq!(k.tcbs[active].state, TaskState::Active);
        let _ = equal;

        // Strictly higher priority arrives via delay expiry.
        let high = spawn(&mut k, "high", 4);
        k.detach(high);
        k.tcbs[high].state = TaskState::Delayed;
        k.tcbs[high].delay_remaining = 1;
        k.tcbs[high].block_reason = BlockReason::Timer;
        // Re-home it onto the delayed queue the way a real delay would.
        k.delayed.append(&mut StateLinks(&mut k.tcbs), high);

        assert!(k.tick());
        // The displaced task was re-marked ready for requeueing.
        assert_eq!(k.tcbs[active].state, TaskState::Ready);
        assert_eq!(k.select_next_active(), high);
        k.check_invariants();
    }

    #[test]
    fn blocked_task_parks_and_unblocks_in_fifo_order() {
        let mut k = kernel_with_idle();
        let a = spawn(&mut k, "a", 2);
        let b = spawn(&mut k, "b", 2);
        k.select_next_active();
        k.block_active(BlockReason::Semaphore);
        k.select_next_active();
        k.block_active(BlockReason::Semaphore);
        k.select_next_active(); // idle
        k.check_invariants();
        assert_eq!(k.tcbs[a].state, TaskState::Blocked);
        assert_eq!(k.tcbs[b].state, TaskState::Blocked);

        // Wrong reason is refused.
        assert!(!k.unblock(a, BlockReason::Timer));
        assert!(k.unblock(a, BlockReason::Semaphore));
        assert!(k.unblock(b, BlockReason::Semaphore));
        k.check_invariants();
        // The idle task steps aside and the first unblocked task runs.
        k.mark_active_ready();
        assert_eq!(k.select_next_active(), a);
    }

    #[test]
    fn unblock_of_not_yet_switched_task_keeps_it_runnable() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 2);
        assert_eq!(k.select_next_active(), t);
        // The task marked itself blocked but the switch has not run yet;
        // a post arrives in that window.
        k.block_active(BlockReason::Semaphore);
        assert!(k.unblock(t, BlockReason::Semaphore));
        assert_eq!(k.tcbs[t].state, TaskState::Ready);
        // The pending switch disposes it to its ready queue and, being the
        // highest priority, it runs straight away.
        assert_eq!(k.select_next_active(), t);
        k.check_invariants();
    }

    #[test]
    fn cancel_delay_preserves_remaining_ticks() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 2);
        k.select_next_active();
        k.delay_active(10, BlockReason::Semaphore);
        k.select_next_active(); // idle
        k.tick();
        k.tick();
        assert!(k.cancel_delay(t));
        assert_eq!(k.tcbs[t].state, TaskState::Ready);
        assert_eq!(k.tcbs[t].delay_remaining, 8);
        k.check_invariants();
    }

    #[test]
    fn destroy_detaches_from_each_queue_kind() {
        let mut k = kernel_with_idle();
        let ready = spawn(&mut k, "r", 2);
        let delayed = spawn(&mut k, "d", 3);
        let blocked = spawn(&mut k, "b", 4);
        // Park two of them on the delayed and blocked queues the way a
        // real suspension would.
        k.detach(delayed);
        k.tcbs[delayed].state = TaskState::Delayed;
        k.tcbs[delayed].delay_remaining = 5;
        k.tcbs[delayed].block_reason = BlockReason::Timer;
        k.delayed.append(&mut StateLinks(&mut k.tcbs), delayed);
        k.detach(blocked);
        k.tcbs[blocked].state = TaskState::Blocked;
        k.tcbs[blocked].block_reason = BlockReason::Semaphore;
        k.blocked.append(&mut StateLinks(&mut k.tcbs), blocked);
        k.check_invariants();

        for slot in [ready, delayed, blocked] {
            k.detach(slot);
            let (_, _, _) = k.free_slot(slot);
            assert!(!k.tcbs[slot].in_use);
        }
        k.check_invariants();
        assert_eq!(k.stats.tasks_reaped, 3);
    }

    #[test]
    fn self_destroy_reaches_reaper_exactly_once() {
        let mut k = kernel_with_idle();
        let t = spawn(&mut k, "t", 2);
        assert_eq!(k.select_next_active(), t);
        k.mark_active_exited();
        k.select_next_active(); // idle; t parked on the exited queue
        k.check_invariants();
        assert_eq!(k.tcbs[t].state, TaskState::Exited);

        assert_eq!(k.reap_next(), Some(t));
        let (_, _, _) = k.free_slot(t);
        assert!(!k.tcbs[t].in_use);
        assert_eq!(k.reap_next(), None);
        assert_eq!(k.stats.tasks_created, 2);
        assert_eq!(k.stats.tasks_reaped, 1);
        k.check_invariants();
    }

    #[test]
    fn arena_exhaustion_reports_no_memory() {
        let mut k = Kernel::new();
        for _ in 0..MAX_TASKS {
            k.install_task(nop_entry, core::ptr::null_mut(), "", 1)
                .unwrap();
        }
        assert_eq!(
            k.install_task(nop_entry, core::ptr::null_mut(), "", 1),
            Err(KernelError::NoMem)
        );
    }
}

//! # Idle Task & Reaper
//!
//! The priority-0 task created by `rtos_start`. It is the only code that
//! releases an exited task's TCB slot and kernel-owned stack, which keeps
//! every free on one thread-context path well after the dying task last
//! touched its own memory. Between reap passes it verifies the stack
//! guards of the other live tasks, flushes the logger, and sleeps until
//! the next interrupt.
//!
//! The idle task never blocks, delays, or exits, so the scheduler always
//! has something to run.

use crate::config::MAX_TASKS;
use crate::kernel;
use crate::sched::Kernel;
use crate::task::TaskState;

/// Release one exited task, if any: pop it from the exited queue and free
/// its slot, handing back the stack parameters for the caller to release
/// outside the critical section.
pub(crate) fn reap_one(k: &mut Kernel) -> Option<(*mut u8, usize, bool)> {
    let slot = k.reap_next()?;
    log::debug!("reaping task '{}'", k.tcbs[slot].name);
    Some(k.free_slot(slot))
}

/// Opportunistic stack-guard sweep over every live task except the one
/// running (the idle task itself) and those already dying. Returns how
/// many tasks were killed.
pub(crate) fn sweep_guards(k: &mut Kernel) -> usize {
    let mut live = [0usize; MAX_TASKS];
    let n = k.live_slots(&mut live);
    let mut killed = 0;
    for &slot in &live[..n] {
        if k.active() == Some(slot) || k.tcbs[slot].state == TaskState::Exited {
            continue;
        }
        if !k.tcbs[slot].guard_intact() || k.tcbs[slot].saved_sp_overflowed() {
            kernel::kill_for_overflow(k, slot);
            killed += 1;
        }
    }
    killed
}

/// Idle task entry point.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) extern "C" fn idle_task(_arg: *mut ()) {
    use crate::{arch, heap, sync};
    use core::ptr::NonNull;

    loop {
        // Drain the exited queue. Stack memory goes back to the heap with
        // interrupts enabled; only the queue surgery is masked.
        loop {
            let reaped = sync::critical_section(|| {
                // Safety: inside the critical section.
                reap_one(unsafe { kernel::kernel_mut() })
            });
            let Some((base, size, owned)) = reaped else {
                break;
            };
            if owned {
                // Safety: owned stacks come from heap::allocate; the task
                // is gone and nothing else references the region.
                unsafe { heap::release(NonNull::new_unchecked(base), size) };
            }
        }

        sync::critical_section(|| {
            // Safety: inside the critical section.
            sweep_guards(unsafe { kernel::kernel_mut() });
        });

        log::logger().flush();
        arch::wait_for_interrupt();
        kernel::task_yield();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

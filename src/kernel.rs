//! # Kernel
//!
//! The kernel singleton and the public task API. All entry points are thin
//! wrappers that enter a critical section, mutate the scheduler state, and
//! (where a suspension is involved) pend the switch handler before the
//! section ends, so the switch is taken the instant interrupts come back.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset (cortex-m-rt)
//!   └─► main()
//!         ├─► task_create()   ← register application tasks (×N)
//!         └─► rtos_start()    ← no return
//!               ├─► create the idle task
//!               ├─► program SysTick, drop PendSV/SysTick priority
//!               └─► svc: first dispatch into thread mode
//! ```

use core::ptr::NonNull;

use crate::arch;
use crate::config::{MAX_TASKS, N_PRIORITIES, TICK_HZ};
use crate::error::{KernelError, Result};
use crate::heap;
use crate::sched::{Kernel, WaitLinks};
use crate::sync;
use crate::task::{BlockReason, TaskConfig, TaskEntry, TaskHandle, MIN_STACK_SIZE};

// ---------------------------------------------------------------------------
// Kernel singleton
// ---------------------------------------------------------------------------

/// Process-wide scheduler state.
///
/// # Safety
/// Reached only through [`kernel_mut`], inside critical sections or from
/// handler mode, which serializes every access on this single core.
static mut KERNEL: Kernel = Kernel::new();

/// Get the kernel singleton.
///
/// # Safety
/// The caller must hold the interrupt mask (a [`sync::critical_section`],
/// a semaphore lock guard, or handler mode) for the whole borrow.
pub(crate) unsafe fn kernel_mut() -> &'static mut Kernel {
    &mut *core::ptr::addr_of_mut!(KERNEL)
}

/// Convert milliseconds to ticks, rounding to nearest.
pub(crate) fn ms_to_ticks(ms: u32) -> u32 {
    ((ms as u64 * TICK_HZ as u64 + 500) / 1000) as u32
}

// ---------------------------------------------------------------------------
// Task API
// ---------------------------------------------------------------------------

/// Create a task.
///
/// The task is placed on the ready queue of `cfg.priority` and will not
/// execute before the scheduler next runs (and, with preemption off, not
/// before the current task suspends).
///
/// Fails with `BadParam` for a priority outside `1..N_PRIORITIES` or a
/// stack too small to hold the guard pad plus an exception frame, and with
/// `NoMem` when the TCB arena or the kernel heap is exhausted.
pub fn task_create(entry: TaskEntry, arg: *mut (), cfg: TaskConfig) -> Result<TaskHandle> {
    if cfg.priority == 0 || cfg.priority as usize >= N_PRIORITIES {
        return Err(KernelError::BadParam);
    }
    let priority = cfg.priority;
    let name = cfg.name.unwrap_or("");

    let (base, size, owned) = match cfg.stack {
        Some(buf) => {
            if buf.len() < MIN_STACK_SIZE {
                return Err(KernelError::BadParam);
            }
            (buf.as_mut_ptr(), buf.len(), false)
        }
        None => {
            if cfg.stack_size < MIN_STACK_SIZE {
                return Err(KernelError::BadParam);
            }
            let ptr = heap::allocate(cfg.stack_size).ok_or(KernelError::NoMem)?;
            (ptr.as_ptr(), cfg.stack_size, true)
        }
    };

    let result = sync::critical_section(|| {
        // Safety: inside the critical section.
        let k = unsafe { kernel_mut() };
        let slot = k.install_task(entry, arg, name, priority)?;
        k.tcbs[slot].attach_stack(base, size, owned);
        let top = k.tcbs[slot].stack_start();
        // Safety: the region was just validated and attached.
        k.tcbs[slot].stack_pointer =
            unsafe { arch::build_initial_frame(top, entry, arg, task_exit) };
        Ok(TaskHandle(slot))
    });

    match result {
        Ok(handle) => {
            log::debug!("created task '{}' at priority {}", name, priority);
            Ok(handle)
        }
        Err(e) => {
            if owned {
                // Safety: allocated above with this exact size, never
                // attached to a live task.
                unsafe { heap::release(NonNull::new_unchecked(base), size) };
            }
            Err(e)
        }
    }
}

/// Yield the CPU.
///
/// The calling task moves to the tail of its own priority queue and the
/// highest-priority ready task runs next — which is the caller again if
/// nothing else of its priority or above is ready. Returns when this task
/// is scheduled again.
pub fn task_yield() {
    sync::critical_section(|| {
        // Safety: inside the critical section.
        let k = unsafe { kernel_mut() };
        if !k.started {
            return;
        }
        k.mark_active_ready();
        arch::trigger_pendsv();
        // The switch is taken as the critical section ends.
    });
}

/// Sleep for roughly `ms` milliseconds.
///
/// The task is made ready again no earlier than the equivalent tick count
/// and no later than one tick after it. `task_delay(0)` is a no-op.
pub fn task_delay(ms: u32) {
    if ms == 0 {
        return;
    }
    // One extra tick makes the lower bound inclusive: the first decrement
    // lands before a full tick interval has elapsed.
    let ticks = ms_to_ticks(ms).saturating_add(1);
    sync::critical_section(|| {
        // Safety: inside the critical section.
        let k = unsafe { kernel_mut() };
        if !k.started {
            return;
        }
        k.delay_active(ticks, BlockReason::Timer);
        arch::trigger_pendsv();
    });
}

/// Destroy a task.
///
/// Destroying the calling task parks it on the exited queue for the idle
/// reaper and never returns. Destroying another task detaches it from
/// whatever queue holds it — ready, delayed, blocked (including a pending
/// semaphore wait), or exited — and releases its slot and any kernel-owned
/// stack immediately.
pub fn task_destroy(task: TaskHandle) -> Result<()> {
    let mut stack_to_free: Option<(NonNull<u8>, usize)> = None;
    let result = sync::critical_section(|| {
        // Safety: inside the critical section.
        let k = unsafe { kernel_mut() };
        let slot = task.0;
        if slot >= MAX_TASKS || !k.tcbs[slot].in_use {
            return Err(KernelError::BadParam);
        }
        detach_sem_waiter(k, slot);
        if k.active() == Some(slot) {
            // Self-destroy: the reaper frees the resources. The pended
            // switch takes effect as the critical section ends and this
            // call never returns to the caller.
            k.mark_active_exited();
            arch::trigger_pendsv();
            return Ok(());
        }
        k.detach(slot);
        let (base, size, owned) = k.free_slot(slot);
        if owned {
            // Safety: an owned stack base always came from heap::allocate.
            stack_to_free = Some((unsafe { NonNull::new_unchecked(base) }, size));
        }
        Ok(())
    });
    if let Some((base, size)) = stack_to_free {
        // Safety: detached from the dead task; released exactly once.
        unsafe { heap::release(base, size) };
    }
    result
}

/// Exit trampoline: a task's entry function returned.
///
/// Sits in the initial frame's LR so that falling off the end of the entry
/// function terminates the task cleanly.
pub(crate) extern "C" fn task_exit() -> ! {
    sync::critical_section(|| {
        // Safety: inside the critical section.
        let k = unsafe { kernel_mut() };
        k.mark_active_exited();
        arch::trigger_pendsv();
    });
    // The switch fired as the mask dropped; this task is never scheduled
    // again.
    loop {
        arch::wait_for_interrupt();
    }
}

/// Monotonic ticks since `rtos_start`.
pub fn rtos_ticks() -> u64 {
    sync::critical_section(|| {
        // Safety: inside the critical section.
        unsafe { kernel_mut() }.ticks()
    })
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// Start the scheduler. On success this function does not return: the
/// supervisor call dispatches the first task and the boot stack is
/// abandoned.
///
/// Returns `Scheduler` if the kernel is already running, `NoMem` if the
/// idle task cannot be created, and `InUse` if something else consumed the
/// core peripherals.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn rtos_start() -> Result<()> {
    use crate::config::IDLE_STACK_SIZE;
    use crate::idle;

    let already = sync::critical_section(|| {
        // Safety: inside the critical section.
        unsafe { kernel_mut() }.started
    });
    if already {
        return Err(KernelError::Scheduler);
    }

    let stack = heap::allocate(IDLE_STACK_SIZE).ok_or(KernelError::NoMem)?;
    let installed: Result<()> = sync::critical_section(|| {
        // Safety: inside the critical section.
        let k = unsafe { kernel_mut() };
        let slot = k.install_task(idle::idle_task, core::ptr::null_mut(), "idle", 0)?;
        k.tcbs[slot].attach_stack(stack.as_ptr(), IDLE_STACK_SIZE, true);
        let top = k.tcbs[slot].stack_start();
        // Safety: region just attached.
        k.tcbs[slot].stack_pointer = unsafe {
            arch::build_initial_frame(top, idle::idle_task, core::ptr::null_mut(), task_exit)
        };
        Ok(())
    });
    if let Err(e) = installed {
        // Safety: allocated above, never attached.
        unsafe { heap::release(stack, IDLE_STACK_SIZE) };
        return Err(e);
    }

    let mut peripherals = cortex_m::Peripherals::take().ok_or(KernelError::InUse)?;
    arch::configure_systick(&mut peripherals.SYST);
    arch::set_exception_priorities();
    sync::critical_section(|| {
        // Safety: inside the critical section.
        unsafe { kernel_mut() }.started = true;
    });

    log::info!("kestrel starting");
    arch::trigger_svcall();
    // Not reached: the supervisor call returned into the first task.
    loop {
        arch::wait_for_interrupt();
    }
}

/// Host builds cannot enter thread-mode dispatch; the state machines are
/// exercised directly by the test suite instead.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn rtos_start() -> Result<()> {
    Err(KernelError::NotSupported)
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// Unrecoverable scheduler invariant violation: log, flush, park.
pub(crate) fn fatal(msg: &str) -> ! {
    log::error!("scheduler fault: {}", msg);
    log::logger().flush();
    arch::abort();
}

/// Terminate a task whose stack guard tripped. Called from the switch path
/// (for the outgoing task) and the idle sweep, with interrupts masked.
pub(crate) fn kill_for_overflow(k: &mut Kernel, slot: usize) {
    log::error!("stack overflow in task '{}'; destroying it", k.tcbs[slot].name);
    detach_sem_waiter(k, slot);
    k.force_exit(slot);
}

/// Remove a task's pending semaphore-waiter record, if it has one.
pub(crate) fn detach_sem_waiter(k: &mut Kernel, slot: usize) {
    if let Some(sem) = k.tcbs[slot].waiting_on {
        // Safety: a queued waiter pins its semaphore alive
        // (semaphore_destroy refuses while the wait queue is non-empty),
        // and the caller holds the interrupt mask.
        let sem = unsafe { &mut *sem.as_ptr() };
        if k.tcbs[slot].wait_link.is_linked() {
            sem.waiters.remove(&mut WaitLinks(&mut k.tcbs), slot);
        }
        k.tcbs[slot].waiting_on = None;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

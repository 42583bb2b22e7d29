//! # Architecture Abstraction Layer
//!
//! Hardware boundary for the kernel. The Cortex-M4 port supplies the real
//! exception handlers and trigger mechanisms; host builds (the unit-test
//! suite) get inert fallbacks so the scheduler, list, and semaphore state
//! machines compile and run anywhere.
//!
//! The initial stack-frame builder is shared: it is plain memory layout,
//! and keeping it in one place makes the saved-frame contract testable off
//! target.

use crate::task::TaskEntry;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::{
    abort, configure_systick, set_exception_priorities, trigger_pendsv, trigger_svcall,
    wait_for_interrupt,
};

// ---------------------------------------------------------------------------
// Initial stack frame
// ---------------------------------------------------------------------------

/// Words in a freshly built context frame: the software-saved bank
/// (r4-r11 plus the EXC_RETURN cookie) under the hardware exception frame
/// (r0-r3, r12, lr, pc, xPSR).
pub const INITIAL_FRAME_WORDS: usize = 9 + 8;

/// EXC_RETURN value selecting thread mode on the process stack, no
/// floating-point state.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// xPSR with only the Thumb execution bit set.
pub const XPSR_THUMB: u32 = 0x0100_0000;

/// Lay out the first context frame on a new task's stack and return the
/// stack pointer to store in its TCB.
///
/// The switch handler restores `{r4-r11, lr}` from the returned pointer,
/// then returns from the exception, so the layout is (ascending):
///
/// ```text
/// sp ->  r4..r11        dummy zeros
///        lr             EXC_RETURN: thread mode, process stack
///        r0             the task's argument
///        r1-r3, r12     dummy zeros
///        lr             exit trampoline, runs if the entry fn returns
///        pc             entry function
///        xPSR           Thumb bit set
/// ```
///
/// # Safety
/// `stack_top` must be one past the end of a writable region with at least
/// `INITIAL_FRAME_WORDS * 4 + 4` bytes below it.
pub unsafe fn build_initial_frame(
    stack_top: *mut u8,
    entry: TaskEntry,
    arg: *mut (),
    exit: extern "C" fn() -> !,
) -> *mut u32 {
    // The hardware frame must sit 8-aligned per AAPCS.
    let aligned_top = (stack_top as usize) & !0x7;
    let hw_frame = (aligned_top - 8 * 4) as *mut u32;
    hw_frame.add(0).write(arg as usize as u32); // r0
    hw_frame.add(1).write(0); // r1
    hw_frame.add(2).write(0); // r2
    hw_frame.add(3).write(0); // r3
    hw_frame.add(4).write(0); // r12
    hw_frame.add(5).write(exit as usize as u32); // lr
    hw_frame.add(6).write(entry as usize as u32); // pc
    hw_frame.add(7).write(XPSR_THUMB); // xPSR

    let sw_frame = hw_frame.sub(9);
    for i in 0..8 {
        sw_frame.add(i).write(0); // r4-r11
    }
    sw_frame.add(8).write(EXC_RETURN_THREAD_PSP); // lr cookie
    sw_frame
}

// ---------------------------------------------------------------------------
// Host fallbacks
// ---------------------------------------------------------------------------

/// Request that the switch handler runs. No-op off target; host tests
/// drive the scheduler directly.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn trigger_pendsv() {}

/// Raise the one-shot start exception. No-op off target.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn trigger_svcall() {}

/// Sleep until the next interrupt. No-op off target.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn wait_for_interrupt() {}

/// Park the system after an unrecoverable scheduler fault.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn abort() -> ! {
    panic!("kernel abort");
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

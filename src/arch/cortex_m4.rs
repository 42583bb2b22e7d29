//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick programming, exception priorities, and the three handler entry
//! points the kernel hangs off the vector table (start, switch, tick).
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model: the kernel and all handlers run
//! on MSP, tasks run on PSP. On exception entry the hardware stacks
//! r0-r3, r12, lr, pc and xPSR onto the process stack; the PendSV handler
//! completes the context with `stmdb {r4-r11, lr}` — the callee-saved bank
//! plus the EXC_RETURN cookie — and records the resulting stack top in the
//! outgoing TCB. Restoring is the mirror image on the incoming TCB's
//! stack.
//!
//! ## Interrupt Priorities
//!
//! PendSV and SysTick both sit at the lowest priority (0xFF) so that the
//! switch handler only ever tail-chains behind other interrupts and never
//! preempts one. SVCall keeps its reset priority; it is raised exactly
//! once, by `rtos_start`, before the tick is running.

use core::arch::naked_asm;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Program the SysTick reload for `TICK_HZ` off the core clock.
///
/// The counter and its interrupt stay off; the start handler switches them
/// on once the first task has been chosen.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
}

/// SysTick control/status register.
const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;

/// Start the tick: ENABLE | TICKINT | CLKSOURCE.
unsafe fn systick_start() {
    core::ptr::write_volatile(SYST_CSR, 0b111);
}

// ---------------------------------------------------------------------------
// Exception triggers and priorities
// ---------------------------------------------------------------------------

/// Interrupt Control and State Register; bit 28 pends PendSV.
const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;

/// Request that the switch handler runs. PendSV fires as soon as no
/// higher-priority exception is active — immediately in thread mode with
/// interrupts unmasked, or on unmask otherwise.
#[inline]
pub fn trigger_pendsv() {
    unsafe { core::ptr::write_volatile(ICSR, 1 << 28) };
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Raise the one-shot supervisor call that performs the first dispatch.
/// Must be called from thread mode with interrupts enabled.
#[inline]
pub fn trigger_svcall() {
    unsafe { core::arch::asm!("svc 0") };
}

/// System Handler Priority Register 3: SysTick in [31:24], PendSV in
/// [23:16].
const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;

/// Drop PendSV and SysTick to the lowest priority so the switch handler
/// tail-chains behind every other interrupt.
pub fn set_exception_priorities() {
    unsafe {
        let val = core::ptr::read_volatile(SHPR3);
        core::ptr::write_volatile(SHPR3, val | (0xFF << 16) | (0xFF << 24));
    }
}

/// Sleep until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Park the CPU after an unrecoverable fault. The caller has already
/// logged and flushed.
pub fn abort() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Start handler (SVCall)
// ---------------------------------------------------------------------------

extern "C" {
    /// Initial stack pointer value, provided by the linker script.
    static _stack_start: u32;
}

/// SVCall exception: first dispatch into thread mode.
///
/// Resets MSP to its initial value (the boot stack is abandoned — nothing
/// returns to `rtos_start`), lets the kernel pick the first task and start
/// the tick, then restores that task's software frame and returns from the
/// exception onto its process stack.
///
/// # Safety
/// Entered only by the hardware exception mechanism, exactly once, from
/// `rtos_start`.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        // Reclaim the boot stack for handler use.
        "movw r0, :lower16:{msp_init}",
        "movt r0, :upper16:{msp_init}",
        "msr msp, r0",
        // Select the first task and enable the tick; returns its PSP.
        "bl {start}",
        // Restore the callee-saved bank and the EXC_RETURN cookie.
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        // Exception return: thread mode, process stack.
        "bx lr",
        msp_init = sym _stack_start,
        start = sym start_first_task,
    );
}

/// Rust half of the start handler: pick the first task, start the tick.
///
/// Runs in handler mode at SVCall priority, so neither the tick nor the
/// switch handler can slip in while the first selection runs.
#[no_mangle]
unsafe extern "C" fn start_first_task() -> *mut u32 {
    // Safety: handler mode, nothing else running yet.
    let k = kernel::kernel_mut();
    let slot = k.select_next_active();
    systick_start();
    k.tcbs[slot].stack_pointer
}

// ---------------------------------------------------------------------------
// Switch handler (PendSV)
// ---------------------------------------------------------------------------

/// PendSV exception: the context switch.
///
/// 1. Push `{r4-r11, lr}` onto the outgoing task's process stack.
/// 2. Hand the stack top to the kernel, which records it in the outgoing
///    TCB, checks the stack guard, and selects the next task.
/// 3. Pop `{r4-r11, lr}` from the incoming task's stack and return from
///    the exception; the hardware unstacks the rest.
///
/// # Safety
/// Entered only by the hardware exception mechanism.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "bx lr",
        switch = sym switch_frames,
    );
}

/// Rust half of the switch handler. Takes the outgoing stack top, returns
/// the incoming one.
#[no_mangle]
unsafe extern "C" fn switch_frames(old_psp: *mut u32) -> *mut u32 {
    // PendSV runs at the lowest priority; mask so no interrupt mutates the
    // queues mid-selection.
    cortex_m::interrupt::free(|_| {
        // Safety: interrupts masked, handler mode.
        let k = kernel::kernel_mut();
        if !k.started {
            return old_psp;
        }
        if let Some(out) = k.active() {
            k.tcbs[out].stack_pointer = old_psp;
            if k.tcbs[out].saved_sp_overflowed() || !k.tcbs[out].guard_intact() {
                kernel::kill_for_overflow(k, out);
            }
        }
        let slot = k.select_next_active();
        k.tcbs[slot].stack_pointer
    })
}

// ---------------------------------------------------------------------------
// Tick handler (SysTick)
// ---------------------------------------------------------------------------

/// SysTick exception: advance delays and check for preemption.
///
/// # Safety
/// Entered only by the hardware exception mechanism.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let preempt = cortex_m::interrupt::free(|_| {
        // Safety: interrupts masked, handler mode.
        let k = kernel::kernel_mut();
        if !k.started {
            return false;
        }
        k.tick()
    });
    if preempt {
        trigger_pendsv();
    }
}

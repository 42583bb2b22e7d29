//! # Kestrel Configuration
//!
//! Compile-time constants governing the kernel. Everything here is fixed at
//! build time; there is no runtime configuration store.

/// Number of distinct task priority levels. Priority 0 is reserved for the
/// idle task; application tasks use `1..N_PRIORITIES`. Higher values run
/// first.
pub const N_PRIORITIES: usize = 7;

/// Priority assigned when the caller's `TaskConfig` does not choose one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// SysTick frequency in Hz. Governs delay resolution and the preemption
/// check cadence. Higher values give finer timing at the cost of more
/// interrupt overhead.
pub const TICK_HZ: u32 = 1000;

/// Stack size in bytes used when a task is created without a caller-provided
/// stack buffer.
pub const DEFAULT_STACK_SIZE: usize = 2048;

/// Stack size in bytes of the idle task. The idle loop only reaps exited
/// tasks and flushes the logger, so this can stay small.
pub const IDLE_STACK_SIZE: usize = 512;

/// Maximum number of tasks alive at once (including the idle task). Bounds
/// the static TCB arena.
pub const MAX_TASKS: usize = 16;

/// Preemption policy. When `true`, the tick handler requests a context
/// switch whenever a task of *strictly* higher priority than the running
/// one becomes ready. When `false`, context switches happen only at
/// explicit suspension points (yield, delay, pend, exit), and equal or
/// higher priority tasks must wait for the running task to suspend.
pub const PREEMPTION: bool = true;

/// Size in bytes of the stack overflow pad at the end (lowest addresses) of
/// every task stack. The pad is filled with [`STACK_GUARD_FILL`] at creation
/// and verified by the switch path and the idle task. Set to 0 to disable
/// the guard entirely.
pub const STACK_GUARD_SIZE: usize = 16;

/// Sentinel byte written over the stack guard pad. Any other value found in
/// the pad means the task overflowed its stack.
pub const STACK_GUARD_FILL: u8 = 0xDE;

/// Timeout sentinel for [`semaphore_pend`](crate::semaphore::semaphore_pend).
/// Any timeout value less than or equal to zero means "wait forever".
pub const TIMEOUT_INFINITE: i32 = -1;

/// Size in bytes of the kernel heap backing dynamically allocated task
/// stacks and semaphore control blocks.
pub const KERNEL_HEAP_SIZE: usize = 16384;

/// Core clock frequency in Hz feeding SysTick. The demo clock tree runs the
/// CPU at 80 MHz.
pub const SYSTEM_CLOCK_HZ: u32 = 80_000_000;

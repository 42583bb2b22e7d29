//! # Kestrel Demo Firmware
//!
//! Exercises the kernel end to end on a Cortex-M4 target:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `init_task` | 6 | Creates the other tasks, then returns (clean exit via the trampoline; the idle reaper frees it) |
//! | `foreground_task` | 5 | Times out a 1500 ms semaphore pend, then ping-pongs on infinite pends |
//! | `background_task` | 4 | Caller-provided stack; delays 3 s and posts, thirty rounds, then exits |
//!
//! Expected semihosting output: one timeout report, then a steady
//! `foreground task woke from semaphore` every three seconds while the
//! background task counts down its rounds.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cortex_m_rt::entry;
    use panic_halt as _;

    use kestrel::config::{DEFAULT_PRIORITY, TIMEOUT_INFINITE};
    use kestrel::error::KernelError;
    use kestrel::kernel::{rtos_start, task_create, task_delay};
    use kestrel::semaphore::{
        semaphore_create_binary, semaphore_pend, semaphore_post, SemaphoreHandle,
    };
    use kestrel::task::TaskConfig;

    // -----------------------------------------------------------------------
    // Semihosting logger
    // -----------------------------------------------------------------------

    struct Logger;

    impl log::Log for Logger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            cortex_m_semihosting::heprintln!(
                "[{level:5} {target}] {args}",
                level = record.level(),
                target = record.target(),
                args = record.args()
            );
        }

        fn flush(&self) {}
    }

    static LOGGER: Logger = Logger;

    // -----------------------------------------------------------------------
    // Shared state
    // -----------------------------------------------------------------------

    /// Semaphore the background task posts and the foreground task pends
    /// on. Written once by the foreground task before the first post can
    /// happen.
    static mut PING_SEM: Option<SemaphoreHandle> = None;

    fn ping_sem() -> SemaphoreHandle {
        // Safety: written once before the background task first runs.
        unsafe { (*core::ptr::addr_of!(PING_SEM)).unwrap() }
    }

    /// Static stack for the background task, to exercise caller-provided
    /// stacks alongside kernel-owned ones.
    static mut BG_STACK: [u8; 1024] = [0; 1024];

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Highest-priority setup task. Creates the worker pair and returns,
    /// which routes it through the exit trampoline and the idle reaper.
    extern "C" fn init_task(_arg: *mut ()) {
        log::info!("init task starting");

        let fg = TaskConfig {
            name: Some("foreground"),
            ..TaskConfig::default()
        };
        if task_create(foreground_task, core::ptr::null_mut(), fg).is_err() {
            log::error!("could not create foreground task");
            return;
        }

        // Safety: the array is only ever lent to this one task.
        let stack = unsafe { &mut (*core::ptr::addr_of_mut!(BG_STACK))[..] };
        let bg = TaskConfig {
            stack: Some(stack),
            priority: DEFAULT_PRIORITY - 1,
            name: Some("background"),
            ..TaskConfig::default()
        };
        if task_create(background_task, 30usize as *mut (), bg).is_err() {
            log::error!("could not create background task");
            return;
        }

        log::info!("initialization complete, exiting");
    }

    /// Pends on the semaphore; the first pend carries a timeout and is
    /// expected to expire before the background task ever posts.
    extern "C" fn foreground_task(_arg: *mut ()) {
        let sem = match semaphore_create_binary() {
            Ok(sem) => sem,
            Err(_) => {
                log::error!("could not create semaphore");
                return;
            }
        };
        // Safety: the background task does not exist yet.
        unsafe { *core::ptr::addr_of_mut!(PING_SEM) = Some(sem) };

        log::info!("pending with a 1500 ms timeout");
        match semaphore_pend(sem, 1500) {
            Err(KernelError::Timeout) => log::info!("correctly timed out"),
            other => log::error!("expected a timeout, got {:?}", other),
        }

        loop {
            log::info!("foreground task pending on semaphore");
            if semaphore_pend(sem, TIMEOUT_INFINITE).is_ok() {
                log::info!("foreground task woke from semaphore");
            }
        }
    }

    /// Posts to the semaphore every three seconds for `arg` rounds, then
    /// exits by returning.
    extern "C" fn background_task(arg: *mut ()) {
        let rounds = arg as usize;
        for round in 0..rounds {
            task_delay(3000);
            log::info!("background task posting (round {})", round + 1);
            semaphore_post(ping_sem());
        }
        log::info!("background task exiting");
    }

    // -----------------------------------------------------------------------
    // Entry
    // -----------------------------------------------------------------------

    #[entry]
    fn main() -> ! {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);

        let cfg = TaskConfig {
            priority: DEFAULT_PRIORITY + 1,
            name: Some("init"),
            ..TaskConfig::default()
        };
        if let Err(e) = task_create(init_task, core::ptr::null_mut(), cfg) {
            log::error!("failed to create init task: {:?}", e);
        } else if let Err(e) = rtos_start() {
            log::error!("failed to start scheduler: {:?}", e);
        }
        loop {
            cortex_m::asm::wfi();
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}

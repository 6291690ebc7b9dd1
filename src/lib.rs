#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), feature(abi_x86_interrupt))]

extern crate alloc;

#[cfg(not(test))]
pub mod allocator;
pub mod arch;
pub mod drivers;
pub mod fs;
pub mod kernel;
pub mod loader;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod serial;
pub mod syscalls;
pub mod timer;

#[cfg(test)]
mod testing;

pub use arch::TrapFrame;
pub use kernel::Kernel;
pub use syscalls::Outcome;

/// The kernel instance the interrupt and syscall entry points use.
pub static KERNEL: spin::Once<Kernel> = spin::Once::new();

/// Publish `kernel` for the trap entry points. Later calls keep the
/// first instance.
pub fn init(kernel: Kernel) -> &'static Kernel {
    serial::init();
    let kernel = KERNEL.call_once(|| kernel);
    log_info!("User program support initialized.");
    kernel
}

/// Called by the syscall entry stub with the caller's saved registers.
#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn syscall_handler(frame: &mut TrapFrame) {
    let kernel = match KERNEL.get() {
        Some(kernel) => kernel,
        None => {
            log_error!("syscall before kernel init");
            frame.rax = u64::MAX;
            return;
        }
    };
    match kernel.syscall(frame) {
        Outcome::Resume => {}
        Outcome::Exited(_) => kernel.scheduler.exit_current(),
        Outcome::Halt => arch::power_off(),
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log_error!("{}", info);
    loop {
        x86_64::instructions::hlt();
    }
}

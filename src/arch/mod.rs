pub mod frame;
#[cfg(not(test))]
pub mod interrupts;

pub use frame::TrapFrame;

#[cfg(not(test))]
use x86_64::registers::model_specific::{Efer, EferFlags, LStar, Msr, SFMask};
#[cfg(not(test))]
use x86_64::registers::rflags::RFlags;
#[cfg(not(test))]
use x86_64::VirtAddr;

/// Segment selector MSR used by `syscall`/`sysret`.
pub const MSR_STAR: u32 = 0xC000_0081;

/// Run `f` with maskable interrupts disabled on this CPU.
///
/// Host test builds have no interrupts to mask.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(not(test))]
    {
        x86_64::instructions::interrupts::without_interrupts(f)
    }
    #[cfg(test)]
    {
        f()
    }
}

/// Program the fast-syscall MSRs.
///
/// `entry` is the trap-entry stub that saves a `TrapFrame` and calls
/// [`crate::syscall_handler`]. The interrupt flag stays masked until the
/// stub has switched to the kernel stack.
#[cfg(not(test))]
pub fn syscall_init(entry: VirtAddr, kernel_cs: u16, user_cs: u16) {
    let star = ((user_cs as u64 - 0x10) << 48) | ((kernel_cs as u64) << 32);
    unsafe {
        Efer::update(|flags| flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS));
        Msr::new(MSR_STAR).write(star);
        LStar::write(entry);
        SFMask::write(
            RFlags::INTERRUPT_FLAG
                | RFlags::TRAP_FLAG
                | RFlags::DIRECTION_FLAG
                | RFlags::IOPL_LOW
                | RFlags::IOPL_HIGH
                | RFlags::ALIGNMENT_CHECK
                | RFlags::NESTED_TASK,
        );
    }
    crate::log_info!("syscall: MSRs programmed, entry at {:#x}", entry.as_u64());
}

/// Power the machine off through the ACPI port QEMU and Bochs expose.
#[cfg(not(test))]
pub fn power_off() -> ! {
    use x86_64::instructions::port::Port;

    crate::log_info!("Powering off...");
    let mut port: Port<u16> = Port::new(0x604);
    unsafe { port.write(0x2000) };
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

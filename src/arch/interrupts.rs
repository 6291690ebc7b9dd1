//! Timer IRQ wiring: the 8259 PIC pair and the handler that drives the
//! sleep queue once per tick.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

/// Hook the timer vector into an IDT owned by the boot code.
pub fn install(idt: &mut InterruptDescriptorTable) {
    idt[InterruptIndex::Timer.as_usize()].set_handler_fn(timer_interrupt_handler);
}

/// Remap and unmask the PICs. Call once, after the IDT is loaded.
pub fn init() {
    unsafe { PICS.lock().initialize() };
    crate::log_info!("Timer IRQ routed to vector {}.", InterruptIndex::Timer.as_u8());
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    if let Some(kernel) = crate::KERNEL.get() {
        kernel.timer_interrupt();
    }
    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Timer.as_u8());
    }
}

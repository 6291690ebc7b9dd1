//! The console behind descriptors 0 and 1.

/// Byte stream the reserved descriptors talk to.
pub trait Console: Send + Sync {
    /// Emit `bytes` as one uninterrupted run.
    fn put_bytes(&self, bytes: &[u8]);

    /// Next input byte, waiting for one to arrive.
    fn get_byte(&self) -> u8;
}

/// COM1 as both console input and output.
#[cfg(not(test))]
pub struct SerialConsole;

#[cfg(not(test))]
impl Console for SerialConsole {
    fn put_bytes(&self, bytes: &[u8]) {
        crate::arch::without_interrupts(|| {
            let mut port = crate::serial::SERIAL1.lock();
            for &byte in bytes {
                port.send(byte);
            }
        });
    }

    fn get_byte(&self) -> u8 {
        loop {
            let pending = crate::arch::without_interrupts(|| crate::serial::SERIAL1.lock().try_receive());
            if let Some(byte) = pending {
                return byte;
            }
            x86_64::instructions::interrupts::enable_and_hlt();
        }
    }
}

/// User code segment selector (GDT index 4, RPL 3).
pub const USER_CS: u64 = 0x23;
/// User data/stack segment selector (GDT index 3, RPL 3).
pub const USER_SS: u64 = 0x1B;

/// RFLAGS interrupt-enable bit.
pub const FLAG_IF: u64 = 1 << 9;
/// RFLAGS bit 1 is reserved and always reads as one.
pub const FLAG_MBS: u64 = 1 << 1;

/// Register state saved by the trap entry before the dispatcher runs.
///
/// General-purpose registers are pushed by the entry stub in this order;
/// the last five fields are the `iretq` frame. Syscall convention: number
/// in `rax`, arguments in `rdi, rsi, rdx, r10, r8, r9`, result in `rax`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// A fresh Ring 3 frame that starts at `entry` with `rdi = argc`,
    /// `rsi = argv` and the stack pointer at `rsp`.
    pub fn user(entry: u64, rsp: u64, argc: u64, argv: u64) -> Self {
        TrapFrame {
            rip: entry,
            rsp,
            rdi: argc,
            rsi: argv,
            cs: USER_CS,
            ss: USER_SS,
            rflags: FLAG_IF | FLAG_MBS,
            ..TrapFrame::default()
        }
    }

    /// Syscall argument register `n` (0-based).
    pub fn arg(&self, n: usize) -> u64 {
        match n {
            0 => self.rdi,
            1 => self.rsi,
            2 => self.rdx,
            3 => self.r10,
            4 => self.r8,
            5 => self.r9,
            _ => 0,
        }
    }
}

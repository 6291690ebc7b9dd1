use crate::arch::TrapFrame;
use crate::fs::Fd;

/// Syscall numbers (passed in RAX from userland).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    Halt     = 0,
    Exit     = 1,
    Fork     = 2,
    Exec     = 3,
    Wait     = 4,
    Create   = 5,
    Remove   = 6,
    Open     = 7,
    Filesize = 8,
    Read     = 9,
    Write    = 10,
    Seek     = 11,
    Tell     = 12,
    Close    = 13,
}

impl SyscallNumber {
    pub fn name(self) -> &'static str {
        match self {
            SyscallNumber::Halt     => "halt",
            SyscallNumber::Exit     => "exit",
            SyscallNumber::Fork     => "fork",
            SyscallNumber::Exec     => "exec",
            SyscallNumber::Wait     => "wait",
            SyscallNumber::Create   => "create",
            SyscallNumber::Remove   => "remove",
            SyscallNumber::Open     => "open",
            SyscallNumber::Filesize => "filesize",
            SyscallNumber::Read     => "read",
            SyscallNumber::Write    => "write",
            SyscallNumber::Seek     => "seek",
            SyscallNumber::Tell     => "tell",
            SyscallNumber::Close    => "close",
        }
    }

    /// How many argument registers the call reads.
    pub fn arity(self) -> usize {
        match self {
            SyscallNumber::Halt => 0,
            SyscallNumber::Exit
            | SyscallNumber::Fork
            | SyscallNumber::Exec
            | SyscallNumber::Wait
            | SyscallNumber::Remove
            | SyscallNumber::Open
            | SyscallNumber::Filesize
            | SyscallNumber::Tell
            | SyscallNumber::Close => 1,
            SyscallNumber::Create | SyscallNumber::Seek => 2,
            SyscallNumber::Read | SyscallNumber::Write => 3,
        }
    }
}

impl TryFrom<u64> for SyscallNumber {
    type Error = u64;

    fn try_from(raw: u64) -> Result<Self, u64> {
        Ok(match raw {
            0  => SyscallNumber::Halt,
            1  => SyscallNumber::Exit,
            2  => SyscallNumber::Fork,
            3  => SyscallNumber::Exec,
            4  => SyscallNumber::Wait,
            5  => SyscallNumber::Create,
            6  => SyscallNumber::Remove,
            7  => SyscallNumber::Open,
            8  => SyscallNumber::Filesize,
            9  => SyscallNumber::Read,
            10 => SyscallNumber::Write,
            11 => SyscallNumber::Seek,
            12 => SyscallNumber::Tell,
            13 => SyscallNumber::Close,
            _  => return Err(raw),
        })
    }
}

/// Argument registers of one call, read through typed accessors.
/// Registers past the call's arity read as zero.
///
/// C-level `int` and `unsigned` arguments occupy the low 32 bits of their
/// register; the upper half is ignored.
#[derive(Debug, Clone, Copy)]
pub struct Args {
    regs: [u64; 6],
}

impl Args {
    pub fn new(frame: &TrapFrame, number: SyscallNumber) -> Self {
        let mut regs = [0u64; 6];
        for (n, reg) in regs.iter_mut().enumerate().take(number.arity()) {
            *reg = frame.arg(n);
        }
        Args { regs }
    }

    pub fn raw(&self, n: usize) -> u64 {
        self.regs.get(n).copied().unwrap_or(0)
    }

    pub fn int(&self, n: usize) -> i32 {
        self.raw(n) as u32 as i32
    }

    pub fn uint(&self, n: usize) -> u32 {
        self.raw(n) as u32
    }

    pub fn fd(&self, n: usize) -> Fd {
        self.int(n)
    }

    /// A user pointer, still unchecked.
    pub fn user_ptr(&self, n: usize) -> u64 {
        self.raw(n)
    }
}

//! The syscall dispatcher: the one place untrusted register values enter
//! the kernel.

pub mod file;
pub mod number;

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::arch::TrapFrame;
use crate::kernel::Kernel;
use crate::loader::ExecError;
use crate::memory::{validate_str, InvalidAddress};
use crate::process::{Process, ProcessId};
use crate::log_warn;

pub use number::{Args, SyscallNumber};

/// What the trap glue must do once the dispatcher returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Return to user mode with the (possibly rewritten) frame.
    Resume,
    /// The caller has gone through `exit`; retire its thread.
    Exited(i32),
    /// Power the machine off.
    Halt,
}

/// Result of one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Value(i64),
    NoValue,
    Exit(i32),
    Halt,
}

impl Reply {
    fn bool(b: bool) -> Self {
        Reply::Value(b as i64)
    }
}

/// Errors that kill the calling process with status -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    BadPointer(InvalidAddress),
    EmptyName,
    Exec(ExecError),
    NoProcess,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::BadPointer(e) => write!(f, "{}", e),
            SyscallError::EmptyName => write!(f, "empty file name"),
            SyscallError::Exec(e) => write!(f, "exec failed: {}", e),
            SyscallError::NoProcess => write!(f, "caller is not a user process"),
        }
    }
}

impl From<InvalidAddress> for SyscallError {
    fn from(e: InvalidAddress) -> Self {
        SyscallError::BadPointer(e)
    }
}

impl From<ExecError> for SyscallError {
    fn from(e: ExecError) -> Self {
        SyscallError::Exec(e)
    }
}

pub(crate) type SyscallResult = Result<Reply, SyscallError>;

impl Kernel {
    /// Central syscall dispatcher, called from the trap entry with the
    /// caller's saved registers. The result goes back in `rax`.
    pub fn syscall(&self, frame: &mut TrapFrame) -> Outcome {
        let number = match SyscallNumber::try_from(frame.rax) {
            Ok(number) => number,
            Err(raw) => {
                log_warn!("syscall: unknown number {}", raw);
                frame.rax = u64::MAX;
                return Outcome::Resume;
            }
        };
        let args = Args::new(frame, number);

        let reply = match number {
            SyscallNumber::Halt     => Ok(Reply::Halt),
            SyscallNumber::Exit     => Ok(Reply::Exit(args.int(0))),
            SyscallNumber::Fork     => self.sys_fork(&args, frame),
            SyscallNumber::Exec     => self.sys_exec(&args, frame),
            SyscallNumber::Wait     => Ok(self.sys_wait(&args)),
            SyscallNumber::Create   => self.sys_create(&args),
            SyscallNumber::Remove   => self.sys_remove(&args),
            SyscallNumber::Open     => self.sys_open(&args),
            SyscallNumber::Filesize => self.sys_filesize(&args),
            SyscallNumber::Read     => self.sys_read(&args),
            SyscallNumber::Write    => self.sys_write(&args),
            SyscallNumber::Seek     => self.sys_seek(&args),
            SyscallNumber::Tell     => self.sys_tell(&args),
            SyscallNumber::Close    => self.sys_close(&args),
        };

        match reply {
            Ok(Reply::Value(value)) => {
                frame.rax = value as u64;
                Outcome::Resume
            }
            Ok(Reply::NoValue) => Outcome::Resume,
            Ok(Reply::Exit(status)) => {
                self.exit(status);
                Outcome::Exited(status)
            }
            Ok(Reply::Halt) => Outcome::Halt,
            Err(e) => {
                log_warn!(
                    "syscall: {} killed PID {}: {}",
                    number.name(),
                    self.scheduler.current(),
                    e
                );
                self.exit(-1);
                Outcome::Exited(-1)
            }
        }
    }

    pub(crate) fn caller(&self) -> Result<Arc<Process>, SyscallError> {
        self.current_process().ok_or(SyscallError::NoProcess)
    }

    /// Copy the string argument `n` out of the caller's memory.
    pub(crate) fn user_string(
        &self,
        process: &Process,
        args: &Args,
        n: usize,
    ) -> Result<String, SyscallError> {
        let space = process.space();
        Ok(validate_str(space.as_ref(), args.user_ptr(n))?)
    }

    fn sys_fork(&self, args: &Args, frame: &TrapFrame) -> SyscallResult {
        let process = self.caller()?;
        let name = self.user_string(&process, args, 0)?;
        drop(process);
        match self.fork(&name, frame) {
            Ok(pid) => Ok(Reply::Value(pid.0 as i64)),
            Err(e) => {
                log_warn!("fork: {}", e);
                Ok(Reply::Value(-1))
            }
        }
    }

    fn sys_exec(&self, args: &Args, frame: &mut TrapFrame) -> SyscallResult {
        let process = self.caller()?;
        let cmdline = self.user_string(&process, args, 0)?;
        drop(process);
        if cmdline.trim().is_empty() {
            return Err(SyscallError::EmptyName);
        }
        self.exec(&cmdline, frame)?;
        Ok(Reply::NoValue)
    }

    fn sys_wait(&self, args: &Args) -> Reply {
        let pid = args.int(0);
        if pid <= 0 {
            return Reply::Value(-1);
        }
        Reply::Value(self.wait(ProcessId(pid as u64)) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ElfBuilder, Harness, CODE_BASE};
    use crate::memory::USER_TOP;

    #[test]
    fn test_unknown_number_returns_minus_one() {
        let h = Harness::new();
        let mut frame = h.frame(99, &[]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);
        assert_eq!(frame.rax, u64::MAX);
        assert!(h.console.output().is_empty());
    }

    #[test]
    fn test_halt() {
        let h = Harness::new();
        let mut frame = h.frame(SyscallNumber::Halt as u64, &[]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Halt);
    }

    #[test]
    fn test_exit_prints_status_and_removes_process() {
        let h = Harness::new();
        let mut frame = h.frame(SyscallNumber::Exit as u64, &[(-7i64) as u64]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Exited(-7));
        assert_eq!(h.console.output_str(), "init: exit(-7)\n");
        assert!(h.kernel.current_process().is_none());
    }

    #[test]
    fn test_bad_pointer_kills_caller() {
        for ptr in [0, USER_TOP + 0x10, 0x1234_0000, u64::MAX - 5] {
            let h = Harness::new();
            let mut frame = h.frame(SyscallNumber::Open as u64, &[ptr]);
            assert_eq!(h.kernel.syscall(&mut frame), Outcome::Exited(-1));
            assert_eq!(h.console.output_str(), "init: exit(-1)\n");
        }
    }

    #[test]
    fn test_fork_returns_child_and_zero_in_child_frame() {
        let h = Harness::new();
        let name = h.push_str("child");
        let mut frame = h.frame(SyscallNumber::Fork as u64, &[name]);
        frame.rip = 0x40_1234;
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);

        let child = ProcessId(frame.rax);
        let spawned = h.sched.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].0, child);
        assert_eq!(spawned[0].1.rax, 0);
        assert_eq!(spawned[0].1.rip, 0x40_1234);
        assert_eq!(h.kernel.processes.get(child).unwrap().name(), "child");
    }

    #[test]
    fn test_fork_copies_memory() {
        let h = Harness::new();
        let name = h.push_str("copy");
        let mut frame = h.frame(SyscallNumber::Fork as u64, &[name]);
        h.kernel.syscall(&mut frame);

        let child = h.kernel.processes.get(ProcessId(frame.rax)).unwrap();
        let parent_space = h.space();
        parent_space.poke(name, b"XXXX");
        let mut buf = [0u8; 4];
        unsafe { child.space().copy_in(x86_64::VirtAddr::new(name), &mut buf) };
        assert_eq!(&buf, b"copy");
    }

    #[test]
    fn test_fork_failure_returns_minus_one() {
        let h = Harness::new();
        h.sched.fail_spawn(true);
        let name = h.push_str("child");
        let mut frame = h.frame(SyscallNumber::Fork as u64, &[name]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);
        assert_eq!(frame.rax as i64, -1);
        assert_eq!(h.kernel.processes.len(), 1);
    }

    #[test]
    fn test_wait_on_non_child() {
        let h = Harness::new();
        let mut frame = h.frame(SyscallNumber::Wait as u64, &[77]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);
        assert_eq!(frame.rax as i64, -1);
    }

    #[test]
    fn test_exec_replaces_image() {
        let h = Harness::new();
        h.install("echo", &ElfBuilder::new(CODE_BASE).segment(CODE_BASE, b"\xF4", 1, false).build());
        let cmd = h.push_str("echo  hello   world");
        let mut frame = h.frame(SyscallNumber::Exec as u64, &[cmd]);

        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);
        assert_eq!(frame.rip, CODE_BASE);
        assert_eq!(frame.rdi, 3);
        assert_eq!(frame.rsi, frame.rsp + 8);
        assert_eq!(h.kernel.current_process().unwrap().name(), "echo");
    }

    #[test]
    fn test_exec_missing_program_kills_caller() {
        let h = Harness::new();
        let cmd = h.push_str("no-such-prog arg");
        let mut frame = h.frame(SyscallNumber::Exec as u64, &[cmd]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Exited(-1));
        assert_eq!(h.console.output_str(), "init: exit(-1)\n");
    }

    #[test]
    fn test_exec_empty_command_kills_caller() {
        let h = Harness::new();
        let cmd = h.push_str("   ");
        let mut frame = h.frame(SyscallNumber::Exec as u64, &[cmd]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Exited(-1));
    }
}

//! File and console syscalls.

use alloc::vec;

use super::{Args, Reply, SyscallError, SyscallResult};
use crate::fs::{Fd, FileHandle, Slot};
use crate::kernel::Kernel;
use crate::memory::{validate_read, validate_write};
use crate::process::Process;

/// Kernel-side staging buffer between user memory and a file.
const BOUNCE_SIZE: usize = 512;

/// Where a read or write on a descriptor goes.
enum Target {
    ConsoleIn,
    ConsoleOut,
    File,
}

fn target(process: &Process, fd: Fd) -> Target {
    match process.lock().fd_table.slot(fd) {
        Slot::ConsoleIn => Target::ConsoleIn,
        Slot::ConsoleOut => Target::ConsoleOut,
        _ => Target::File,
    }
}

impl Kernel {
    pub(super) fn sys_create(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let name = self.user_string(&process, args, 0)?;
        if name.is_empty() {
            return Err(SyscallError::EmptyName);
        }
        let size = args.uint(1) as usize;
        Ok(Reply::bool(self.fs.create(&name, size).is_ok()))
    }

    pub(super) fn sys_remove(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let name = self.user_string(&process, args, 0)?;
        if name.is_empty() {
            return Err(SyscallError::EmptyName);
        }
        Ok(Reply::bool(self.fs.remove(&name).is_ok()))
    }

    pub(super) fn sys_open(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let name = self.user_string(&process, args, 0)?;
        let inode = match self.fs.open(&name) {
            Ok(inode) => inode,
            Err(_) => return Ok(Reply::Value(-1)),
        };
        let installed = process.lock().fd_table.install(FileHandle::new(inode));
        Ok(Reply::Value(installed.map_or(-1, i64::from)))
    }

    pub(super) fn sys_filesize(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let mut inner = process.lock();
        let size = inner
            .fd_table
            .file_mut(args.fd(0))
            .map_or(-1, |file| file.len() as i64);
        Ok(Reply::Value(size))
    }

    pub(super) fn sys_read(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let space = process.space();
        let fd = args.fd(0);
        let size = args.uint(2) as usize;
        let mut buffer = validate_write(space.as_ref(), args.user_ptr(1), size)?;

        match target(&process, fd) {
            Target::ConsoleIn => {
                for offset in 0..size {
                    let byte = self.console.get_byte();
                    buffer.copy_from(offset, &[byte]);
                }
                Ok(Reply::Value(size as i64))
            }
            Target::ConsoleOut => Ok(Reply::Value(-1)),
            Target::File => {
                let mut inner = process.lock();
                let file = match inner.fd_table.file_mut(fd) {
                    Ok(file) => file,
                    Err(_) => return Ok(Reply::Value(-1)),
                };
                let mut bounce = vec![0u8; BOUNCE_SIZE.min(size.max(1))];
                let mut done = 0;
                while done < size {
                    let want = (size - done).min(bounce.len());
                    let got = file.read(&mut bounce[..want]);
                    buffer.copy_from(done, &bounce[..got]);
                    done += got;
                    if got < want {
                        break;
                    }
                }
                Ok(Reply::Value(done as i64))
            }
        }
    }

    pub(super) fn sys_write(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let space = process.space();
        let fd = args.fd(0);
        let size = args.uint(2) as usize;
        let buffer = validate_read(space.as_ref(), args.user_ptr(1), size)?;

        match target(&process, fd) {
            Target::ConsoleIn => return Ok(Reply::Value(-1)),
            Target::ConsoleOut => {
                let mut chunk = [0u8; BOUNCE_SIZE];
                let mut done = 0;
                while done < size {
                    let got = buffer.copy_to(done, &mut chunk);
                    self.console.put_bytes(&chunk[..got]);
                    done += got;
                }
                return Ok(Reply::Value(size as i64));
            }
            Target::File => {}
        }

        let mut inner = process.lock();
        let file = match inner.fd_table.file_mut(fd) {
            Ok(file) => file,
            Err(_) => return Ok(Reply::Value(-1)),
        };
        let mut bounce = vec![0u8; BOUNCE_SIZE.min(size.max(1))];
        let mut done = 0;
        while done < size {
            let want = buffer.copy_to(done, &mut bounce);
            let put = file.write(&bounce[..want]);
            done += put;
            if put < want {
                break;
            }
        }
        Ok(Reply::Value(done as i64))
    }

    pub(super) fn sys_seek(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        if let Ok(file) = process.lock().fd_table.file_mut(args.fd(0)) {
            file.seek(args.uint(1) as usize);
        }
        Ok(Reply::NoValue)
    }

    pub(super) fn sys_tell(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let mut inner = process.lock();
        let pos = inner
            .fd_table
            .file_mut(args.fd(0))
            .map_or(-1, |file| file.tell() as i64);
        Ok(Reply::Value(pos))
    }

    pub(super) fn sys_close(&self, args: &Args) -> SyscallResult {
        let process = self.caller()?;
        let _ = process.lock().fd_table.close(args.fd(0));
        Ok(Reply::NoValue)
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::FileSystem;
    use crate::syscalls::{Outcome, SyscallNumber};
    use crate::testing::{ElfBuilder, Harness, CODE_BASE};
    use std::vec::Vec;

    fn call(h: &Harness, number: SyscallNumber, args: &[u64]) -> i64 {
        let mut frame = h.frame(number as u64, args);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);
        frame.rax as i64
    }

    fn open(h: &Harness, name: &str) -> i64 {
        let ptr = h.push_str(name);
        call(h, SyscallNumber::Open, &[ptr])
    }

    #[test]
    fn test_open_missing_then_after_create() {
        let h = Harness::new();
        assert_eq!(open(&h, "data"), -1);
        let name = h.push_str("data");
        assert_eq!(call(&h, SyscallNumber::Create, &[name, 16]), 1);
        assert_eq!(open(&h, "data"), 2);
        assert_eq!(open(&h, "data"), 3);
    }

    #[test]
    fn test_create_rejects_long_and_duplicate_names() {
        let h = Harness::new();
        let long = h.push_str("fifteen-chars-x");
        assert_eq!(call(&h, SyscallNumber::Create, &[long, 0]), 0);
        assert!(h.fs.is_empty());

        let name = h.push_str("once");
        assert_eq!(call(&h, SyscallNumber::Create, &[name, 0]), 1);
        assert_eq!(call(&h, SyscallNumber::Create, &[name, 8]), 0);
        assert_eq!(h.fs.open("once").unwrap().len(), 0);
    }

    #[test]
    fn test_create_with_empty_name_kills_caller() {
        let h = Harness::new();
        let empty = h.push_str("");
        let mut frame = h.frame(SyscallNumber::Create as u64, &[empty, 0]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Exited(-1));
    }

    #[test]
    fn test_remove() {
        let h = Harness::new();
        h.fs.create("gone", 4).unwrap();
        let name = h.push_str("gone");
        assert_eq!(call(&h, SyscallNumber::Remove, &[name]), 1);
        assert_eq!(call(&h, SyscallNumber::Remove, &[name]), 0);
    }

    #[test]
    fn test_console_descriptors() {
        let h = Harness::new();
        let buf = h.push_bytes(b"hello");
        assert_eq!(call(&h, SyscallNumber::Write, &[0, buf, 5]), -1);
        assert_eq!(call(&h, SyscallNumber::Read, &[1, buf, 5]), -1);
        assert_eq!(call(&h, SyscallNumber::Write, &[1, buf, 5]), 5);
        assert_eq!(h.console.output_str(), "hello");
    }

    #[test]
    fn test_long_console_write_arrives_whole() {
        let h = Harness::new();
        let text: Vec<u8> = (0..1500u32).map(|i| b'a' + (i % 26) as u8).collect();
        let buf = h.push_bytes(&text);
        assert_eq!(call(&h, SyscallNumber::Write, &[1, buf, 1500]), 1500);
        assert_eq!(h.console.output(), text);
    }

    #[test]
    fn test_read_from_console_input() {
        let h = Harness::new();
        h.console.feed(b"abc");
        let buf = h.push_bytes(&[0; 3]);
        assert_eq!(call(&h, SyscallNumber::Read, &[0, buf, 3]), 3);
        assert_eq!(h.space().peek(buf, 3), b"abc");
    }

    #[test]
    fn test_write_then_read_back() {
        let h = Harness::new();
        h.fs.create("notes", 2000).unwrap();
        let fd = open(&h, "notes") as u64;

        let text: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
        let src = h.push_bytes(&text);
        call(&h, SyscallNumber::Seek, &[fd, 300]);
        assert_eq!(call(&h, SyscallNumber::Write, &[fd, src, 1300]), 1300);
        assert_eq!(call(&h, SyscallNumber::Tell, &[fd]), 1600);

        let dst = h.push_bytes(&[0; 1300]);
        call(&h, SyscallNumber::Seek, &[fd, 300]);
        assert_eq!(call(&h, SyscallNumber::Read, &[fd, dst, 1300]), 1300);
        assert_eq!(h.space().peek(dst, 1300), text);
    }

    #[test]
    fn test_read_and_write_stop_at_end_of_file() {
        let h = Harness::new();
        h.fs.create("tiny", 4).unwrap();
        let fd = open(&h, "tiny") as u64;
        let src = h.push_bytes(b"abcdef");
        assert_eq!(call(&h, SyscallNumber::Write, &[fd, src, 6]), 4);
        assert_eq!(call(&h, SyscallNumber::Filesize, &[fd]), 4);

        call(&h, SyscallNumber::Seek, &[fd, 2]);
        let dst = h.push_bytes(&[0; 8]);
        assert_eq!(call(&h, SyscallNumber::Read, &[fd, dst, 8]), 2);
        assert_eq!(call(&h, SyscallNumber::Read, &[fd, dst, 8]), 0);
    }

    #[test]
    fn test_bad_descriptors() {
        let h = Harness::new();
        let buf = h.push_bytes(&[0; 4]);
        assert_eq!(call(&h, SyscallNumber::Read, &[9, buf, 4]), -1);
        assert_eq!(call(&h, SyscallNumber::Write, &[(-1i64) as u64, buf, 4]), -1);
        assert_eq!(call(&h, SyscallNumber::Filesize, &[1]), -1);
        assert_eq!(call(&h, SyscallNumber::Tell, &[300]), -1);
        call(&h, SyscallNumber::Close, &[0]);
        call(&h, SyscallNumber::Close, &[1]);
        call(&h, SyscallNumber::Close, &[42]);
        assert_eq!(call(&h, SyscallNumber::Write, &[1, buf, 0]), 0);
    }

    #[test]
    fn test_close_frees_lowest_slot() {
        let h = Harness::new();
        h.fs.create("f", 1).unwrap();
        assert_eq!(open(&h, "f"), 2);
        assert_eq!(open(&h, "f"), 3);
        call(&h, SyscallNumber::Close, &[2]);
        assert_eq!(call(&h, SyscallNumber::Tell, &[2]), -1);
        assert_eq!(open(&h, "f"), 2);
    }

    #[test]
    fn test_read_into_read_only_page_kills_caller() {
        let h = Harness::new();
        h.fs.create("f", 8).unwrap();
        let fd = open(&h, "f") as u64;
        let mut frame = h.frame(SyscallNumber::Read as u64, &[fd, h.read_only_page(), 8]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Exited(-1));
    }

    #[test]
    fn test_running_executable_is_write_protected() {
        let h = Harness::new();
        let image = ElfBuilder::new(CODE_BASE)
            .segment(CODE_BASE, b"\xF4", 1, false)
            .build();
        h.install("prog", &image);
        let cmd = h.push_str("prog");
        let mut frame = h.frame(SyscallNumber::Exec as u64, &[cmd]);
        assert_eq!(h.kernel.syscall(&mut frame), Outcome::Resume);

        // The new image has its own memory; stage the arguments again.
        h.map_scratch();
        let fd = open(&h, "prog") as u64;
        let src = h.push_bytes(b"XX");
        assert_eq!(call(&h, SyscallNumber::Write, &[fd, src, 2]), 0);
    }
}

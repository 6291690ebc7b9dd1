use core::fmt;

use crate::memory::{MapError, PAGE_SIZE, USER_TOP};
use crate::scheduler::SpawnError;

// ══════════════════════════════════════════════════════════════
//  ELF64 constants
// ══════════════════════════════════════════════════════════════

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8    = 2;
const ELFDATA2LSB: u8   = 1;
const EV_CURRENT: u8    = 1;
const ET_EXEC: u16      = 2;
const EM_X86_64: u16    = 62;

pub const PT_LOAD: u32    = 1;
const PT_DYNAMIC: u32     = 2;
const PT_INTERP: u32      = 3;
const PT_SHLIB: u32       = 5;

pub const PF_W: u32 = 2;

pub const EHDR_SIZE: usize = 64;
pub const PHDR_SIZE: usize = 56;
const MAX_PHNUM: u16       = 1024;

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn u64_at(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

// ══════════════════════════════════════════════════════════════
//  ELF64 structures
// ══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Elf64Ehdr {
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

impl Elf64Ehdr {
    pub fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < EHDR_SIZE { return Err(ExecError::InvalidFormat); }
        if data[0..4] != ELF_MAGIC { return Err(ExecError::InvalidFormat); }
        if data[4] != ELFCLASS64 { return Err(ExecError::UnsupportedArch); }
        if data[5] != ELFDATA2LSB { return Err(ExecError::UnsupportedArch); }
        if data[6] != EV_CURRENT { return Err(ExecError::InvalidFormat); }

        let e_type = u16_at(data, 16);
        let e_machine = u16_at(data, 18);
        if e_type != ET_EXEC { return Err(ExecError::UnsupportedType); }
        if e_machine != EM_X86_64 { return Err(ExecError::UnsupportedArch); }

        let ehdr = Elf64Ehdr {
            e_entry: u64_at(data, 24),
            e_phoff: u64_at(data, 32),
            e_phentsize: u16_at(data, 54),
            e_phnum: u16_at(data, 56),
        };
        if ehdr.e_phentsize as usize != PHDR_SIZE || ehdr.e_phnum > MAX_PHNUM {
            return Err(ExecError::InvalidFormat);
        }
        Ok(ehdr)
    }

    /// File offset of program header `index`.
    pub fn phdr_offset(&self, index: u16) -> Option<u64> {
        self.e_phoff.checked_add(index as u64 * PHDR_SIZE as u64)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
}

impl Elf64Phdr {
    pub fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < PHDR_SIZE { return Err(ExecError::InvalidFormat); }
        let phdr = Elf64Phdr {
            p_type: u32_at(data, 0),
            p_flags: u32_at(data, 4),
            p_offset: u64_at(data, 8),
            p_vaddr: u64_at(data, 16),
            p_filesz: u64_at(data, 32),
            p_memsz: u64_at(data, 40),
        };
        match phdr.p_type {
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => Err(ExecError::UnsupportedType),
            _ => Ok(phdr),
        }
    }

    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub fn is_writable(&self) -> bool {
        self.p_flags & PF_W != 0
    }

    /// Check that a loadable segment fits the file and user space.
    pub fn validate(&self, file_len: u64) -> Result<(), ExecError> {
        let bad = Err(ExecError::BadSegment);
        if self.p_offset % PAGE_SIZE != self.p_vaddr % PAGE_SIZE { return bad; }
        if self.p_offset > file_len { return bad; }
        if self.p_memsz < self.p_filesz || self.p_memsz == 0 { return bad; }
        if self.p_vaddr < PAGE_SIZE { return bad; }
        match self.p_vaddr.checked_add(self.p_memsz) {
            Some(end) if end <= USER_TOP => Ok(()),
            _ => bad,
        }
    }
}

// ══════════════════════════════════════════════════════════════
//  ExecError
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    EmptyCommand,
    FileNotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    BadSegment,
    ReadError,
    ArgumentsTooLong,
    Memory(MapError),
    Thread(SpawnError),
    NoProcess,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::EmptyCommand     => write!(f, "Empty command line"),
            ExecError::FileNotFound     => write!(f, "File not found"),
            ExecError::InvalidFormat    => write!(f, "Invalid ELF format"),
            ExecError::UnsupportedArch  => write!(f, "Unsupported architecture"),
            ExecError::UnsupportedType  => write!(f, "Unsupported ELF type (need ET_EXEC)"),
            ExecError::BadSegment       => write!(f, "Bad loadable segment"),
            ExecError::ReadError        => write!(f, "File read error"),
            ExecError::ArgumentsTooLong => write!(f, "Arguments do not fit on the stack"),
            ExecError::Memory(e)        => write!(f, "Memory allocation error: {}", e),
            ExecError::Thread(e)        => write!(f, "Thread creation error: {}", e),
            ExecError::NoProcess        => write!(f, "No current process"),
        }
    }
}

impl From<MapError> for ExecError {
    fn from(e: MapError) -> Self {
        ExecError::Memory(e)
    }
}

//! Program loading for `exec` and the first user process.
//!
//! Builds a complete new address space before anyone switches to it, so a
//! failed load leaves the caller's image untouched.

pub mod elf;
pub mod stack;

use alloc::sync::Arc;
use alloc::vec;
use x86_64::VirtAddr;

use crate::arch::TrapFrame;
use crate::fs::FileHandle;
use crate::log_info;
use crate::memory::{page_down, Access, AddressSpace, UserPage, Vmm, PAGE_SIZE, USER_STACK};
use elf::{Elf64Ehdr, Elf64Phdr, EHDR_SIZE, PHDR_SIZE};

pub use elf::ExecError;

/// A program mapped into a fresh address space, ready to enter.
pub struct LoadedImage {
    pub space: Arc<dyn AddressSpace>,
    pub entry: u64,
    pub rsp: u64,
    pub argc: u64,
    pub argv: u64,
}

impl LoadedImage {
    /// The user-mode frame that starts this program.
    pub fn frame(&self) -> TrapFrame {
        TrapFrame::user(self.entry, self.rsp, self.argc, self.argv)
    }
}

fn read_exact(file: &FileHandle, offset: u64, buf: &mut [u8]) -> Result<(), ExecError> {
    let offset = usize::try_from(offset).map_err(|_| ExecError::ReadError)?;
    if file.read_at(offset, buf) != buf.len() {
        return Err(ExecError::ReadError);
    }
    Ok(())
}

/// Map every page of `[start, end)` that is not mapped yet.
fn map_pages(space: &dyn AddressSpace, start: u64, end: u64, access: Access) -> Result<(), ExecError> {
    let first = UserPage::containing_address(VirtAddr::new(page_down(start)));
    let last = UserPage::containing_address(VirtAddr::new(end - 1));
    for page in UserPage::range_inclusive(first, last) {
        if space.access(page).is_none() {
            space.map_zeroed(page, access)?;
        }
    }
    Ok(())
}

fn load_segment(space: &dyn AddressSpace, file: &FileHandle, phdr: &Elf64Phdr) -> Result<(), ExecError> {
    let access = if phdr.is_writable() {
        Access::READ | Access::WRITE
    } else {
        Access::READ
    };
    map_pages(space, phdr.p_vaddr, phdr.p_vaddr + phdr.p_memsz, access)?;

    let mut chunk = vec![0u8; PAGE_SIZE as usize];
    let mut done = 0;
    while done < phdr.p_filesz {
        let len = (phdr.p_filesz - done).min(PAGE_SIZE) as usize;
        read_exact(file, phdr.p_offset + done, &mut chunk[..len])?;
        // SAFETY: every page of the segment was mapped above.
        unsafe { space.copy_out(VirtAddr::new(phdr.p_vaddr + done), &chunk[..len]) };
        done += len as u64;
    }
    Ok(())
}

/// Load the ELF executable behind `file` into a new address space and
/// push `argv` onto its stack. `argv[0]` is the program name.
pub fn load(vmm: &dyn Vmm, file: &FileHandle, argv: &[&str]) -> Result<LoadedImage, ExecError> {
    let mut header = [0u8; EHDR_SIZE];
    read_exact(file, 0, &mut header).map_err(|_| ExecError::InvalidFormat)?;
    let ehdr = Elf64Ehdr::parse(&header)?;
    let file_len = file.len() as u64;

    let space = vmm.create_space()?;
    let mut loaded = 0;
    for index in 0..ehdr.e_phnum {
        let offset = ehdr.phdr_offset(index).ok_or(ExecError::InvalidFormat)?;
        let mut raw = [0u8; PHDR_SIZE];
        read_exact(file, offset, &mut raw).map_err(|_| ExecError::InvalidFormat)?;
        let phdr = Elf64Phdr::parse(&raw)?;
        if !phdr.is_load() {
            continue;
        }
        phdr.validate(file_len)?;
        load_segment(space.as_ref(), file, &phdr)?;
        loaded += 1;
    }
    if loaded == 0 {
        return Err(ExecError::InvalidFormat);
    }

    let args = stack::build(USER_STACK, argv)?;
    let stack_page = UserPage::containing_address(VirtAddr::new(USER_STACK - PAGE_SIZE));
    space.map_zeroed(stack_page, Access::READ | Access::WRITE)?;
    // SAFETY: the stack page was just mapped.
    unsafe { space.copy_out(stack_page.start_address(), &args.page) };

    log_info!(
        "loader: '{}' entry={:#x} rsp={:#x} ({} segments)",
        argv.first().copied().unwrap_or(""),
        ehdr.e_entry,
        args.rsp,
        loaded
    );
    Ok(LoadedImage {
        space,
        entry: ehdr.e_entry,
        rsp: args.rsp,
        argc: args.argc,
        argv: args.argv,
    })
}

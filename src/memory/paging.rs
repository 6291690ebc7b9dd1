//! Page-table backed [`AddressSpace`] for the running kernel.
//!
//! Physical memory is reachable at `phys_offset`, so a space can be read
//! and written whether or not it is the one loaded in CR3. User mappings
//! live under P4 slot 0; the remaining slots are copied from the kernel's
//! template P4 and never touched.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::mapper::{MapToError, TranslateResult};
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, PageTable, PageTableFlags, PhysFrame, Size4KiB,
    Translate,
};
use x86_64::{PhysAddr, VirtAddr};

use super::{Access, AddressSpace, MapError, UserPage, Vmm, PAGE_SIZE, USER_TOP};

/// Highest address (exclusive) covered by P4 slot 0.
const SLOT0_END: u64 = 1 << 39;

/// Physical frame supply, provided by the boot-time memory manager.
pub trait FramePool: Send + Sync {
    fn alloc(&self) -> Option<PhysFrame>;
    fn free(&self, frame: PhysFrame);
}

struct PoolAllocator<'a>(&'a dyn FramePool);

unsafe impl FrameAllocator<Size4KiB> for PoolAllocator<'_> {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let frame = self.0.alloc()?;
        Some(frame)
    }
}

pub struct PageTableSpace {
    p4: PhysFrame,
    phys_offset: VirtAddr,
    pool: &'static dyn FramePool,
    lock: Mutex<()>,
}

impl PageTableSpace {
    fn frame_ptr(&self, addr: PhysAddr) -> *mut u8 {
        (self.phys_offset + addr.as_u64()).as_mut_ptr()
    }

    unsafe fn table_at(&self, addr: PhysAddr) -> &mut PageTable {
        unsafe { &mut *(self.frame_ptr(addr) as *mut PageTable) }
    }

    /// Caller holds `self.lock`.
    unsafe fn mapper(&self) -> OffsetPageTable<'_> {
        unsafe { OffsetPageTable::new(self.table_at(self.p4.start_address()), self.phys_offset) }
    }

    fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        let _guard = self.lock.lock();
        unsafe { self.mapper() }.translate_addr(addr)
    }

    /// Every present user leaf under slot 0, with its frame and flags.
    fn user_pages(&self) -> Vec<(UserPage, PhysFrame, PageTableFlags)> {
        let user = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        let mut pages = Vec::new();
        let _guard = self.lock.lock();
        unsafe {
            let p4 = self.table_at(self.p4.start_address());
            if !p4[0].flags().contains(user) {
                return pages;
            }
            let p3 = self.table_at(p4[0].addr());
            for (i3, e3) in p3.iter().enumerate() {
                if !e3.flags().contains(user) || e3.flags().contains(PageTableFlags::HUGE_PAGE) {
                    continue;
                }
                let p2 = self.table_at(e3.addr());
                for (i2, e2) in p2.iter().enumerate() {
                    if !e2.flags().contains(user) || e2.flags().contains(PageTableFlags::HUGE_PAGE) {
                        continue;
                    }
                    let p1 = self.table_at(e2.addr());
                    for (i1, e1) in p1.iter().enumerate() {
                        if !e1.flags().contains(user) {
                            continue;
                        }
                        let va = ((i3 as u64) << 30) | ((i2 as u64) << 21) | ((i1 as u64) << 12);
                        pages.push((
                            UserPage::containing_address(VirtAddr::new(va)),
                            PhysFrame::containing_address(e1.addr()),
                            e1.flags(),
                        ));
                    }
                }
            }
        }
        pages
    }

    /// Run `f` over each page-sized piece of `[addr, addr + len)` with the
    /// kernel pointer that backs it.
    unsafe fn for_each_chunk(&self, addr: VirtAddr, len: usize, mut f: impl FnMut(*mut u8, usize, usize)) {
        let mut done = 0usize;
        while done < len {
            let va = addr + done as u64;
            let in_page = (PAGE_SIZE - (va.as_u64() % PAGE_SIZE)) as usize;
            let count = in_page.min(len - done);
            if let Some(pa) = self.translate(va) {
                f(self.frame_ptr(pa), done, count);
            }
            done += count;
        }
    }
}

impl AddressSpace for PageTableSpace {
    fn access(&self, page: UserPage) -> Option<Access> {
        let _guard = self.lock.lock();
        match unsafe { self.mapper() }.translate(page.start_address()) {
            TranslateResult::Mapped { flags, .. }
                if flags.contains(PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE) =>
            {
                let mut access = Access::READ;
                if flags.contains(PageTableFlags::WRITABLE) {
                    access |= Access::WRITE;
                }
                Some(access)
            }
            _ => None,
        }
    }

    fn map_zeroed(&self, page: UserPage, access: Access) -> Result<(), MapError> {
        let start = page.start_address().as_u64();
        if start >= USER_TOP || start >= SLOT0_END {
            return Err(MapError::KernelRange);
        }
        let frame = self.pool.alloc().ok_or(MapError::OutOfMemory)?;
        unsafe { core::ptr::write_bytes(self.frame_ptr(frame.start_address()), 0, PAGE_SIZE as usize) };

        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        if access.contains(Access::WRITE) {
            flags |= PageTableFlags::WRITABLE;
        }
        let parents = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;

        let _guard = self.lock.lock();
        let mut mapper = unsafe { self.mapper() };
        let result = unsafe {
            mapper.map_to_with_table_flags(page, frame, flags, parents, &mut PoolAllocator(self.pool))
        };
        match result {
            Ok(flush) => {
                flush.flush();
                Ok(())
            }
            Err(err) => {
                self.pool.free(frame);
                Err(match err {
                    MapToError::FrameAllocationFailed => MapError::OutOfMemory,
                    MapToError::ParentEntryHugePage | MapToError::PageAlreadyMapped(_) => {
                        MapError::AlreadyMapped
                    }
                })
            }
        }
    }

    unsafe fn copy_in(&self, addr: VirtAddr, dst: &mut [u8]) {
        let base = dst.as_mut_ptr();
        unsafe {
            self.for_each_chunk(addr, dst.len(), |src, done, count| {
                core::ptr::copy_nonoverlapping(src, base.add(done), count);
            });
        }
    }

    unsafe fn copy_out(&self, addr: VirtAddr, src: &[u8]) {
        let base = src.as_ptr();
        unsafe {
            self.for_each_chunk(addr, src.len(), |dst, done, count| {
                core::ptr::copy_nonoverlapping(base.add(done), dst, count);
            });
        }
    }

    fn duplicate(&self) -> Result<Arc<dyn AddressSpace>, MapError> {
        let template = self.p4.start_address();
        let child = new_space(self.phys_offset, self.pool, template)?;
        for (page, frame, flags) in self.user_pages() {
            let access = if flags.contains(PageTableFlags::WRITABLE) {
                Access::READ | Access::WRITE
            } else {
                Access::READ
            };
            child.map_zeroed(page, access)?;
            unsafe {
                let src = self.frame_ptr(frame.start_address());
                child.copy_out(
                    page.start_address(),
                    core::slice::from_raw_parts(src, PAGE_SIZE as usize),
                );
            }
        }
        Ok(Arc::new(child))
    }

    fn activate(&self) {
        let (_, flags) = Cr3::read();
        unsafe { Cr3::write(self.p4, flags) };
    }
}

impl Drop for PageTableSpace {
    fn drop(&mut self) {
        for (_, frame, _) in self.user_pages() {
            self.pool.free(frame);
        }
        let user = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        unsafe {
            let p4 = self.table_at(self.p4.start_address());
            if p4[0].flags().contains(user) {
                let p3 = self.table_at(p4[0].addr());
                for e3 in p3.iter().filter(|e| e.flags().contains(user)) {
                    let p2 = self.table_at(e3.addr());
                    for e2 in p2.iter().filter(|e| e.flags().contains(user)) {
                        self.pool.free(PhysFrame::containing_address(e2.addr()));
                    }
                    self.pool.free(PhysFrame::containing_address(e3.addr()));
                }
                self.pool.free(PhysFrame::containing_address(p4[0].addr()));
            }
        }
        self.pool.free(self.p4);
    }
}

/// A fresh P4 that shares the template's kernel slots and has an empty
/// slot 0.
fn new_space(
    phys_offset: VirtAddr,
    pool: &'static dyn FramePool,
    template: PhysAddr,
) -> Result<PageTableSpace, MapError> {
    let p4 = pool.alloc().ok_or(MapError::OutOfMemory)?;
    let space = PageTableSpace {
        p4,
        phys_offset,
        pool,
        lock: Mutex::new(()),
    };
    unsafe {
        let src = space.table_at(template);
        let dst = space.table_at(p4.start_address());
        dst.zero();
        for i in 1..512 {
            dst[i] = src[i].clone();
        }
    }
    Ok(space)
}

/// Hands out page-table spaces built on the boot P4.
pub struct PagingVmm {
    phys_offset: VirtAddr,
    pool: &'static dyn FramePool,
    template: PhysAddr,
}

impl PagingVmm {
    /// Uses the P4 currently loaded in CR3 as the kernel template.
    pub fn new(phys_offset: VirtAddr, pool: &'static dyn FramePool) -> Self {
        let (frame, _) = Cr3::read();
        PagingVmm {
            phys_offset,
            pool,
            template: frame.start_address(),
        }
    }
}

impl Vmm for PagingVmm {
    fn create_space(&self) -> Result<Arc<dyn AddressSpace>, MapError> {
        let space = new_space(self.phys_offset, self.pool, self.template)?;
        Ok(Arc::new(space))
    }

    fn activate_kernel(&self) {
        let (_, flags) = Cr3::read();
        unsafe { Cr3::write(PhysFrame::containing_address(self.template), flags) };
    }
}

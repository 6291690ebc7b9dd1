//! Host stand-ins for the kernel's collaborators.

use std::cell::Cell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use x86_64::VirtAddr;

use crate::arch::TrapFrame;
use crate::drivers::Console;
use crate::fs::{FdTable, FileSystem, RamFs};
use crate::kernel::Kernel;
use crate::memory::{Access, AddressSpace, MapError, UserPage, Vmm, PAGE_SIZE, USER_TOP};
use crate::process::{Process, ProcessId};
use crate::scheduler::{Scheduler, SpawnError};

// ── Address spaces ──────────────────────────────────────────────

#[derive(Clone)]
struct MockPage {
    access: Access,
    bytes: Vec<u8>,
}

/// User memory as a map of page address to page contents.
#[derive(Default)]
pub struct MockSpace {
    pages: Mutex<BTreeMap<u64, MockPage>>,
}

impl MockSpace {
    pub fn new() -> Arc<Self> {
        Arc::new(MockSpace::default())
    }

    pub fn map_range(&self, start: u64, len: u64, access: Access) {
        let mut pages = self.pages.lock().unwrap();
        let mut page = start & !(PAGE_SIZE - 1);
        while page < start + len {
            pages.insert(
                page,
                MockPage {
                    access,
                    bytes: vec![0; PAGE_SIZE as usize],
                },
            );
            page += PAGE_SIZE;
        }
    }

    pub fn access_at(&self, addr: u64) -> Option<Access> {
        let pages = self.pages.lock().unwrap();
        pages.get(&(addr & !(PAGE_SIZE - 1))).map(|page| page.access)
    }

    /// Write bytes regardless of page access. Panics on unmapped pages.
    pub fn poke(&self, addr: u64, bytes: &[u8]) {
        let mut pages = self.pages.lock().unwrap();
        for (i, &byte) in bytes.iter().enumerate() {
            let at = addr + i as u64;
            let page = pages
                .get_mut(&(at & !(PAGE_SIZE - 1)))
                .unwrap_or_else(|| panic!("poke into unmapped {:#x}", at));
            page.bytes[(at % PAGE_SIZE) as usize] = byte;
        }
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let pages = self.pages.lock().unwrap();
        (0..len as u64)
            .map(|i| {
                let at = addr + i;
                pages
                    .get(&(at & !(PAGE_SIZE - 1)))
                    .unwrap_or_else(|| panic!("peek at unmapped {:#x}", at))
                    .bytes[(at % PAGE_SIZE) as usize]
            })
            .collect()
    }
}

impl AddressSpace for MockSpace {
    fn access(&self, page: UserPage) -> Option<Access> {
        self.access_at(page.start_address().as_u64())
    }

    fn map_zeroed(&self, page: UserPage, access: Access) -> Result<(), MapError> {
        let addr = page.start_address().as_u64();
        if addr >= USER_TOP {
            return Err(MapError::KernelRange);
        }
        let mut pages = self.pages.lock().unwrap();
        if pages.contains_key(&addr) {
            return Err(MapError::AlreadyMapped);
        }
        pages.insert(
            addr,
            MockPage {
                access,
                bytes: vec![0; PAGE_SIZE as usize],
            },
        );
        Ok(())
    }

    unsafe fn copy_in(&self, addr: VirtAddr, dst: &mut [u8]) {
        let bytes = self.peek(addr.as_u64(), dst.len());
        dst.copy_from_slice(&bytes);
    }

    unsafe fn copy_out(&self, addr: VirtAddr, src: &[u8]) {
        self.poke(addr.as_u64(), src);
    }

    fn duplicate(&self) -> Result<Arc<dyn AddressSpace>, MapError> {
        let pages = self.pages.lock().unwrap().clone();
        Ok(Arc::new(MockSpace {
            pages: Mutex::new(pages),
        }))
    }

    fn activate(&self) {}
}

/// Hands out `MockSpace`s and remembers them for inspection.
#[derive(Default)]
pub struct MockVmm {
    spaces: Mutex<Vec<Arc<MockSpace>>>,
    fail: AtomicBool,
}

impl MockVmm {
    pub fn new() -> Self {
        MockVmm::default()
    }

    /// Make every later `create_space` fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last_space(&self) -> Option<Arc<MockSpace>> {
        self.spaces.lock().unwrap().last().cloned()
    }
}

impl Vmm for MockVmm {
    fn create_space(&self) -> Result<Arc<dyn AddressSpace>, MapError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MapError::OutOfMemory);
        }
        let space = MockSpace::new();
        self.spaces.lock().unwrap().push(Arc::clone(&space));
        Ok(space)
    }

    fn activate_kernel(&self) {}
}

// ── Console ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockConsole {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl MockConsole {
    pub fn new() -> Self {
        MockConsole::default()
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes.iter().copied());
    }

    pub fn output(&self) -> Vec<u8> {
        self.output.lock().unwrap().clone()
    }

    pub fn output_str(&self) -> String {
        String::from_utf8(self.output()).unwrap()
    }
}

impl Console for MockConsole {
    fn put_bytes(&self, bytes: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(bytes);
    }

    fn get_byte(&self) -> u8 {
        self.input
            .lock()
            .unwrap()
            .pop_front()
            .expect("console input exhausted")
    }
}

// ── Scheduler ───────────────────────────────────────────────────

thread_local! {
    static CURRENT: Cell<Option<ProcessId>> = Cell::new(None);
}

#[derive(Default)]
struct WakeState {
    tokens: HashSet<ProcessId>,
    blocked: HashSet<ProcessId>,
}

/// Every OS thread plays one process at a time, set with `enter`.
/// `block`/`unblock` keep a wake-up token per process.
#[derive(Default)]
pub struct MockScheduler {
    state: Mutex<WakeState>,
    wake: Condvar,
    woken: Mutex<Vec<ProcessId>>,
    spawned: Mutex<Vec<(ProcessId, TrapFrame)>>,
    fail_spawn: AtomicBool,
}

impl MockScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(MockScheduler::default())
    }

    /// Make the calling OS thread run as `pid`.
    pub fn enter(&self, pid: ProcessId) {
        CURRENT.with(|current| current.set(Some(pid)));
    }

    /// Every `unblock` so far, in order.
    pub fn woken(&self) -> Vec<ProcessId> {
        self.woken.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<(ProcessId, TrapFrame)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn wait_until_blocked(&self, pid: ProcessId) {
        while !self.state.lock().unwrap().blocked.contains(&pid) {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Scheduler for MockScheduler {
    fn current(&self) -> ProcessId {
        CURRENT
            .with(|current| current.get())
            .expect("thread has not entered a process")
    }

    fn block(&self) {
        let me = self.current();
        let mut state = self.state.lock().unwrap();
        state.blocked.insert(me);
        while !state.tokens.remove(&me) {
            state = self.wake.wait(state).unwrap();
        }
        state.blocked.remove(&me);
    }

    fn unblock(&self, pid: ProcessId) {
        self.woken.lock().unwrap().push(pid);
        self.state.lock().unwrap().tokens.insert(pid);
        self.wake.notify_all();
    }

    fn spawn(&self, pid: ProcessId, _name: &str, frame: TrapFrame) -> Result<(), SpawnError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SpawnError::OutOfMemory);
        }
        self.spawned.lock().unwrap().push((pid, frame));
        Ok(())
    }

    fn exit_current(&self) -> ! {
        panic!("exit_current on a host thread");
    }
}

// ── ELF images ──────────────────────────────────────────────────

/// Where test programs are linked.
pub const CODE_BASE: u64 = 0x40_0000;

/// Minimal `ET_EXEC` image: header, program headers, then each segment's
/// bytes at a page-congruent file offset.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<(u64, Vec<u8>, u64, bool)>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        ElfBuilder {
            entry,
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, vaddr: u64, data: &[u8], memsz: u64, writable: bool) -> Self {
        self.segments.push((vaddr, data.to_vec(), memsz, writable));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut out = vec![0u8; 64 + 56 * phnum];
        out[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        out[16..18].copy_from_slice(&2u16.to_le_bytes());
        out[18..20].copy_from_slice(&62u16.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&64u64.to_le_bytes());
        out[52..54].copy_from_slice(&64u16.to_le_bytes());
        out[54..56].copy_from_slice(&56u16.to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());

        for (i, (vaddr, data, memsz, writable)) in self.segments.iter().enumerate() {
            let page = PAGE_SIZE as usize;
            let offset = (out.len() + page - 1) / page * page + (*vaddr % PAGE_SIZE) as usize;
            out.resize(offset, 0);
            out.extend_from_slice(data);

            let flags: u32 = if *writable { 4 | 2 } else { 4 | 1 };
            let ph = 64 + 56 * i;
            out[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes());
            out[ph + 4..ph + 8].copy_from_slice(&flags.to_le_bytes());
            out[ph + 8..ph + 16].copy_from_slice(&(offset as u64).to_le_bytes());
            out[ph + 16..ph + 24].copy_from_slice(&vaddr.to_le_bytes());
            out[ph + 24..ph + 32].copy_from_slice(&vaddr.to_le_bytes());
            out[ph + 32..ph + 40].copy_from_slice(&(data.len() as u64).to_le_bytes());
            out[ph + 40..ph + 48].copy_from_slice(&memsz.to_le_bytes());
            out[ph + 48..ph + 56].copy_from_slice(&PAGE_SIZE.to_le_bytes());
        }
        out
    }
}

// ── Kernel harness ──────────────────────────────────────────────

/// Writable scratch memory of the harness process.
pub const SCRATCH_BASE: u64 = 0x1000_0000;
const SCRATCH_LEN: u64 = 16 * PAGE_SIZE;

/// A kernel with one running process, "init", entered on the calling
/// thread.
pub struct Harness {
    pub kernel: Kernel,
    pub sched: Arc<MockScheduler>,
    pub console: Arc<MockConsole>,
    pub fs: Arc<RamFs>,
    pub vmm: Arc<MockVmm>,
    pub pid: ProcessId,
    space: Mutex<Arc<MockSpace>>,
    cursor: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        let sched = MockScheduler::new();
        let console = Arc::new(MockConsole::new());
        let fs = Arc::new(RamFs::new("ramfs"));
        let vmm = Arc::new(MockVmm::new());
        let kernel = Kernel::new(
            Arc::clone(&sched) as Arc<dyn Scheduler>,
            Arc::clone(&vmm) as Arc<dyn Vmm>,
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            Arc::clone(&console) as Arc<dyn Console>,
        );

        let space = MockSpace::new();
        space.map_range(SCRATCH_BASE, SCRATCH_LEN, Access::READ | Access::WRITE);
        space.map_range(SCRATCH_BASE - PAGE_SIZE, PAGE_SIZE, Access::READ);

        let pid = kernel.processes.alloc_pid();
        let init = Process::new(
            pid,
            None,
            "init",
            Arc::clone(&space) as Arc<dyn AddressSpace>,
            FdTable::new(),
            None,
        );
        kernel.processes.insert(Arc::new(init));
        sched.enter(pid);

        Harness {
            kernel,
            sched,
            console,
            fs,
            vmm,
            pid,
            space: Mutex::new(space),
            cursor: AtomicU64::new(SCRATCH_BASE),
        }
    }

    /// A trapped frame for syscall `number` with `args` in the argument
    /// registers.
    pub fn frame(&self, number: u64, args: &[u64]) -> TrapFrame {
        let arg = |n: usize| args.get(n).copied().unwrap_or(0);
        TrapFrame {
            rax: number,
            rdi: arg(0),
            rsi: arg(1),
            rdx: arg(2),
            r10: arg(3),
            r8: arg(4),
            r9: arg(5),
            ..TrapFrame::default()
        }
    }

    /// The address space the harness stages arguments in.
    pub fn space(&self) -> Arc<MockSpace> {
        Arc::clone(&self.space.lock().unwrap())
    }

    /// Copy `bytes` into scratch memory and return their address.
    pub fn push_bytes(&self, bytes: &[u8]) -> u64 {
        let len = (bytes.len() as u64 + 8) & !7;
        let addr = self.cursor.fetch_add(len, Ordering::SeqCst);
        assert!(addr + len <= SCRATCH_BASE + SCRATCH_LEN, "scratch exhausted");
        self.space().poke(addr, bytes);
        addr
    }

    pub fn push_str(&self, s: &str) -> u64 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// A mapped page the user may read but not write.
    pub fn read_only_page(&self) -> u64 {
        SCRATCH_BASE - PAGE_SIZE
    }

    /// After an exec, map fresh scratch memory into the new image.
    pub fn map_scratch(&self) {
        let space = self.vmm.last_space().expect("no exec happened");
        space.map_range(SCRATCH_BASE, SCRATCH_LEN, Access::READ | Access::WRITE);
        *self.space.lock().unwrap() = space;
        self.cursor.store(SCRATCH_BASE, Ordering::SeqCst);
    }

    /// Store a file named `name` holding exactly `bytes`.
    pub fn install(&self, name: &str, bytes: &[u8]) {
        self.fs.create(name, bytes.len()).unwrap();
        self.fs.open(name).unwrap().write_at(0, bytes);
    }
}

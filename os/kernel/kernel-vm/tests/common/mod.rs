#![allow(dead_code)]

use kernel_vm::{
    AddressSpace, FrameBytes, PhysMapper, PhysicalAddress, PhysicalPage,
    RegionFrameAlloc, SoftPageTable, SwapDevice, SwapError, SwapSlot, Vm, VmFile,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const PAGE: usize = kernel_vm::layout::PAGE_SIZE;
pub const FRAMES_BASE: u64 = 0x10_0000;

/// In-memory file. Reopened handles share the bytes.
#[derive(Clone, Default)]
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    reads: Arc<AtomicUsize>,
    fail_reopen: bool,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            ..Self::default()
        }
    }

    /// `len` bytes of a repeating, position-dependent pattern.
    pub fn patterned(len: usize) -> Self {
        Self::new((0..len).map(pattern).collect())
    }

    pub fn unreopenable() -> Self {
        Self {
            fail_reopen: true,
            ..Self::default()
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Number of `read_at` calls across all handles.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn truncate(&self, len: usize) {
        self.data.lock().unwrap().truncate(len);
    }

    pub fn handle(&self) -> Arc<dyn VmFile> {
        Arc::new(self.clone())
    }
}

pub fn pattern(i: usize) -> u8 {
    (i % 251) as u8 + 1
}

impl VmFile for MemFile {
    fn reopen(&self) -> Option<Arc<dyn VmFile>> {
        if self.fail_reopen {
            return None;
        }
        Some(Arc::new(self.clone()))
    }

    fn len(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.data.lock().unwrap();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        n
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> usize {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        if start >= data.len() {
            return 0;
        }
        let n = src.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&src[..n]);
        n
    }
}

/// Swap device with a fixed number of slots.
pub struct MemSwap {
    slots: BTreeMap<u32, Box<FrameBytes>>,
    capacity: usize,
    used: Arc<AtomicUsize>,
}

impl MemSwap {
    /// Returns the device and a probe for the number of occupied slots.
    pub fn new(capacity: usize) -> (Self, Arc<AtomicUsize>) {
        let used = Arc::new(AtomicUsize::new(0));
        (
            Self {
                slots: BTreeMap::new(),
                capacity,
                used: used.clone(),
            },
            used,
        )
    }

    fn sync(&self) {
        self.used.store(self.slots.len(), Ordering::SeqCst);
    }
}

impl SwapDevice for MemSwap {
    fn swap_out(&mut self, data: &FrameBytes) -> Result<SwapSlot, SwapError> {
        if self.slots.len() >= self.capacity {
            return Err(SwapError::Full);
        }
        let slot = (0..).find(|s| !self.slots.contains_key(s)).unwrap();
        self.slots.insert(slot, Box::new(*data));
        self.sync();
        Ok(SwapSlot(slot))
    }

    fn swap_in(&mut self, slot: SwapSlot, out: &mut FrameBytes) -> Result<(), SwapError> {
        let data = self.slots.remove(&slot.0).ok_or(SwapError::InvalidSlot(slot))?;
        out.copy_from_slice(&*data);
        self.sync();
        Ok(())
    }

    fn discard(&mut self, slot: SwapSlot) {
        self.slots.remove(&slot.0);
        self.sync();
    }
}

/// Simulated physical memory starting at [`FRAMES_BASE`].
pub struct SimMemory {
    frames: Vec<Mutex<Box<FrameBytes>>>,
}

impl SimMemory {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames).map(|_| Mutex::new(Box::new([0xCC; PAGE]))).collect(),
        }
    }
}

impl PhysMapper for SimMemory {
    fn with_frame(&self, frame: PhysicalPage, f: &mut dyn FnMut(&mut FrameBytes)) {
        let index = ((frame.base().as_u64() - FRAMES_BASE) as usize) / PAGE;
        let mut bytes = self.frames[index].lock().unwrap();
        f(&mut **bytes);
    }
}

pub struct Harness {
    pub vm: Arc<Vm>,
    pub swap_used: Arc<AtomicUsize>,
}

/// A pager with `frames` user frames and `swap_slots` swap slots.
pub fn harness(frames: usize, swap_slots: usize) -> Harness {
    let (swap, swap_used) = MemSwap::new(swap_slots);
    let alloc = RegionFrameAlloc::new(PhysicalAddress::new(FRAMES_BASE), frames);
    let vm = Vm::new(
        Box::new(alloc),
        Box::new(SimMemory::new(frames)),
        Box::new(swap),
    );
    Harness { vm, swap_used }
}

impl Harness {
    pub fn process(&self) -> AddressSpace {
        AddressSpace::new(self.vm.clone(), Box::new(SoftPageTable::new()))
    }

    pub fn swap_used(&self) -> usize {
        self.swap_used.load(Ordering::SeqCst)
    }
}

/// Read one byte the way user code would: through the fault path.
pub fn peek(space: &mut AddressSpace, va: u64) -> u8 {
    let mut b = [0u8];
    space
        .copy_from_user(kernel_vm::VirtualAddress::new(va), &mut b)
        .unwrap();
    b[0]
}

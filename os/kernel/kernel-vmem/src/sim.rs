//! # Simulated Physical Memory
//!
//! Host-side stand-ins for RAM and a frame source so page tables can be built
//! and walked in ordinary unit tests. Physical address `0` is the first byte of
//! the first simulated frame.

use crate::{FrameAlloc, FrameDealloc, PhysMapper};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// A zero-initialized block of 4 KiB frames.
pub struct SimulatedRam {
    frames: Box<[UnsafeCell<Frame>]>,
}

impl SimulatedRam {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames).map(|_| UnsafeCell::new(Frame([0; 4096]))).collect(),
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.frames.len() as u64 * 4096
    }

    #[allow(clippy::cast_possible_truncation)]
    fn byte_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let index = (pa.as_u64() >> 12) as usize;
        let offset = (pa.as_u64() & 0xFFF) as usize;
        assert!(index < self.frames.len(), "{pa} is outside simulated RAM");
        // SAFETY: `offset` is below the frame size.
        unsafe { self.frames[index].get().cast::<u8>().add(offset) }
    }

    /// Read 8 bytes at `pa`; `pa` must be 8-byte aligned.
    #[must_use]
    pub fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        assert_eq!(pa.as_u64() % 8, 0);
        // SAFETY: in bounds and aligned; frames are only accessed through raw pointers.
        unsafe { self.byte_ptr(pa).cast::<u64>().read() }
    }

    /// Write 8 bytes at `pa`; `pa` must be 8-byte aligned.
    pub fn write_u64(&self, pa: PhysicalAddress, value: u64) {
        assert_eq!(pa.as_u64() % 8, 0);
        // SAFETY: in bounds and aligned; frames are only accessed through raw pointers.
        unsafe { self.byte_ptr(pa).cast::<u64>().write(value) }
    }

    /// Fill a whole frame with `byte`.
    pub fn fill_frame(&self, frame: PhysicalPage<Size4K>, byte: u8) {
        // SAFETY: a whole frame starting at a frame base is in bounds.
        unsafe { self.byte_ptr(frame.base()).write_bytes(byte, 4096) }
    }

    /// Whether every byte of `frame` is zero.
    #[must_use]
    pub fn is_zeroed(&self, frame: PhysicalPage<Size4K>) -> bool {
        (0..512).all(|i| self.read_u64(frame.base() + i * 8) == 0)
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.byte_ptr(pa).cast::<T>();
        debug_assert!(ptr.is_aligned());
        // SAFETY: the caller promises `T` matches the bytes at `pa`.
        unsafe { &mut *ptr }
    }
}

/// Hands out consecutive frames from a range and records frees.
pub struct BumpFrames {
    start: u64,
    next: u64,
    end: u64,
    pub freed: Vec<PhysicalPage<Size4K>>,
}

impl BumpFrames {
    /// Frames in `[start, end)`, both 4 KiB aligned.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            next: start,
            end,
            freed: Vec::new(),
        }
    }

    /// Number of frames handed out so far.
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        (self.next - self.start) / 4096
    }
}

impl FrameAlloc for BumpFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next + 4096 > self.end {
            return None;
        }
        let frame = PhysicalPage::containing_address(PhysicalAddress::new(self.next));
        self.next += 4096;
        Some(frame)
    }
}

impl FrameDealloc for BumpFrames {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        self.freed.push(frame);
    }
}

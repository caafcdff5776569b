//! Early bring-up allocator: a LIFO stack of free 4 KiB frames.
//!
//! O(1) for single frames, no contiguity. Superseded by
//! [`BitmapFrameAllocator`](crate::BitmapFrameAllocator) once that exists.

use crate::MemError;
use kernel_info::memory_map::MemoryMapEntry;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, FrameDealloc};
use log::{debug, info};

pub struct StackFrameAllocator<'a> {
    slots: &'a mut [PhysicalAddress],
    len: usize,
}

impl<'a> StackFrameAllocator<'a> {
    /// An empty stack with room for `slots.len()` frames.
    #[must_use]
    pub const fn new(slots: &'a mut [PhysicalAddress]) -> Self {
        Self { slots, len: 0 }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Push every whole 4 KiB frame of the available entries.
    ///
    /// # Panics
    /// If the stack cannot hold them all.
    pub fn populate<'e>(&mut self, memory_map: impl IntoIterator<Item = &'e MemoryMapEntry>) {
        for entry in memory_map.into_iter().filter(|e| e.kind.is_available()) {
            let mut frame = entry.address.align_up::<Size4K>();
            while frame.checked_add(Size4K::SIZE).is_some_and(|end| end <= entry.end()) {
                self.free(PhysicalPage::containing_address(frame));
                frame += Size4K::SIZE;
            }
        }
        info!("Frame stack holds {} frames", self.len);
    }

    /// Pop the most recently pushed frame.
    ///
    /// # Errors
    /// [`MemError::OutOfMemory`] when the stack is empty.
    pub fn alloc(&mut self) -> Result<PhysicalPage<Size4K>, MemError> {
        if self.len == 0 {
            return Err(MemError::OutOfMemory);
        }
        self.len -= 1;
        Ok(PhysicalPage::containing_address(self.slots[self.len]))
    }

    /// Push `frame` back.
    ///
    /// # Panics
    /// If the stack is full.
    pub fn free(&mut self, frame: PhysicalPage<Size4K>) {
        assert!(
            self.len < self.slots.len(),
            "frame stack overflow ({} slots) pushing {frame}",
            self.slots.len()
        );
        self.slots[self.len] = frame.base();
        self.len += 1;
    }

    /// Log the stack, top first, at debug level.
    pub fn dump(&self) {
        debug!("Frame stack top");
        for (i, frame) in self.slots[..self.len].iter().enumerate().rev() {
            debug!("{i:6}: {frame}");
        }
        debug!("Frame stack bottom");
    }
}

impl FrameAlloc for StackFrameAllocator<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc().ok()
    }
}

impl FrameDealloc for StackFrameAllocator<'_> {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        self.free(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory_map::MemoryRegionKind;

    #[test]
    fn populate_pushes_whole_available_frames() {
        let map = [
            MemoryMapEntry::new(0x0800, 0x2800, MemoryRegionKind::Available),
            MemoryMapEntry::new(0x4000, 0x4000, MemoryRegionKind::Reserved),
            MemoryMapEntry::new(0x9000, 0x1000, MemoryRegionKind::Available),
        ];
        let mut slots = [PhysicalAddress::zero(); 8];
        let mut stack = StackFrameAllocator::new(&mut slots);
        stack.populate(&map);

        assert_eq!(stack.len(), 3);
        let popped: Vec<u64> = (0..3)
            .map(|_| stack.alloc().expect("frame").base().as_u64())
            .collect();
        assert_eq!(popped, vec![0x9000, 0x2000, 0x1000]);
        assert_eq!(stack.alloc(), Err(MemError::OutOfMemory));
    }

    #[test]
    fn last_in_first_out() {
        let mut slots = [PhysicalAddress::zero(); 2];
        let mut stack = StackFrameAllocator::new(&mut slots);
        stack.free(PhysicalPage::from_frame_number(7));
        stack.free(PhysicalPage::from_frame_number(3));
        assert_eq!(stack.alloc_4k(), Some(PhysicalPage::from_frame_number(3)));
        stack.free_4k(PhysicalPage::from_frame_number(5));
        assert_eq!(stack.alloc_4k(), Some(PhysicalPage::from_frame_number(5)));
        assert_eq!(stack.alloc_4k(), Some(PhysicalPage::from_frame_number(7)));
        assert!(stack.is_empty());
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn overflow_is_fatal() {
        let mut slots = [PhysicalAddress::zero(); 1];
        let mut stack = StackFrameAllocator::new(&mut slots);
        stack.free(PhysicalPage::from_frame_number(1));
        stack.free(PhysicalPage::from_frame_number(2));
    }
}

//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame of physical memory, starting at physical address
//! zero: bit `n` describes the frame at `n × 4096` (0 = free, 1 = allocated).
//!
//! Allocation is first-fit over runs of free bits, honouring alignment and
//! address bounds. The scan starts at a rotating cursor just past the previous
//! allocation and wraps around once, so repeated small allocations do not keep
//! rescanning the same allocated prefix.

use crate::{Bitmap, MemError};
use kernel_info::handoff::{BootHandoff, FreeMemoryRegion};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, FrameDealloc, PhysMapper};
use log::{debug, info, trace};

/// What to allocate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Number of contiguous 4 KiB frames.
    pub num_pages: usize,
    /// Byte alignment of the first frame; a power of two, at least 4096.
    pub alignment: u64,
    /// Clear the frames before returning them, see [`BitmapFrameAllocator::alloc_with`].
    pub zero_fill: bool,
    /// The run must start at or above this address.
    pub min_address: PhysicalAddress,
    /// The run must end at or below this address.
    pub max_address: PhysicalAddress,
}

impl Default for AllocationRequest {
    fn default() -> Self {
        Self::pages(1)
    }
}

impl AllocationRequest {
    /// `num_pages` frames anywhere, page aligned.
    #[must_use]
    pub const fn pages(num_pages: usize) -> Self {
        Self {
            num_pages,
            alignment: Size4K::SIZE,
            zero_fill: false,
            min_address: PhysicalAddress::zero(),
            max_address: PhysicalAddress::new(u64::MAX),
        }
    }

    #[must_use]
    pub const fn aligned(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub const fn zeroed(mut self) -> Self {
        self.zero_fill = true;
        self
    }

    /// Restrict the run to `[min, max)`.
    #[must_use]
    pub const fn within(mut self, min: PhysicalAddress, max: PhysicalAddress) -> Self {
        self.min_address = min;
        self.max_address = max;
        self
    }
}

/// The kernel-phase physical frame allocator.
pub struct BitmapFrameAllocator<'a> {
    bitmap: Bitmap<'a>,
    cursor: usize,
    free: usize,
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_index(pa: PhysicalAddress) -> usize {
    (pa.as_u64() / Size4K::SIZE) as usize
}

const fn frame_address(index: usize) -> PhysicalAddress {
    PhysicalAddress::new(index as u64 * Size4K::SIZE)
}

impl<'a> BitmapFrameAllocator<'a> {
    /// Manage `total_frames` frames, all free, with `storage` as the bitmap.
    ///
    /// # Panics
    /// If `storage` is shorter than [`Bitmap::words_for`]`(total_frames)`.
    pub fn new(storage: &'a mut [u64], total_frames: usize) -> Self {
        Self {
            bitmap: Bitmap::new(storage, total_frames),
            cursor: 0,
            free: total_frames,
        }
    }

    /// Manage `total_frames` frames, of which only those lying entirely inside
    /// one of `regions` start out free.
    ///
    /// # Panics
    /// If `storage` is too short.
    pub fn from_free_regions(
        storage: &'a mut [u64],
        total_frames: usize,
        regions: &[FreeMemoryRegion],
    ) -> Self {
        let mut bitmap = Bitmap::new(storage, total_frames);
        bitmap.fill(true);
        for region in regions {
            let first = frame_index(region.address.align_up::<Size4K>());
            let last = frame_index(region.end().align_down::<Size4K>()).min(total_frames);
            if first < last {
                bitmap.set_range(first, last, false);
            }
        }
        let free = total_frames - bitmap.count_ones();
        info!("Frame allocator: {free} of {total_frames} frames free");
        Self {
            bitmap,
            cursor: 0,
            free,
        }
    }

    /// Take over from the bootstrap memory manager.
    ///
    /// # Panics
    /// If `storage` cannot describe all frames up to the hand-off's memory end.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_handoff(storage: &'a mut [u64], handoff: &BootHandoff<'_>) -> Self {
        Self::from_free_regions(storage, handoff.total_frames() as usize, handoff.free_regions)
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.bitmap.len()
    }

    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free
    }

    /// Whether `frame` is currently allocated. Frames beyond the managed range
    /// count as allocated.
    #[must_use]
    pub fn is_allocated(&self, frame: PhysicalPage<Size4K>) -> bool {
        let index = frame_index(frame.base());
        index >= self.total_frames() || self.bitmap.get(index)
    }

    /// The bitmap words, one bit per frame.
    #[must_use]
    pub fn bitmap(&self) -> &[u64] {
        self.bitmap.words()
    }

    /// Allocate a run of frames. The contents are left as they are.
    ///
    /// # Errors
    /// - [`MemError::InvalidArgument`] for zero pages or a bad alignment
    /// - [`MemError::OutOfMemory`] if no suitable run is free
    pub fn alloc(&mut self, request: &AllocationRequest) -> Result<PhysicalPage<Size4K>, MemError> {
        let pages = request.num_pages;
        if pages == 0 || !request.alignment.is_power_of_two() || request.alignment < Size4K::SIZE {
            return Err(MemError::InvalidArgument);
        }
        if pages > self.free {
            return Err(MemError::OutOfMemory);
        }

        let step = frame_index(PhysicalAddress::new(request.alignment)).max(1);
        let low = frame_index(request.min_address.align_up::<Size4K>());
        let high = frame_index(request.max_address).min(self.total_frames());

        let found = self
            .find_run(self.cursor.max(low), high, pages, step)
            .or_else(|| self.find_run(low, high.min(self.cursor + pages - 1), pages, step));
        let Some(start) = found else {
            debug!("No run of {pages} frames for {request:?}, {} free", self.free);
            return Err(MemError::OutOfMemory);
        };

        self.bitmap.set_range(start, start + pages, true);
        self.free -= pages;
        self.cursor = if start + pages >= self.total_frames() { 0 } else { start + pages };
        trace!("Allocated {pages} frames at {}", frame_address(start));
        Ok(PhysicalPage::from_frame_number(start as u64))
    }

    /// First start in `[from, to)` aligned to `step` with `pages` free bits
    /// that all lie below `to`.
    fn find_run(&self, from: usize, to: usize, pages: usize, step: usize) -> Option<usize> {
        let mut start = from.next_multiple_of(step);
        while start.checked_add(pages)? <= to {
            match (start..start + pages).rev().find(|&i| self.bitmap.get(i)) {
                None => return Some(start),
                Some(taken) => start = (taken + 1).next_multiple_of(step),
            }
        }
        None
    }

    /// Allocate a run of frames, clearing them through `mapper` if the request
    /// asks for zero-fill.
    ///
    /// # Errors
    /// As [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// Every managed frame must be reachable through `mapper`.
    pub unsafe fn alloc_with<M: PhysMapper>(
        &mut self,
        request: &AllocationRequest,
        mapper: &M,
    ) -> Result<PhysicalPage<Size4K>, MemError> {
        let first = self.alloc(request)?;
        if request.zero_fill {
            for i in 0..request.num_pages as u64 {
                // SAFETY: the frame was just allocated and the caller vouches for the mapper.
                unsafe { mapper.zero_frame(first.add_pages(i)) };
            }
        }
        Ok(first)
    }

    /// Return `num_pages` frames starting at `first`.
    ///
    /// # Panics
    /// If any of the frames is outside the managed range or not allocated.
    pub fn free(&mut self, first: PhysicalPage<Size4K>, num_pages: usize) {
        let start = frame_index(first.base());
        for index in start..start + num_pages {
            assert!(
                index < self.total_frames() && self.bitmap.get(index),
                "freeing frame {} which is not allocated",
                frame_address(index)
            );
            self.bitmap.set(index, false);
        }
        self.free += num_pages;
        trace!("Freed {num_pages} frames at {first}");
    }

    /// Take the single frame `index` if it is free.
    pub(crate) fn claim(&mut self, index: usize) -> bool {
        if index >= self.total_frames() || self.bitmap.get(index) {
            return false;
        }
        self.bitmap.set(index, true);
        self.free -= 1;
        true
    }

    /// Log a one-line summary at info level.
    pub fn dump(&self) {
        info!(
            "Frame allocator: {}/{} frames free ({} KiB), cursor at {}",
            self.free,
            self.total_frames(),
            self.free as u64 * Size4K::SIZE / 1024,
            frame_address(self.cursor)
        );
    }
}

impl FrameAlloc for BitmapFrameAllocator<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc(&AllocationRequest::pages(1)).ok()
    }
}

impl FrameDealloc for BitmapFrameAllocator<'_> {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        self.free(frame, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::sim::SimulatedRam;
    use proptest::prelude::*;

    fn storage(frames: usize) -> Vec<u64> {
        vec![0; Bitmap::words_for(frames)]
    }

    #[test]
    fn whole_bitmap_then_out_of_memory() {
        let mut words = storage(1024);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 1024);
        let all = pmm.alloc(&AllocationRequest::pages(1024)).expect("fits exactly");
        assert_eq!(all.frame_number(), 0);
        assert_eq!(pmm.alloc(&AllocationRequest::default()), Err(MemError::OutOfMemory));
        assert_eq!(pmm.free_frames(), 0);
    }

    #[test]
    fn fragmented_bitmap_has_no_runs() {
        let mut words = storage(1024);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 1024);
        pmm.alloc(&AllocationRequest::pages(1024)).expect("all");
        for pfn in (0..1024).step_by(2) {
            pmm.free(PhysicalPage::from_frame_number(pfn), 1);
        }
        assert_eq!(pmm.free_frames(), 512);
        for pages in [2, 3, 64, 512] {
            assert_eq!(pmm.alloc(&AllocationRequest::pages(pages)), Err(MemError::OutOfMemory));
        }
        assert!(pmm.alloc(&AllocationRequest::pages(1)).is_ok());
    }

    #[test]
    fn invalid_requests() {
        let mut words = storage(64);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 64);
        assert_eq!(pmm.alloc(&AllocationRequest::pages(0)), Err(MemError::InvalidArgument));
        assert_eq!(
            pmm.alloc(&AllocationRequest::pages(1).aligned(0x3000)),
            Err(MemError::InvalidArgument)
        );
        assert_eq!(
            pmm.alloc(&AllocationRequest::pages(1).aligned(512)),
            Err(MemError::InvalidArgument)
        );
        assert_eq!(pmm.alloc(&AllocationRequest::pages(65)), Err(MemError::OutOfMemory));
    }

    #[test]
    fn cursor_rotates_and_wraps() {
        let mut words = storage(8);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 8);
        let a = pmm.alloc(&AllocationRequest::pages(3)).expect("a");
        let b = pmm.alloc(&AllocationRequest::pages(3)).expect("b");
        assert_eq!((a.frame_number(), b.frame_number()), (0, 3));

        pmm.free(a, 3);
        // The scan continues past `b` first, then wraps to the freed run.
        assert_eq!(pmm.alloc(&AllocationRequest::pages(2)).map(|p| p.frame_number()), Ok(6));
        assert_eq!(pmm.alloc(&AllocationRequest::pages(2)).map(|p| p.frame_number()), Ok(0));
        assert_eq!(pmm.free_frames(), 1);
    }

    #[test]
    fn alignment_and_bounds() {
        let mut words = storage(64);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 64);
        pmm.alloc(&AllocationRequest::pages(1)).expect("frame 0");

        let aligned = pmm.alloc(&AllocationRequest::pages(2).aligned(0x1_0000)).expect("aligned");
        assert_eq!(aligned.base(), PhysicalAddress::new(0x1_0000));

        let high = PhysicalAddress::new(0x2_5000);
        let request = AllocationRequest::pages(4).within(PhysicalAddress::new(0x2_0800), high);
        let bounded = pmm.alloc(&request).expect("bounded");
        assert_eq!(bounded.base(), PhysicalAddress::new(0x2_1000));
        let request = AllocationRequest::pages(1).within(PhysicalAddress::new(0x2_1000), high);
        assert_eq!(pmm.alloc(&request), Err(MemError::OutOfMemory));
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn double_free_is_fatal() {
        let mut words = storage(16);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 16);
        let frame = pmm.alloc(&AllocationRequest::default()).expect("frame");
        pmm.free(frame, 1);
        pmm.free(frame, 1);
    }

    #[test]
    fn handoff_frees_only_whole_frames() {
        let regions = [
            FreeMemoryRegion::new(PhysicalAddress::new(0x8800), 0x2000),
            FreeMemoryRegion::new(PhysicalAddress::new(0x1000), 0x3000),
        ];
        let mut words = storage(16);
        let pmm = BitmapFrameAllocator::from_free_regions(&mut words, 16, &regions);

        // [0x8800, 0xA800) only covers frame 9 completely.
        let free: Vec<u64> = (0..16)
            .filter(|&n| !pmm.is_allocated(PhysicalPage::from_frame_number(n)))
            .collect();
        assert_eq!(free, vec![1, 2, 3, 9]);
        assert_eq!(pmm.free_frames(), 4);
    }

    #[test]
    fn from_handoff_sizes_the_bitmap() {
        let regions = [FreeMemoryRegion::new(PhysicalAddress::new(0x10_0000), 0x10_0000)];
        let handoff = BootHandoff {
            root_table: PhysicalPage::from_frame_number(1),
            free_regions: &regions,
            memory_end: PhysicalAddress::new(0x20_0000),
        };
        let mut words = storage(512);
        let pmm = BitmapFrameAllocator::from_handoff(&mut words, &handoff);
        assert_eq!(pmm.total_frames(), 512);
        assert_eq!(pmm.free_frames(), 256);
    }

    #[test]
    fn zero_fill_clears_frames() {
        let ram = SimulatedRam::new(8);
        let mut words = storage(8);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 8);
        for n in 0..8 {
            ram.fill_frame(PhysicalPage::from_frame_number(n), 0xAA);
        }

        let request = AllocationRequest::pages(2).zeroed();
        let first = unsafe { pmm.alloc_with(&request, &ram) }.expect("zeroed");
        assert!(ram.is_zeroed(first) && ram.is_zeroed(first.add_pages(1)));

        let dirty = unsafe { pmm.alloc_with(&AllocationRequest::pages(1), &ram) }.expect("dirty");
        assert!(!ram.is_zeroed(dirty));
    }

    #[test]
    fn frame_alloc_trait_round_trip() {
        let mut words = storage(2);
        let mut pmm = BitmapFrameAllocator::new(&mut words, 2);
        let a = pmm.alloc_4k().expect("a");
        let b = pmm.alloc_4k().expect("b");
        assert!(pmm.alloc_4k().is_none());
        pmm.free_4k(a);
        pmm.free_4k(b);
        assert_eq!(pmm.free_frames(), 2);
    }

    proptest! {
        #[test]
        fn alloc_then_free_restores_bitmap(
            prefill in proptest::collection::vec(1usize..8, 0..16),
            pages in 1usize..64,
        ) {
            let mut words = storage(256);
            let mut pmm = BitmapFrameAllocator::new(&mut words, 256);
            for n in prefill {
                let _ = pmm.alloc(&AllocationRequest::pages(n));
            }
            let before = pmm.bitmap().to_vec();
            let free_before = pmm.free_frames();

            if let Ok(run) = pmm.alloc(&AllocationRequest::pages(pages)) {
                prop_assert_eq!(pmm.free_frames(), free_before - pages);
                pmm.free(run, pages);
            }
            prop_assert_eq!(pmm.bitmap(), before.as_slice());
            prop_assert_eq!(pmm.free_frames(), free_before);
        }
    }
}

use crate::{AllocationRequest, BitmapFrameAllocator, MemError};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, FrameDealloc};
use spin::{Mutex, MutexGuard};

/// A [`BitmapFrameAllocator`] behind a spin lock, shareable between cores.
pub struct LockedFrameAllocator<'a> {
    inner: Mutex<BitmapFrameAllocator<'a>>,
}

impl<'a> LockedFrameAllocator<'a> {
    #[must_use]
    pub const fn new(allocator: BitmapFrameAllocator<'a>) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    /// Exclusive access for several operations in a row.
    #[must_use]
    pub fn lock(&self) -> MutexGuard<'_, BitmapFrameAllocator<'a>> {
        self.inner.lock()
    }

    /// # Errors
    /// See [`BitmapFrameAllocator::alloc`].
    pub fn alloc(&self, request: &AllocationRequest) -> Result<PhysicalPage<Size4K>, MemError> {
        self.inner.lock().alloc(request)
    }

    /// # Panics
    /// See [`BitmapFrameAllocator::free`].
    pub fn free(&self, first: PhysicalPage<Size4K>, num_pages: usize) {
        self.inner.lock().free(first, num_pages);
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_frames()
    }
}

impl FrameAlloc for &LockedFrameAllocator<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.inner.lock().alloc_4k()
    }
}

impl FrameDealloc for &LockedFrameAllocator<'_> {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        self.inner.lock().free_4k(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bitmap;

    #[test]
    fn shared_handle_allocates() {
        let mut words = vec![0; Bitmap::words_for(4)];
        let locked = LockedFrameAllocator::new(BitmapFrameAllocator::new(&mut words, 4));

        let mut handle = &locked;
        let frame = handle.alloc_4k().expect("frame");
        assert_eq!(locked.free_frames(), 3);
        assert!(locked.lock().is_allocated(frame));

        handle.free_4k(frame);
        assert_eq!(locked.alloc(&AllocationRequest::pages(4)).map(|p| p.frame_number()), Ok(0));
    }
}

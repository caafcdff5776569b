//! Per-frame metadata, one [`PageMeta`] per 4 KiB frame.
//!
//! Entry `n` describes the frame at `n × 4096`. Only the first frame of a
//! block carries the block's state and order; the frames behind it are
//! [`PageState::Tail`].

use core::mem::size_of;
use kernel_memory_addresses::{PageSize, PhysicalPage, Size4K};

/// What a frame is currently used for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PageState {
    /// Not handed to the buddy allocator.
    #[default]
    Reserved,
    /// Part of a block whose first frame is elsewhere.
    Tail,
    /// First frame of a free block, linked into the free list of its order
    /// by frame number.
    Free {
        prev: Option<usize>,
        next: Option<usize>,
    },
    /// First frame of an allocated block.
    Allocated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PageMeta {
    pub state: PageState,
    /// The block spans `2^order` frames. Only meaningful for free and
    /// allocated blocks.
    pub order: u8,
}

impl PageMeta {
    pub const RESERVED: Self = Self {
        state: PageState::Reserved,
        order: 0,
    };

    pub const TAIL: Self = Self {
        state: PageState::Tail,
        order: 0,
    };

    #[must_use]
    pub const fn allocated(order: u8) -> Self {
        Self {
            state: PageState::Allocated,
            order,
        }
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, PageState::Free { .. })
    }

    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        matches!(self.state, PageState::Allocated)
    }
}

/// The metadata of every managed frame, in caller-supplied storage.
pub struct PageMetaTable<'a> {
    entries: &'a mut [PageMeta],
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_index(frame: PhysicalPage<Size4K>) -> usize {
    (frame.base().as_u64() / Size4K::SIZE) as usize
}

impl<'a> PageMetaTable<'a> {
    /// Bytes of storage needed to describe `frames` frames, e.g. to carve the
    /// table from boot memory.
    ///
    /// ```
    /// # use kernel_alloc::{PageMeta, PageMetaTable};
    /// let bytes = PageMetaTable::bytes_for(1024);
    /// assert_eq!(bytes, 1024 * core::mem::size_of::<PageMeta>());
    /// ```
    #[must_use]
    pub const fn bytes_for(frames: usize) -> usize {
        frames * size_of::<PageMeta>()
    }

    /// One entry per element of `storage`, all [`PageState::Reserved`].
    pub fn new(storage: &'a mut [PageMeta]) -> Self {
        storage.fill(PageMeta::RESERVED);
        Self { entries: storage }
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.entries.len()
    }

    /// # Panics
    /// If `pfn` is outside the table.
    #[must_use]
    pub fn get(&self, pfn: usize) -> &PageMeta {
        self.check(pfn);
        &self.entries[pfn]
    }

    /// # Panics
    /// If `pfn` is outside the table.
    pub fn get_mut(&mut self, pfn: usize) -> &mut PageMeta {
        self.check(pfn);
        &mut self.entries[pfn]
    }

    /// Metadata of the frame `frame`.
    ///
    /// # Panics
    /// If the frame is outside the table.
    #[must_use]
    pub fn of(&self, frame: PhysicalPage<Size4K>) -> &PageMeta {
        self.get(frame_index(frame))
    }

    /// Frame described by entry `pfn`.
    #[must_use]
    pub const fn frame(pfn: usize) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_number(pfn as u64)
    }

    fn check(&self, pfn: usize) {
        assert!(
            pfn < self.entries.len(),
            "frame {pfn} outside the metadata table of {} frames",
            self.entries.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn lookup_by_frame_address() {
        let mut storage = vec![PageMeta::default(); 100];
        let mut table = PageMetaTable::new(&mut storage);
        *table.get_mut(10) = PageMeta::allocated(3);

        let frame = PhysicalPage::containing_address(PhysicalAddress::new(10 * 0x1000 + 0x42));
        assert_eq!(table.of(frame), &PageMeta::allocated(3));
        assert_eq!(PageMetaTable::frame(10), frame);
        assert_eq!(table.get(15).state, PageState::Reserved);
        assert_eq!(table.total_frames(), 100);
    }

    #[test]
    fn new_resets_stale_entries() {
        let mut storage = vec![PageMeta::allocated(2); 8];
        let table = PageMetaTable::new(&mut storage);
        assert!((0..8).all(|pfn| *table.get(pfn) == PageMeta::RESERVED));
    }

    #[test]
    #[should_panic(expected = "outside the metadata table")]
    fn lookup_past_the_end_is_fatal() {
        let mut storage = vec![PageMeta::default(); 100];
        let table = PageMetaTable::new(&mut storage);
        let _ = table.of(PhysicalPage::from_frame_number(105));
    }
}

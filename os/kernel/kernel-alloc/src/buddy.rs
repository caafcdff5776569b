//! # Buddy Frame Allocator
//!
//! Power-of-two blocks of frames, from one frame (order 0) up to
//! `2^MAX_ORDER` frames. A block of order `k` starting at frame `n` has its
//! buddy at `n ^ 2^k`; when both are free they merge into one block of order
//! `k + 1`.
//!
//! ```text
//!  before alloc(0)               after alloc(0)
//!
//!  order 2  [ 0  1  2  3 ]       order 2  -
//!  order 1  -                    order 1  [ 2  3 ]
//!  order 0  -                    order 0  [1]          frame 0 allocated
//! ```
//!
//! Free blocks are threaded through the [`PageMetaTable`], so the allocator
//! itself needs no storage beyond one list head per order. Its frames come
//! from a [`BitmapFrameAllocator`], which keeps them marked allocated for as
//! long as the buddy allocator owns them.

use crate::{BitmapFrameAllocator, MemError, PageMeta, PageMetaTable, PageState};
use kernel_memory_addresses::{PageSize, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, FrameDealloc};
use log::{debug, info, trace};

const ORDERS: usize = BuddyFrameAllocator::MAX_ORDER as usize + 1;

pub struct BuddyFrameAllocator<'a> {
    meta: PageMetaTable<'a>,
    heads: [Option<usize>; ORDERS],
    free: usize,
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_index(frame: PhysicalPage<Size4K>) -> usize {
    frame.frame_number() as usize
}

impl<'a> BuddyFrameAllocator<'a> {
    /// Largest block: 2^10 frames, 4 MiB.
    pub const MAX_ORDER: u8 = 10;

    /// Bytes covered by a block of `order`.
    ///
    /// ```
    /// # use kernel_alloc::BuddyFrameAllocator;
    /// assert_eq!(BuddyFrameAllocator::block_size(0), 4096);
    /// assert_eq!(BuddyFrameAllocator::block_size(5), 32 * 4096);
    /// ```
    #[must_use]
    pub const fn block_size(order: u8) -> u64 {
        Size4K::SIZE << order
    }

    /// Smallest order whose blocks hold `pages` frames, or `None` for zero
    /// pages or more than a maximum-order block.
    #[must_use]
    pub const fn order_for_pages(pages: usize) -> Option<u8> {
        if pages == 0 || pages > 1 << Self::MAX_ORDER {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let order = pages.next_power_of_two().trailing_zeros() as u8;
        Some(order)
    }

    /// An allocator that owns none of the frames `meta` describes yet.
    #[must_use]
    pub fn new(meta: PageMetaTable<'a>) -> Self {
        Self {
            meta,
            heads: [None; ORDERS],
            free: 0,
        }
    }

    /// Take over up to `limit` free frames of `bitmap`, lowest first, merging
    /// them into blocks as large as possible. The frames stay allocated in
    /// the bitmap.
    pub fn from_bitmap(
        bitmap: &mut BitmapFrameAllocator<'_>,
        meta: PageMetaTable<'a>,
        limit: usize,
    ) -> Self {
        let mut buddy = Self::new(meta);
        let frames = bitmap.total_frames().min(buddy.meta.total_frames());
        for pfn in 0..frames {
            if buddy.free == limit {
                break;
            }
            if bitmap.claim(pfn) {
                buddy.add_frame(PageMetaTable::frame(pfn));
            }
        }
        info!(
            "Buddy allocator: took {} frames, {} left in the bitmap",
            buddy.free,
            bitmap.free_frames()
        );
        buddy
    }

    /// Give the allocator a frame nobody else uses.
    ///
    /// # Panics
    /// If the frame is outside the metadata table or already managed.
    pub fn add_frame(&mut self, frame: PhysicalPage<Size4K>) {
        let pfn = frame_index(frame);
        assert!(
            self.meta.get(pfn).state == PageState::Reserved,
            "frame {frame:?} is already managed"
        );
        self.free += 1;
        self.release(pfn, 0);
    }

    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free
    }

    #[must_use]
    pub const fn meta(&self) -> &PageMetaTable<'a> {
        &self.meta
    }

    /// Number of free blocks of `order`.
    #[must_use]
    pub fn free_blocks(&self, order: u8) -> usize {
        let mut count = 0;
        let mut next = self.heads[usize::from(order)];
        while let Some(pfn) = next {
            count += 1;
            next = match self.meta.get(pfn).state {
                PageState::Free { next, .. } => next,
                _ => None,
            };
        }
        count
    }

    /// Allocate a block of `2^order` frames.
    ///
    /// # Errors
    /// - [`MemError::InvalidArgument`] if `order` exceeds [`Self::MAX_ORDER`]
    /// - [`MemError::OutOfMemory`] if no block of that order or larger is free
    pub fn alloc(&mut self, order: u8) -> Result<PhysicalPage<Size4K>, MemError> {
        if order > Self::MAX_ORDER {
            return Err(MemError::InvalidArgument);
        }
        let found = (order..=Self::MAX_ORDER)
            .find_map(|o| self.heads[usize::from(o)].map(|pfn| (o, pfn)));
        let Some((from, pfn)) = found else {
            debug!("No block of order {order}, {} frames free", self.free);
            return Err(MemError::OutOfMemory);
        };

        self.unlink(pfn);
        // The upper half of each split goes back on the free lists.
        for lower in (order..from).rev() {
            self.push(pfn ^ (1 << lower), lower);
        }
        *self.meta.get_mut(pfn) = PageMeta::allocated(order);
        self.free -= 1 << order;
        trace!("Allocated order {order} block at frame {pfn} (split from order {from})");
        Ok(PageMetaTable::frame(pfn))
    }

    /// Return the block starting at `first`, whatever its order.
    ///
    /// # Panics
    /// If `first` does not start an allocated block.
    pub fn free(&mut self, first: PhysicalPage<Size4K>) {
        let pfn = frame_index(first);
        let meta = *self.meta.get(pfn);
        assert!(meta.is_allocated(), "freeing frame {first:?} which is not allocated");
        self.free += 1 << meta.order;
        self.release(pfn, meta.order);
    }

    /// Merge the free block at `pfn` with its buddies, then list it.
    fn release(&mut self, mut pfn: usize, mut order: u8) {
        while order < Self::MAX_ORDER {
            let buddy = pfn ^ (1 << order);
            if buddy >= self.meta.total_frames() {
                break;
            }
            let candidate = self.meta.get(buddy);
            if !candidate.is_free() || candidate.order != order {
                break;
            }
            self.unlink(buddy);
            *self.meta.get_mut(pfn.max(buddy)) = PageMeta::TAIL;
            pfn = pfn.min(buddy);
            order += 1;
        }
        self.push(pfn, order);
    }

    fn push(&mut self, pfn: usize, order: u8) {
        let head = self.heads[usize::from(order)];
        *self.meta.get_mut(pfn) = PageMeta {
            state: PageState::Free {
                prev: None,
                next: head,
            },
            order,
        };
        if let Some(head) = head {
            *self.links(head).0 = Some(pfn);
        }
        self.heads[usize::from(order)] = Some(pfn);
    }

    fn unlink(&mut self, pfn: usize) {
        let order = usize::from(self.meta.get(pfn).order);
        let (prev, next) = {
            let (prev, next) = self.links(pfn);
            (prev.take(), next.take())
        };
        match prev {
            Some(prev) => *self.links(prev).1 = next,
            None => self.heads[order] = next,
        }
        if let Some(next) = next {
            *self.links(next).0 = prev;
        }
    }

    fn links(&mut self, pfn: usize) -> (&mut Option<usize>, &mut Option<usize>) {
        match &mut self.meta.get_mut(pfn).state {
            PageState::Free { prev, next } => (prev, next),
            state => unreachable!("frame {pfn} is {state:?}, not on a free list"),
        }
    }

    /// Log the free block count of every order at info level.
    pub fn dump(&self) {
        info!("Buddy allocator: {} frames free", self.free);
        for order in 0..=Self::MAX_ORDER {
            let blocks = self.free_blocks(order);
            if blocks > 0 {
                info!("  order {order:>2}: {blocks} blocks");
            }
        }
    }
}

impl FrameAlloc for BuddyFrameAllocator<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc(0).ok()
    }
}

impl FrameDealloc for BuddyFrameAllocator<'_> {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        self.free(frame);
    }
}

//! # Kernel Physical Memory Allocation
//!
//! The allocators that own physical memory once the bootstrap memory manager
//! has handed off, and the mapper the kernel uses to touch that memory.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        kernel-vmm (address spaces, page faults)     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameAlloc / FrameDealloc
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Buddy Frame Allocator (optional)          │
//! │    • power-of-two blocks, orders 0..=10             │
//! │    • free lists threaded through page metadata      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ claims free frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • one bit per 4 KiB frame                        │
//! │    • contiguous, aligned, bounded runs              │
//! │    • rotating first-fit cursor                      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ PhysMapper (zero-fill)
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • HHDM (Higher Half Direct Mapping)              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Bitmap Frame Allocator ([`BitmapFrameAllocator`])
//! * **Storage**: the bitmap lives in caller-supplied words, sized with
//!   [`Bitmap::words_for`]; no heap is needed
//! * **Hand-off**: [`BitmapFrameAllocator::from_handoff`] starts with every
//!   frame allocated and frees the frames lying wholly inside a free interval
//! * **Requests**: [`AllocationRequest`] carries page count, alignment,
//!   zero-fill and address bounds
//!
//! ### Buddy Allocator ([`BuddyFrameAllocator`])
//! * **Source**: [`BuddyFrameAllocator::from_bitmap`] claims free frames from
//!   the bitmap allocator; they stay marked allocated there
//! * **Metadata**: a [`PageMetaTable`] with one [`PageMeta`] per frame records
//!   each block's state and order and links the free lists
//! * **Merging**: a freed block merges with its buddy for as long as the
//!   buddy is free and of the same order
//!
//! ### Frame Stack ([`StackFrameAllocator`])
//! LIFO of single frames, seeded from the firmware memory map. Only meant for
//! bring-up before the bitmap allocator exists.
//!
//! ### Locking ([`LockedFrameAllocator`])
//! One spin lock per allocator instance. `&LockedFrameAllocator` implements
//! the frame traits, so several users can share one allocator.
//!
//! ## Failure Model
//!
//! Exhaustion and bad requests are [`MemError`] values. Freeing a frame that is
//! not allocated, or overflowing the frame stack, corrupts the allocator's view
//! of memory and panics.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{AllocationRequest, Bitmap, BitmapFrameAllocator, MemError};
//!
//! let mut words = [0u64; Bitmap::words_for(1024)];
//! let mut pmm = BitmapFrameAllocator::new(&mut words, 1024);
//!
//! let run = pmm.alloc(&AllocationRequest::pages(1024)).unwrap();
//! assert_eq!(run.frame_number(), 0);
//! assert_eq!(pmm.alloc(&AllocationRequest::pages(1)), Err(MemError::OutOfMemory));
//! pmm.free(run, 1024);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod bitmap;
mod buddy;
mod error;
mod frame_alloc;
mod locked;
mod page_meta;
mod phys_mapper;
mod stack_alloc;

pub use crate::bitmap::Bitmap;
pub use crate::buddy::BuddyFrameAllocator;
pub use crate::error::MemError;
pub use crate::frame_alloc::{AllocationRequest, BitmapFrameAllocator};
pub use crate::locked::LockedFrameAllocator;
pub use crate::page_meta::{PageMeta, PageMetaTable, PageState};
pub use crate::phys_mapper::HhdmMapper;
pub use crate::stack_alloc::StackFrameAllocator;

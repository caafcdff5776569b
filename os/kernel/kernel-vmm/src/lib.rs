//! # Virtual Memory Manager
//!
//! Address spaces, the areas laid out in them, and the page-fault path that
//! populates areas on demand.
//!
//! ```text
//!  AddressSpace ── root table (CR3)
//!      │
//!      └── areas (ordered, non-overlapping)
//!            ├─ Anonymous      → frame allocated on first touch
//!            └─ DirectMapping  → fixed physical range
//! ```
//!
//! ## Components
//!
//! - [`VirtualMemoryArea`]: page-aligned range, [`AreaFlags`], [`AreaKind`]
//! - [`AddressSpace`]: top-level table and area registry;
//!   [`SharedAddressSpace`] wraps one in its own lock
//! - [`VirtualMemoryManager`]: creates and destroys address spaces, adds and
//!   removes areas, maps eagerly, and resolves [`PageFault`]s
//!
//! Managers are explicit values. Tests build as many independent ones as
//! they like over simulated RAM.
//!
//! ## Removing Areas
//!
//! [`VirtualMemoryManager::rm_area`] unmaps whatever of the area was faulted
//! in, flushes those translations, and returns anonymous frames to the frame
//! allocator before the range can be reused.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address_space;
mod area;
mod manager;
mod page_fault;

pub use crate::address_space::{AddressSpace, SharedAddressSpace};
pub use crate::area::{AreaFlags, AreaKind, VirtualMemoryArea};
pub use crate::manager::VirtualMemoryManager;
pub use crate::page_fault::{FaultError, FaultResolution, PageFault, PageFaultErrorCode};

#[cfg(test)]
pub(crate) mod tests {
    use core::cell::{Cell, RefCell};
    use kernel_alloc::Bitmap;
    use kernel_memory_addresses::VirtualAddress;
    use kernel_vmem::Tlb;
    use kernel_vmem::sim::SimulatedRam;

    /// Simulated RAM of `frames` frames and bitmap storage to manage all of them.
    pub fn simulated(frames: usize) -> (SimulatedRam, Vec<u64>) {
        (SimulatedRam::new(frames), vec![0; Bitmap::words_for(frames)])
    }

    /// Records every flush instead of executing it.
    #[derive(Default)]
    pub struct RecordingTlb {
        pages: RefCell<Vec<VirtualAddress>>,
        full: Cell<usize>,
    }

    impl RecordingTlb {
        pub fn flushed(&self) -> Vec<VirtualAddress> {
            self.pages.borrow().clone()
        }

        pub fn full_flushes(&self) -> usize {
            self.full.get()
        }
    }

    impl Tlb for &RecordingTlb {
        fn flush_page(&self, va: VirtualAddress) {
            self.pages.borrow_mut().push(va);
        }

        fn flush_all(&self) {
            self.full.set(self.full.get() + 1);
        }
    }

    #[test]
    fn recording_tlb_counts() {
        let tlb = RecordingTlb::default();
        (&tlb).flush_page(VirtualAddress::new(0x1000));
        (&tlb).flush_all();
        assert_eq!(tlb.flushed(), vec![VirtualAddress::new(0x1000)]);
        assert_eq!(tlb.full_flushes(), 1);
    }
}

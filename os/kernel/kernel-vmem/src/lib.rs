//! # Virtual Memory Support
//!
//! The x86-64 page-table model: entry layout, 512-entry tables, and a handle
//! ([`PageMap`]) that builds and walks the 4-level tree of one address space.
//!
//! ## What you get
//! - A bit-exact [`PageTableEntry`] and the [`PageEntryFlags`] used to request mappings.
//! - A 4 KiB-aligned [`PageTable`] and [`TableLevel`] index helpers.
//! - [`PageMap::map_one`] for 4 KiB / 2 MiB / 1 GiB leaves, chosen by type ([`MapSize`]).
//! - A lazy [`Walk`] over all present entries, and [`virtual_address_from_indices`].
//! - The seams to the rest of the kernel: [`FrameAlloc`] / [`FrameDealloc`]
//!   (where table frames come from), [`PhysMapper`] (how a frame is touched),
//!   and [`Tlb`] (how stale translations are dropped).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! Each field indexes one level of 512 eight-byte entries:
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │      │
//!   │        │        │      └───► PTE   → maps 4 KiB page
//!   │        │        └──────────► PDE   → PS=1 → 2 MiB page
//!   │        └───────────────────► PDPTE → PS=1 → 1 GiB page
//!   └────────────────────────────► PML4E → always links to a PDPT
//! ```
//!
//! Bits 63..48 of a canonical address repeat bit 47, which splits the space
//! into a lower (user) and a higher (kernel) half of 128 TiB each.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

mod entry;
mod page_map;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod table;
mod tlb;
mod walk;

pub use crate::entry::{PageEntryFlags, PageTableEntry};
pub use crate::page_map::{MapError, MapSize, PageMap, Translation};
pub use crate::table::{ENTRIES_PER_TABLE, PageTable, TableLevel, virtual_address_from_indices};
#[cfg(feature = "asm")]
pub use crate::tlb::NativeTlb;
pub use crate::tlb::{NoTlb, Tlb};
pub use crate::walk::{TableVisit, Walk};

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of **physical** 4 KiB frames, e.g. for page tables.
///
/// Returns `None` when exhausted.
pub trait FrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Sink for 4 KiB frames that are no longer used.
pub trait FrameDealloc {
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>);
}

/// Converts physical addresses to usable references in the current virtual
/// address space (identity map in the loader, direct map in the kernel).
pub trait PhysMapper {
    /// # Safety
    /// - `pa` must be mapped writable for the whole of `T` for `'a`.
    /// - `T` must match the bytes at `pa`, and no other reference to them may
    ///   be alive for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Fill `frame` with zeros.
    ///
    /// # Safety
    /// `frame` must be reachable through this mapper and unused by anyone else.
    unsafe fn zero_frame(&self, frame: PhysicalPage<Size4K>) {
        unsafe { self.phys_to_mut::<[u64; 512]>(frame.base()) }.fill(0);
    }
}

/// [`PhysMapper`] for code running with physical memory identity-mapped
/// (paging off, or the loader's low identity map).
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = core::ptr::with_exposed_provenance_mut::<T>(pa.as_u64() as usize);
        // SAFETY: the caller guarantees `pa` is identity-mapped and holds a `T`.
        unsafe { &mut *ptr }
    }
}

//! # Page-size–directed mapping
//!
//! Which level holds the leaf, and how the leaf entry is encoded, is decided by
//! the page size type parameter so callers never branch on sizes at runtime:
//!
//! | `S`      | Leaf level            | `PS` bit |
//! |----------|-----------------------|----------|
//! | `Size1G` | [`TableLevel::Pml3`]  | set      |
//! | `Size2M` | [`TableLevel::Pml2`]  | set      |
//! | `Size4K` | [`TableLevel::Pml1`]  | clear (bit 7 is PAT here) |

use crate::{PageEntryFlags, PageTableEntry, TableLevel};
use kernel_memory_addresses::{PageSize, PhysicalPage, Size1G, Size2M, Size4K};

pub trait MapSize: PageSize {
    /// The table level whose entry maps a page of this size.
    const LEAF_LEVEL: TableLevel;

    /// Encode the leaf entry mapping `frame` with `flags`.
    fn leaf(frame: PhysicalPage<Self>, flags: PageEntryFlags) -> PageTableEntry;
}

impl MapSize for Size1G {
    const LEAF_LEVEL: TableLevel = TableLevel::Pml3;

    fn leaf(frame: PhysicalPage<Self>, flags: PageEntryFlags) -> PageTableEntry {
        PageTableEntry::leaf(frame.base(), flags | PageEntryFlags::HUGE_PAGE)
    }
}

impl MapSize for Size2M {
    const LEAF_LEVEL: TableLevel = TableLevel::Pml2;

    fn leaf(frame: PhysicalPage<Self>, flags: PageEntryFlags) -> PageTableEntry {
        PageTableEntry::leaf(frame.base(), flags | PageEntryFlags::HUGE_PAGE)
    }
}

impl MapSize for Size4K {
    const LEAF_LEVEL: TableLevel = TableLevel::Pml1;

    fn leaf(frame: PhysicalPage<Self>, flags: PageEntryFlags) -> PageTableEntry {
        PageTableEntry::leaf(frame.base(), flags - PageEntryFlags::HUGE_PAGE)
    }
}

//! # Page Tables and Levels

use crate::PageTableEntry;
use kernel_memory_addresses::VirtualAddress;

/// Number of entries in every paging structure.
pub const ENTRIES_PER_TABLE: usize = 512;

/// One 4 KiB paging structure (PML4, PDPT, PD or PT).
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = {
    assert!(size_of::<PageTable>() == 4096);
    assert!(align_of::<PageTable>() == 4096);
};

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl PageTable {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Clear every entry.
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::new());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    /// `true` if no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.present())
    }

    /// Present entries with their indices.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }
}

/// A level of the 4-level hierarchy, top (PML4) to bottom (PML1, the PT).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TableLevel {
    /// Page Map Level 4; one per address space, referenced by CR3.
    Pml4,
    /// Page Directory Pointer Table; may hold 1 GiB leaves.
    Pml3,
    /// Page Directory; may hold 2 MiB leaves.
    Pml2,
    /// Page Table; holds 4 KiB leaves.
    Pml1,
}

impl TableLevel {
    /// All levels in walk order.
    pub const ALL: [Self; 4] = [Self::Pml4, Self::Pml3, Self::Pml2, Self::Pml1];

    /// Position of this level's 9 index bits in a virtual address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pml3 => 30,
            Self::Pml2 => 21,
            Self::Pml1 => 12,
        }
    }

    /// Bytes of virtual address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << self.shift()
    }

    /// Index into the table at this level used to translate `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift()) & 0x1FF) as usize
    }

    /// The level below, or `None` for the PT.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pml3),
            Self::Pml3 => Some(Self::Pml2),
            Self::Pml2 => Some(Self::Pml1),
            Self::Pml1 => None,
        }
    }

    /// Zero-based distance from the top level.
    #[inline]
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Pml4 => 0,
            Self::Pml3 => 1,
            Self::Pml2 => 2,
            Self::Pml1 => 3,
        }
    }
}

/// Rebuild the canonical virtual address selected by the four table indices.
///
/// ```rust
/// # use kernel_vmem::virtual_address_from_indices;
/// assert_eq!(virtual_address_from_indices(0, 0, 1, 2).as_u64(), 0x0020_2000);
/// // Index 256 and up in the PML4 selects the (sign-extended) higher half.
/// assert_eq!(virtual_address_from_indices(511, 510, 0, 0).as_u64(), 0xFFFF_FFFF_8000_0000);
/// ```
#[must_use]
pub const fn virtual_address_from_indices(
    l4: usize,
    l3: usize,
    l2: usize,
    l1: usize,
) -> VirtualAddress {
    let raw = ((l4 as u64 & 0x1FF) << 39)
        | ((l3 as u64 & 0x1FF) << 30)
        | ((l2 as u64 & 0x1FF) << 21)
        | ((l1 as u64 & 0x1FF) << 12);
    // sign-extend bit 47
    let canonical = if raw & (1 << 47) != 0 {
        raw | 0xFFFF_0000_0000_0000
    } else {
        raw
    };
    VirtualAddress::new(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_the_9_9_9_9_12_split() {
        let va = VirtualAddress::new(0xFFFF_8000_4020_3000);
        assert_eq!(TableLevel::Pml4.index_of(va), 256);
        assert_eq!(TableLevel::Pml3.index_of(va), 1);
        assert_eq!(TableLevel::Pml2.index_of(va), 1);
        assert_eq!(TableLevel::Pml1.index_of(va), 3);
    }

    #[test]
    fn reconstruction_inverts_index_extraction() {
        for raw in [0x0000_7FFF_FFFF_F000, 0xFFFF_8880_1234_5000, 0x1000, 0xFFFF_FFFF_FFFF_F000] {
            let va = VirtualAddress::new(raw);
            let [l4, l3, l2, l1] = TableLevel::ALL.map(|level| level.index_of(va));
            assert_eq!(virtual_address_from_indices(l4, l3, l2, l1), va);
        }
    }

    #[test]
    fn level_chain() {
        assert_eq!(TableLevel::Pml4.next(), Some(TableLevel::Pml3));
        assert_eq!(TableLevel::Pml1.next(), None);
        assert_eq!(TableLevel::Pml2.entry_span(), 2 * 1024 * 1024);
        assert_eq!(TableLevel::Pml3.depth(), 1);
    }

    #[test]
    fn zeroed_table_is_empty() {
        let mut t = PageTable::zeroed();
        assert!(t.is_empty());
        t.set(7, PageTableEntry::new().with_present(true));
        assert!(!t.is_empty());
        assert_eq!(t.present_entries().map(|(i, _)| i).collect::<Vec<_>>(), vec![7]);
        t.zero();
        assert!(t.is_empty());
    }
}

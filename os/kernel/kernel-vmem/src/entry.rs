//! # Page Table Entry
//!
//! One 64-bit slot as defined by the x86-64 4-level paging format. The same
//! layout is used on every level; what a set bit *means* depends on where the
//! entry lives:
//!
//! | Bit    | PML4E / non-leaf | PDPTE / PDE leaf (`PS=1`) | PTE |
//! |--------|------------------|---------------------------|-----|
//! | 7      | reserved (0)     | page size (huge page)     | PAT |
//! | 12..51 | next table frame | huge frame base           | frame base |
//!
//! Huge leaves keep bit 12 (their PAT bit) clear, so their frame base can be
//! stored through the same 40-bit field as a 4 KiB frame.

use crate::TableLevel;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// A raw page-table entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Bit 0: the entry is valid. Every other bit is ignored by the CPU when clear.
    pub present: bool,

    /// Bit 1: writes are allowed (subject to CR0.WP in ring 0).
    pub writable: bool,

    /// Bit 2: user-mode (CPL 3) accesses are allowed.
    pub user: bool,

    /// Bit 3: page-level write-through.
    pub write_through: bool,

    /// Bit 4: page-level cache disable.
    pub cache_disable: bool,

    /// Bit 5: set by the CPU on first access.
    pub accessed: bool,

    /// Bit 6: set by the CPU on first write (leaf entries only).
    pub dirty: bool,

    /// Bit 7: the entry maps a 2 MiB (PDE) or 1 GiB (PDPTE) page.
    pub huge_page: bool,

    /// Bit 8: survives CR3 reloads when CR4.PGE is enabled (leaf entries only).
    pub global: bool,

    /// Bits 9–11: ignored by the CPU.
    #[bits(3)]
    pub available_low: u8,

    /// Bits 12–51: physical frame number.
    #[bits(40)]
    frame: u64,

    /// Bits 52–58: ignored by the CPU.
    #[bits(7)]
    pub available_high: u8,

    /// Bits 59–62: protection key (when CR4.PKE is enabled, leaf entries only).
    #[bits(4)]
    pub protection_key: u8,

    /// Bit 63: instruction fetches fault (requires EFER.NXE).
    pub no_execute: bool,
}

bitflags::bitflags! {
    /// Permission and caching flags used when requesting a mapping.
    ///
    /// Bit positions match [`PageTableEntry`], so a flag set converts into an
    /// entry without any translation.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct PageEntryFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// Only meaningful on PDPTE/PDE; set by [`MapSize`](crate::MapSize) itself.
        const HUGE_PAGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageEntryFlags {
    /// Present, writable, not executable: plain kernel data.
    pub const KERNEL_DATA: Self = Self::PRESENT
        .union(Self::WRITABLE)
        .union(Self::NO_EXECUTE);
}

impl PageTableEntry {
    /// Entry that links to a next-level table.
    ///
    /// Intermediate entries are always writable and never `NX`; the effective
    /// permission of a leaf is the AND over the whole chain, so restricting
    /// happens at the leaf only.
    #[must_use]
    pub const fn table(next: PhysicalPage<Size4K>, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(user)
            .with_frame(next.frame_number())
    }

    /// Leaf entry mapping the frame at `base` with `flags`.
    ///
    /// `PRESENT` is implied. `HUGE_PAGE` is taken from `flags` as given; use
    /// [`MapSize::leaf`](crate::MapSize::leaf) to get it right for a size.
    #[must_use]
    pub const fn leaf(base: PhysicalAddress, flags: PageEntryFlags) -> Self {
        Self::from_flags(flags.union(PageEntryFlags::PRESENT))
            .with_frame(base.as_u64() >> Size4K::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn from_flags(flags: PageEntryFlags) -> Self {
        Self::from_bits(flags.bits())
    }

    /// The flag bits of this entry, without the frame or software bits.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryFlags {
        PageEntryFlags::from_bits_truncate(self.into_bits())
    }

    /// Physical base address held in the frame field.
    #[inline]
    #[must_use]
    pub const fn frame_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << Size4K::SHIFT)
    }

    /// Whether this entry terminates the walk at `level`.
    ///
    /// Every present PTE is a leaf; PDPTE and PDE are leaves when `PS` is set;
    /// a PML4E never is.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self, level: TableLevel) -> bool {
        match level {
            TableLevel::Pml4 => false,
            TableLevel::Pml3 | TableLevel::Pml2 => self.huge_page(),
            TableLevel::Pml1 => true,
        }
    }

    /// Frame of the next-level table, if this entry at `level` links to one.
    #[inline]
    #[must_use]
    pub const fn next_table(self, level: TableLevel) -> Option<PhysicalPage<Size4K>> {
        if self.present() && !self.is_leaf(level) {
            Some(PhysicalPage::from_frame_number(self.frame()))
        } else {
            None
        }
    }

    /// Frame of the page this leaf maps, typed by its size.
    #[inline]
    #[must_use]
    pub const fn leaf_frame<S: PageSize>(self) -> PhysicalPage<S> {
        PhysicalPage::containing_address(self.frame_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_positions_match_the_architecture() {
        let e = PageTableEntry::new()
            .with_present(true)
            .with_huge_page(true)
            .with_no_execute(true)
            .with_protection_key(0xF);
        assert_eq!(e.into_bits(), (1 << 63) | (0xF << 59) | (1 << 7) | 1);
    }

    #[test]
    fn frame_field_is_shifted_by_twelve() {
        let pa = PhysicalAddress::new(0x000F_FFFF_FFFF_F000);
        let e = PageTableEntry::leaf(pa, PageEntryFlags::WRITABLE);
        assert_eq!(e.frame_address(), pa);
        assert_eq!(e.into_bits(), 0x000F_FFFF_FFFF_F003);
    }

    #[test]
    fn flags_convert_losslessly() {
        let flags = PageEntryFlags::KERNEL_DATA | PageEntryFlags::GLOBAL;
        let e = PageTableEntry::from_flags(flags);
        assert!(e.present() && e.writable() && e.global() && e.no_execute());
        assert!(!e.user());
        assert_eq!(e.flags(), flags);
    }

    #[test]
    fn leaf_semantics_depend_on_level() {
        let table = PageTableEntry::table(PhysicalPage::from_frame_number(0x42), false);
        assert_eq!(
            table.next_table(TableLevel::Pml2),
            Some(PhysicalPage::from_frame_number(0x42))
        );
        assert_eq!(table.next_table(TableLevel::Pml1), None);

        let huge = PageTableEntry::leaf(
            PhysicalAddress::new(0x4000_0000),
            PageEntryFlags::HUGE_PAGE,
        );
        assert!(huge.is_leaf(TableLevel::Pml3));
        assert!(!huge.is_leaf(TableLevel::Pml4));
        assert_eq!(huge.next_table(TableLevel::Pml3), None);
    }

    #[test]
    fn non_present_entry_links_nowhere() {
        assert_eq!(PageTableEntry::new().next_table(TableLevel::Pml4), None);
    }
}

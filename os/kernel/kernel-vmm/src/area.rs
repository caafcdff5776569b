use bitflags::bitflags;
use core::fmt;
use kernel_alloc::MemError;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress};
use kernel_vmem::PageEntryFlags;

bitflags! {
    /// Access an area permits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct AreaFlags: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const EXECUTABLE = 1 << 2;
        /// Reachable from user mode.
        const USER = 1 << 3;

        const READ_WRITE = Self::READABLE.bits() | Self::WRITABLE.bits();
        const READ_EXECUTE = Self::READABLE.bits() | Self::EXECUTABLE.bits();
    }
}

impl AreaFlags {
    /// Leaf entry flags for a page of an area with these permissions.
    #[must_use]
    pub const fn page_flags(self) -> PageEntryFlags {
        let mut flags = PageEntryFlags::PRESENT;
        if self.contains(Self::WRITABLE) {
            flags = flags.union(PageEntryFlags::WRITABLE);
        }
        if !self.contains(Self::EXECUTABLE) {
            flags = flags.union(PageEntryFlags::NO_EXECUTE);
        }
        if self.contains(Self::USER) {
            flags = flags.union(PageEntryFlags::USER);
        }
        flags
    }
}

/// Where the pages of an area come from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AreaKind {
    /// Fresh frames from the frame allocator, one per page on first touch.
    Anonymous { zero_fill: bool },
    /// A fixed physical range; page `k` of the area maps
    /// `physical_start + k × 4096`.
    DirectMapping { physical_start: PhysicalAddress },
}

/// A page-aligned range of virtual memory with uniform permissions.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct VirtualMemoryArea {
    start: VirtualAddress,
    size: u64,
    pub flags: AreaFlags,
    pub kind: AreaKind,
}

impl VirtualMemoryArea {
    /// # Errors
    /// [`MemError::InvalidArgument`] if `start`, `size` or the physical start
    /// of a direct mapping is not page aligned, if `size` is zero, or if the
    /// range leaves the canonical address space. The exclusive end must be
    /// representable, so no area reaches the very top of the address space.
    pub fn new(
        start: VirtualAddress,
        size: u64,
        flags: AreaFlags,
        kind: AreaKind,
    ) -> Result<Self, MemError> {
        let aligned = start.is_aligned::<Size4K>() && size.is_multiple_of(Size4K::SIZE);
        let physical_ok = match kind {
            AreaKind::Anonymous { .. } => true,
            AreaKind::DirectMapping { physical_start } => physical_start.is_aligned::<Size4K>(),
        };
        let Some(end) = start.checked_add(size) else {
            return Err(MemError::InvalidArgument);
        };
        let last = VirtualAddress::new(end.as_u64().wrapping_sub(1));
        let canonical = start.is_canonical() && last.is_canonical();
        if !aligned || !physical_ok || size == 0 || !canonical {
            return Err(MemError::InvalidArgument);
        }
        Ok(Self {
            start,
            size,
            flags,
            kind,
        })
    }

    /// Zero-filled anonymous memory.
    ///
    /// # Errors
    /// As [`new`](Self::new).
    pub fn anonymous(
        start: VirtualAddress,
        size: u64,
        flags: AreaFlags,
    ) -> Result<Self, MemError> {
        Self::new(start, size, flags, AreaKind::Anonymous { zero_fill: true })
    }

    /// # Errors
    /// As [`new`](Self::new).
    pub fn direct(
        start: VirtualAddress,
        size: u64,
        flags: AreaFlags,
        physical_start: PhysicalAddress,
    ) -> Result<Self, MemError> {
        Self::new(start, size, flags, AreaKind::DirectMapping { physical_start })
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.start.as_u64() + self.size)
    }

    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.size / Size4K::SIZE
    }

    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        self.start.as_u64() <= va.as_u64() && va.as_u64() < self.end().as_u64()
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.as_u64() < other.end().as_u64() && other.start.as_u64() < self.end().as_u64()
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self.kind, AreaKind::Anonymous { .. })
    }

    /// Physical address backing `va` for a direct mapping.
    #[must_use]
    pub fn direct_address(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.kind {
            AreaKind::DirectMapping { physical_start } if self.contains(va) => {
                Some(physical_start + (va - self.start))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for VirtualMemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) {:?} {:?}",
            self.start,
            self.end(),
            self.flags,
            self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_or_empty() {
        let va = VirtualAddress::new(0x1000);
        assert!(VirtualMemoryArea::anonymous(va + 1, 0x1000, AreaFlags::READABLE).is_err());
        assert!(VirtualMemoryArea::anonymous(va, 0x800, AreaFlags::READABLE).is_err());
        assert!(VirtualMemoryArea::anonymous(va, 0, AreaFlags::READABLE).is_err());
        assert!(
            VirtualMemoryArea::direct(va, 0x1000, AreaFlags::READABLE, PhysicalAddress::new(0x10))
                .is_err()
        );
        let straddling = VirtualAddress::new(0x7FFF_FFFF_F000);
        assert_eq!(
            VirtualMemoryArea::anonymous(straddling, 0x2000, AreaFlags::READABLE),
            Err(MemError::InvalidArgument)
        );
    }

    #[test]
    fn rejects_areas_ending_at_the_top_of_memory() {
        let top = VirtualAddress::new(0xFFFF_FFFF_FFFF_F000);
        assert_eq!(
            VirtualMemoryArea::anonymous(top, 0x1000, AreaFlags::READ_WRITE),
            Err(MemError::InvalidArgument)
        );
        assert_eq!(
            VirtualMemoryArea::anonymous(top, u64::MAX - 0xFFF, AreaFlags::READ_WRITE),
            Err(MemError::InvalidArgument)
        );

        let below = VirtualMemoryArea::anonymous(
            VirtualAddress::new(0xFFFF_FFFF_FFFF_E000),
            0x1000,
            AreaFlags::READ_WRITE,
        )
        .expect("area below the top page");
        assert_eq!(below.end().as_u64(), 0xFFFF_FFFF_FFFF_F000);
        assert!(below.contains(VirtualAddress::new(0xFFFF_FFFF_FFFF_EFFF)));
    }

    #[test]
    fn bounds_are_half_open() {
        let area = |start, size, flags| {
            VirtualMemoryArea::anonymous(VirtualAddress::new(start), size, flags).expect("area")
        };
        let a = area(0x4000, 0x2000, AreaFlags::READ_WRITE);
        assert!(a.contains(VirtualAddress::new(0x4000)));
        assert!(a.contains(VirtualAddress::new(0x5FFF)));
        assert!(!a.contains(VirtualAddress::new(0x6000)));
        assert_eq!(a.pages(), 2);

        let b = area(0x6000, 0x1000, AreaFlags::READABLE);
        assert!(!a.overlaps(&b));
        let c = area(0x5000, 0x2000, AreaFlags::READABLE);
        assert!(a.overlaps(&c) && c.overlaps(&b));
    }

    #[test]
    fn direct_address_keeps_offset() {
        let a = VirtualMemoryArea::direct(
            VirtualAddress::new(0xBCDE_0000),
            0x4000,
            AreaFlags::READABLE,
            PhysicalAddress::new(0x5000_0000),
        )
        .expect("area");
        assert_eq!(
            a.direct_address(VirtualAddress::new(0xBCDE_2010)),
            Some(PhysicalAddress::new(0x5000_2010))
        );
        assert_eq!(a.direct_address(VirtualAddress::new(0xBCDE_4000)), None);
    }

    #[test]
    fn page_flags_follow_permissions() {
        let ro = AreaFlags::READABLE.page_flags();
        assert!(ro.contains(PageEntryFlags::PRESENT | PageEntryFlags::NO_EXECUTE));
        assert!(!ro.intersects(PageEntryFlags::WRITABLE | PageEntryFlags::USER));

        let rwx = (AreaFlags::READ_WRITE | AreaFlags::EXECUTABLE).page_flags();
        assert!(rwx.contains(PageEntryFlags::WRITABLE));
        assert!(!rwx.intersects(PageEntryFlags::NO_EXECUTE | PageEntryFlags::USER));

        let user = (AreaFlags::READ_EXECUTE | AreaFlags::USER).page_flags();
        assert!(user.contains(PageEntryFlags::PRESENT | PageEntryFlags::USER));
        assert!(!user.contains(PageEntryFlags::WRITABLE));
    }
}

use crate::VirtualMemoryArea;
use alloc::collections::BTreeMap;
use kernel_alloc::MemError;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::Cr3;
use log::debug;

/// One top-level page table and the areas laid out in it.
///
/// Areas never overlap. Their pages are only installed in the tables when
/// first touched, or when mapped eagerly through the
/// [`VirtualMemoryManager`](crate::VirtualMemoryManager).
pub struct AddressSpace {
    root: PhysicalPage<Size4K>,
    areas: BTreeMap<u64, VirtualMemoryArea>,
}

/// An address space behind its own lock.
pub type SharedAddressSpace = spin::Mutex<AddressSpace>;

impl AddressSpace {
    /// Wrap an existing top-level table, with no areas yet.
    #[must_use]
    pub const fn new(root: PhysicalPage<Size4K>) -> Self {
        Self {
            root,
            areas: BTreeMap::new(),
        }
    }

    /// Frame of the top-level table.
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// The CR3 value that activates this address space.
    #[must_use]
    pub const fn cr3(&self) -> Cr3 {
        Cr3::from_root(self.root)
    }

    /// Register `area`. Nothing is mapped yet.
    ///
    /// # Errors
    /// [`MemError::InvalidArgument`] if it overlaps an existing area.
    pub fn add_area(&mut self, area: VirtualMemoryArea) -> Result<VirtualAddress, MemError> {
        let before = self.areas.range(..area.end().as_u64()).next_back();
        if let Some((_, existing)) = before
            && existing.overlaps(&area)
        {
            debug!("Area {area:?} overlaps {existing:?}");
            return Err(MemError::InvalidArgument);
        }
        self.areas.insert(area.start().as_u64(), area);
        Ok(area.start())
    }

    /// Forget the area starting at `start`.
    ///
    /// # Errors
    /// [`MemError::NotFound`] if no area starts there.
    pub fn remove_area(&mut self, start: VirtualAddress) -> Result<VirtualMemoryArea, MemError> {
        self.areas.remove(&start.as_u64()).ok_or(MemError::NotFound)
    }

    /// The area containing `va`.
    #[must_use]
    pub fn find_area(&self, va: VirtualAddress) -> Option<&VirtualMemoryArea> {
        self.areas
            .range(..=va.as_u64())
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.contains(va))
    }

    /// All areas, ordered by start address.
    pub fn areas(&self) -> impl Iterator<Item = &VirtualMemoryArea> + '_ {
        self.areas.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AreaFlags;
    use proptest::prelude::*;

    fn area(start: u64, size: u64) -> VirtualMemoryArea {
        VirtualMemoryArea::anonymous(VirtualAddress::new(start), size, AreaFlags::READ_WRITE)
            .expect("area")
    }

    #[test]
    fn overlapping_areas_are_rejected() {
        let mut space = AddressSpace::new(PhysicalPage::from_frame_number(1));
        space.add_area(area(0x1_0000, 0x4000)).expect("first");
        space.add_area(area(0x2_0000, 0x1000)).expect("second");

        assert_eq!(space.add_area(area(0x1_3000, 0x1000)), Err(MemError::InvalidArgument));
        assert_eq!(space.add_area(area(0xF000, 0x2000)), Err(MemError::InvalidArgument));
        assert_eq!(space.add_area(area(0x1_0000, 0x2_0000)), Err(MemError::InvalidArgument));
        assert_eq!(space.add_area(area(0x1_4000, 0xC000)), Ok(VirtualAddress::new(0x1_4000)));
        assert_eq!(space.areas().count(), 3);
    }

    #[test]
    fn find_and_remove() {
        let mut space = AddressSpace::new(PhysicalPage::from_frame_number(1));
        space.add_area(area(0x1_0000, 0x2000)).expect("area");

        let found = space.find_area(VirtualAddress::new(0x1_1FFF));
        assert_eq!(found.map(VirtualMemoryArea::start), Some(VirtualAddress::new(0x1_0000)));
        assert!(space.find_area(VirtualAddress::new(0x1_2000)).is_none());
        assert!(space.find_area(VirtualAddress::new(0xFFFF)).is_none());

        assert_eq!(space.remove_area(VirtualAddress::new(0x1_1000)), Err(MemError::NotFound));
        assert!(space.remove_area(VirtualAddress::new(0x1_0000)).is_ok());
        assert!(space.find_area(VirtualAddress::new(0x1_0000)).is_none());
    }

    #[test]
    fn shared_space_locks() {
        let shared = SharedAddressSpace::new(AddressSpace::new(PhysicalPage::from_frame_number(3)));
        shared.lock().add_area(area(0x1000, 0x1000)).expect("area");
        assert_eq!(shared.lock().areas().count(), 1);
        assert_eq!(shared.lock().cr3().root_address().as_u64(), 0x3000);
    }

    proptest! {
        #[test]
        fn registered_areas_never_overlap(
            candidates in proptest::collection::vec((0u64..64, 1u64..8), 1..32),
        ) {
            let mut space = AddressSpace::new(PhysicalPage::from_frame_number(1));
            for (page, pages) in candidates {
                let _ = space.add_area(area(page * 0x1000, pages * 0x1000));
            }
            let areas: Vec<_> = space.areas().copied().collect();
            for pair in areas.windows(2) {
                prop_assert!(pair[0].end() <= pair[1].start());
            }
        }
    }
}

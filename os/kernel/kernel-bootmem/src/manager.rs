use kernel_info::handoff::{BootHandoff, FreeMemoryRegion};
use kernel_info::memory::{BOOT_FREE_REGIONS, BOOT_PAGE_TABLES};
use kernel_info::memory_map::MemoryMapEntry;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::PageTable;
use log::{debug, info, warn};

/// Loader-phase memory manager with `TABLES` page tables and room for
/// `REGIONS` free intervals.
#[repr(C)]
pub struct BootstrapMemoryManager<
    const TABLES: usize = BOOT_PAGE_TABLES,
    const REGIONS: usize = BOOT_FREE_REGIONS,
> {
    pub(crate) tables: [PageTable; TABLES],
    pub(crate) tables_used: usize,
    regions: [FreeMemoryRegion; REGIONS],
    num_regions: usize,
    available_bytes: u64,
    memory_end: PhysicalAddress,
}

impl<const TABLES: usize, const REGIONS: usize> Default
    for BootstrapMemoryManager<TABLES, REGIONS>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const TABLES: usize, const REGIONS: usize> BootstrapMemoryManager<TABLES, REGIONS> {
    const CAPACITY_CHECK: () =
        assert!(TABLES >= 1, "the pool must hold at least the top-level table");

    /// An empty manager: a cleared top-level table and no free memory.
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::CAPACITY_CHECK;
        Self {
            tables: [const { PageTable::zeroed() }; TABLES],
            tables_used: 1,
            regions: [FreeMemoryRegion::EMPTY; REGIONS],
            num_regions: 0,
            available_bytes: 0,
            memory_end: PhysicalAddress::zero(),
        }
    }

    /// Bytes left in all free intervals.
    #[must_use]
    pub const fn available_bytes(&self) -> u64 {
        self.available_bytes
    }

    /// Page tables handed out so far, the top-level table included.
    #[must_use]
    pub const fn tables_used(&self) -> usize {
        self.tables_used
    }

    /// The free intervals, highest address first.
    #[must_use]
    pub fn free_regions(&self) -> &[FreeMemoryRegion] {
        &self.regions[..self.num_regions]
    }

    /// Seed the free list with every available entry of the firmware memory map.
    pub fn add_memory_map<'e>(&mut self, entries: impl IntoIterator<Item = &'e MemoryMapEntry>) {
        for entry in entries {
            debug!("Memory map: {entry}");
            if entry.kind.is_available() {
                self.add_free_region(entry.address, entry.end());
            }
        }
    }

    /// Add `[start, end)` as free memory.
    ///
    /// The interval is appended and moved into place with a single insertion
    /// pass, keeping the list sorted by descending address.
    ///
    /// # Panics
    /// If the interval array is full.
    pub fn add_free_region(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        if end <= start {
            warn!("Ignoring empty free region [{start}, {end})");
            return;
        }
        assert!(
            self.num_regions < REGIONS,
            "bootstrap free region capacity ({REGIONS}) exceeded"
        );
        debug_assert!(
            !self.free_regions().iter().any(|r| r.overlaps(start, end)),
            "free region [{start}, {end}) overlaps an existing one"
        );

        let mut i = self.num_regions;
        self.regions[i] = FreeMemoryRegion::new(start, end - start);
        self.num_regions += 1;
        while i > 0 && self.regions[i - 1].address < self.regions[i].address {
            self.regions.swap(i - 1, i);
            i -= 1;
        }

        self.available_bytes += end - start;
        if end > self.memory_end {
            self.memory_end = end;
        }
    }

    /// Remove `[start, end)` from the free intervals.
    ///
    /// An interval may be covered entirely (dropped), clipped on its left or
    /// right edge (shrunk), or split around the reservation (shrunk, plus a new
    /// tail interval). Runs until no interval intersects the range.
    ///
    /// # Panics
    /// If a split needs a new interval and the array is full.
    pub fn mark_not_free(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        if end <= start {
            return;
        }

        let mut changed = true;
        while changed {
            changed = false;
            let mut i = 0;
            while i < self.num_regions {
                let region = self.regions[i];
                if !region.overlaps(start, end) {
                    i += 1;
                    continue;
                }
                changed = true;

                let (r_start, r_end) = (region.address, region.end());
                match (start <= r_start, end >= r_end) {
                    (true, true) => {
                        self.remove_region(i);
                        self.available_bytes -= region.length;
                        continue;
                    }
                    (true, false) => {
                        self.regions[i].consume_front(end - r_start);
                        self.available_bytes -= end - r_start;
                    }
                    (false, true) => {
                        self.regions[i].length = start - r_start;
                        self.available_bytes -= r_end - start;
                    }
                    (false, false) => {
                        self.regions[i].length = start - r_start;
                        self.available_bytes -= r_end - start;
                        self.add_free_region(end, r_end);
                    }
                }
                i += 1;
            }
        }
        debug!("Reserved [{start}, {end}), {} bytes left", self.available_bytes);
    }

    fn remove_region(&mut self, index: usize) {
        self.regions.copy_within(index + 1..self.num_regions, index);
        self.num_regions -= 1;
    }

    /// Take the next usable 4 KiB frame from the front of the highest interval
    /// that still has one, discarding any unaligned prefix.
    pub(crate) fn take_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        for i in 0..self.num_regions {
            let region = &mut self.regions[i];
            let aligned = region.address.align_up::<Size4K>();
            let waste = aligned - region.address;
            if region.length < waste + Size4K::SIZE {
                continue;
            }
            region.consume_front(waste);
            let frame = region.consume_front(Size4K::SIZE);
            self.available_bytes -= waste + Size4K::SIZE;
            if self.regions[i].is_empty() {
                self.remove_region(i);
            }
            return Some(PhysicalPage::containing_address(frame));
        }
        None
    }

    /// Carve `size` bytes aligned to `align` out of free memory, e.g. for the
    /// frame allocator's bitmap. Higher memory is preferred.
    ///
    /// Returns `None` if no interval can hold the request.
    pub fn allocate_contiguous(&mut self, size: u64, align: u64) -> Option<PhysicalAddress> {
        debug_assert!(align.is_power_of_two());
        if size == 0 {
            return None;
        }
        let start = self.free_regions().iter().find_map(|r| {
            let start = r.address.as_u64().checked_next_multiple_of(align)?;
            let end = start.checked_add(size)?;
            (end <= r.end().as_u64()).then_some(PhysicalAddress::new(start))
        })?;
        self.mark_not_free(start, start + size);
        Some(start)
    }

    /// Log the free intervals at info level.
    pub fn dump_memory_map(&self) {
        info!(
            "Bootstrap free memory: {} regions, {} KiB, {}/{TABLES} page tables used",
            self.num_regions,
            self.available_bytes / 1024,
            self.tables_used
        );
        for region in self.free_regions() {
            info!("  {region:?} {:>10} KiB", region.length / 1024);
        }
    }

    /// The state the kernel-phase allocators start from.
    #[must_use]
    pub fn handoff(&self) -> BootHandoff<'_> {
        BootHandoff {
            root_table: self.top_level_table(),
            free_regions: self.free_regions(),
            memory_end: self.memory_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory_map::MemoryRegionKind;
    use proptest::prelude::*;

    type Manager = BootstrapMemoryManager<1, 64>;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn intervals(m: &Manager) -> Vec<(u64, u64)> {
        m.free_regions()
            .iter()
            .map(|r| (r.address.as_u64(), r.end().as_u64()))
            .collect()
    }

    fn assert_consistent(m: &Manager) {
        let sum: u64 = m.free_regions().iter().map(|r| r.length).sum();
        assert_eq!(sum, m.available_bytes());
        for pair in m.free_regions().windows(2) {
            assert!(pair[0].address >= pair[1].end(), "not sorted/disjoint: {pair:?}");
        }
    }

    #[test]
    fn split_leaves_two_intervals() {
        let mut m = Box::new(Manager::new());
        m.add_free_region(pa(0x10_0000), pa(0x20_0000));
        m.mark_not_free(pa(0x15_0000), pa(0x16_0000));
        assert_eq!(intervals(&m), vec![(0x16_0000, 0x20_0000), (0x10_0000, 0x15_0000)]);
        assert_eq!(m.available_bytes(), 0x10_0000 - 0x1_0000);
    }

    #[test]
    fn regions_are_sorted_descending() {
        let mut m = Box::new(Manager::new());
        m.add_free_region(pa(0x1000), pa(0x2000));
        m.add_free_region(pa(0x9000), pa(0xA000));
        m.add_free_region(pa(0x5000), pa(0x6000));
        assert_eq!(
            intervals(&m),
            vec![(0x9000, 0xA000), (0x5000, 0x6000), (0x1000, 0x2000)]
        );
        assert_consistent(&m);
    }

    #[test]
    fn reservation_cases() {
        let mut m = Box::new(Manager::new());
        m.add_free_region(pa(0x1_0000), pa(0x2_0000));
        m.add_free_region(pa(0x3_0000), pa(0x4_0000));
        m.add_free_region(pa(0x5_0000), pa(0x6_0000));

        // clips the left edge of the top interval
        m.mark_not_free(pa(0x4_8000), pa(0x5_1000));
        // clips the right edge of the middle interval
        m.mark_not_free(pa(0x3_F000), pa(0x4_1000));
        // covers the bottom interval entirely
        m.mark_not_free(pa(0x0_F000), pa(0x2_1000));

        assert_eq!(intervals(&m), vec![(0x5_1000, 0x6_0000), (0x3_0000, 0x3_F000)]);
        assert_consistent(&m);
    }

    #[test]
    fn reservation_spanning_several_intervals() {
        let mut m = Box::new(Manager::new());
        m.add_free_region(pa(0x1000), pa(0x3000));
        m.add_free_region(pa(0x4000), pa(0x6000));
        m.add_free_region(pa(0x7000), pa(0x9000));
        m.mark_not_free(pa(0x2000), pa(0x8000));
        assert_eq!(intervals(&m), vec![(0x8000, 0x9000), (0x1000, 0x2000)]);
        assert_consistent(&m);
    }

    #[test]
    fn memory_map_seeds_only_available_entries() {
        let map = [
            MemoryMapEntry::new(0, 0x9_F000, MemoryRegionKind::Available),
            MemoryMapEntry::new(0x9_F000, 0x6_1000, MemoryRegionKind::Reserved),
            MemoryMapEntry::new(0x10_0000, 0x7EF_0000, MemoryRegionKind::Available),
            MemoryMapEntry::new(0x7FF_0000, 0x1_0000, MemoryRegionKind::AcpiReclaimable),
        ];
        let mut m = Box::new(Manager::new());
        m.add_memory_map(&map);
        assert_eq!(intervals(&m), vec![(0x10_0000, 0x7FF_0000), (0, 0x9_F000)]);
        assert_eq!(m.handoff().memory_end, pa(0x7FF_0000));
    }

    #[test]
    fn frames_come_from_high_memory_first() {
        let mut m = Box::new(Manager::new());
        m.add_free_region(pa(0x1000), pa(0x2000));
        m.add_free_region(pa(0x10_0800), pa(0x10_2000));

        // unaligned prefix is discarded
        assert_eq!(m.take_frame().map(|f| f.base()), Some(pa(0x10_1000)));
        assert_eq!(m.free_regions().len(), 1);
        assert_eq!(m.take_frame().map(|f| f.base()), Some(pa(0x1000)));
        assert_eq!(m.take_frame(), None);
        assert_eq!(m.available_bytes(), 0);
    }

    #[test]
    fn allocate_contiguous_reserves_the_range() {
        let mut m = Box::new(Manager::new());
        m.add_free_region(pa(0x1000), pa(0x2_0000));
        let start = m.allocate_contiguous(0x3000, 0x1_0000).expect("fits");
        assert_eq!(start, pa(0x1_0000));
        assert_eq!(intervals(&m), vec![(0x1_3000, 0x2_0000), (0x1000, 0x1_0000)]);
        assert_eq!(m.allocate_contiguous(0x10_0000, 0x1000), None);
        assert_consistent(&m);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn interval_capacity_is_fatal() {
        let mut m = Box::new(BootstrapMemoryManager::<1, 2>::new());
        m.add_free_region(pa(0x1000), pa(0x9000));
        m.add_free_region(pa(0xA000), pa(0xB000));
        m.mark_not_free(pa(0x2000), pa(0x3000));
    }

    proptest! {
        #[test]
        fn available_bytes_tracks_interval_sum(
            slots in proptest::collection::btree_set(0u64..16, 1..8),
            reservations in proptest::collection::vec((0u64..0x10_0000, 1u64..0x4_0000), 0..12),
        ) {
            let mut m = Box::new(Manager::new());
            for slot in slots {
                m.add_free_region(pa(slot * 0x1_0000 + 0x100), pa(slot * 0x1_0000 + 0xF000));
            }
            for (start, len) in reservations {
                m.mark_not_free(pa(start), pa(start + len));
                assert_consistent(&m);
                let (low, high) = (pa(start), pa(start + len));
                prop_assert!(m.free_regions().iter().all(|r| !r.overlaps(low, high)));
            }
        }

        #[test]
        fn mark_not_free_is_idempotent(
            slots in proptest::collection::btree_set(0u64..16, 1..8),
            start in 0u64..0x10_0000,
            len in 1u64..0x4_0000,
        ) {
            let mut m = Box::new(Manager::new());
            for slot in slots {
                m.add_free_region(pa(slot * 0x1_0000), pa(slot * 0x1_0000 + 0x8000));
            }
            m.mark_not_free(pa(start), pa(start + len));
            let once = (intervals(&m), m.available_bytes());
            m.mark_not_free(pa(start), pa(start + len));
            prop_assert_eq!(once, (intervals(&m), m.available_bytes()));
        }
    }
}

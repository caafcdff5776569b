//! Page-table construction on top of the bootstrap table pool.

use crate::manager::BootstrapMemoryManager;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{FrameAlloc, IdentityMapper, PageEntryFlags, PageMap, PageTable};
use log::{debug, info};

/// Hands out the pool's tables in order. Returns `None` once the pool is used up.
struct TablePool<'a> {
    base: *mut PageTable,
    used: &'a mut usize,
    capacity: usize,
}

impl FrameAlloc for TablePool<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if *self.used >= self.capacity {
            return None;
        }
        // SAFETY: `used < capacity`, so the table lies inside the pool array.
        let table = unsafe { self.base.add(*self.used) };
        *self.used += 1;
        Some(PhysicalPage::containing_address(PhysicalAddress::new(
            table.expose_provenance() as u64,
        )))
    }
}

impl<const TABLES: usize, const REGIONS: usize> BootstrapMemoryManager<TABLES, REGIONS> {
    /// The top-level table (table 0 of the pool), the value for CR3.
    #[must_use]
    pub fn top_level_table(&self) -> PhysicalPage<Size4K> {
        let root = core::ptr::from_ref(&self.tables[0]).expose_provenance();
        PhysicalPage::containing_address(PhysicalAddress::new(root as u64))
    }

    fn page_map(&self) -> PageMap<'static, IdentityMapper> {
        // SAFETY: every table of the tree comes from the pool and is
        // identity-mapped; `&mut self` on the editing paths keeps edits exclusive.
        unsafe { PageMap::from_root(&IdentityMapper, self.top_level_table()) }
    }

    /// Physical address `va` translates to in the tables built so far.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.page_map().translate(va)
    }

    /// Install one 4 KiB mapping `va → pa`.
    ///
    /// # Panics
    /// If the table pool is exhausted or the mapping conflicts with an
    /// existing huge page.
    pub fn map_page(&mut self, va: VirtualAddress, pa: PhysicalAddress, flags: PageEntryFlags) {
        let map = self.page_map();
        let mut pool = TablePool {
            base: self.tables.as_mut_ptr(),
            used: &mut self.tables_used,
            capacity: TABLES,
        };
        if let Err(e) = map.map_one::<_, Size4K>(&mut pool, va, pa, flags) {
            panic!("bootstrap mapping {va} -> {pa} failed ({TABLES} tables): {e}");
        }
    }

    /// Back `[va, va + size)` with frames taken from the free intervals.
    ///
    /// # Panics
    /// If `va` is not page aligned, if free memory runs out before the range
    /// is covered, or if the table pool is exhausted.
    pub fn map_virtual_range(&mut self, va: VirtualAddress, size: u64, flags: PageEntryFlags) {
        assert!(va.is_aligned::<Size4K>(), "unaligned bootstrap mapping at {va}");
        assert!(
            size <= self.available_bytes(),
            "bootstrap mapping of {size} bytes at {va} exceeds the {} bytes left",
            self.available_bytes()
        );

        let pages = size.div_ceil(Size4K::SIZE);
        debug!("Mapping {pages} pages at {va} from free memory");
        for i in 0..pages {
            let Some(frame) = self.take_frame() else {
                self.dump_memory_map();
                panic!("out of physical memory after {i} of {pages} bootstrap pages at {va}");
            };
            self.map_page(va + i * Size4K::SIZE, frame.base(), flags);
        }
    }

    /// Map `[va, va + size)` onto the known physical range starting at `pa`,
    /// e.g. the kernel image or firmware tables. The physical range is not
    /// taken from the free intervals; reserve it with
    /// [`mark_not_free`](Self::mark_not_free) if it was ever free.
    ///
    /// # Panics
    /// If either address is not page aligned or the table pool is exhausted.
    pub fn map_physical_range(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        flags: PageEntryFlags,
    ) {
        assert!(va.is_aligned::<Size4K>(), "unaligned bootstrap mapping at {va}");
        assert!(pa.is_aligned::<Size4K>(), "unaligned physical range at {pa}");

        let pages = size.div_ceil(Size4K::SIZE);
        info!("Mapping {va} -> {pa} ({pages} pages)");
        for i in 0..pages {
            let offset = i * Size4K::SIZE;
            self.map_page(va + offset, pa + offset, flags);
        }
    }
}

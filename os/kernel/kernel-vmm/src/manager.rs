//! # Virtual Memory Manager
//!
//! Ties address spaces to their page tables:
//!
//! - [`create_address_space`](VirtualMemoryManager::create_address_space) /
//!   [`destroy_address_space`](VirtualMemoryManager::destroy_address_space)
//! - [`add_area`](VirtualMemoryManager::add_area) registers demand-paged memory
//! - [`rm_area`](VirtualMemoryManager::rm_area) forgets an area *and* tears
//!   down whatever of it was already installed
//! - [`map`](VirtualMemoryManager::map) installs translations eagerly
//!
//! Every removed translation is flushed through the manager's [`Tlb`].

use crate::{AddressSpace, VirtualMemoryArea};
use alloc::vec::Vec;
use kernel_alloc::MemError;
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K, VirtualAddress,
};
use kernel_vmem::{
    FrameAlloc, FrameDealloc, MapError, MapSize, PageEntryFlags, PageMap, PhysMapper, TableLevel,
    Tlb, Translation,
};
use log::{debug, info, trace};

/// Return every 4 KiB frame under the leaf `t`.
fn free_leaf<D: FrameDealloc>(t: &Translation, pmm: &mut D) {
    let first = PhysicalPage::<Size4K>::containing_address(t.entry.frame_address());
    for i in 0..t.page_size() / Size4K::SIZE {
        pmm.free_4k(first.add_pages(i));
    }
}

/// Collapse a table-editing failure into the allocation error taxonomy.
pub(crate) const fn mem_error(e: MapError) -> MemError {
    match e {
        MapError::OutOfMemory(_) => MemError::OutOfMemory,
        MapError::NotMapped(_) => MemError::NotFound,
        _ => MemError::InvalidArgument,
    }
}

pub struct VirtualMemoryManager<'m, M: PhysMapper, T: Tlb> {
    mapper: &'m M,
    tlb: T,
}

impl<'m, M: PhysMapper, T: Tlb> VirtualMemoryManager<'m, M, T> {
    /// # Safety
    /// Every frame handed to this manager by a frame allocator, and every
    /// table of every address space it is given, must be reachable through
    /// `mapper`.
    pub const unsafe fn new(mapper: &'m M, tlb: T) -> Self {
        Self { mapper, tlb }
    }

    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[must_use]
    pub const fn tlb(&self) -> &T {
        &self.tlb
    }

    pub(crate) fn page_map(&self, space: &AddressSpace) -> PageMap<'m, M> {
        // SAFETY: `new` requires all tables to be reachable through the mapper.
        unsafe { PageMap::from_root(self.mapper, space.root()) }
    }

    /// A new address space with a cleared top-level table.
    ///
    /// # Errors
    /// [`MemError::OutOfMemory`] if no frame is left for the table.
    pub fn create_address_space<A: FrameAlloc>(
        &self,
        pmm: &mut A,
    ) -> Result<AddressSpace, MemError> {
        // SAFETY: `new` requires allocated frames to be reachable through the mapper.
        let map = unsafe { PageMap::create(self.mapper, pmm) }.map_err(mem_error)?;
        debug!("New address space rooted at {}", map.root());
        Ok(AddressSpace::new(map.root()))
    }

    /// Remove every area and return all frames the address space owns: the
    /// anonymous pages it faulted in and its page tables.
    pub fn destroy_address_space<D: FrameDealloc>(&self, mut space: AddressSpace, pmm: &mut D) {
        let starts: Vec<VirtualAddress> = space.areas().map(VirtualMemoryArea::start).collect();
        for start in starts {
            if let Err(e) = self.rm_area(&mut space, start, pmm) {
                debug!("Tearing down area at {start}: {e}");
            }
        }
        debug!("Releasing tables of address space at {}", space.root());
        self.page_map(&space).release_tables(pmm);
    }

    /// Register `area` in `space`. Its pages are installed on first fault.
    ///
    /// # Errors
    /// [`MemError::InvalidArgument`] if it overlaps an existing area.
    pub fn add_area(
        &self,
        space: &mut AddressSpace,
        area: VirtualMemoryArea,
    ) -> Result<VirtualAddress, MemError> {
        let start = space.add_area(area)?;
        trace!("Added area {area:?}");
        Ok(start)
    }

    /// Remove the area starting at `start`, unmap every page of it that is
    /// installed, and flush those translations. Frames of anonymous areas go
    /// back to `pmm`; direct mappings do not own their frames.
    ///
    /// # Errors
    /// - [`MemError::NotFound`] if no area starts at `start`
    /// - [`MemError::InvalidArgument`] if a huge page straddles the area
    ///   boundary; the area is kept in that case
    pub fn rm_area<D: FrameDealloc>(
        &self,
        space: &mut AddressSpace,
        start: VirtualAddress,
        pmm: &mut D,
    ) -> Result<VirtualMemoryArea, MemError> {
        let area = *space
            .find_area(start)
            .filter(|a| a.start() == start)
            .ok_or(MemError::NotFound)?;
        let removed = self.unmap_range(space, area.start(), area.size())?;
        space.remove_area(start)?;

        if area.is_anonymous() {
            for t in &removed {
                free_leaf(t, pmm);
            }
        }
        debug!("Removed area {area:?}, {} translations dropped", removed.len());
        Ok(area)
    }

    /// Map `[va, va + size)` onto `[pa, pa + size)` with pages of size `S`.
    ///
    /// # Errors
    /// - [`MemError::InvalidArgument`] if `size` is not a multiple of `S`, for
    ///   misaligned addresses, ranges running past the top of the address
    ///   space, or conflicting huge pages
    /// - [`MemError::OutOfMemory`] if a table cannot be allocated; pages
    ///   mapped before the failure stay mapped
    pub fn map<S: MapSize, A: FrameAlloc>(
        &self,
        space: &AddressSpace,
        pmm: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        flags: PageEntryFlags,
    ) -> Result<(), MemError> {
        if size == 0 || !size.is_multiple_of(S::SIZE) {
            return Err(MemError::InvalidArgument);
        }
        let last_va = va.checked_add(size - 1);
        let last_pa = pa.as_u64().checked_add(size - 1);
        if last_va.is_none() || last_pa.is_none() {
            return Err(MemError::InvalidArgument);
        }
        let map = self.page_map(space);
        for i in 0..size / S::SIZE {
            let offset = i * S::SIZE;
            map.map_one::<A, S>(pmm, va + offset, pa + offset, flags)
                .map_err(mem_error)?;
            self.tlb.flush_page(va + offset);
        }
        trace!("Mapped {va} -> {pa}, {size:#x} bytes in {} pages", S::NAME);
        Ok(())
    }

    /// Remove every translation inside `[start, start + size)` and flush it.
    ///
    /// Returns the leaves that were removed. Intermediate tables stay.
    ///
    /// # Errors
    /// [`MemError::InvalidArgument`] if the range is misaligned, runs past the
    /// top of the address space, or cuts through a huge page. Nothing is
    /// unmapped in that case.
    pub fn unmap_range(
        &self,
        space: &AddressSpace,
        start: VirtualAddress,
        size: u64,
    ) -> Result<Vec<Translation>, MemError> {
        if !start.is_aligned::<Size4K>() || !size.is_multiple_of(Size4K::SIZE) {
            return Err(MemError::InvalidArgument);
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        // Inclusive, so a range ending at the top of the address space works.
        let last = start
            .as_u64()
            .checked_add(size - 1)
            .ok_or(MemError::InvalidArgument)?;
        let map = self.page_map(space);

        let mut leaves = Vec::new();
        let mut va = start.as_u64();
        loop {
            let here = VirtualAddress::new(va);
            let step = match map.lookup(here) {
                None => Size4K::SIZE,
                Some(t) => {
                    let span = t.page_size();
                    if !va.is_multiple_of(span) || va + (span - 1) > last {
                        return Err(MemError::InvalidArgument);
                    }
                    leaves.push((here, t));
                    span
                }
            };
            match va.checked_add(step) {
                Some(next) if next <= last => va = next,
                _ => break,
            }
        }

        for (va, t) in &leaves {
            match t.level {
                TableLevel::Pml3 => map.unmap_one::<Size1G>(*va).map(|_| ()),
                TableLevel::Pml2 => map.unmap_one::<Size2M>(*va).map(|_| ()),
                _ => map.unmap_one::<Size4K>(*va).map(|_| ()),
            }
            .map_err(mem_error)?;
            self.tlb.flush_page(*va);
        }
        Ok(leaves.into_iter().map(|(_, t)| t).collect())
    }

    /// Physical address `va` translates to in `space`.
    #[must_use]
    pub fn translate(&self, space: &AddressSpace, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.page_map(space).translate(va)
    }

    /// Make `space` the current CPU's address space.
    ///
    /// # Safety
    /// Ring 0 only. `space` must map the executing code, the stack and every
    /// structure the kernel touches next.
    #[cfg(feature = "asm")]
    pub unsafe fn activate(&self, space: &AddressSpace) {
        use kernel_registers::StoreRegisterUnsafe;
        info!("Activating address space at {}", space.root());
        // SAFETY: forwarded to the caller.
        unsafe { space.cr3().store_unsafe() };
    }

    /// Log the areas and the table tree of `space`.
    pub fn dump(&self, space: &AddressSpace) {
        info!("Address space at {} ({:?})", space.root(), space.cr3());
        for area in space.areas() {
            info!("  {area:?}");
        }
        self.page_map(space).dump();
    }
}

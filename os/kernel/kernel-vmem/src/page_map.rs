//! # Page Map (x86-64, PML4-rooted)
//!
//! Builds, queries and tears down the table tree of one address space.
//!
//! - [`PageMap::map_one`] installs one 4 KiB / 2 MiB / 1 GiB leaf, allocating
//!   and zeroing missing intermediate tables on the way down.
//! - [`PageMap::unmap_one`] clears one leaf and hands back the frame it mapped.
//! - [`PageMap::lookup`] / [`PageMap::translate`] walk without allocating.
//! - [`PageMap::walk`] lazily visits every present entry, for diagnostics.
//!
//! Changing the tables of the *active* address space requires TLB maintenance
//! by the caller, see [`Tlb`](crate::Tlb).

mod map_size;

pub use crate::page_map::map_size::MapSize;
use crate::walk::Walk;
use crate::{
    FrameAlloc, FrameDealloc, PageEntryFlags, PageTable, PageTableEntry, PhysMapper, TableLevel,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::{debug, trace};

/// Errors raised while editing a [`PageMap`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("virtual address {va} is not aligned to a {size} page")]
    MisalignedVirtual { va: VirtualAddress, size: &'static str },
    #[error("physical address {pa} is not aligned to a {size} page")]
    MisalignedPhysical { pa: PhysicalAddress, size: &'static str },
    #[error("virtual address {0} is not canonical")]
    NonCanonical(VirtualAddress),
    #[error("out of memory allocating a {0:?} table")]
    OutOfMemory(TableLevel),
    #[error("{va} is covered by a huge page at {level:?}")]
    HugePageInTheWay { va: VirtualAddress, level: TableLevel },
    #[error("{va} is backed by a {level:?} table, not a leaf")]
    TableInTheWay { va: VirtualAddress, level: TableLevel },
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
}

/// The leaf entry translating an address, and the level it was found at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Translation {
    pub level: TableLevel,
    pub entry: PageTableEntry,
}

impl Translation {
    /// Bytes mapped by the leaf.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.level.entry_span()
    }

    /// Physical address `va` resolves to through this leaf.
    #[must_use]
    pub const fn physical_address(&self, va: VirtualAddress) -> PhysicalAddress {
        let span = self.page_size();
        let base = kernel_memory_addresses::align_down(self.entry.frame_address().as_u64(), span);
        PhysicalAddress::new(base | (va.as_u64() & (span - 1)))
    }
}

/// Handle to the table tree of a single address space.
pub struct PageMap<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> PageMap<'m, M> {
    /// Wrap an existing top-level table.
    ///
    /// # Safety
    /// `root` must be a PML4 frame whose whole tree is reachable through
    /// `mapper`, and nothing else may edit that tree while this handle is used.
    #[inline]
    pub const unsafe fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Allocate and clear a fresh top-level table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `alloc` has no frame left.
    ///
    /// # Safety
    /// Every frame `alloc` hands out must be reachable through `mapper`.
    pub unsafe fn create<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = alloc
            .alloc_4k()
            .ok_or(MapError::OutOfMemory(TableLevel::Pml4))?;
        let map = Self { root, mapper };
        map.table(root).zero();
        Ok(map)
    }

    /// Frame of the top-level table, the value that goes into CR3.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    fn table(&self, frame: PhysicalPage<Size4K>) -> &'m mut PageTable {
        // SAFETY: the constructors require every table frame of this tree to be
        // reachable through the mapper.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Map **one** page `va → pa` of size `S`.
    ///
    /// Missing intermediate tables are allocated from `alloc` and zeroed. An
    /// existing leaf at the target slot is replaced.
    ///
    /// # Errors
    /// - misaligned or non-canonical addresses
    /// - [`MapError::OutOfMemory`] if an intermediate table cannot be allocated
    /// - [`MapError::HugePageInTheWay`] if a larger page already covers `va`
    /// - [`MapError::TableInTheWay`] if a huge mapping would shadow a table
    pub fn map_one<A: FrameAlloc, S: MapSize>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryFlags,
    ) -> Result<(), MapError> {
        if !va.is_aligned::<S>() {
            return Err(MapError::MisalignedVirtual { va, size: S::NAME });
        }
        let frame = PhysicalPage::<S>::from_aligned(pa)
            .ok_or(MapError::MisalignedPhysical { pa, size: S::NAME })?;
        if !va.is_canonical() {
            return Err(MapError::NonCanonical(va));
        }

        let user = flags.contains(PageEntryFlags::USER);
        let table = self.ensure_chain(alloc, va, S::LEAF_LEVEL, user)?;
        let index = S::LEAF_LEVEL.index_of(va);
        let old = table.get(index);
        if old.present() {
            if !old.is_leaf(S::LEAF_LEVEL) {
                return Err(MapError::TableInTheWay { va, level: S::LEAF_LEVEL });
            }
            trace!("Remapping {va}: {} -> {pa}", old.frame_address());
        }
        table.set(index, S::leaf(frame, flags));
        Ok(())
    }

    /// Walk down to the table holding the leaf for `va` at `leaf_level`,
    /// creating missing tables.
    fn ensure_chain<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        leaf_level: TableLevel,
        user: bool,
    ) -> Result<&'m mut PageTable, MapError> {
        let mut table = self.table(self.root);
        for &level in &TableLevel::ALL[..leaf_level.depth()] {
            let index = level.index_of(va);
            let entry = table.get(index);
            let next = match entry.next_table(level) {
                Some(next) => {
                    if user && !entry.user() {
                        table.set(index, entry.with_user(true));
                    }
                    next
                }
                None if entry.present() => return Err(MapError::HugePageInTheWay { va, level }),
                None => {
                    let child_level = TableLevel::ALL[level.depth() + 1];
                    let frame = alloc.alloc_4k().ok_or(MapError::OutOfMemory(child_level))?;
                    self.table(frame).zero();
                    table.set(index, PageTableEntry::table(frame, user));
                    trace!("New {child_level:?} table at {} for {va}", frame.base());
                    frame
                }
            };
            table = self.table(next);
        }
        Ok(table)
    }

    /// Walk down to the table holding the leaf for `va` at `leaf_level`
    /// without creating anything.
    fn existing_chain(
        &self,
        va: VirtualAddress,
        leaf_level: TableLevel,
    ) -> Result<&'m mut PageTable, MapError> {
        let mut table = self.table(self.root);
        for &level in &TableLevel::ALL[..leaf_level.depth()] {
            let entry = table.get(level.index_of(va));
            if !entry.present() {
                return Err(MapError::NotMapped(va));
            }
            let next = entry
                .next_table(level)
                .ok_or(MapError::HugePageInTheWay { va, level })?;
            table = self.table(next);
        }
        Ok(table)
    }

    /// Remove the leaf of size `S` at `va` and return the frame it mapped.
    ///
    /// Intermediate tables stay in place, even if they become empty.
    ///
    /// # Errors
    /// - [`MapError::NotMapped`] if nothing is mapped at `va`
    /// - [`MapError::HugePageInTheWay`] / [`MapError::TableInTheWay`] if `va`
    ///   is mapped with a different page size
    pub fn unmap_one<S: MapSize>(&self, va: VirtualAddress) -> Result<PhysicalPage<S>, MapError> {
        if !va.is_aligned::<S>() {
            return Err(MapError::MisalignedVirtual { va, size: S::NAME });
        }
        let table = self.existing_chain(va, S::LEAF_LEVEL)?;
        let index = S::LEAF_LEVEL.index_of(va);
        let entry = table.get(index);
        if !entry.present() {
            return Err(MapError::NotMapped(va));
        }
        if !entry.is_leaf(S::LEAF_LEVEL) {
            return Err(MapError::TableInTheWay { va, level: S::LEAF_LEVEL });
        }
        table.set(index, PageTableEntry::new());
        Ok(entry.leaf_frame::<S>())
    }

    /// The leaf translating `va`, if any.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<Translation> {
        let mut table = self.table(self.root);
        for level in TableLevel::ALL {
            let entry = table.get(level.index_of(va));
            if !entry.present() {
                return None;
            }
            if entry.is_leaf(level) {
                return Some(Translation { level, entry });
            }
            table = self.table(entry.next_table(level)?);
        }
        None
    }

    /// Translate `va` to the physical address it maps to, honouring huge pages.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va).map(|t| t.physical_address(va))
    }

    /// Lazily visit every present entry, depth-first.
    #[must_use]
    pub fn walk(&self) -> Walk<'m, M> {
        Walk::new(self.mapper, self.root)
    }

    /// Log every present entry at debug level.
    pub fn dump(&self) {
        debug!("Page map rooted at {}", self.root.base());
        for visit in self.walk() {
            let indent = visit.level.depth() * 2;
            if visit.is_leaf() {
                debug!(
                    "{:indent$}{:?}[{:3}] {} -> {} {:?}",
                    "",
                    visit.level,
                    visit.index,
                    visit.virtual_address,
                    visit.entry.frame_address(),
                    visit.entry.flags(),
                );
            } else {
                debug!(
                    "{:indent$}{:?}[{:3}] table {}",
                    "",
                    visit.level,
                    visit.index,
                    visit.entry.frame_address(),
                );
            }
        }
    }

    /// Return every table frame of this tree, the root included, to `dealloc`.
    ///
    /// Leaf frames are not touched; they belong to whoever mapped them.
    pub fn release_tables<D: FrameDealloc>(self, dealloc: &mut D) {
        self.release_table(self.root, TableLevel::Pml4, dealloc);
    }

    fn release_table<D: FrameDealloc>(
        &self,
        frame: PhysicalPage<Size4K>,
        level: TableLevel,
        dealloc: &mut D,
    ) {
        if let Some(child_level) = level.next() {
            for (_, entry) in self.table(frame).present_entries() {
                if let Some(child) = entry.next_table(level) {
                    self.release_table(child, child_level, dealloc);
                }
            }
        }
        dealloc.free_4k(frame);
    }
}

//! # HHDM-based `PhysMapper` for the Kernel Phase
//!
//! Once the kernel's own tables are live, every physical address `pa` is
//! visible at `offset + pa` through the higher-half direct map. The loader
//! phase uses [`IdentityMapper`](kernel_vmem::IdentityMapper) instead.
//!
//! ```rust
//! use kernel_alloc::HhdmMapper;
//! use kernel_info::memory::HHDM_BASE;
//!
//! assert_eq!(HhdmMapper::default().offset(), HHDM_BASE);
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] that adds a fixed offset to physical addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HhdmMapper {
    offset: u64,
}

impl Default for HhdmMapper {
    fn default() -> Self {
        Self::new(HHDM_BASE)
    }
}

impl HhdmMapper {
    /// A direct map of all physical memory at `offset`.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for HhdmMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.offset.wrapping_add(pa.as_u64()) as usize;
        let ptr = core::ptr::with_exposed_provenance_mut::<T>(va);
        // SAFETY: the caller guarantees `pa` is covered by the direct map and holds a `T`.
        unsafe { &mut *ptr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::PageTable;

    #[test]
    fn offset_is_added() {
        let mut table = Box::new(PageTable::zeroed());
        let host = core::ptr::from_mut(table.as_mut()).expose_provenance() as u64;
        let mapper = HhdmMapper::new(host - 0x5000);

        let view: &mut PageTable = unsafe { mapper.phys_to_mut(PhysicalAddress::new(0x5000)) };
        view.set(3, kernel_vmem::PageTableEntry::new().with_present(true));
        assert!(table.get(3).present());
    }
}

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: page-table base register (4-level paging, PCID disabled).
///
/// Holds the physical frame of the top-level (PML4) table plus the cache
/// policy used when the walker reads it.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2: reserved, must be 0.
    #[bits(3)]
    __: u8,

    /// Bit 3: page-level write-through for the PML4 access.
    pub write_through: bool,

    /// Bit 4: page-level cache disable for the PML4 access.
    pub cache_disable: bool,

    /// Bits 5–11: reserved, must be 0.
    #[bits(7)]
    __: u8,

    /// Bits 12–51: PML4 frame number.
    #[bits(40)]
    root_frame: u64,

    /// Bits 52–63: reserved, must be 0.
    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// CR3 value selecting `root` as the top-level table, write-back cached.
    #[must_use]
    pub const fn from_root(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_root_frame(root.frame_number())
    }

    /// The top-level table frame this value points at.
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_number(self.root_frame())
    }

    #[must_use]
    pub const fn root_address(&self) -> PhysicalAddress {
        self.root().base()
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_frame_occupies_bits_12_to_51() {
        let root = PhysicalPage::<Size4K>::from_frame_number(0x000F_FFFF_FFFF);
        let cr3 = Cr3::from_root(root);
        assert_eq!(cr3.into_bits(), 0x000F_FFFF_FFFF_F000);
        assert_eq!(cr3.root(), root);
    }

    #[test]
    fn cache_flags_do_not_touch_root() {
        let root = PhysicalPage::<Size4K>::from_frame_number(0x1234);
        let cr3 = Cr3::from_root(root)
            .with_write_through(true)
            .with_cache_disable(true);
        assert_eq!(cr3.into_bits(), 0x0123_4018);
        assert_eq!(cr3.root_address().as_u64(), 0x0123_4000);
    }
}

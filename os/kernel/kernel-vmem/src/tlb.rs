//! # Translation Invalidation
//!
//! After a present entry of the *active* address space changes, the CPU may
//! still hold the old translation. Whoever edits the tables tells the [`Tlb`]
//! which addresses went stale.

use kernel_memory_addresses::VirtualAddress;

pub trait Tlb {
    /// Drop any cached translation for the page containing `va`.
    fn flush_page(&self, va: VirtualAddress);

    /// Drop all non-global cached translations.
    fn flush_all(&self);
}

/// A [`Tlb`] that does nothing, for address spaces that are not active.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoTlb;

impl Tlb for NoTlb {
    #[inline]
    fn flush_page(&self, _va: VirtualAddress) {}

    #[inline]
    fn flush_all(&self) {}
}

/// The current CPU's TLB, flushed with `invlpg` and CR3 reloads.
#[cfg(feature = "asm")]
#[derive(Debug)]
pub struct NativeTlb {
    _private: (),
}

#[cfg(feature = "asm")]
impl NativeTlb {
    /// # Safety
    /// Must only be used in ring 0 with paging enabled.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(feature = "asm")]
impl Tlb for NativeTlb {
    #[inline]
    fn flush_page(&self, va: VirtualAddress) {
        // SAFETY: constructing `NativeTlb` requires ring 0.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }

    fn flush_all(&self) {
        use kernel_registers::{Cr3, LoadRegisterUnsafe, StoreRegisterUnsafe};
        // SAFETY: writing back the current CR3 keeps the active tables.
        unsafe {
            Cr3::load_unsafe().store_unsafe();
        }
    }
}

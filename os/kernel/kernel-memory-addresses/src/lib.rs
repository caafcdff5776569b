//! # Physical and Virtual Address Types
//!
//! Zero-cost wrappers that keep physical and virtual addresses apart at the
//! type level, plus page-granular views over both.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address translated through the page tables. |
//! | [`PhysicalPage<S>`] | The aligned base of a physical frame of size `S`. |
//! | [`VirtualPage<S>`] | The aligned base of a virtual page of size `S`. |
//!
//! ## Page Sizes
//!
//! The three x86-64 page sizes are marker types implementing [`PageSize`]:
//!
//! - [`Size4K`]: 4 KiB pages, the base granularity and the frame size
//! - [`Size2M`]: 2 MiB huge pages
//! - [`Size1G`]: 1 GiB giant pages
//!
//! ## Frame Numbers
//!
//! Frame allocators count 4 KiB frames. A page frame number (PFN) maps to the
//! physical address `pfn * 4096`:
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let frame = PhysicalPage::<Size4K>::from_frame_number(0x1234);
//! assert_eq!(frame.base().as_u64(), 0x0123_4000);
//! assert_eq!(frame.frame_number(), 0x1234);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod virtual_address;

pub use page_size::{PageSize, Size1G, Size2M, Size4K};
pub use physical_address::{PhysicalAddress, PhysicalPage};
pub use virtual_address::{VirtualAddress, VirtualPage};

/// Align `x` down to `a` (`a` must be a power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1234, 0x1000), 0x1000);
/// assert_eq!(align_down(0x2000, 0x1000), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to `a` (`a` must be a power of two).
///
/// Saturates to the highest aligned value instead of wrapping past `u64::MAX`.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x1001, 0x1000), 0x2000);
/// assert_eq!(align_up(0x1000, 0x1000), 0x1000);
/// assert_eq!(align_up(u64::MAX, 0x1000), u64::MAX & !0xFFF);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => v & !(a - 1),
        None => x & !(a - 1),
    }
}

/// Whether `x` is a multiple of `a` (`a` must be a power of two).
///
/// ```rust
/// # use kernel_memory_addresses::is_aligned;
/// assert!(is_aligned(0x20_0000, 0x20_0000));
/// assert!(!is_aligned(0x20_1000, 0x20_0000));
/// ```
#[inline(always)]
#[must_use]
pub const fn is_aligned(x: u64, a: u64) -> bool {
    debug_assert!(a.is_power_of_two());
    x & (a - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_and_offset_split() {
        let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
        let page = va.page::<Size4K>();
        assert_eq!(page.base().as_u64(), 0xFFFF_FFFF_8000_1000);
        assert_eq!(va.offset::<Size4K>(), 0x234);
        assert_eq!(page.base() + va.offset::<Size4K>(), va);

        let pa = PhysicalAddress::new(0x0000_0008_1234_5678);
        let huge = pa.page::<Size2M>();
        assert_eq!(huge.base().as_u64(), 0x0000_0008_1220_0000);
        assert_eq!(pa.offset::<Size2M>(), 0x14_5678);
    }

    #[test]
    fn aligned_constructors_reject_misalignment() {
        assert!(PhysicalPage::<Size2M>::from_aligned(PhysicalAddress::new(0x20_0000)).is_some());
        assert!(PhysicalPage::<Size2M>::from_aligned(PhysicalAddress::new(0x20_1000)).is_none());
        assert!(VirtualPage::<Size1G>::from_aligned(VirtualAddress::new(0x4000_0000)).is_some());
        assert!(VirtualPage::<Size1G>::from_aligned(VirtualAddress::new(0x4020_0000)).is_none());
    }

    #[test]
    fn page_stepping() {
        let frame = PhysicalPage::<Size4K>::from_frame_number(7);
        assert_eq!(frame.add_pages(3).frame_number(), 10);
        let page = VirtualPage::<Size4K>::containing_address(VirtualAddress::new(0xABCD_0123));
        assert_eq!(page.add_pages(1).base().as_u64(), 0xABCD_1000);
    }

    #[test]
    fn address_difference() {
        let a = VirtualAddress::new(0x5000);
        let b = VirtualAddress::new(0x3000);
        assert_eq!(a - b, 0x2000);
        assert_eq!(a.checked_sub(b), Some(0x2000));
        assert_eq!(b.checked_sub(a), None);
    }
}

//! # Memory Layout

/// End of userspace VA range after which Kernel space begins.
pub const LAST_USERSPACE_ADDRESS: u64 = 0xffff_0000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything mapped at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the kernel image is placed in *physical* memory (LMA).
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Size of one physical frame and of the smallest page.
pub const PAGE_SIZE: u64 = 4096;

/// Page tables preallocated for the bootstrap memory manager.
///
/// Table 0 is always the top-level (PML4) table; running out is fatal at boot.
pub const BOOT_PAGE_TABLES: usize = 100;

/// Free physical memory intervals the bootstrap memory manager can track.
pub const BOOT_FREE_REGIONS: usize = 1000;

const _: () = {
    assert!(HHDM_BASE >= LAST_USERSPACE_ADDRESS);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(BOOT_PAGE_TABLES >= 4, "a single 4K mapping needs a full table chain");
    assert!(BOOT_FREE_REGIONS > 0);
};

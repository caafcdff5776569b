//! # Kernel Memory Configuration and Boot Memory Map
//!
//! The authoritative source for the memory-management layout constants and the
//! shape of the firmware memory map handed to the kernel.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Virtual address space layout and the fixed capacities of the bootstrap
//! memory manager:
//! * **Higher Half Direct Mapping**: the offset at which all physical memory is
//!   visible once the kernel page tables are live
//! * **Bootstrap Capacities**: number of preallocated page tables and of free
//!   memory intervals tracked before the frame allocator exists
//!
//! ### Memory Map ([`memory_map`])
//! The boot protocol's list of `{address, length, type}` entries. Only entries
//! of kind [`MemoryRegionKind::Available`](memory_map::MemoryRegionKind::Available)
//! may ever be handed out by an allocator.
//!
//! ### Hand-off ([`handoff`])
//! The free physical memory and the top-level page table the bootstrap memory
//! manager passes to the kernel-phase allocators, exactly once.
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │           User Space            │
//! LAST_USERSPACE_ADDRESS├─────────────────────────────────┤ 0xffff_0000_0000_0000
//!                       │          Guard Region           │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod handoff;
pub mod memory;
pub mod memory_map;

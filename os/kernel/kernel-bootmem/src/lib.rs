//! # Bootstrap Memory Manager
//!
//! The memory manager used while the loader runs, before any general-purpose
//! allocator exists. It is self-contained:
//!
//! - a fixed pool of page tables, handed out bump-style (table 0 is the PML4),
//! - a fixed array of free physical intervals, kept sorted by **descending**
//!   address so low memory, which legacy devices like to claim, is used last.
//!
//! ## Typical Flow
//!
//! ```text
//!  firmware memory map ──► add_memory_map ──► mark_not_free (loader, kernel
//!                                             image, boot info, ACPI, ...)
//!                                                 │
//!            map_virtual_range / map_physical_range ◄┘
//!                                                 │
//!                       handoff() ──► BitmapFrameAllocator (kernel phase)
//! ```
//!
//! Every reservation must go through [`mark_not_free`](BootstrapMemoryManager::mark_not_free)
//! before the first allocation; the manager cannot take memory back once it
//! handed it out.
//!
//! ## Failure Policy
//!
//! There is nothing to fall back to this early: exhausting the table pool, the
//! interval array or free memory is a fatal configuration error and panics.
//!
//! ## Addressing
//!
//! The manager runs with physical memory identity-mapped, so the physical
//! address of a pool table is its own address. The manager must therefore
//! live at a fixed location (typically a `static`) once tables are in use.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod manager;
mod mapping;

pub use crate::manager::BootstrapMemoryManager;
pub use kernel_info::handoff::{BootHandoff, FreeMemoryRegion};

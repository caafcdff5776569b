//! # Typed `X86_64` Control Registers
//!
//! Only the paging control register is modeled here. Reading and writing the
//! hardware register requires the `asm` feature; the bit layout is usable
//! (and testable) without it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cr3;

pub use cr3::Cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The register access is privileged and requires kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The register access is privileged and requires kernel mode (Ring 0).
    /// Writing a paging register changes the active translation for every
    /// subsequent memory access; the caller must ensure the new tables map the
    /// currently executing code and stack.
    unsafe fn store_unsafe(self);
}

//! # Demand Paging
//!
//! Resolves `#PF` exceptions against the areas of an address space:
//!
//! ```text
//!  fault(address, error code)
//!      │
//!      ├─ no area contains address ─────────────► NoArea
//!      ├─ access not allowed by area flags ─────► ProtectionViolation
//!      ├─ user access to a kernel area ─────────► ProtectionViolation
//!      ├─ page present / reserved bit / PK / SS ► ProtectionViolation
//!      ├─ page already in the tables ───────────► AlreadyMapped (flush)
//!      ├─ Anonymous ─► allocate (zero) frame, map ─► MappedAnonymous
//!      └─ DirectMapping ─► map start + offset ───► MappedDirect
//! ```
//!
//! Copy-on-write and swapping do not exist, so a fault on a present page is
//! never resolvable.
//!
//! Leaf permissions come from the area alone. Which mode touched a page first
//! does not matter: a kernel access to a [`AreaFlags::USER`] area installs a
//! user page, and a user access to any other area is refused.

use crate::{AddressSpace, AreaFlags, AreaKind, VirtualMemoryArea, VirtualMemoryManager};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{FrameAlloc, FrameDealloc, MapError, PhysMapper, Tlb};
use log::{error, trace};

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §4.7 "Page-Fault Exceptions".
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultErrorCode {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(8)]
    __: u8,

    /// 1 = SGX access-control violation.
    pub sgx: bool, // bit 15

    #[bits(48)]
    __: u64,
}

impl PageFaultErrorCode {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if self.protection_key() {
            "Protection-key violation"
        } else if self.shadow_stack() {
            "Shadow stack access violation"
        } else if self.sgx() {
            "SGX access-control violation"
        } else if !self.present() {
            "Non-present page (page not mapped or swapped out)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page (likely NX or SMEP)"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// What the CPU reported: CR2 and the pushed error code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageFault {
    pub address: VirtualAddress,
    pub error: PageFaultErrorCode,
}

impl PageFault {
    #[must_use]
    pub const fn new(address: VirtualAddress, error: PageFaultErrorCode) -> Self {
        Self { address, error }
    }

    /// Decode the raw values delivered by the exception stub.
    #[must_use]
    pub const fn from_raw(cr2: u64, error_code: u64) -> Self {
        Self::new(VirtualAddress::new(cr2), PageFaultErrorCode::from_bits(error_code))
    }

    /// A supervisor read of a non-present page.
    #[must_use]
    pub const fn read(address: VirtualAddress) -> Self {
        Self::new(address, PageFaultErrorCode::new())
    }

    /// A supervisor write to a non-present page.
    #[must_use]
    pub const fn write(address: VirtualAddress) -> Self {
        Self::new(address, PageFaultErrorCode::new().with_write(true))
    }

    /// A supervisor instruction fetch from a non-present page.
    #[must_use]
    pub const fn fetch(address: VirtualAddress) -> Self {
        Self::new(address, PageFaultErrorCode::new().with_instruction_fetch(true))
    }

    #[must_use]
    pub const fn in_user_mode(mut self) -> Self {
        self.error = self.error.with_user(true);
        self
    }

    /// The area flag the faulting access needs.
    #[must_use]
    pub const fn required_access(&self) -> AreaFlags {
        if self.error.write() {
            AreaFlags::WRITABLE
        } else if self.error.instruction_fetch() {
            AreaFlags::EXECUTABLE
        } else {
            AreaFlags::READABLE
        }
    }
}

/// How a fault was resolved; the faulting instruction can be restarted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultResolution {
    /// A fresh frame now backs the page.
    MappedAnonymous(PhysicalPage<Size4K>),
    /// The page now maps its fixed physical address.
    MappedDirect(PhysicalAddress),
    /// Another path installed the page already; the stale translation was
    /// flushed.
    AlreadyMapped,
}

/// Faults that cannot be resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("page fault at {0}, outside of any area")]
    NoArea(VirtualAddress),
    #[error("protection violation at {address}: {reason}")]
    ProtectionViolation { address: VirtualAddress, reason: &'static str },
    #[error("out of memory resolving a page fault at {0}")]
    OutOfMemory(VirtualAddress),
    #[error("failed to map faulting page: {0}")]
    Map(#[from] MapError),
}

impl<M: PhysMapper, T: Tlb> VirtualMemoryManager<'_, M, T> {
    /// Install the page `fault` needs, if the area containing it allows the access.
    ///
    /// # Errors
    /// See [`FaultError`]. None of them leaves a frame allocated.
    pub fn handle_page_fault<A: FrameAlloc + FrameDealloc>(
        &self,
        space: &AddressSpace,
        pmm: &mut A,
        fault: PageFault,
    ) -> Result<FaultResolution, FaultError> {
        let address = fault.address;
        let area = space.find_area(address).ok_or(FaultError::NoArea(address))?;
        check_access(area, fault)?;

        let page = address.align_down::<Size4K>();
        let map = self.page_map(space);
        if map.lookup(page).is_some() {
            self.tlb().flush_page(page);
            trace!("Fault at {address}: page already mapped");
            return Ok(FaultResolution::AlreadyMapped);
        }

        let flags = area.flags.page_flags();
        match area.kind {
            AreaKind::Anonymous { zero_fill } => {
                let frame = pmm.alloc_4k().ok_or(FaultError::OutOfMemory(address))?;
                if zero_fill {
                    // SAFETY: the manager's mapper reaches every allocated frame.
                    unsafe { self.mapper().zero_frame(frame) };
                }
                if let Err(e) = map.map_one::<A, Size4K>(pmm, page, frame.base(), flags) {
                    pmm.free_4k(frame);
                    return Err(e.into());
                }
                trace!("Fault at {address}: mapped fresh frame {frame}");
                Ok(FaultResolution::MappedAnonymous(frame))
            }
            AreaKind::DirectMapping { .. } => {
                let pa = area
                    .direct_address(page)
                    .ok_or(FaultError::NoArea(address))?;
                map.map_one::<A, Size4K>(pmm, page, pa, flags)?;
                trace!("Fault at {address}: mapped {pa}");
                Ok(FaultResolution::MappedDirect(pa))
            }
        }
    }

    /// [`handle_page_fault`](Self::handle_page_fault) for the exception path,
    /// where an unresolved fault cannot be returned to anyone.
    ///
    /// # Panics
    /// If the fault cannot be resolved.
    pub fn handle_page_fault_or_panic<A: FrameAlloc + FrameDealloc>(
        &self,
        space: &AddressSpace,
        pmm: &mut A,
        fault: PageFault,
    ) -> FaultResolution {
        match self.handle_page_fault(space, pmm, fault) {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(
                    "PAGE FAULT: cr2={} err={:#x} ({})",
                    fault.address,
                    fault.error.into_bits(),
                    fault.error.explain()
                );
                if let Some(area) = space.find_area(fault.address) {
                    error!("in area {area:?}");
                }
                panic!("unhandled page fault: {e}");
            }
        }
    }
}

fn check_access(area: &VirtualMemoryArea, fault: PageFault) -> Result<(), FaultError> {
    let error = fault.error;
    let violation = |reason| FaultError::ProtectionViolation {
        address: fault.address,
        reason,
    };

    if error.reserved_bit() || error.protection_key() || error.shadow_stack() || error.sgx() {
        return Err(violation(error.explain()));
    }
    if !area.flags.contains(fault.required_access()) {
        return Err(violation(if error.write() {
            "write to an area that is not writable"
        } else if error.instruction_fetch() {
            "instruction fetch from an area that is not executable"
        } else {
            "read from an area that is not readable"
        }));
    }
    if error.user() && !area.flags.contains(AreaFlags::USER) {
        return Err(violation("user-mode access to a kernel area"));
    }
    if error.present() {
        return Err(violation(error.explain()));
    }
    Ok(())
}

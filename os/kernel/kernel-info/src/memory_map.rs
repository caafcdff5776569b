//! # Boot Memory Map
//!
//! Entries as reported by the boot protocol. Type codes follow Multiboot2.

use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// Kind of a physical memory region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Usable RAM.
    Available,
    Reserved,
    /// ACPI tables; usable once the tables were consumed.
    AcpiReclaimable,
    /// ACPI non-volatile storage; must be preserved across sleep states.
    AcpiNvs,
    /// Defective RAM.
    BadMemory,
    /// A type code this kernel does not know; treated as reserved.
    Unknown(u32),
}

impl MemoryRegionKind {
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Available => 1,
            Self::Reserved => 2,
            Self::AcpiReclaimable => 3,
            Self::AcpiNvs => 4,
            Self::BadMemory => 5,
            Self::Unknown(other) => other,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// One `{address, length, type}` entry of the firmware memory map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub address: PhysicalAddress,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryMapEntry {
    #[must_use]
    pub const fn new(address: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self {
            address: PhysicalAddress::new(address),
            length,
            kind,
        }
    }

    /// Exclusive end address, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.address.as_u64().saturating_add(self.length))
    }
}

impl fmt::Display for MemoryMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {}) {:>10} KiB {:?}",
            self.address,
            self.end(),
            self.length / 1024,
            self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes() {
        assert_eq!(MemoryRegionKind::from_code(1), MemoryRegionKind::Available);
        assert_eq!(MemoryRegionKind::from_code(5), MemoryRegionKind::BadMemory);
        assert_eq!(MemoryRegionKind::from_code(9), MemoryRegionKind::Unknown(9));
        assert_eq!(MemoryRegionKind::Unknown(9).code(), 9);
        assert!(!MemoryRegionKind::AcpiReclaimable.is_available());
    }

    #[test]
    fn end_saturates() {
        let e = MemoryMapEntry::new(u64::MAX - 10, 100, MemoryRegionKind::Reserved);
        assert_eq!(e.end().as_u64(), u64::MAX);
    }
}

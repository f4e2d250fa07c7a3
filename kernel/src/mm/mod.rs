//! Memory management: physical frames, paging, kernel heap.
//!
//! Submodules:
//! - [`bootloader`] -- Multiboot 1 boot information (memory map, modules).
//! - [`frame_allocator`] -- bitmap allocator over 4 KiB physical frames.
//! - [`page_table`] -- i386 page directory/table entries and the recursive
//!   mapping windows.
//! - [`vmm`] -- map/unmap/translate operations on the live address space.
//! - [`page_fault`] -- #PF decoding and the fatal fault report.
//! - [`heap`] -- the kernel chunk heap.

pub mod bootloader;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod vmm;

pub use frame_allocator::{FrameBitmap, FRAME_SIZE};

/// Size of a page/frame (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of 4 KiB frames in the 32-bit physical address space.
pub const MAX_FRAMES: usize = 1 << 20;

/// Physical frames below this address are never handed out (BIOS data,
/// real-mode IVT, the AP trampoline).
pub const LOW_MEMORY_LIMIT: u64 = 0x10_0000;

// ---------------------------------------------------------------------------
// Address newtypes
// ---------------------------------------------------------------------------

/// Physical memory address (32-bit address space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Round down to the containing frame boundary.
    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    /// Offset within the containing frame.
    pub const fn frame_offset(self) -> u32 {
        self.0 & (PAGE_SIZE as u32 - 1)
    }

    pub const fn frame(self) -> FrameNumber {
        FrameNumber(self.0 / PAGE_SIZE as u32)
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u32);

impl VirtualAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    pub const fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE as u32 - 1)
    }

    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

/// Physical frame number (address divided by [`PAGE_SIZE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(pub u32);

impl FrameNumber {
    pub const fn new(num: u32) -> Self {
        Self(num)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn base_addr(self) -> PhysicalAddress {
        PhysicalAddress(self.0 * PAGE_SIZE as u32)
    }
}

// ---------------------------------------------------------------------------
// Memory regions
// ---------------------------------------------------------------------------

/// Classification of a bootloader-reported memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// Usable RAM.
    Available,
    /// Firmware-reserved.
    Reserved,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    Nvs,
    /// Defective RAM reported by the firmware.
    BadMemory,
    /// A type code this kernel does not know.
    Unknown(u32),
}

impl MemoryRegionKind {
    /// Map a Multiboot `mmap` type code.
    pub fn from_multiboot(code: u32) -> Self {
        match code {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::Nvs,
            5 => Self::BadMemory,
            other => Self::Unknown(other),
        }
    }
}

/// One bootloader-reported physical memory region.
///
/// Addresses are 64-bit because the Multiboot map can describe memory above
/// 4 GiB even on a 32-bit kernel; the frame allocator clips to its bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self { base, length, kind }
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    pub fn is_available(&self) -> bool {
        self.kind == MemoryRegionKind::Available
    }
}

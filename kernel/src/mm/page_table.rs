//! i386 page directory and page table entries.
//!
//! Both levels use the same 4-byte entry layout: a 20-bit frame number plus
//! twelve flag bits. The kernel page directory is recursively mapped --
//! its last slot points at itself -- which makes every paging structure
//! addressable through two fixed virtual windows:
//!
//! - [`PDE_BASE`] (`0xFFFFF000`): the page directory itself, seen as the
//!   last page of the last 4 MiB region.
//! - [`PT_BASE`] (`0xFFC00000`): a 4 MiB window whose 1024 pages are the
//!   1024 page tables.
//!
//! The window address of the entry covering any virtual address is plain
//! arithmetic ([`pde_window`], [`pte_window`]); editing mappings is then an
//! ordinary memory write followed by a TLB flush.

use bitflags::bitflags;

use super::{PhysicalAddress, VirtualAddress};

/// Entries per page directory / page table.
pub const TABLE_ENTRIES: usize = 1024;

/// Page directory slot used for the recursive mapping.
pub const RECURSIVE_SLOT: usize = 1023;

/// Virtual address of the page directory through the recursive mapping.
pub const PDE_BASE: u32 = 0xFFFF_F000;

/// Base of the 4 MiB page-table window.
pub const PT_BASE: u32 = 0xFFC0_0000;

bitflags! {
    /// Flag bits shared by PDEs and PTEs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT        = 1 << 0;
        const WRITABLE       = 1 << 1;
        const USER           = 1 << 2;
        const WRITE_THROUGH  = 1 << 3;
        const CACHE_DISABLED = 1 << 4;
        const ACCESSED       = 1 << 5;
        const DIRTY          = 1 << 6;
        const HUGE_PAGE      = 1 << 7;
    }
}

/// A page directory or page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    const ADDRESS_MASK: u32 = 0xFFFF_F000;
    const FLAGS_MASK: u32 = 0x0000_0FFF;

    /// An empty (not-present) entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build an entry from a frame base address and flags.
    pub const fn new(addr: PhysicalAddress, flags: EntryFlags) -> Self {
        Self((addr.as_u32() & Self::ADDRESS_MASK) | flags.bits())
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    /// Physical base address of the mapped frame.
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & Self::ADDRESS_MASK)
    }

    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    pub fn set(&mut self, addr: PhysicalAddress, flags: EntryFlags) {
        self.0 = (addr.as_u32() & Self::ADDRESS_MASK) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

// ---------------------------------------------------------------------------
// Index and window arithmetic
// ---------------------------------------------------------------------------

/// Page-directory index of a virtual address (bits 31:22).
pub const fn pd_index(virt: VirtualAddress) -> usize {
    ((virt.as_u32() >> 22) & 0x3FF) as usize
}

/// Page-table index of a virtual address (bits 21:12).
pub const fn pt_index(virt: VirtualAddress) -> usize {
    ((virt.as_u32() >> 12) & 0x3FF) as usize
}

/// Virtual address of the PDE covering `virt`, via the recursive window.
pub const fn pde_window(virt: VirtualAddress) -> u32 {
    PDE_BASE + (pd_index(virt) * core::mem::size_of::<Entry>()) as u32
}

/// Virtual address of the PTE covering `virt`, via the recursive window.
pub const fn pte_window(virt: VirtualAddress) -> u32 {
    PT_BASE + ((pd_index(virt) as u32) << 12) + (pt_index(virt) * core::mem::size_of::<Entry>()) as u32
}

/// Virtual address of the whole page table covering `virt`.
pub const fn pt_window_base(virt: VirtualAddress) -> u32 {
    PT_BASE + ((pd_index(virt) as u32) << 12)
}

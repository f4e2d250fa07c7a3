//! ACPI table discovery.
//!
//! Just enough ACPI for interrupt-controller setup: find the RSDP in the
//! BIOS window, follow it to the RSDT/XSDT, and locate the MADT for
//! [`madt`] to parse. No AML, no namespace, no runtime methods.
//!
//! Checksums and header parsing work on byte slices; only the RSDP scan
//! and the table mapping touch physical memory, and only on bare metal.

pub mod madt;

use crate::sync::GlobalState;

/// Byte-sum checksum: every ACPI structure must sum to zero mod 256.
pub fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b)) == 0
}

/// Standard header at the start of every ACPI system description table.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

/// Size of [`SdtHeader`] (the ACPI-defined 36 bytes).
pub const SDT_HEADER_LEN: usize = 36;

/// Parsed RSDP essentials.
#[derive(Debug, Clone, Copy)]
pub struct RootPointer {
    /// ACPI revision (0 = 1.0, 2+ = 2.0 with XSDT).
    pub revision: u8,
    /// Physical address of the RSDT (revision 0) or XSDT.
    pub sdt_address: u32,
}

static ROOT: GlobalState<RootPointer> = GlobalState::new();

/// RSDP signature at the start of the structure.
pub const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";

/// MADT signature in the RSDT entry list.
pub const MADT_SIGNATURE: &[u8; 4] = b"APIC";

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod scan {
    use super::*;
    use crate::mm::page_table::EntryFlags;
    use crate::mm::{vmm, PhysicalAddress, VirtualAddress, PAGE_SIZE};

    /// BIOS read-only area the RSDP must live in.
    const BIOS_WINDOW_START: u32 = 0x000E_0000;
    const BIOS_WINDOW_END: u32 = 0x0010_0000;

    /// RSDP layouts (ACPI 1.0 and the 2.0 extension).
    #[repr(C, packed)]
    struct Rsdp {
        signature: [u8; 8],
        checksum: u8,
        oem_id: [u8; 6],
        revision: u8,
        rsdt_address: u32,
    }

    #[repr(C, packed)]
    struct Rsdp2 {
        base: Rsdp,
        length: u32,
        xsdt_address: u64,
        extended_checksum: u8,
        _reserved: [u8; 3],
    }

    /// Scan the BIOS window for the RSDP and record the root table.
    pub(super) fn find_root() -> Option<RootPointer> {
        let mut at = BIOS_WINDOW_START;
        while at < BIOS_WINDOW_END {
            // SAFETY: The BIOS window is inside the identity-mapped first
            // 4 MiB and is plain readable memory.
            let candidate = unsafe {
                core::slice::from_raw_parts(at as *const u8, core::mem::size_of::<Rsdp>())
            };
            if candidate[..8] == *RSDP_SIGNATURE {
                // SAFETY: Signature matched at a 16-byte-aligned candidate
                // inside the window; the struct reads stay within it.
                let rsdp = unsafe { &*(at as *const Rsdp) };
                let len = if rsdp.revision == 0 {
                    core::mem::size_of::<Rsdp>()
                } else {
                    core::mem::size_of::<Rsdp2>()
                };
                // SAFETY: As above, bounded by the RSDP length.
                let all = unsafe { core::slice::from_raw_parts(at as *const u8, len) };
                if !checksum_ok(&all[..core::mem::size_of::<Rsdp>()]) {
                    log::warn!("RSDP at {at:#x} has a bad checksum");
                    at += 16;
                    continue;
                }

                let sdt_address = if rsdp.revision == 0 {
                    rsdp.rsdt_address
                } else {
                    // SAFETY: Revision 2+ guarantees the extended layout.
                    let ext = unsafe { &*(at as *const Rsdp2) };
                    ext.xsdt_address as u32
                };
                return Some(RootPointer {
                    revision: rsdp.revision,
                    sdt_address,
                });
            }
            at += 16;
        }
        None
    }

    /// Identity-map a physical table so it can be walked, then return its
    /// full byte slice (header plus payload).
    pub(super) fn map_table(phys: u32) -> Option<&'static [u8]> {
        let page = PhysicalAddress::new(phys).align_down();
        vmm::map_page(
            VirtualAddress::new(page.as_u32()),
            page,
            EntryFlags::PRESENT | EntryFlags::WRITABLE,
        );

        // SAFETY: The header page was just identity-mapped.
        let header = unsafe { &*(phys as *const SdtHeader) };
        let length = header.length as usize;
        if length < SDT_HEADER_LEN {
            return None;
        }

        // Map the pages the body spills into.
        let first = page.as_u32();
        let last = (phys + length as u32 - 1) & !(PAGE_SIZE as u32 - 1);
        let mut at = first;
        while at < last {
            at += PAGE_SIZE as u32;
            vmm::map_page(
                VirtualAddress::new(at),
                PhysicalAddress::new(at),
                EntryFlags::PRESENT | EntryFlags::WRITABLE,
            );
        }

        // SAFETY: phys..phys+length is now mapped and belongs to the
        // firmware table, which the kernel never mutates.
        Some(unsafe { core::slice::from_raw_parts(phys as *const u8, length) })
    }

    /// Walk the root table's entry list for a table with `signature`.
    pub(super) fn find_table(root: RootPointer, signature: &[u8; 4]) -> Option<&'static [u8]> {
        let root_bytes = map_table(root.sdt_address)?;
        if !checksum_ok(root_bytes) {
            log::warn!("root SDT has a bad checksum");
            return None;
        }

        let entry_width = if root.revision >= 2 { 8 } else { 4 };
        let entries = &root_bytes[SDT_HEADER_LEN..];

        for chunk in entries.chunks_exact(entry_width) {
            let phys = u32::from_le_bytes(chunk[..4].try_into().unwrap());
            if phys == 0 {
                continue;
            }
            let table = map_table(phys)?;
            if table[..4] == *signature && checksum_ok(table) {
                return Some(table);
            }
        }
        None
    }
}

/// Locate the RSDP and remember the root table. Logs and returns quietly
/// when the firmware offers no ACPI.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn init() {
    match scan::find_root() {
        Some(root) => {
            log::info!(
                "ACPI revision {}, root SDT at {:#010x}",
                root.revision,
                root.sdt_address
            );
            ROOT.init(root).ok();
        }
        None => log::warn!("no RSDP found, running without ACPI"),
    }
}

/// Find and parse the MADT. `None` when ACPI or the table is absent.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn find_madt() -> Option<madt::MadtInfo> {
    let root = ROOT.with(|r| *r)?;
    let bytes = scan::find_table(root, MADT_SIGNATURE)?;
    madt::parse(bytes)
}

/// Whether ACPI discovery succeeded.
pub fn has_acpi() -> bool {
    ROOT.is_initialized()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_balanced_bytes() {
        assert!(checksum_ok(&[]));
        assert!(checksum_ok(&[0, 0, 0]));
        assert!(checksum_ok(&[1, 255]));
        assert!(checksum_ok(&[0x80, 0x80]));
        assert!(!checksum_ok(&[1]));
        assert!(!checksum_ok(&[0xFF]));
    }

    #[test]
    fn sdt_header_is_36_bytes() {
        assert_eq!(core::mem::size_of::<SdtHeader>(), SDT_HEADER_LEN);
    }
}

//! MADT (Multiple APIC Description Table) parsing.
//!
//! The MADT is the fixed SDT header, the local APIC address and flags, and
//! then a run of variable-length entries. The parser collects the entry
//! kinds the interrupt-controller setup needs: local APICs (one per CPU),
//! I/O APICs, interrupt source overrides, NMI sources and local-APIC NMI
//! line configurations, plus the optional 64-bit local APIC address
//! override.
//!
//! Everything here operates on byte slices; `acpi::find_madt` feeds it the
//! mapped table on bare metal and the tests feed it synthetic ones.
//!
//! The redirection-entry encoding used to program I/O APICs from parsed
//! overrides also lives here so the bit layout sits next to the flag
//! definitions it consumes.

#[cfg(feature = "alloc")]
extern crate alloc;

use alloc::vec::Vec;

use super::SDT_HEADER_LEN;

/// Default local APIC MMIO base when firmware doesn't say otherwise.
pub const DEFAULT_LAPIC_ADDRESS: u32 = 0xFEE0_0000;

/// Vector the first IRQ line maps to.
pub const IRQ_VECTOR_BASE: u8 = 32;

// MADT entry type codes.
const ENTRY_LOCAL_APIC: u8 = 0;
const ENTRY_IO_APIC: u8 = 1;
const ENTRY_IRQ_OVERRIDE: u8 = 2;
const ENTRY_NMI_SOURCE: u8 = 3;
const ENTRY_LOCAL_APIC_NMI: u8 = 4;
const ENTRY_LAPIC_ADDR_OVERRIDE: u8 = 5;

/// A processor's local APIC (MADT type 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalApicEntry {
    pub acpi_processor_id: u8,
    pub apic_id: u8,
    pub flags: u32,
}

impl LocalApicEntry {
    /// Enabled, or at least online-capable.
    pub fn is_usable(&self) -> bool {
        self.flags & 0b11 != 0
    }
}

/// An I/O APIC (MADT type 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoApicEntry {
    pub id: u8,
    /// MMIO base of the IOREGSEL/IOWIN pair.
    pub address: u32,
    /// First GSI this I/O APIC serves.
    pub gsi_base: u32,
}

/// An interrupt source override (MADT type 2): ISA IRQ -> GSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqOverride {
    pub bus: u8,
    pub irq_source: u8,
    pub gsi: u32,
    pub flags: u16,
}

/// A non-maskable interrupt source (MADT type 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmiSource {
    pub nmi_source: u8,
    pub flags: u32,
    pub gsi: u32,
}

/// A local APIC NMI line configuration (MADT type 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalApicNmi {
    pub acpi_processor_id: u8,
    pub flags: u16,
    pub lint: u8,
}

/// Everything the interrupt-controller setup needs from the MADT.
#[derive(Debug, Clone, Default)]
pub struct MadtInfo {
    pub local_apic_address: u32,
    pub flags: u32,
    pub local_apics: Vec<LocalApicEntry>,
    pub io_apics: Vec<IoApicEntry>,
    pub overrides: Vec<IrqOverride>,
    pub nmi_sources: Vec<NmiSource>,
    pub lint_sources: Vec<LocalApicNmi>,
}

impl MadtInfo {
    /// Usable processors reported by firmware.
    pub fn usable_cpu_count(&self) -> usize {
        self.local_apics.iter().filter(|c| c.is_usable()).count()
    }

    /// The override for `irq`, if the firmware reported one.
    pub fn override_for_irq(&self, irq: u8) -> Option<&IrqOverride> {
        self.overrides.iter().find(|o| o.irq_source == irq)
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Parse a complete MADT (header included).
///
/// Returns `None` for a table too short to carry the MADT fixed part.
/// Unknown entry types are skipped by their declared length; a malformed
/// length ends the walk rather than misparsing the tail.
pub fn parse(bytes: &[u8]) -> Option<MadtInfo> {
    // Fixed part: SDT header + local APIC address + flags.
    if bytes.len() < SDT_HEADER_LEN + 8 {
        return None;
    }

    let declared_len = read_u32(bytes, 4) as usize;
    let len = declared_len.min(bytes.len());

    let mut info = MadtInfo {
        local_apic_address: read_u32(bytes, SDT_HEADER_LEN),
        flags: read_u32(bytes, SDT_HEADER_LEN + 4),
        ..MadtInfo::default()
    };

    let mut at = SDT_HEADER_LEN + 8;
    while at + 2 <= len {
        let entry_type = bytes[at];
        let entry_len = bytes[at + 1] as usize;
        if entry_len < 2 || at + entry_len > len {
            break;
        }
        let entry = &bytes[at..at + entry_len];

        match entry_type {
            ENTRY_LOCAL_APIC if entry_len >= 8 => {
                info.local_apics.push(LocalApicEntry {
                    acpi_processor_id: entry[2],
                    apic_id: entry[3],
                    flags: read_u32(entry, 4),
                });
            }
            ENTRY_IO_APIC if entry_len >= 12 => {
                info.io_apics.push(IoApicEntry {
                    id: entry[2],
                    address: read_u32(entry, 4),
                    gsi_base: read_u32(entry, 8),
                });
            }
            ENTRY_IRQ_OVERRIDE if entry_len >= 10 => {
                info.overrides.push(IrqOverride {
                    bus: entry[2],
                    irq_source: entry[3],
                    gsi: read_u32(entry, 4),
                    flags: read_u16(entry, 8),
                });
            }
            ENTRY_NMI_SOURCE if entry_len >= 12 => {
                info.nmi_sources.push(NmiSource {
                    nmi_source: entry[2],
                    flags: read_u32(entry, 4),
                    gsi: read_u32(entry, 8),
                });
            }
            ENTRY_LOCAL_APIC_NMI if entry_len >= 6 => {
                info.lint_sources.push(LocalApicNmi {
                    acpi_processor_id: entry[2],
                    flags: read_u16(entry, 3),
                    lint: entry[5],
                });
            }
            ENTRY_LAPIC_ADDR_OVERRIDE if entry_len >= 12 => {
                info.local_apic_address = read_u64(entry, 4) as u32;
            }
            other => {
                log::debug!("MADT entry type {other} (len {entry_len}) skipped");
            }
        }

        at += entry_len;
    }

    Some(info)
}

// ---------------------------------------------------------------------------
// I/O APIC redirection encoding
// ---------------------------------------------------------------------------

/// Mask bit of a redirection entry.
pub const REDIRECTION_MASKED: u64 = 1 << 16;

/// Register index of the low dword of the redirection entry for `gsi` on
/// an I/O APIC whose first GSI is `gsi_base`.
pub const fn redirection_register(gsi: u32, gsi_base: u32) -> u32 {
    (gsi - gsi_base) * 2 + 16
}

/// Encode a redirection entry routing a legacy IRQ to the given LAPIC.
///
/// Vector is `irq + 32`. Override flag bit 1 selects active-low polarity
/// (entry bit 13), flag bit 3 selects level trigger (entry bit 15). The
/// destination CPU sits in the top byte.
pub const fn redirection_entry(irq: u8, flags: u16, dest_apic_id: u8) -> u64 {
    let mut entry = (irq as u64) + IRQ_VECTOR_BASE as u64;
    if flags & (1 << 1) != 0 {
        entry |= 1 << 13;
    }
    if flags & (1 << 3) != 0 {
        entry |= 1 << 15;
    }
    entry | ((dest_apic_id as u64) << 56)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    /// Assemble a MADT from entries, fixing up the length field.
    fn build_madt(lapic_addr: u32, flags: u32, entries: &[&[u8]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"APIC");
        bytes.extend_from_slice(&0u32.to_le_bytes()); // length, patched below
        bytes.extend_from_slice(&[1, 0]); // revision, checksum
        bytes.extend_from_slice(b"OEMID ");
        bytes.extend_from_slice(b"OEMTABLE");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(bytes.len(), SDT_HEADER_LEN);

        bytes.extend_from_slice(&lapic_addr.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        for entry in entries {
            bytes.extend_from_slice(entry);
        }

        let len = bytes.len() as u32;
        bytes[4..8].copy_from_slice(&len.to_le_bytes());
        bytes
    }

    fn lapic_entry(proc_id: u8, apic_id: u8, flags: u32) -> Vec<u8> {
        let mut e = alloc::vec![0u8, 8, proc_id, apic_id];
        e.extend_from_slice(&flags.to_le_bytes());
        e
    }

    fn ioapic_entry(id: u8, address: u32, gsi_base: u32) -> Vec<u8> {
        let mut e = alloc::vec![1u8, 12, id, 0];
        e.extend_from_slice(&address.to_le_bytes());
        e.extend_from_slice(&gsi_base.to_le_bytes());
        e
    }

    fn override_entry(bus: u8, irq: u8, gsi: u32, flags: u16) -> Vec<u8> {
        let mut e = alloc::vec![2u8, 10, bus, irq];
        e.extend_from_slice(&gsi.to_le_bytes());
        e.extend_from_slice(&flags.to_le_bytes());
        e
    }

    #[test]
    fn parses_cpus_ioapics_and_overrides() {
        let madt = build_madt(
            DEFAULT_LAPIC_ADDRESS,
            1,
            &[
                &lapic_entry(0, 0, 1),
                &lapic_entry(1, 1, 1),
                &lapic_entry(2, 2, 0), // disabled CPU
                &ioapic_entry(0, 0xFEC0_0000, 0),
                &override_entry(0, 0, 2, 0),
            ],
        );

        let info = parse(&madt).unwrap();
        assert_eq!(info.local_apic_address, DEFAULT_LAPIC_ADDRESS);
        assert_eq!(info.local_apics.len(), 3);
        assert_eq!(info.usable_cpu_count(), 2);
        assert_eq!(info.io_apics.len(), 1);
        assert_eq!(info.io_apics[0].address, 0xFEC0_0000);
        assert_eq!(
            info.override_for_irq(0),
            Some(&IrqOverride {
                bus: 0,
                irq_source: 0,
                gsi: 2,
                flags: 0
            })
        );
        assert!(info.override_for_irq(1).is_none());
    }

    #[test]
    fn lapic_address_override_wins() {
        let mut override_entry = alloc::vec![5u8, 12, 0, 0];
        override_entry.extend_from_slice(&0xFEE0_1000u64.to_le_bytes());

        let madt = build_madt(DEFAULT_LAPIC_ADDRESS, 0, &[&override_entry]);
        let info = parse(&madt).unwrap();
        assert_eq!(info.local_apic_address, 0xFEE0_1000);
    }

    #[test]
    fn truncated_table_is_rejected() {
        assert!(parse(&[0u8; 16]).is_none());
    }

    #[test]
    fn malformed_entry_length_stops_walk() {
        let bad = alloc::vec![0u8, 0]; // type 0, impossible length 0
        let madt = build_madt(DEFAULT_LAPIC_ADDRESS, 0, &[&bad, &lapic_entry(0, 0, 1)]);
        let info = parse(&madt).unwrap();
        // The walk stops at the malformed entry.
        assert!(info.local_apics.is_empty());
    }

    #[test]
    fn legacy_irq0_override_to_gsi2() {
        // The classic PIT override: IRQ 0 arrives on GSI 2.
        let (gsi, gsi_base) = (2u32, 0u32);
        assert_eq!(redirection_register(gsi, gsi_base), 20);

        let entry = redirection_entry(0, 0, 1);
        assert_eq!(entry as u32, 0x0000_0020); // vector 32, edge, active-high
        assert_eq!((entry >> 32) as u32, 1 << 24); // destination APIC 1
    }

    #[test]
    fn redirection_flag_bits() {
        // Active-low (flag bit 1) and level-triggered (flag bit 3).
        let entry = redirection_entry(9, (1 << 1) | (1 << 3), 0);
        assert_eq!(entry & 0xFF, 41); // vector 9 + 32
        assert_ne!(entry & (1 << 13), 0);
        assert_ne!(entry & (1 << 15), 0);

        // No flags: both clear.
        let plain = redirection_entry(9, 0, 0);
        assert_eq!(plain & (1 << 13), 0);
        assert_eq!(plain & (1 << 15), 0);
    }
}

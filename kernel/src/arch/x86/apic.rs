//! Local APIC and I/O APIC.
//!
//! The local APIC is enabled through IA32_APIC_BASE plus the spurious
//! vector register; its MMIO page (and each I/O APIC's) is identity-mapped
//! before first touch. I/O APIC configuration follows the MADT: every GSI
//! starts masked, firmware overrides are programmed first, then the
//! remaining legacy IRQ lines are identity-routed, all with the boot
//! processor as destination.

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::acpi::madt::{
    redirection_entry, redirection_register, IoApicEntry, MadtInfo, REDIRECTION_MASKED,
};
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::EntryFlags;
use crate::mm::{vmm, PhysicalAddress, VirtualAddress};

use super::msr::{rdmsr, wrmsr, IA32_APIC_BASE};

// Local APIC register offsets.
const LAPIC_ID: u32 = 0x020;
const LAPIC_EOI: u32 = 0x0B0;
const LAPIC_SVR: u32 = 0x0F0;
const LAPIC_ESR: u32 = 0x280;
const LAPIC_ICR_LOW: u32 = 0x300;
const LAPIC_ICR_HIGH: u32 = 0x310;

/// IA32_APIC_BASE global enable (bit 11).
const APIC_BASE_ENABLE: u64 = 1 << 11;
/// IA32_APIC_BASE x2APIC mode (bit 10); kept clear, xAPIC MMIO only.
const APIC_BASE_X2APIC: u64 = 1 << 10;

/// SVR software enable plus spurious vector 0xFF.
const SVR_ENABLE_SPURIOUS: u32 = 0x1FF;

/// ICR delivery: INIT, level assert.
const ICR_INIT: u32 = 0x0000_4500;
/// ICR delivery: startup IPI (vector in the low byte).
const ICR_STARTUP: u32 = 0x0000_4600;
/// ICR delivery-status bit: send pending.
const ICR_PENDING: u32 = 1 << 12;

/// Identity-mapped local APIC MMIO base; zero until [`init`].
static LAPIC_BASE: AtomicU32 = AtomicU32::new(0);

fn lapic_read(offset: u32) -> u32 {
    let base = LAPIC_BASE.load(Ordering::Acquire);
    debug_assert_ne!(base, 0);
    // SAFETY: init identity-mapped the LAPIC page; register offsets are
    // architecturally defined and 16-byte aligned.
    unsafe { ptr::read_volatile((base + offset) as *const u32) }
}

fn lapic_write(offset: u32, value: u32) {
    let base = LAPIC_BASE.load(Ordering::Acquire);
    debug_assert_ne!(base, 0);
    // SAFETY: As in lapic_read.
    unsafe { ptr::write_volatile((base + offset) as *mut u32, value) }
}

/// Record and map the local APIC, from the MADT (with its address
/// override applied by the parser).
pub fn init(madt: &MadtInfo) {
    let base = madt.local_apic_address;
    vmm::map_page(
        VirtualAddress::new(base),
        PhysicalAddress::new(base),
        EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::CACHE_DISABLED,
    );
    LAPIC_BASE.store(base, Ordering::Release);
    log::info!("LAPIC at {base:#010x}");
}

/// Whether the local APIC has been set up.
pub fn is_enabled() -> bool {
    LAPIC_BASE.load(Ordering::Acquire) != 0
}

/// Hardware-enable the local APIC and unmask reception.
pub fn enable() -> KernelResult<()> {
    if LAPIC_BASE.load(Ordering::Acquire) == 0 {
        return Err(KernelError::NotInitialized { subsystem: "lapic" });
    }

    // Global enable in xAPIC (not x2APIC) mode, then software enable via
    // the spurious vector register.
    wrmsr(
        IA32_APIC_BASE,
        (rdmsr(IA32_APIC_BASE) | APIC_BASE_ENABLE) & !APIC_BASE_X2APIC,
    );
    lapic_write(LAPIC_SVR, lapic_read(LAPIC_SVR) | SVR_ENABLE_SPURIOUS);
    log::info!("LAPIC enabled, id {}", lapic_id());
    Ok(())
}

/// Acknowledge the in-service interrupt. No-op before [`init`] so early
/// dispatches (PIC-only phase) stay harmless.
pub fn eoi() {
    if LAPIC_BASE.load(Ordering::Acquire) != 0 {
        lapic_write(LAPIC_EOI, 0);
    }
}

/// This core's local APIC id.
pub fn lapic_id() -> u8 {
    (lapic_read(LAPIC_ID) >> 24) as u8
}

fn wait_for_delivery() {
    while lapic_read(LAPIC_ICR_LOW) & ICR_PENDING != 0 {
        super::pause();
    }
}

/// Send an INIT IPI to another core.
pub fn send_init_ipi(apic_id: u8) {
    lapic_write(LAPIC_ESR, 0);
    lapic_write(LAPIC_ICR_HIGH, (apic_id as u32) << 24);
    lapic_write(LAPIC_ICR_LOW, ICR_INIT);
    wait_for_delivery();
}

/// Send a startup IPI; the target begins real-mode execution at
/// `vector << 12`.
pub fn send_startup_ipi(apic_id: u8, vector: u8) {
    lapic_write(LAPIC_ESR, 0);
    lapic_write(LAPIC_ICR_HIGH, (apic_id as u32) << 24);
    lapic_write(LAPIC_ICR_LOW, ICR_STARTUP | vector as u32);
    wait_for_delivery();
}

// ---------------------------------------------------------------------------
// I/O APIC
// ---------------------------------------------------------------------------

const IOREGSEL: u32 = 0x00;
const IOWIN: u32 = 0x10;
const IOAPIC_REG_VERSION: u32 = 0x01;

/// Indirect register access on one I/O APIC.
struct IoApic {
    base: u32,
}

impl IoApic {
    fn new(entry: &IoApicEntry) -> Self {
        vmm::map_page(
            VirtualAddress::new(entry.address),
            PhysicalAddress::new(entry.address),
            EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::CACHE_DISABLED,
        );
        Self {
            base: entry.address,
        }
    }

    fn read(&self, reg: u32) -> u32 {
        // SAFETY: The MMIO page was identity-mapped in new(); IOREGSEL
        // then IOWIN is the defined indirection protocol.
        unsafe {
            ptr::write_volatile((self.base + IOREGSEL) as *mut u32, reg);
            ptr::read_volatile((self.base + IOWIN) as *const u32)
        }
    }

    fn write(&self, reg: u32, value: u32) {
        // SAFETY: As in read().
        unsafe {
            ptr::write_volatile((self.base + IOREGSEL) as *mut u32, reg);
            ptr::write_volatile((self.base + IOWIN) as *mut u32, value);
        }
    }

    /// Number of redirection entries this I/O APIC implements.
    fn redirection_count(&self) -> u32 {
        ((self.read(IOAPIC_REG_VERSION) >> 16) & 0xFF) + 1
    }

    /// 64-bit redirection entries are written low dword first.
    fn write_redirection(&self, gsi: u32, gsi_base: u32, entry: u64) {
        let reg = redirection_register(gsi, gsi_base);
        self.write(reg, entry as u32);
        self.write(reg + 1, (entry >> 32) as u32);
    }

    fn read_redirection(&self, gsi: u32, gsi_base: u32) -> u64 {
        let reg = redirection_register(gsi, gsi_base);
        let low = self.read(reg) as u64;
        let high = self.read(reg + 1) as u64;
        low | (high << 32)
    }

    fn mask_gsi(&self, gsi: u32, gsi_base: u32) {
        let current = self.read_redirection(gsi, gsi_base);
        self.write_redirection(gsi, gsi_base, current | REDIRECTION_MASKED);
    }
}

/// Program every I/O APIC from the MADT.
///
/// All GSIs are masked first. Firmware overrides route their ISA IRQ to
/// the reported GSI with the reported polarity and trigger; legacy IRQ
/// lines with neither an override nor an override claiming their GSI are
/// identity-routed. Every entry targets the boot processor.
pub fn configure(madt: &MadtInfo) {
    let bsp = lapic_id();
    let mut irq_routed = [false; 16];
    let mut gsi_taken = [false; 16];

    for entry in &madt.io_apics {
        let ioapic = IoApic::new(entry);
        let count = ioapic.redirection_count();
        let gsi_end = entry.gsi_base + count;

        for gsi in entry.gsi_base..gsi_end {
            ioapic.mask_gsi(gsi, entry.gsi_base);
        }
        log::info!(
            "IOAPIC {} at {:#010x}: GSIs {}..{} masked",
            entry.id,
            entry.address,
            entry.gsi_base,
            gsi_end
        );

        for redirect in &madt.overrides {
            if redirect.gsi < entry.gsi_base || redirect.gsi >= gsi_end {
                continue;
            }
            let irq = redirect.irq_source;
            if (irq as usize) < 16 && irq_routed[irq as usize] {
                continue;
            }

            ioapic.write_redirection(
                redirect.gsi,
                entry.gsi_base,
                redirection_entry(irq, redirect.flags, bsp),
            );
            if (irq as usize) < 16 {
                irq_routed[irq as usize] = true;
            }
            if redirect.gsi < 16 {
                gsi_taken[redirect.gsi as usize] = true;
            }
            log::info!("IRQ {irq} -> GSI {} (override)", redirect.gsi);
        }
    }

    // Identity-route the untouched legacy lines.
    for irq in 0u8..16 {
        if irq_routed[irq as usize] || gsi_taken[irq as usize] {
            continue;
        }
        let gsi = irq as u32;
        let Some(entry) = madt
            .io_apics
            .iter()
            .find(|e| gsi >= e.gsi_base && gsi < e.gsi_base + 24)
        else {
            continue;
        };

        let ioapic = IoApic::new(entry);
        if gsi >= entry.gsi_base + ioapic.redirection_count() {
            continue;
        }
        ioapic.write_redirection(gsi, entry.gsi_base, redirection_entry(irq, 0, bsp));
        log::info!("IRQ {irq} -> GSI {gsi}");
    }
}

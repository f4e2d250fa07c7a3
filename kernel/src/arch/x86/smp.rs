//! Application-processor bring-up.
//!
//! For every usable non-BSP local APIC in the MADT: allocate a kernel
//! stack, publish it (with the shared GDT/IDT pointers and the kernel
//! page directory) into the trampoline mailbox, then run the INIT /
//! startup-IPI dance with PIT-timed delays, retrying up to three times
//! until the AP checks in. APs end parked in a pause loop; the scheduler
//! stays on the boot processor.

#[cfg(feature = "alloc")]
extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::{apic, gdt, idt, DescriptorPointer};
use crate::acpi::madt::MadtInfo;
use crate::error::{KernelError, KernelResult};

/// Startup-IPI vector: real-mode entry at 0x8000.
const AP_STARTUP_VECTOR: u8 = 0x08;

/// PIT ticks to wait after each IPI (about 10 ms at the 1 kHz default,
/// doubled for slow parts).
const IPI_DELAY_TICKS: u64 = 20;

const MAX_CPUS: usize = 32;

const AP_STACK_SIZE: usize = 4096;

/// Trampoline mailbox, defined in `trampoline.rs`.
extern "C" {
    static mut smp_gdt_ptr: DescriptorPointer;
    static mut smp_idt_ptr: DescriptorPointer;
    static mut smp_pd_phys: u32;
    static mut smp_stack_top: u32;
}

/// Per-core check-in flags, indexed by local APIC id.
static CORE_ONLINE: [AtomicBool; MAX_CPUS] = {
    const OFFLINE: AtomicBool = AtomicBool::new(false);
    [OFFLINE; MAX_CPUS]
};

/// A discovered core.
#[derive(Debug, Clone, Copy)]
pub struct CpuCore {
    pub apic_id: u8,
    pub is_bsp: bool,
}

static CORES: Mutex<Vec<CpuCore>> = Mutex::new(Vec::new());

/// Cores that have checked in (the BSP included).
pub fn online_count() -> usize {
    CORE_ONLINE
        .iter()
        .filter(|flag| flag.load(Ordering::Acquire))
        .count()
}

fn core_online(apic_id: u8) -> bool {
    CORE_ONLINE
        .get(apic_id as usize)
        .is_some_and(|flag| flag.load(Ordering::Acquire))
}

/// Warm-start every usable AP the firmware reported.
pub fn init(madt: &MadtInfo) {
    let bsp_id = apic::lapic_id();
    CORE_ONLINE[bsp_id as usize].store(true, Ordering::Release);

    // Publish the shared state the trampoline consumes. The APs reuse the
    // BSP's GDT, IDT and page directory wholesale.
    //
    // SAFETY: The mailbox words live in the trampoline section; no AP is
    // running yet, so the BSP owns them.
    unsafe {
        smp_gdt_ptr = gdt::gdt_pointer();
        smp_idt_ptr = idt::idt_pointer();
        smp_pd_phys = crate::mm::vmm::kernel_directory();
    }

    let mut cores = CORES.lock();
    for lapic in &madt.local_apics {
        if !lapic.is_usable() {
            continue;
        }
        let apic_id = lapic.apic_id;
        cores.push(CpuCore {
            apic_id,
            is_bsp: apic_id == bsp_id,
        });

        if apic_id == bsp_id || apic_id as usize >= MAX_CPUS {
            continue;
        }

        if let Err(err) = start_core(apic_id) {
            log::warn!("core {apic_id}: {err}");
        }
    }

    log::info!(
        "{} of {} cores online",
        online_count(),
        cores.len()
    );
}

fn start_core(apic_id: u8) -> KernelResult<()> {
    // The AP's kernel stack; leaked on purpose, the core never exits.
    let stack = vec![0u8; AP_STACK_SIZE].into_boxed_slice();
    let stack_top = (stack.as_ptr() as usize + AP_STACK_SIZE) & !0xF;
    core::mem::forget(stack);

    // SAFETY: Only this one AP will read the mailbox word between the
    // store and its check-in; the next AP is started strictly after.
    unsafe {
        smp_stack_top = stack_top as u32;
    }

    let mut waited_ticks = 0;
    for attempt in 1..=3 {
        apic::send_init_ipi(apic_id);
        crate::timer::sleep_ticks(IPI_DELAY_TICKS);
        apic::send_startup_ipi(apic_id, AP_STARTUP_VECTOR);
        crate::timer::sleep_ticks(IPI_DELAY_TICKS);
        waited_ticks += 2 * IPI_DELAY_TICKS;

        if core_online(apic_id) {
            log::info!("core {apic_id} online (attempt {attempt})");
            return Ok(());
        }
    }

    Err(KernelError::Timeout {
        operation: "AP warm start",
        duration_ms: waited_ticks * crate::timer::interval_us() as u64 / 1000,
    })
}

/// First Rust code an AP runs, called from the trampoline with the
/// per-AP stack installed and paging live.
#[no_mangle]
pub extern "C" fn ap_warm_start() -> ! {
    super::fpu_init();

    let apic_id = apic::lapic_id();
    if let Some(flag) = CORE_ONLINE.get(apic_id as usize) {
        flag.store(true, Ordering::Release);
    }
    log::info!("core {apic_id} up, parking");

    // Parked: this kernel schedules on the BSP only.
    loop {
        super::pause();
    }
}

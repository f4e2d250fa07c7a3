//! Boot-processor bring-up.
//!
//! `kernel_early_main` is what the Multiboot entry stub calls. Ordering
//! is delicate and mirrors the hardware's dependencies:
//!
//! 1. Serial + logging first, so every later step can report.
//! 2. PIC remap and PIT programming while interrupts are still off.
//! 3. GDT, then IDT; only then `sti` -- a vector taken before the IDT is
//!    loaded would triple-fault.
//! 4. Frame allocator from the boot memory map, then paging. From here
//!    on, page faults report properly.
//! 5. ACPI discovery, the heap (first allocation capability), boot
//!    modules, then the APIC takeover and AP warm-start.
//! 6. The scheduler last; its first tick replaces this boot context with
//!    the idle/kernel tasks and never comes back.

use crate::arch;
use crate::mm::bootloader::{parse_memory_map, BootInfo, BOOTLOADER_MAGIC};

/// Tick interval for the system timer.
const TICK_INTERVAL_US: u32 = 1000;

/// Scheduler quantum.
const TIME_SLICE_MS: u32 = 10;

#[no_mangle]
pub extern "C" fn kernel_early_main(mboot: *const BootInfo, magic: u32) -> ! {
    arch::x86::serial::init();
    crate::logger::init(log::LevelFilter::Info);
    println!();
    log::info!(
        "obsidian {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    if magic != BOOTLOADER_MAGIC {
        panic!("bad bootloader magic {magic:#010x} (wanted {BOOTLOADER_MAGIC:#010x})");
    }
    // Copy the loader's record before its memory is recycled.
    //
    // SAFETY: A Multiboot-compliant loader passed a readable BootInfo.
    let boot: BootInfo = unsafe { *mboot };

    arch::fpu_init();

    arch::x86::pic::remap();
    crate::timer::init(TICK_INTERVAL_US);

    arch::x86::gdt::init_bsp();
    arch::x86::idt::init();
    arch::enable_interrupts();

    if !boot.has_memory_map() {
        panic!("bootloader provided no memory map");
    }
    crate::mm::frame_allocator::init(parse_memory_map(boot.memory_map_bytes()));
    for module in boot.modules() {
        crate::mm::frame_allocator::reserve_region(
            module.mod_start as u64,
            module.len() as u64,
        );
    }
    crate::mm::vmm::init();

    crate::acpi::init();
    crate::mm::heap::init();

    crate::module::load_boot_modules(&boot);

    match crate::acpi::find_madt() {
        Some(madt) => {
            arch::x86::apic::init(&madt);
            arch::x86::apic::configure(&madt);
            arch::x86::pic::disable();
            if let Err(err) = arch::x86::apic::enable() {
                panic!("APIC takeover failed: {err}");
            }
            arch::x86::smp::init(&madt);
        }
        None => log::warn!("no MADT; staying on the 8259 with one core"),
    }

    crate::sched::init(kernel_main, TIME_SLICE_MS);

    // The next timer tick schedules the idle and kernel tasks over this
    // context; nothing below ever runs again.
    loop {
        // SAFETY: hlt with interrupts enabled waits for the next tick.
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }
}

/// Entry of the "kernel" task, the first real task dispatched.
fn kernel_main() {
    log::info!(
        "memory: {} KiB free of {} KiB",
        crate::mm::frame_allocator::free_memory() / 1024,
        crate::mm::frame_allocator::total_memory() / 1024
    );
    if let Some(stats) = crate::mm::heap::kernel_heap_stats() {
        log::info!(
            "heap: {} free chunk(s), {} bytes free",
            stats.free_chunks,
            stats.free_bytes
        );
    }
    log::info!(
        "up {} ticks, {} interrupts dispatched",
        crate::timer::ticks(),
        crate::irq::dispatch_count()
    );

    // Returning ends this task; the idle task keeps the machine alive.
}

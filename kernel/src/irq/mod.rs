//! Interrupt dispatch.
//!
//! Every one of the 256 vectors funnels through one uniform assembly stub
//! (`arch::x86::stubs`) that builds a full [`InterruptFrame`] and calls
//! [`dispatch`]. Policy, in order:
//!
//! 1. FPU state is saved around the handler into a stack-local `fxsave`
//!    area, so handlers may use the FPU and dispatch stays re-entrant.
//! 2. Vectors 32..48 are hardware IRQs: run the registered IRQ handler
//!    (warn if none), then acknowledge the legacy PIC.
//! 3. Any other vector with a registered handler runs it.
//! 4. An unhandled CPU exception (vector < 32) is fatal.
//! 5. Anything else is logged and ignored.
//! 6. The local APIC is acknowledged unconditionally at the end.
//!
//! Handlers run with interrupts disabled and must complete in bounded
//! time; the scheduler's handler rewrites the frame in place to switch
//! tasks on return.

pub mod context;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use context::InterruptFrame;

/// First vector the remapped PIC delivers.
pub const IRQ_BASE: u8 = 32;

/// Number of legacy IRQ lines.
pub const IRQ_LINES: usize = 16;

/// Vector used for voluntary reschedule requests.
pub const YIELD_VECTOR: u8 = 33;

/// Handler for a specific vector. The frame is the complete saved state of
/// the interrupted context and may be rewritten.
pub type IsrHandler = fn(&mut InterruptFrame);

/// Handler for a hardware IRQ line (vector - 32).
pub type IrqHandler = fn(&mut InterruptFrame);

const NO_ISR: Option<IsrHandler> = None;
const NO_IRQ: Option<IrqHandler> = None;

static ISR_HANDLERS: Mutex<[Option<IsrHandler>; 256]> = Mutex::new([NO_ISR; 256]);
static IRQ_HANDLERS: Mutex<[Option<IrqHandler>; IRQ_LINES]> = Mutex::new([NO_IRQ; IRQ_LINES]);

/// Total interrupts dispatched since boot.
static DISPATCH_COUNT: AtomicU64 = AtomicU64::new(0);
/// Interrupts that arrived with no registered handler.
static SPURIOUS_COUNT: AtomicU64 = AtomicU64::new(0);

/// CPU exception names, indexed by vector.
pub const EXCEPTION_NAMES: [&str; 20] = [
    "division by zero",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point exception",
    "alignment check",
    "machine check",
    "SIMD floating-point exception",
];

/// Legacy IRQ line names, indexed by line.
pub const IRQ_NAMES: [&str; IRQ_LINES] = [
    "PIT",
    "keyboard",
    "cascade",
    "COM2/COM4",
    "COM1/COM3",
    "LPT2",
    "floppy",
    "LPT1",
    "RTC",
    "free",
    "free",
    "free",
    "PS/2 mouse",
    "FPU",
    "primary ATA",
    "secondary ATA",
];

/// Name for an exception vector (`"reserved"` for the gaps).
pub fn exception_name(vector: u8) -> &'static str {
    EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("reserved")
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register a handler for an arbitrary vector.
pub fn register_isr(vector: u8, handler: IsrHandler) {
    ISR_HANDLERS.lock()[vector as usize] = Some(handler);
}

/// Remove the handler for a vector.
pub fn unregister_isr(vector: u8) {
    ISR_HANDLERS.lock()[vector as usize] = None;
}

/// Register a handler for a hardware IRQ line.
///
/// Also reinstalls the IDT gate for vector `32 + irq`, so a line whose
/// gate was ever redirected comes back to the common stub.
pub fn register_irq(irq: u8, handler: IrqHandler) {
    assert!((irq as usize) < IRQ_LINES);
    IRQ_HANDLERS.lock()[irq as usize] = Some(handler);
    crate::arch::install_vector(IRQ_BASE + irq);
}

/// Remove the handler for a hardware IRQ line and restore its gate.
pub fn unregister_irq(irq: u8) {
    assert!((irq as usize) < IRQ_LINES);
    IRQ_HANDLERS.lock()[irq as usize] = None;
    crate::arch::install_vector(IRQ_BASE + irq);
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Common dispatcher, called by every interrupt stub with the frame it
/// built on the kernel stack.
pub fn dispatch(frame: &mut InterruptFrame) {
    DISPATCH_COUNT.fetch_add(1, Ordering::Relaxed);

    // Stack-local FPU save area: handlers may clobber FPU/SSE state, and a
    // nested fault while one save is live must not overwrite it.
    let mut fpu_area = crate::arch::FxSaveArea::new();
    crate::arch::fpu_save(&mut fpu_area);

    let vector = frame.int_no as u8;

    if (IRQ_BASE..IRQ_BASE + IRQ_LINES as u8).contains(&vector) {
        let irq = vector - IRQ_BASE;
        let handler = IRQ_HANDLERS.lock()[irq as usize];
        match handler {
            Some(handler) => handler(frame),
            None => {
                SPURIOUS_COUNT.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "IRQ{} ({}) has no handler, ignoring",
                    irq,
                    IRQ_NAMES[irq as usize]
                );
            }
        }
        crate::arch::pic_eoi(irq);
    } else {
        let handler = ISR_HANDLERS.lock()[vector as usize];
        match handler {
            Some(handler) => handler(frame),
            None if vector < 32 => {
                panic!(
                    "unhandled exception {} ({}) at eip {:#010x}, error code {:#x}",
                    vector,
                    exception_name(vector),
                    frame.base.eip,
                    frame.err_code
                );
            }
            None => {
                SPURIOUS_COUNT.fetch_add(1, Ordering::Relaxed);
                log::warn!("vector {vector} has no handler, ignoring");
            }
        }
    }

    crate::arch::fpu_restore(&fpu_area);
    crate::arch::lapic_eoi();
}

/// Entry point the assembly stubs call.
///
/// # Safety
/// `frame` must point at a live extended frame on the current kernel
/// stack, which the stubs guarantee.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[no_mangle]
pub unsafe extern "C" fn isr_dispatch(frame: *mut InterruptFrame) {
    // SAFETY: The stub passed a pointer to the frame it just pushed.
    dispatch(unsafe { &mut *frame })
}

/// Interrupts dispatched since boot.
pub fn dispatch_count() -> u64 {
    DISPATCH_COUNT.load(Ordering::Relaxed)
}

/// Interrupts that found no handler.
pub fn spurious_count() -> u64 {
    SPURIOUS_COUNT.load(Ordering::Relaxed)
}

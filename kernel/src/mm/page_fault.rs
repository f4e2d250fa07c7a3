//! Page fault reporting.
//!
//! All tasks share the kernel address space, so any page fault is a kernel
//! bug: the handler decodes the hardware error code, prints a trace from
//! the faulting frame, and panics. There is no demand paging and no
//! recovery.

use bitflags::bitflags;

use crate::irq::context::InterruptFrame;

bitflags! {
    /// #PF error code pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultErrorCode: u32 {
        /// Set: protection violation. Clear: page not present.
        const PROTECTION_VIOLATION = 1 << 0;
        /// Set: the access was a write.
        const CAUSED_BY_WRITE      = 1 << 1;
        /// Set: the CPU was in user mode.
        const USER_MODE            = 1 << 2;
        /// Set: a reserved bit was set in a paging entry.
        const RESERVED_WRITE       = 1 << 3;
        /// Set: the fault was an instruction fetch.
        const INSTRUCTION_FETCH    = 1 << 4;
    }
}

/// Human-readable cause. Not-present wins over every other bit; the rest
/// are checked in error-code bit order.
pub fn describe(code: PageFaultErrorCode) -> &'static str {
    if !code.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
        "page not present"
    } else if code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
        "write to a read-only page"
    } else if code.contains(PageFaultErrorCode::USER_MODE) {
        "user-mode access to a kernel page"
    } else if code.contains(PageFaultErrorCode::RESERVED_WRITE) {
        "reserved paging bits overwritten"
    } else {
        "protection violation"
    }
}

/// Vector-14 handler, registered by `vmm::init`.
///
/// Never returns: the fault address (CR2), cause, and a stack trace from
/// the interrupted frame's `ebp` are printed before the panic.
pub fn handle(frame: &mut InterruptFrame) {
    let fault_addr = crate::arch::read_cr2();
    let code = PageFaultErrorCode::from_bits_truncate(frame.err_code);

    log::error!(
        "page fault at eip {:#010x}, address {:#010x}: {}",
        frame.base.eip,
        fault_addr,
        describe(code)
    );
    crate::panic::stack_trace(frame.ebp as usize, crate::panic::MAX_TRACE_FRAMES);

    panic!(
        "page fault at {:#010x} (address {:#010x}): {}",
        frame.base.eip,
        fault_addr,
        describe(code)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_beats_other_bits() {
        // Bit 0 clear means the page wasn't there, whatever else is set.
        let code = PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::USER_MODE;
        assert_eq!(describe(code), "page not present");
    }

    #[test]
    fn write_violation() {
        let code =
            PageFaultErrorCode::PROTECTION_VIOLATION | PageFaultErrorCode::CAUSED_BY_WRITE;
        assert_eq!(describe(code), "write to a read-only page");
    }

    #[test]
    fn user_mode_read_violation() {
        let code = PageFaultErrorCode::PROTECTION_VIOLATION | PageFaultErrorCode::USER_MODE;
        assert_eq!(describe(code), "user-mode access to a kernel page");
    }

    #[test]
    fn unknown_bits_are_ignored() {
        let code = PageFaultErrorCode::from_bits_truncate(0xFFFF_FFF0 | 1);
        assert_eq!(describe(code), "protection violation");
    }
}

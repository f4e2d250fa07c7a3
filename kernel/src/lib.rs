//! Obsidian kernel library.
//!
//! A 32-bit x86 monolithic kernel core: Multiboot boot path, bitmap
//! physical-frame allocator, recursive-mapped virtual memory, a 256-vector
//! interrupt spine with PIC/APIC routing, PIT tick service, chunk heap,
//! preemptive round-robin scheduler, and application-processor warm-start.
//!
//! The crate builds two ways:
//! - `i686-obsidian` (bare metal): `no_std`, the kernel heap is the global
//!   allocator and `bootstrap::kernel_early_main` is the Multiboot entry.
//! - host (x86_64-unknown-linux-gnu): links `std` and the system allocator
//!   so the standard `#[test]` harness exercises the subsystem logic.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Host target: use the system allocator so unit tests can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

// Bare metal: the kernel chunk heap backs `alloc`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static KERNEL_ALLOCATOR: mm::heap::KernelAllocator = mm::heap::KernelAllocator;

#[macro_use]
pub mod print;

pub mod acpi;
pub mod arch;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod bootstrap;
pub mod crypto;
pub mod error;
pub mod irq;
pub mod logger;
pub mod mm;
pub mod module;
pub mod panic;
pub mod sched;
pub mod sync;
pub mod timer;

// Re-export the types the integration tests exercise.
pub use error::{KernelError, KernelResult};
pub use irq::context::InterruptFrame;
pub use mm::{FrameNumber, MemoryRegion, MemoryRegionKind, PhysicalAddress, VirtualAddress};
pub use sched::{Task, TaskState};

//! Kernel error types.
//!
//! Structured error values carried across subsystem boundaries instead of
//! string literals. Fatal conditions (unhandled exceptions, heap corruption,
//! frame exhaustion) do not travel through these types -- they take the
//! panic path directly.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A memory request could not be satisfied.
    OutOfMemory { requested: usize, available: usize },
    /// An address was outside the range a subsystem manages.
    InvalidAddress { addr: usize },
    /// A virtual address had no present mapping.
    UnmappedMemory { addr: usize },
    /// A caller-supplied argument was rejected.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    /// A fixed-size kernel table is full.
    ResourceExhausted { resource: &'static str },
    /// Double initialization of a boot-once subsystem.
    AlreadyExists { resource: &'static str },
    /// A subsystem was used before its `init`.
    NotInitialized { subsystem: &'static str },
    /// A bounded hardware handshake did not complete.
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
    /// A device reported or caused an error.
    HardwareError { device: &'static str, code: u32 },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {requested} bytes, {available} available"
            ),
            KernelError::InvalidAddress { addr } => {
                write!(f, "invalid address {addr:#010x}")
            }
            KernelError::UnmappedMemory { addr } => {
                write!(f, "unmapped memory at {addr:#010x}")
            }
            KernelError::InvalidArgument { name, value } => {
                write!(f, "invalid argument {name}: {value}")
            }
            KernelError::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {resource}")
            }
            KernelError::AlreadyExists { resource } => {
                write!(f, "already exists: {resource}")
            }
            KernelError::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {subsystem}")
            }
            KernelError::Timeout {
                operation,
                duration_ms,
            } => write!(f, "timeout after {duration_ms} ms: {operation}"),
            KernelError::HardwareError { device, code } => {
                write!(f, "hardware error on {device} (code {code:#x})")
            }
        }
    }
}

/// Convenience alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

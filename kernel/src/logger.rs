//! Kernel-side sink for the `log` facade.
//!
//! Subsystems log through the standard `log::info!`/`warn!`/`error!` macros
//! with their module path as the target; this module forwards every enabled
//! record to the serial console. Installed once, very early in boot, before
//! any other subsystem runs.

use log::{LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!(
            "[{:>5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the kernel logger.
///
/// Safe to call more than once; only the first call wins (the `log` crate
/// rejects a second logger).
pub fn init(max_level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level);
    }
}

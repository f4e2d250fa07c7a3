// Print macros for kernel output

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::arch::x86::serial::_print(format_args!($($arg)*)));
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

// Host builds discard the output; the arguments are still evaluated so the
// call sites typecheck identically on both targets.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[doc(hidden)]
pub fn _discard(_args: core::fmt::Arguments) {}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_discard(format_args!($($arg)*)));
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[macro_export]
macro_rules! println {
    () => ($crate::print::_discard(format_args!("")));
    ($($arg:tt)*) => ($crate::print::_discard(format_args!($($arg)*)));
}

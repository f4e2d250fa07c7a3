//! Bare-metal kernel image.
//!
//! The Multiboot entry point (`_start`) and the whole boot path live in the
//! library crate (`arch::x86::boot` and `bootstrap`); this binary only pulls
//! the library in so the linker emits a bootable image. On the host the
//! binary is an empty stub so `cargo build` succeeds alongside the tests.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use obsidian_kernel as _;

#[cfg(not(target_os = "none"))]
fn main() {}

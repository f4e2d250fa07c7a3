//! Global Descriptor Table and the boot processor's TSS.
//!
//! Flat 4 GiB segmentation: null, kernel code/data at ring 0, user
//! code/data at ring 3 (reserved for a future ring transition; nothing
//! loads them today), and one TSS carrying the kernel stack for such a
//! transition. Selector values are fixed and shared with the interrupt
//! stubs and the AP trampoline.

use core::arch::asm;

use lazy_static::lazy_static;

use super::DescriptorPointer;
use crate::arch::{KERNEL_DATA_SELECTOR, TSS_SELECTOR};

/// Number of GDT slots (null + 4 segments + TSS).
const GDT_ENTRIES: usize = 6;

// Access bytes: present | ring | code/data type.
const ACCESS_KERNEL_CODE: u8 = 0x9A;
const ACCESS_KERNEL_DATA: u8 = 0x92;
const ACCESS_USER_CODE: u8 = 0xFA;
const ACCESS_USER_DATA: u8 = 0xF2;
/// Available 32-bit TSS, present, ring 0.
const ACCESS_TSS: u8 = 0x89;

/// 4 KiB granularity, 32-bit operands.
const FLAGS_FLAT: u8 = 0xC;

/// Pack one 8-byte segment descriptor.
const fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    (limit as u64 & 0xFFFF)
        | ((base as u64 & 0xFFFF) << 16)
        | (((base as u64 >> 16) & 0xFF) << 32)
        | ((access as u64) << 40)
        | (((limit as u64 >> 16) & 0xF) << 48)
        | (((flags as u64) & 0xF) << 52)
        | (((base as u64 >> 24) & 0xFF) << 56)
}

/// 32-bit Task State Segment.
#[repr(C, packed)]
pub struct TaskStateSegment {
    prev_tss: u32,
    /// Stack pointer loaded on a ring 3 -> 0 transition.
    esp0: u32,
    /// Stack segment for ring 0.
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    /// Offset of the I/O permission bitmap; pointing it at the segment
    /// end means "no bitmap, all ports privileged".
    iomap_base: u16,
}

impl TaskStateSegment {
    fn zeroed() -> Self {
        // SAFETY: All fields are plain integers; all-zero is a valid TSS.
        unsafe { core::mem::zeroed() }
    }
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::zeroed();
        tss.ss0 = KERNEL_DATA_SELECTOR as u32;
        tss.esp0 = super::boot::boot_stack_top();
        tss.iomap_base = core::mem::size_of::<TaskStateSegment>() as u16;
        tss
    };

    static ref GDT: [u64; GDT_ENTRIES] = {
        let tss_base = &*TSS as *const TaskStateSegment as u32;
        let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;
        [
            0,
            descriptor(0, 0xF_FFFF, ACCESS_KERNEL_CODE, FLAGS_FLAT),
            descriptor(0, 0xF_FFFF, ACCESS_KERNEL_DATA, FLAGS_FLAT),
            descriptor(0, 0xF_FFFF, ACCESS_USER_CODE, FLAGS_FLAT),
            descriptor(0, 0xF_FFFF, ACCESS_USER_DATA, FLAGS_FLAT),
            // Byte granularity: the limit is the TSS size itself.
            descriptor(tss_base, tss_limit, ACCESS_TSS, 0),
        ]
    };
}

/// The loaded table's pointer operand, also published to the APs.
pub fn gdt_pointer() -> DescriptorPointer {
    DescriptorPointer {
        limit: (GDT_ENTRIES * 8 - 1) as u16,
        base: GDT.as_ptr() as u32,
    }
}

/// Load the GDT, reload every segment register and install the TSS.
pub fn init_bsp() {
    let pointer = gdt_pointer();
    let operand = &pointer as *const DescriptorPointer;

    // SAFETY: The pointer references the static table above. The far
    // return reloads CS with the kernel code selector; the moves reload
    // the data segments; ltr requires the TSS descriptor just installed.
    unsafe {
        asm!(
            "lgdt [{ptr}]",
            "push 0x08",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "mov {tmp}, 0x10",
            "mov ds, {tmp:x}",
            "mov es, {tmp:x}",
            "mov fs, {tmp:x}",
            "mov gs, {tmp:x}",
            "mov ss, {tmp:x}",
            ptr = in(reg) operand,
            tmp = out(reg) _,
        );
        asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
    }

    log::info!("GDT loaded, {GDT_ENTRIES} entries, TSS at slot 5");
}

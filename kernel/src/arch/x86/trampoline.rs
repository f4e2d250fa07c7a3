//! Application-processor warm-start code.
//!
//! Linked into the `.trampoline` section at physical 0x8000, which is
//! where a startup IPI with vector 0x08 begins real-mode execution. The
//! 16-bit prologue switches on protection with the GDT the BSP published,
//! far-jumps into 32-bit code, adopts the shared IDT and page directory,
//! enables paging, installs the per-AP stack and calls `ap_warm_start`.
//!
//! The four data words at the end are the mailbox `smp` fills in before
//! each startup IPI: GDT pointer, IDT pointer, page-directory physical
//! address and the AP's stack top.

use core::arch::global_asm;

global_asm!(
    r#"
.section .trampoline, "ax"

.global ap_warm_entry
.code16
ap_warm_entry:
    cli
    xorw %ax, %ax
    movw %ax, %ds

    lgdtl smp_gdt_ptr

    movl %cr0, %eax
    orl $0x1, %eax
    movl %eax, %cr0

    ljmpl $0x08, $ap_protected

.code32
ap_protected:
    movw $0x10, %ax
    movw %ax, %ds
    movw %ax, %es
    movw %ax, %fs
    movw %ax, %gs
    movw %ax, %ss

    lidtl smp_idt_ptr

    movl smp_pd_phys, %eax
    movl %eax, %cr3

    movl %cr0, %eax
    orl $0x80000000, %eax
    movl %eax, %cr0

    xorl %ebp, %ebp
    movl smp_stack_top, %esp
    cld
    call ap_warm_start

2:
    cli
    hlt
    jmp 2b

.align 4
.global smp_gdt_ptr
smp_gdt_ptr:
    .space 6

.align 4
.global smp_idt_ptr
smp_idt_ptr:
    .space 6

.align 4
.global smp_pd_phys
smp_pd_phys:
    .space 4

.align 4
.global smp_stack_top
smp_stack_top:
    .space 4
"#,
    options(att_syntax)
);

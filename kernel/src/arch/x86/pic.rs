//! Legacy 8259 programmable interrupt controllers.
//!
//! Remapped at boot so IRQs land on vectors 0x20..0x2F instead of
//! colliding with CPU exceptions; once the I/O APIC takes over routing,
//! [`disable`] masks every line and the pair only ever sees the EOIs the
//! dispatcher still issues for in-flight interrupts.

use super::port::{io_wait, Port};

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// Begin initialization, ICW4 follows.
const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
/// 8086 mode.
const ICW4_8086: u8 = 0x01;

const EOI_COMMAND: u8 = 0x20;

/// Master vector base after remap.
pub const PIC1_OFFSET: u8 = 0x20;
/// Slave vector base after remap.
pub const PIC2_OFFSET: u8 = 0x28;

/// Reprogram both controllers to the remapped vector bases, preserving
/// the current line masks. Slave cascades on master pin 2.
pub fn remap() {
    let mut pic1_cmd = Port::<u8>::new(PIC1_COMMAND);
    let mut pic1_data = Port::<u8>::new(PIC1_DATA);
    let mut pic2_cmd = Port::<u8>::new(PIC2_COMMAND);
    let mut pic2_data = Port::<u8>::new(PIC2_DATA);

    // SAFETY: The ICW1-ICW4 sequence on ports 0x20/0x21/0xA0/0xA1 is the
    // architecturally defined 8259 initialization handshake; io_wait gives
    // slow parts time to settle between steps.
    unsafe {
        let saved_mask1 = pic1_data.read();
        let saved_mask2 = pic2_data.read();

        pic1_cmd.write(ICW1_INIT | ICW1_ICW4);
        io_wait();
        pic2_cmd.write(ICW1_INIT | ICW1_ICW4);
        io_wait();

        pic1_data.write(PIC1_OFFSET);
        io_wait();
        pic2_data.write(PIC2_OFFSET);
        io_wait();

        // Master: slave on pin 2. Slave: cascade identity 2.
        pic1_data.write(0x04);
        io_wait();
        pic2_data.write(0x02);
        io_wait();

        pic1_data.write(ICW4_8086);
        io_wait();
        pic2_data.write(ICW4_8086);
        io_wait();

        pic1_data.write(saved_mask1);
        pic2_data.write(saved_mask2);
    }

    log::info!("8259 remapped to {PIC1_OFFSET:#x}/{PIC2_OFFSET:#x}");
}

/// Acknowledge an IRQ on the controller(s) that saw it.
pub fn eoi(irq: u8) {
    // SAFETY: Writing the EOI command is the defined acknowledgment; the
    // slave needs one only for its own lines, the master always.
    unsafe {
        if irq >= 8 {
            Port::<u8>::new(PIC2_COMMAND).write(EOI_COMMAND);
        }
        Port::<u8>::new(PIC1_COMMAND).write(EOI_COMMAND);
    }
}

/// Mask every line on both controllers.
pub fn disable() {
    // SAFETY: Writing 0xFF to the data ports masks all lines; no further
    // legacy interrupts will be delivered.
    unsafe {
        Port::<u8>::new(PIC1_DATA).write(0xFF);
        Port::<u8>::new(PIC2_DATA).write(0xFF);
    }
    log::info!("8259 masked, routing through the I/O APIC");
}

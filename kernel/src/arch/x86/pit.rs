//! 8253/8254 programmable interval timer, channel 0.

use super::port::Port;

const CHANNEL_0: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 3 (square wave), binary.
const MODE_SQUARE_WAVE: u8 = 0x36;

/// Program channel 0 with the given divisor; IRQ 0 then fires every
/// `divisor / 1193182` seconds.
pub fn program(divisor: u16) {
    let mut command = Port::<u8>::new(COMMAND);
    let mut channel0 = Port::<u8>::new(CHANNEL_0);

    // SAFETY: The mode/command write followed by the low and high divisor
    // bytes is the defined channel-0 programming sequence.
    unsafe {
        command.write(MODE_SQUARE_WAVE);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
}

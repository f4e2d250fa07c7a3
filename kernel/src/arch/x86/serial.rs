//! COM1 serial console.
//!
//! The kernel's log sink. A minimal 16550 setup: 38400 baud, 8N1, FIFOs
//! on; writes spin on the transmitter-empty bit. Newlines are expanded to
//! CRLF for terminal consumption.

use core::fmt;

use spin::Mutex;

use super::port::Port;

const COM1: u16 = 0x3F8;

struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    fn init(&mut self) {
        // SAFETY: Standard 16550 bring-up on the COM1 register block.
        unsafe {
            self.int_enable.write(0x00); // no interrupts, polled output
            self.line_ctrl.write(0x80); // DLAB on
            self.data.write(0x03); // divisor 3 -> 38400 baud
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x03); // 8N1, DLAB off
            self.fifo_ctrl.write(0xC7); // FIFOs on, cleared, 14-byte threshold
            self.modem_ctrl.write(0x0B); // DTR, RTS, OUT2
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: Polling LSR bit 5 then writing the data register is the
        // defined transmit sequence.
        unsafe {
            while self.line_status.read() & 0x20 == 0 {
                core::hint::spin_loop();
            }
            self.data.write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

/// Bring up the console. Called before anything logs.
pub fn init() {
    CONSOLE.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = CONSOLE.lock().write_fmt(args);
}

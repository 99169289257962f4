//! One-character debug trace over a polled UART, gated entirely behind the
//! `debug-trace` feature so it compiles out rather than merely going quiet
//! (mirroring the original firmware's `#ifdef DEBUG_UART`/`debug_putc`).
//!
//! Each notable transition emits one ASCII byte: `E`/`e` for connect and
//! disconnect, `R`/`W` for read and write setup, and `A`/`H`/`S`/`M`/`t` for
//! the attach state machine's auto/hardware/software/manual/timeout steps.

#[cfg(feature = "debug-trace")]
mod sink {
    use isp_bsp::uart::Uart;

    static mut TRACE_UART: Option<Uart> = None;

    pub fn init(uart: Uart) {
        unsafe {
            TRACE_UART = Some(uart);
        }
    }

    pub fn emit(byte: u8) {
        unsafe {
            if let Some(uart) = TRACE_UART.as_ref() {
                uart.putc(byte);
            }
        }
    }
}

#[cfg(feature = "debug-trace")]
pub use sink::{emit, init};

#[cfg(not(feature = "debug-trace"))]
pub fn init(_uart: isp_bsp::uart::Uart) {}

#[cfg(not(feature = "debug-trace"))]
pub fn emit(_byte: u8) {}

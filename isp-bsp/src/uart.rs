//! One-way polled debug trace UART, enabled only by the `debug-trace` feature.
//!
//! There's no buffering or DMA here: every byte blocks until the transmit
//! register is empty, mirroring the original's `debug_putc`.

use stm32ral::usart;
use stm32ral::{modify_reg, read_reg, write_reg};

use crate::rcc::Clocks;

pub struct Uart {
    usart: usart::Instance,
}

impl Uart {
    /// Configure for 115200 8N1. `pclk` is the APB clock feeding this USART.
    pub fn new(usart: usart::Instance, clocks: &Clocks) -> Self {
        let brr = clocks.pclk1() / 115_200;
        write_reg!(usart, usart, BRR, brr);
        modify_reg!(usart, usart, CR1, TE: Enabled, UE: Enabled);
        Uart { usart }
    }

    pub fn putc(&self, byte: u8) {
        while read_reg!(usart, self.usart, SR, TXE == NotEmpty) {}
        write_reg!(usart, self.usart, DR, byte as u32);
    }

    pub fn puts(&self, s: &str) {
        for b in s.bytes() {
            self.putc(b);
        }
    }
}

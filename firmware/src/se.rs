//! Serial engine: one byte in, one byte out, MSB first, mode-0 timing.
//!
//! Grounded on `spi.c`'s `spi_send`/`spi_enable`/`spi_disable`/`spi_device_reset`
//! and `isp_attach_hardware`/`isp_attach_software`, restructured as a tagged
//! union with a single `send` contract per the recommendation in §9 of the
//! design notes: hardware mode drives the SPI1 peripheral, software mode
//! bit-bangs the same three pins.

use isp_bsp::delay::Delay;
use isp_bsp::gpio::Pins;
use isp_bsp::spi::{Prescaler, SPI};

/// Contract the ISP protocol driver transacts against. Implemented by
/// [`SerialEngine`] for real hardware and by a simulated double in tests.
pub trait Engine {
    fn enable(&mut self);
    fn disable(&mut self);

    /// Exchange one byte, MSB first. Data-in is sampled *before* the rising
    /// clock edge in software mode; implementers must preserve this phasing
    /// to remain wire-compatible with existing host tooling.
    fn send(&mut self, byte: u8) -> u8;

    /// Drop clock low, release target reset for `2x` the mode's bit delay,
    /// then re-assert reset.
    fn reset_pulse(&mut self);

    /// Select hardware mode at the slowest prescaler step. Returns false if
    /// this engine has no hardware-accelerated mode.
    fn select_hardware_slowest(&mut self) -> bool;

    /// Step to the next faster prescaler. Returns false if already at the
    /// fastest step (no further stepping possible).
    fn step_hardware_faster(&mut self) -> bool;

    /// Back off to the previous (slower) prescaler step.
    fn step_hardware_slower(&mut self);

    fn disable_hardware(&mut self);

    /// Switch to software (bit-bang) mode with the given half-bit delay, in
    /// units of 4 core clock cycles (see [`isp_bsp::delay::Delay::spin`]).
    fn select_software(&mut self, delay: u16);

    /// Busy-wait for `quarter_cycles` units of 4 core clock cycles. Used by
    /// the ISP driver's write-completion polling.
    fn spin(&mut self, quarter_cycles: u16);
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mode {
    Hardware,
    Software,
}

/// Default software-mode half-bit delay, giving roughly 26-33kHz, used when
/// `attach` falls back from hardware without an explicit rate request.
pub const DEFAULT_SOFTWARE_DELAY: u16 = 150;

pub struct SerialEngine<'a> {
    pins: &'a Pins<'a>,
    spi: &'a SPI,
    delay: &'a Delay,
    mode: Mode,
    prescaler_idx: usize,
    sw_delay: u16,
}

impl<'a> SerialEngine<'a> {
    pub fn new(pins: &'a Pins<'a>, spi: &'a SPI, delay: &'a Delay) -> Self {
        SerialEngine {
            pins,
            spi,
            delay,
            mode: Mode::Software,
            prescaler_idx: 0,
            sw_delay: DEFAULT_SOFTWARE_DELAY,
        }
    }

    fn send_software(&mut self, mut data: u8) -> u8 {
        let mut recv = 0u8;
        for _ in 0..8 {
            self.pins.mosi.set_bool(data & 0x80 != 0);

            recv <<= 1;
            if self.pins.miso.is_high() {
                recv |= 1;
            }

            self.pins.sck.set_high();
            self.delay.spin(self.sw_delay);
            self.pins.sck.set_low();
            self.delay.spin(self.sw_delay);

            data <<= 1;
        }
        recv
    }
}

impl<'a> Engine for SerialEngine<'a> {
    fn enable(&mut self) {
        self.pins.reset.set_high();
        self.pins.software_mode();
        self.mode = Mode::Software;
        // Assert target reset: this is the prerequisite for ISP entry.
        self.pins.reset.set_low();
    }

    fn disable(&mut self) {
        if self.mode == Mode::Hardware {
            self.spi.disable();
        }
        self.pins.release_isp();
    }

    fn send(&mut self, byte: u8) -> u8 {
        match self.mode {
            Mode::Hardware => self.spi.exchange(byte),
            Mode::Software => self.send_software(byte),
        }
    }

    fn reset_pulse(&mut self) {
        self.pins.sck.set_low();
        self.pins.reset.set_high();
        self.delay.spin(self.sw_delay.wrapping_mul(2));
        self.pins.reset.set_low();
    }

    fn select_hardware_slowest(&mut self) -> bool {
        self.pins.hardware_mode();
        self.prescaler_idx = 0;
        self.spi.setup_isp(Prescaler::LADDER[0]);
        self.spi.enable();
        self.mode = Mode::Hardware;
        true
    }

    fn step_hardware_faster(&mut self) -> bool {
        if self.prescaler_idx + 1 >= Prescaler::LADDER.len() {
            return false;
        }
        self.prescaler_idx += 1;
        self.spi.setup_isp(Prescaler::LADDER[self.prescaler_idx]);
        self.spi.enable();
        true
    }

    fn step_hardware_slower(&mut self) {
        if self.prescaler_idx > 0 {
            self.prescaler_idx -= 1;
        }
        self.spi.setup_isp(Prescaler::LADDER[self.prescaler_idx]);
        self.spi.enable();
    }

    fn disable_hardware(&mut self) {
        self.spi.disable();
        self.pins.software_mode();
        self.mode = Mode::Software;
    }

    fn select_software(&mut self, delay: u16) {
        self.pins.software_mode();
        self.mode = Mode::Software;
        self.sw_delay = delay;
    }

    fn spin(&mut self, quarter_cycles: u16) {
        self.delay.spin(quarter_cycles);
    }
}

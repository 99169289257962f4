//! ISP protocol driver: the target-memory byte sequences built on top of the
//! serial engine. Grounded function-for-function on `spi.c`'s `isp_*` family
//! and on the timeout/retry constants named in `config.h`.

use crate::se::{Engine, DEFAULT_SOFTWARE_DELAY};

const ISP_READY: u8 = 0xF0;
const ISP_READ_FLASH: u8 = 0x20;
const ISP_READ_EEPROM: u8 = 0xA0;
const ISP_WRITE_EEPROM: u8 = 0xC0;
const ISP_WRITE_FLASH: u8 = 0x40;
const ISP_WRITE_PAGE: u8 = 0x4C;

const ERASED_SENTINEL: u8 = 0xFF;

/// Core clock driving the `spin`/`_delay_loop_2`-equivalent quarter-cycle
/// primitive, matching `isp-bsp::rcc`'s PLL configuration.
const F_CPU: u32 = 96_000_000;

/// 10ms, used when the written EEPROM byte is the erased sentinel and
/// readback polling cannot distinguish "done" from "not yet".
const EEPROM_TIMEOUT: u16 = (F_CPU / 100 / 4) as u16;
/// 100us between EEPROM readback polls.
const EEPROM_POLL_TIMEOUT: u16 = (F_CPU / 10_000 / 4) as u16;
const EEPROM_POLL_TRIES: u8 = 100;
/// 5ms, used when the written flash byte is the erased sentinel.
const FLASH_TIMEOUT: u16 = (F_CPU / 200 / 4) as u16;
/// 100us between flash readback polls.
const FLASH_POLL_TIMEOUT: u16 = (F_CPU / 10_000 / 4) as u16;
const FLASH_POLL_TRIES: u8 = 50;
/// 100us between flash-page-commit readback polls.
const FLASH_PAGE_POLL_TIMEOUT: u16 = (F_CPU / 10_000 / 4) as u16;
const FLASH_PAGE_POLL_TRIES: u8 = 100;

/// Attempts at the lowest hardware rate, and at the software fallback rate,
/// before `attach` gives up in auto mode.
const SPI_MAX_TRIES_HW: u8 = 32;
const SPI_MAX_TRIES_SW: u8 = 8;

/// Half-bit delay table for `SETISPSCK` rate codes, in quarter-cycle units
/// at `F_CPU`. Code 0 (auto) is handled separately by `attach`.
fn software_delay_for_code(code: u8) -> u16 {
    let freq: u32 = match code {
        1 => 500,
        2 => 1_000,
        3 => 2_000,
        4 => 4_000,
        5 => 8_000,
        6 => 16_000,
        7 => 32_000,
        8 => 93_750,
        9 => 187_500,
        10 => 375_000,
        11 => 750_000,
        _ => 1_500_000,
    };
    (F_CPU / 4 / freq) as u16
}

pub struct IspDriver<E: Engine> {
    engine: E,
}

impl<E: Engine> IspDriver<E> {
    pub fn new(engine: E) -> Self {
        IspDriver { engine }
    }

    pub fn enable(&mut self) {
        self.engine.enable();
    }

    pub fn disable(&mut self) {
        self.engine.disable();
    }

    /// Raw four-byte passthrough for the TRANSMIT request: exchange each
    /// byte with the target and return what came back.
    pub fn transmit_raw(&mut self, bytes: [u8; 4]) -> [u8; 4] {
        [
            self.engine.send(bytes[0]),
            self.engine.send(bytes[1]),
            self.engine.send(bytes[2]),
            self.engine.send(bytes[3]),
        ]
    }

    /// Reset-pulse the target then send the magic programming-enable
    /// sequence `AC 53 00 00`, returning true iff the third byte echoes
    /// `0x53`.
    fn probe(&mut self) -> bool {
        self.engine.reset_pulse();
        self.engine.send(0xAC);
        self.engine.send(0x53);
        let echo = self.engine.send(0x00);
        self.engine.send(0x00);
        echo == 0x53
    }

    /// Enter programming mode, selecting and freezing a serial engine rate
    /// for the rest of the session. See §4.2 for the auto/manual split.
    pub fn attach(&mut self, freq_code: u8) -> bool {
        crate::trace::emit(b'A');
        if freq_code == 0 {
            if self.engine.select_hardware_slowest() {
                crate::trace::emit(b'H');
                let mut tries = SPI_MAX_TRIES_HW;
                let mut ok = false;
                while tries > 0 {
                    if self.probe() {
                        ok = true;
                        break;
                    }
                    crate::trace::emit(b't');
                    tries -= 1;
                }
                if ok {
                    // Step down to the fastest rate that still probes successfully.
                    loop {
                        if !self.engine.step_hardware_faster() {
                            break;
                        }
                        if !self.probe() {
                            self.engine.step_hardware_slower();
                            break;
                        }
                    }
                    if self.probe() {
                        return true;
                    }
                }
            }

            crate::trace::emit(b'S');
            self.engine.disable_hardware();
            self.engine.select_software(DEFAULT_SOFTWARE_DELAY);
            for _ in 0..SPI_MAX_TRIES_SW {
                if self.probe() {
                    return true;
                }
                crate::trace::emit(b't');
            }
            false
        } else {
            crate::trace::emit(b'M');
            self.engine.disable_hardware();
            self.engine.select_software(software_delay_for_code(freq_code));
            for _ in 0..SPI_MAX_TRIES_SW {
                if self.probe() {
                    return true;
                }
                crate::trace::emit(b't');
            }
            false
        }
    }

    pub fn busy(&mut self) -> bool {
        self.engine.send(ISP_READY);
        self.engine.send(0);
        self.engine.send(0);
        (self.engine.send(0) & 1) != 0
    }

    pub fn read_flash(&mut self, byte_addr: u16) -> u8 {
        let cmd = ISP_READ_FLASH | (((byte_addr & 1) as u8) << 3);
        self.engine.send(cmd);
        let word_addr = byte_addr >> 1;
        self.engine.send((word_addr >> 8) as u8);
        self.engine.send(word_addr as u8);
        self.engine.send(0)
    }

    pub fn read_eeprom(&mut self, byte_addr: u16) -> u8 {
        self.engine.send(ISP_READ_EEPROM);
        self.engine.send((byte_addr >> 8) as u8);
        self.engine.send(byte_addr as u8);
        self.engine.send(0)
    }

    pub fn write_eeprom(&mut self, byte_addr: u16, data: u8) {
        self.engine.send(ISP_WRITE_EEPROM);
        self.engine.send((byte_addr >> 8) as u8);
        self.engine.send(byte_addr as u8);
        self.engine.send(data);

        if data == ERASED_SENTINEL {
            self.engine.spin(EEPROM_TIMEOUT);
        } else {
            for _ in 0..EEPROM_POLL_TRIES {
                if self.read_eeprom(byte_addr) == data {
                    break;
                }
                self.engine.spin(EEPROM_POLL_TIMEOUT);
            }
        }
    }

    pub fn write_flash_page_byte(&mut self, byte_addr: u16, data: u8, poll: bool) {
        let cmd = ISP_WRITE_FLASH | (((byte_addr & 1) as u8) << 3);
        self.engine.send(cmd);
        let word_addr = byte_addr >> 1;
        self.engine.send((word_addr >> 8) as u8);
        self.engine.send(word_addr as u8);
        self.engine.send(data);

        if !poll {
            return;
        }

        if data == ERASED_SENTINEL {
            self.engine.spin(FLASH_TIMEOUT);
        } else {
            for _ in 0..FLASH_POLL_TRIES {
                if self.read_flash(byte_addr) != ERASED_SENTINEL {
                    break;
                }
                self.engine.spin(FLASH_POLL_TIMEOUT);
            }
        }
    }

    pub fn commit_flash_page(&mut self, byte_addr: u16) {
        self.engine.send(ISP_WRITE_PAGE);
        let word_addr = byte_addr >> 1;
        self.engine.send((word_addr >> 8) as u8);
        self.engine.send(word_addr as u8);
        self.engine.send(0);

        for _ in 0..FLASH_PAGE_POLL_TRIES {
            if self.read_flash(byte_addr) != ERASED_SENTINEL {
                break;
            }
            self.engine.spin(FLASH_PAGE_POLL_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::SimulatedTarget;

    #[test]
    fn attach_probes_with_exact_magic_sequence() {
        let mut target = SimulatedTarget::new();
        let mut isp = IspDriver::new(target.engine());
        assert!(isp.attach(7));
        let seq = target.first_transaction();
        assert_eq!(seq, [0xAC, 0x53, 0x00, 0x00]);
    }

    #[test]
    fn erased_sentinel_eeprom_write_skips_readback_poll() {
        let mut target = SimulatedTarget::new();
        let mut isp = IspDriver::new(target.engine());
        isp.attach(7);
        target.reset_poll_count();
        isp.write_eeprom(0x10, 0xFF);
        assert_eq!(target.eeprom_read_count(), 0);
    }

    #[test]
    fn non_sentinel_eeprom_write_polls_until_match() {
        let mut target = SimulatedTarget::new();
        let mut isp = IspDriver::new(target.engine());
        isp.attach(7);
        isp.write_eeprom(0x20, 0x55);
        assert_eq!(target.eeprom_byte(0x20), 0x55);
    }

    #[test]
    fn flash_and_eeprom_round_trip() {
        let mut target = SimulatedTarget::new();
        let mut isp = IspDriver::new(target.engine());
        isp.attach(7);
        for (i, b) in [0x10u8, 0x20, 0x30, 0x40].iter().enumerate() {
            isp.write_flash_page_byte(i as u16, *b, true);
        }
        for (i, b) in [0x10u8, 0x20, 0x30, 0x40].iter().enumerate() {
            assert_eq!(isp.read_flash(i as u16), *b);
        }
    }
}

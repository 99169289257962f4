//! A simulated target MCU standing in for real ISP hardware in host-run
//! tests, per the "simulated target MCU" framing in the testable-properties
//! list. Models just enough of the wire protocol (4-byte command frames,
//! magic-bytes handshake, flash/EEPROM arrays) to exercise the dispatcher
//! and ISP driver without any hardware.

use std::cell::RefCell;
use std::rc::Rc;

use crate::se::Engine;

#[derive(Default)]
struct Inner {
    flash: [u8; 1024],
    eeprom: [u8; 1024],
    programming_mode: bool,
    reset_asserted: bool,
    cmd: [u8; 4],
    cmd_len: usize,
    first_transaction: Option<[u8; 4]>,
    eeprom_read_count: usize,
    hardware_available: bool,
    last_software_delay: u16,
}

pub struct SimulatedTarget {
    inner: Rc<RefCell<Inner>>,
}

impl SimulatedTarget {
    pub fn new() -> Self {
        SimulatedTarget {
            inner: Rc::new(RefCell::new(Inner {
                hardware_available: true,
                ..Default::default()
            })),
        }
    }

    pub fn engine(&mut self) -> SimulatedEngine {
        SimulatedEngine {
            inner: self.inner.clone(),
        }
    }

    pub fn without_hardware(&mut self) {
        self.inner.borrow_mut().hardware_available = false;
    }

    pub fn first_transaction(&self) -> [u8; 4] {
        self.inner.borrow().first_transaction.expect("no transaction recorded")
    }

    pub fn eeprom_read_count(&self) -> usize {
        self.inner.borrow().eeprom_read_count
    }

    pub fn reset_poll_count(&mut self) {
        self.inner.borrow_mut().eeprom_read_count = 0;
    }

    pub fn eeprom_byte(&self, addr: u16) -> u8 {
        self.inner.borrow().eeprom[addr as usize % 1024]
    }

    pub fn flash_byte(&self, addr: u16) -> u8 {
        self.inner.borrow().flash[addr as usize % 1024]
    }

    pub fn last_software_delay(&self) -> u16 {
        self.inner.borrow().last_software_delay
    }
}

pub struct SimulatedEngine {
    inner: Rc<RefCell<Inner>>,
}

impl Engine for SimulatedEngine {
    fn enable(&mut self) {
        let mut s = self.inner.borrow_mut();
        s.reset_asserted = true;
        s.programming_mode = false;
    }

    fn disable(&mut self) {
        let mut s = self.inner.borrow_mut();
        s.reset_asserted = false;
        s.programming_mode = false;
    }

    fn send(&mut self, byte: u8) -> u8 {
        let mut s = self.inner.borrow_mut();
        let pos = s.cmd_len;
        s.cmd[pos] = byte;
        s.cmd_len += 1;

        let mut resp = 0u8;

        if pos == 2 && s.cmd[0] == 0xAC && s.cmd[1] == 0x53 && s.reset_asserted {
            resp = 0x53;
            s.programming_mode = true;
        }

        if s.cmd_len == 4 {
            let cmd = s.cmd;
            s.cmd_len = 0;
            if s.first_transaction.is_none() {
                s.first_transaction = Some(cmd);
            }
            if s.programming_mode && !(cmd[0] == 0xAC && cmd[1] == 0x53) {
                resp = process_command(&mut s, cmd);
            }
        }

        resp
    }

    fn reset_pulse(&mut self) {
        let mut s = self.inner.borrow_mut();
        s.reset_asserted = false;
        s.reset_asserted = true;
    }

    fn select_hardware_slowest(&mut self) -> bool {
        self.inner.borrow().hardware_available
    }

    fn step_hardware_faster(&mut self) -> bool {
        false
    }

    fn step_hardware_slower(&mut self) {}

    fn disable_hardware(&mut self) {}

    fn select_software(&mut self, delay: u16) {
        self.inner.borrow_mut().last_software_delay = delay;
    }

    fn spin(&mut self, _quarter_cycles: u16) {}
}

fn process_command(s: &mut Inner, cmd: [u8; 4]) -> u8 {
    if cmd[0] == 0xF0 {
        return 0;
    }
    if cmd[0] == 0xA0 {
        let addr = ((cmd[1] as u16) << 8) | cmd[2] as u16;
        s.eeprom_read_count += 1;
        return s.eeprom[addr as usize % s.eeprom.len()];
    }
    if cmd[0] == 0xC0 {
        let addr = ((cmd[1] as u16) << 8) | cmd[2] as u16;
        s.eeprom[addr as usize % s.eeprom.len()] = cmd[3];
        return 0;
    }
    if cmd[0] == 0x4C {
        return 0xAA; // non-erased: the commit-poll loop exits on the first readback
    }
    let base = cmd[0] & !0x08;
    let byte_select = (cmd[0] & 0x08) != 0;
    if base == 0x20 {
        let word_addr = ((cmd[1] as u16) << 8) | cmd[2] as u16;
        let byte_addr = (word_addr << 1) | (byte_select as u16);
        return s.flash[byte_addr as usize % s.flash.len()];
    }
    if base == 0x40 {
        let word_addr = ((cmd[1] as u16) << 8) | cmd[2] as u16;
        let byte_addr = (word_addr << 1) | (byte_select as u16);
        s.flash[byte_addr as usize % s.flash.len()] = cmd[3];
        return 0;
    }
    0
}

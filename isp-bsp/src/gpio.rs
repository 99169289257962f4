use stm32ral::gpio;
use stm32ral::{modify_reg, read_reg, write_reg};

pub struct GPIO {
    p: gpio::Instance,
}

impl<'a> GPIO {
    pub fn new(p: gpio::Instance) -> Self {
        GPIO { p }
    }

    pub fn pin(&'a self, n: u8) -> Pin<'a> {
        assert!(n < 16);
        let n = unsafe { core::mem::transmute(n) };
        Pin { n, port: self }
    }

    #[inline(always)]
    pub fn set_high(&'a self, n: PinIndex) -> &Self {
        write_reg!(gpio, self.p, BSRR, 1 << (n as u8));
        self
    }

    #[inline(always)]
    pub fn set_low(&'a self, n: PinIndex) -> &Self {
        write_reg!(gpio, self.p, BSRR, 1 << ((n as u8) + 16));
        self
    }

    #[inline]
    pub fn toggle(&'a self, n: PinIndex) -> &Self {
        let pin = (read_reg!(gpio, self.p, IDR) >> (n as u8)) & 1;
        if pin == 1 {
            self.set_low(n)
        } else {
            self.set_high(n)
        }
    }

    #[inline]
    pub fn set_mode(&'a self, n: PinIndex, mode: u32) -> &Self {
        let offset = (n as u8) * 2;
        let mask = 0b11 << offset;
        let val = (mode << offset) & mask;
        modify_reg!(gpio, self.p, MODER, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_mode_input(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Input)
    }

    #[inline]
    pub fn set_mode_output(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Output)
    }

    #[inline]
    pub fn set_mode_alternate(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Alternate)
    }

    #[inline]
    pub fn set_mode_analog(&'a self, n: PinIndex) -> &Self {
        self.set_mode(n, gpio::MODER::MODER0::RW::Analog)
    }

    #[inline]
    pub fn set_otype(&'a self, n: PinIndex, otype: u32) -> &Self {
        let offset = n as u8;
        let mask = 0b1 << offset;
        let val = (otype << offset) & mask;
        modify_reg!(gpio, self.p, OTYPER, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_otype_opendrain(&'a self, n: PinIndex) -> &Self {
        self.set_otype(n, gpio::OTYPER::OT0::RW::OpenDrain)
    }

    #[inline]
    pub fn set_otype_pushpull(&'a self, n: PinIndex) -> &Self {
        self.set_otype(n, gpio::OTYPER::OT0::RW::PushPull)
    }

    #[inline]
    pub fn set_ospeed(&'a self, n: PinIndex, ospeed: u32) -> &Self {
        let offset = (n as u8) * 2;
        let mask = 0b11 << offset;
        let val = (ospeed << offset) & mask;
        modify_reg!(gpio, self.p, OSPEEDR, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_ospeed_low(&'a self, n: PinIndex) -> &Self {
        self.set_ospeed(n, gpio::OSPEEDR::OSPEEDR0::RW::LowSpeed)
    }

    #[inline]
    pub fn set_ospeed_veryhigh(&'a self, n: PinIndex) -> &Self {
        self.set_ospeed(n, gpio::OSPEEDR::OSPEEDR0::RW::VeryHighSpeed)
    }

    #[inline]
    pub fn set_af(&'a self, n: PinIndex, af: u32) -> &Self {
        let n = n as u8;
        if n < 8 {
            let offset = n * 4;
            let mask = 0b1111 << offset;
            let val = (af << offset) & mask;
            modify_reg!(gpio, self.p, AFRL, |r| (r & !mask) | val);
        } else {
            let offset = (n - 8) * 4;
            let mask = 0b1111 << offset;
            let val = (af << offset) & mask;
            modify_reg!(gpio, self.p, AFRH, |r| (r & !mask) | val);
        }
        self
    }

    #[inline]
    pub fn set_pull(&'a self, n: PinIndex, pull: u32) -> &Self {
        let offset = (n as u8) * 2;
        let mask = 0b11 << offset;
        let val = (pull << offset) & mask;
        modify_reg!(gpio, self.p, PUPDR, |r| (r & !mask) | val);
        self
    }

    #[inline]
    pub fn set_pull_up(&'a self, n: PinIndex) -> &Self {
        self.set_pull(n, gpio::PUPDR::PUPDR0::RW::PullUp)
    }

    #[inline]
    pub fn set_pull_down(&'a self, n: PinIndex) -> &Self {
        self.set_pull(n, gpio::PUPDR::PUPDR0::RW::PullDown)
    }

    #[inline]
    pub fn get_idr(&'a self) -> u32 {
        read_reg!(gpio, self.p, IDR)
    }

    #[inline]
    pub fn get_pin_idr(&'a self, n: PinIndex) -> u32 {
        let n = n as u8;
        (self.get_idr() & (1 << n)) >> n
    }
}

#[repr(u16)]
pub enum PinState {
    Low = 0,
    High = 1,
}

#[derive(Copy, Clone)]
#[repr(u8)]
pub enum PinIndex {
    Pin0 = 0,
    Pin1 = 1,
    Pin2 = 2,
    Pin3 = 3,
    Pin4 = 4,
    Pin5 = 5,
    Pin6 = 6,
    Pin7 = 7,
    Pin8 = 8,
    Pin9 = 9,
    Pin10 = 10,
    Pin11 = 11,
    Pin12 = 12,
    Pin13 = 13,
    Pin14 = 14,
    Pin15 = 15,
}

pub struct Pin<'a> {
    n: PinIndex,
    port: &'a GPIO,
}

impl<'a> Pin<'a> {
    #[inline(always)]
    pub fn set_high(&self) -> &Self {
        self.port.set_high(self.n);
        self
    }

    #[inline(always)]
    pub fn set_low(&self) -> &Self {
        self.port.set_low(self.n);
        self
    }

    #[inline(always)]
    pub fn set_bool(&self, state: bool) {
        match state {
            false => self.set_low(),
            true => self.set_high(),
        };
    }

    #[inline(always)]
    pub fn set_state(&self, state: PinState) {
        match state {
            PinState::Low => self.set_low(),
            PinState::High => self.set_high(),
        };
    }

    #[inline(always)]
    pub fn get_state(&self) -> PinState {
        match self.port.get_pin_idr(self.n) {
            0 => PinState::Low,
            1 => PinState::High,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn is_high(&self) -> bool {
        matches!(self.get_state(), PinState::High)
    }

    #[inline(always)]
    pub fn toggle(&'a self) -> &Self {
        self.port.toggle(self.n);
        self
    }

    #[inline]
    pub fn set_mode_input(&'a self) -> &Self {
        self.port.set_mode_input(self.n);
        self
    }

    #[inline]
    pub fn set_mode_output(&'a self) -> &Self {
        self.port.set_mode_output(self.n);
        self
    }

    #[inline]
    pub fn set_mode_alternate(&'a self) -> &Self {
        self.port.set_mode_alternate(self.n);
        self
    }

    #[inline]
    pub fn set_otype_opendrain(&'a self) -> &Self {
        self.port.set_otype_opendrain(self.n);
        self
    }

    #[inline]
    pub fn set_otype_pushpull(&'a self) -> &Self {
        self.port.set_otype_pushpull(self.n);
        self
    }

    #[inline]
    pub fn set_ospeed_low(&'a self) -> &Self {
        self.port.set_ospeed_low(self.n);
        self
    }

    #[inline]
    pub fn set_ospeed_veryhigh(&'a self) -> &Self {
        self.port.set_ospeed_veryhigh(self.n);
        self
    }

    #[inline]
    pub fn set_af(&'a self, af: u32) -> &Self {
        self.port.set_af(self.n, af);
        self
    }

    #[inline]
    pub fn set_pull_up(&'a self) -> &Self {
        self.port.set_pull_up(self.n);
        self
    }

    #[inline]
    pub fn set_pull_down(&'a self) -> &Self {
        self.port.set_pull_down(self.n);
        self
    }
}

/// Named pins for the USBasp-compatible programmer.
///
/// `sck`/`miso`/`mosi` are shared between the hardware (SPI1 alternate
/// function) and software (plain GPIO) serial engine modes; switching
/// modes reconfigures them in place rather than routing through distinct
/// pins, matching the single ISP header the target connects to.
pub struct Pins<'a> {
    pub led1: Pin<'a>,
    pub led2: Pin<'a>,

    pub reset: Pin<'a>,
    pub sck: Pin<'a>,
    pub miso: Pin<'a>,
    pub mosi: Pin<'a>,

    pub usb_dm: Pin<'a>,
    pub usb_dp: Pin<'a>,

    /// USART2 TX, routed unconditionally; only driven when the firmware's
    /// `debug-trace` feature actually enables the peripheral clock and
    /// constructs a `Uart` over it.
    pub debug_tx: Pin<'a>,
}

impl<'a> Pins<'a> {
    /// Configure I/O pins for their idle (disconnected) state.
    pub fn setup(&self) {
        self.led1
            .set_high()
            .set_otype_opendrain()
            .set_ospeed_low()
            .set_mode_output();
        self.led2
            .set_high()
            .set_otype_opendrain()
            .set_ospeed_low()
            .set_mode_output();

        // Open-drain, idle high: matches the AVR original's RESET drive,
        // which never actively pulls the line low except while attached.
        self.reset
            .set_high()
            .set_otype_opendrain()
            .set_ospeed_low()
            .set_mode_output();

        self.software_mode();

        self.usb_dm
            .set_af(10)
            .set_otype_pushpull()
            .set_ospeed_veryhigh()
            .set_mode_alternate();
        self.usb_dp
            .set_af(10)
            .set_otype_pushpull()
            .set_ospeed_veryhigh()
            .set_mode_alternate();

        self.debug_tx
            .set_af(7)
            .set_otype_pushpull()
            .set_ospeed_low()
            .set_mode_alternate();
    }

    /// Route SCK/MOSI/MISO to the SPI1 peripheral for hardware-accelerated transfers.
    pub fn hardware_mode(&self) {
        self.sck
            .set_af(5)
            .set_otype_pushpull()
            .set_ospeed_veryhigh()
            .set_mode_alternate();
        self.mosi
            .set_af(5)
            .set_otype_pushpull()
            .set_ospeed_veryhigh()
            .set_mode_alternate();
        self.miso.set_af(5).set_mode_alternate();
    }

    /// Drive SCK/MOSI/MISO as plain GPIO for bit-banged transfers.
    pub fn software_mode(&self) {
        self.sck
            .set_low()
            .set_otype_pushpull()
            .set_ospeed_low()
            .set_mode_output();
        self.mosi
            .set_low()
            .set_otype_pushpull()
            .set_ospeed_low()
            .set_mode_output();
        self.miso.set_pull_up().set_mode_input();
    }

    /// Release SCK/MOSI/MISO/RESET to high-impedance inputs. Used when the
    /// serial engine is disabled between programming sessions.
    pub fn release_isp(&self) {
        self.sck.set_mode_input();
        self.mosi.set_mode_input();
        self.miso.set_mode_input();
        self.reset.set_mode_input();
    }
}

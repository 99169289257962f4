//! Top-level application: owns every peripheral instance and drives the
//! main poll loop. Grounded on the teacher's `App` (a struct of `&'a`
//! peripheral references built once in `main`, with `setup`/`poll` split
//! out of the constructor), trimmed to the single USB class this firmware
//! exposes.

use isp_bsp::delay::Delay;
use isp_bsp::gpio::Pins;
use isp_bsp::rcc::RCC;
use isp_bsp::spi::SPI;
use stm32ral::usart;

use isp_firmware::isp::IspDriver;
use isp_firmware::se::SerialEngine;

use crate::usb::USB;

pub struct App<'a> {
    rcc: &'a RCC,
    pins: &'a Pins<'a>,
    spi: &'a SPI,
    delay: &'a Delay,
    usart: usart::Instance,
    usb: &'a mut USB<'a>,
    heartbeat: u32,
}

impl<'a> App<'a> {
    pub fn new(
        rcc: &'a RCC,
        pins: &'a Pins<'a>,
        spi: &'a SPI,
        delay: &'a Delay,
        usart: usart::Instance,
        usb: &'a mut USB<'a>,
    ) -> Self {
        App {
            rcc,
            pins,
            spi,
            delay,
            usart,
            usb,
            heartbeat: 0,
        }
    }

    /// Unsafety: this function should be called from the main context.
    /// No other contexts should be active at the same time.
    pub unsafe fn setup(self) -> RunningApp<'a> {
        let clocks = self.rcc.setup();

        self.pins.setup();

        #[cfg(feature = "debug-trace")]
        isp_firmware::trace::init(isp_bsp::uart::Uart::new(self.usart, &clocks));

        let engine = SerialEngine::new(self.pins, self.spi, self.delay);
        let isp = IspDriver::new(engine);

        self.usb.setup(&clocks, isp, &self.pins.led1);

        RunningApp {
            pins: self.pins,
            usb: self.usb,
            heartbeat: self.heartbeat,
        }
    }
}

/// The application after `setup` has consumed the one-shot bring-up
/// arguments (clock config, UART handoff); only what `poll` needs remains.
pub struct RunningApp<'a> {
    pins: &'a Pins<'a>,
    usb: &'a mut USB<'a>,
    heartbeat: u32,
}

impl<'a> RunningApp<'a> {
    pub fn poll(&mut self) {
        self.usb.poll();

        // A slow, visible heartbeat on LED2 independent of USB activity,
        // so a dead board is distinguishable from an idle one.
        self.heartbeat = self.heartbeat.wrapping_add(1);
        if self.heartbeat % 200_000 == 0 {
            self.pins.led2.toggle();
        }
    }
}

#![no_std]
#![no_main]

mod app;
mod usb;

use panic_rtt_target as _;
use cortex_m_rt::entry;
use rtt_target::{rprintln, rtt_init_print};

use isp_bsp::delay::Delay;
use isp_bsp::gpio::{Pins, GPIO};
use isp_bsp::rcc::RCC;
use isp_bsp::spi::SPI;

use app::App;
use usb::USB;

#[entry]
fn main() -> ! {
    rtt_init_print!();
    rprintln!(
        "Starting isp-firmware {}",
        git_version::git_version!(args = ["--always", "--dirty=-modified"], fallback = "unknown")
    );

    let rcc = RCC::new(stm32ral::rcc::RCC::take().unwrap());
    let delay = Delay::new(stm32ral::syst::SYST::take().unwrap());
    let spi = SPI::new(stm32ral::spi::SPI1::take().unwrap());
    let usart = stm32ral::usart::USART2::take().unwrap();

    let usb_global = stm32ral::otg_fs_global::OTG_FS_GLOBAL::take().unwrap();
    let usb_device = stm32ral::otg_fs_device::OTG_FS_DEVICE::take().unwrap();
    let usb_pwrclk = stm32ral::otg_fs_pwrclk::OTG_FS_PWRCLK::take().unwrap();
    let mut usb = USB::new(usb_global, usb_device, usb_pwrclk);

    let gpioa = GPIO::new(stm32ral::gpio::GPIOA::take().unwrap());
    let gpiob = GPIO::new(stm32ral::gpio::GPIOB::take().unwrap());
    let gpioc = GPIO::new(stm32ral::gpio::GPIOC::take().unwrap());

    // SCK/MISO/MOSI double as SPI1's alternate-function pins in hardware
    // mode and plain GPIOs in software (bit-banged) mode; see
    // `isp_bsp::gpio::Pins::{hardware_mode, software_mode}`.
    let pins = Pins {
        led1: gpioc.pin(13),
        led2: gpioc.pin(14),
        reset: gpiob.pin(0),
        sck: gpioa.pin(5),
        miso: gpioa.pin(6),
        mosi: gpioa.pin(7),
        usb_dm: gpioa.pin(11),
        usb_dp: gpioa.pin(12),
        debug_tx: gpioa.pin(2),
    };

    let app = App::new(&rcc, &pins, &spi, &delay, usart, &mut usb);

    // Unsafety: nothing else runs concurrently with `main`, so this is the
    // only context ever touching these peripherals.
    let mut app = unsafe { app.setup() };

    loop {
        app.poll();
    }
}

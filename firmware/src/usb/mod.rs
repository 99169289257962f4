//! USB peripheral bring-up: owns the OTG_FS peripheral handles and the
//! `usb-device` bus allocator/device, and forwards polling to the
//! [`class::UsbAsp`] control-transfer adapter.
//!
//! Grounded on the teacher's `usb/mod.rs` state machine
//! (`Uninitialized`/`Initialized`/`Initializing`, with the endpoint memory
//! and bus allocator held in `static mut`s because `UsbBusAllocator`
//! borrows need `'static`), trimmed down from five USB classes to one.

use stm32ral::{otg_fs_device, otg_fs_global, otg_fs_pwrclk};

use isp_bsp::gpio::Pin;
use isp_bsp::rcc::Clocks;
use isp_bsp::usb::{UsbBus, UsbBusType};
use usb_device::bus::UsbBusAllocator;
use usb_device::prelude::*;

mod class;
pub use class::{UsbAsp, MANUFACTURER, PRODUCT, PRODUCT_ID, VENDOR_ID};

use isp_firmware::isp::IspDriver;
use isp_firmware::se::SerialEngine;

struct UninitializedUSB {
    global: otg_fs_global::Instance,
    device: otg_fs_device::Instance,
    pwrclk: otg_fs_pwrclk::Instance,
}

struct InitializedUSB<'a> {
    device: UsbDevice<'static, UsbBusType>,
    class: UsbAsp<'a, SerialEngine<'a>>,
}

enum State<'a> {
    Uninitialized(UninitializedUSB),
    Initialized(InitializedUSB<'a>),
    Initializing,
}

impl<'a> State<'a> {
    fn as_initialized_mut(&mut self) -> &mut InitializedUSB<'a> {
        if let State::Initialized(initialized) = self {
            initialized
        } else {
            panic!("USB is not initialized yet");
        }
    }
}

static mut EP_MEMORY: [u32; 320] = [0; 320];
static mut USB_BUS: Option<UsbBusAllocator<UsbBusType>> = None;

/// USB stack interface.
pub struct USB<'a> {
    state: State<'a>,
}

impl<'a> USB<'a> {
    pub fn new(
        global: otg_fs_global::Instance,
        device: otg_fs_device::Instance,
        pwrclk: otg_fs_pwrclk::Instance,
    ) -> Self {
        USB {
            state: State::Uninitialized(UninitializedUSB {
                global,
                device,
                pwrclk,
            }),
        }
    }

    /// Bring up the USB peripheral and enumerate as a USBasp-compatible
    /// programmer, wrapping `isp` behind the vendor control-transfer class.
    pub fn setup(&mut self, clocks: &Clocks, isp: IspDriver<SerialEngine<'a>>, led1: &'a Pin<'a>) {
        let state = core::mem::replace(&mut self.state, State::Initializing);
        if let State::Uninitialized(usb) = state {
            cortex_m::interrupt::free(|_| unsafe {
                let usb = isp_bsp::usb::USB {
                    usb_global: usb.global,
                    usb_device: usb.device,
                    usb_pwrclk: usb.pwrclk,
                    hclk: clocks.hclk(),
                };

                let usb_bus = UsbBus::new(usb, &mut EP_MEMORY);
                USB_BUS = Some(usb_bus);
                let usb_bus = USB_BUS.as_ref().unwrap();

                let class = UsbAsp::new(usb_bus, isp, led1);

                let device = UsbDeviceBuilder::new(usb_bus, UsbVidPid(VENDOR_ID, PRODUCT_ID))
                    .manufacturer(MANUFACTURER)
                    .product(PRODUCT)
                    .serial_number(git_version::git_version!(
                        args = ["--always", "--dirty=-modified"],
                        fallback = "unknown"
                    ))
                    .device_class(0xFF)
                    .build();

                self.state = State::Initialized(InitializedUSB { device, class });
            });
        } else {
            panic!("Invalid state");
        }
    }

    /// Drain a pending USB interrupt. The control-transfer adapter handles
    /// every request internally; nothing is surfaced to the caller.
    pub fn poll(&mut self) {
        let usb = self.state.as_initialized_mut();
        usb.device.poll(&mut [&mut usb.class]);
    }
}

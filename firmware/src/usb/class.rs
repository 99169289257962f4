//! Hardware-facing USB adapter: wires [`usb_device`]'s `UsbClass` control
//! transfer callbacks into [`crate::dispatcher::Dispatcher`].
//!
//! Structurally grounded on the teacher's `usb/dfu.rs` (a minimal vendor
//! class matching bRequest inside `control_in`/`control_out`, with
//! `xfer.accept_with_static`/`xfer.reject`), generalized to stream
//! multi-byte data stages through the dispatcher rather than replying with
//! a single static buffer.

use usb_device::class_prelude::*;
use usb_device::control::{Recipient, Request, RequestType};

use isp_bsp::gpio::Pin;

use isp_firmware::dispatcher::{request, Dispatcher, SetupOutcome, SetupRequest};
use isp_firmware::isp::IspDriver;
use isp_firmware::se::Engine;

/// Vendor/product identity the original USBasp tooling matches against.
pub const VENDOR_ID: u16 = 0x16C0;
pub const PRODUCT_ID: u16 = 0x05DC;
pub const MANUFACTURER: &str = "www.fischl.de";
pub const PRODUCT: &str = "USBasp";

pub struct UsbAsp<'a, E: Engine> {
    interface: InterfaceNumber,
    isp: IspDriver<E>,
    dispatcher: Dispatcher,
    led1: &'a Pin<'a>,
}

impl<'a, E: Engine> UsbAsp<'a, E> {
    pub fn new<B: UsbBus>(
        alloc: &UsbBusAllocator<B>,
        isp: IspDriver<E>,
        led1: &'a Pin<'a>,
    ) -> Self {
        UsbAsp {
            interface: alloc.interface(),
            isp,
            dispatcher: Dispatcher::new(),
            led1,
        }
    }

    fn accepts(req: &Request) -> bool {
        req.request_type == RequestType::Vendor && req.recipient == Recipient::Device
    }

    fn track_session_led(&mut self, brequest: u8) {
        if brequest == request::CONNECT {
            self.led1.set_low();
        } else if brequest == request::DISCONNECT {
            self.led1.set_high();
        }
    }
}

impl<'a, B: UsbBus, E: Engine> UsbClass<B> for UsbAsp<'a, E> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        // Vendor-specific, no endpoints: every transaction happens on EP0.
        writer.interface(self.interface, 0xFF, 0xFF, 0xFF)
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();
        if !Self::accepts(&req) {
            return;
        }
        self.track_session_led(req.request);

        let setup = SetupRequest {
            brequest: req.request,
            w_value: req.value,
            w_index: req.index,
            w_length: req.length,
        };

        match self.dispatcher.handle_setup(&mut self.isp, setup) {
            SetupOutcome::Reply(buf, len) => {
                let len = len as usize;
                xfer.accept(|data| {
                    data[..len].copy_from_slice(&buf[..len]);
                    Ok(len)
                })
                .ok();
            }
            SetupOutcome::AwaitRead => {
                let wlength = req.length as usize;
                let dispatcher = &mut self.dispatcher;
                let isp = &mut self.isp;
                xfer.accept(|data| {
                    let n = wlength.min(data.len());
                    Ok(dispatcher.handle_read(isp, &mut data[..n]))
                })
                .ok();
            }
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();
        if !Self::accepts(&req) {
            return;
        }
        self.track_session_led(req.request);

        let setup = SetupRequest {
            brequest: req.request,
            w_value: req.value,
            w_index: req.index,
            w_length: req.length,
        };

        match self.dispatcher.handle_setup(&mut self.isp, setup) {
            SetupOutcome::Done => {
                xfer.accept().ok();
            }
            SetupOutcome::AwaitWrite => {
                self.dispatcher.handle_write(&mut self.isp, xfer.data());
                xfer.accept().ok();
            }
            _ => {
                xfer.reject().ok();
            }
        }
    }
}

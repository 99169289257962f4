//! Library half of the firmware crate: the hardware-independent core
//! (serial engine contract, ISP protocol driver, command dispatcher) and
//! its debug-trace sink.
//!
//! The USB adapter and application glue (`usb`, `app` in the binary crate)
//! stay out of this crate: they pull in `cortex-m`'s interrupt-disable
//! intrinsics, which only build for real Cortex-M targets, whereas this
//! crate's `#[cfg(test)]` suite (see [`testutil`]) runs on the host. Run
//! this crate's tests with `cargo test --lib` so the `no_std`/`no_main`
//! binary target is never pulled into the host build.
#![cfg_attr(not(test), no_std)]

pub mod dispatcher;
pub mod isp;
pub mod se;
pub mod trace;

#[cfg(test)]
mod testutil;

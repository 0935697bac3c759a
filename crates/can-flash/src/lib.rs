//! The other end of the can-boot protocol: uploads images, moves boards to
//! a new id and finds the boards on a bus.
//!
//! Works over anything that implements `embedded_hal::can::nb::Can`, with a
//! `groundhog` timer for the reply timeouts, so the same client runs on a
//! PC behind a CAN adapter or on a gateway MCU.

#![cfg_attr(not(test), no_std)]

pub mod boards;
pub mod client;
pub mod image;

#[cfg(test)]
mod testing;

pub use boards::BoardSet;
pub use client::{Client, ClientError, Timing};
pub use image::{Image, ImageError};

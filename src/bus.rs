//! Glue between the CAN receive interrupt and the foreground loop.
//!
//! The interrupt handler only copies frames into a [`heapless::spsc`] queue.
//! [`QueuedBus`] drains the queue on the foreground side and forwards
//! transmissions to the hardware, so the rest of the bootloader sees a plain
//! `embedded_hal` CAN interface.

use embedded_hal::can::{self, ErrorKind};
use heapless::spsc::{Consumer, Producer};

use crate::frame::BusFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The receive queue was full and a frame was dropped
    Overrun,
    /// The controller refused a frame for transmission
    Transmit,
}

impl can::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            BusError::Overrun => ErrorKind::Overrun,
            BusError::Transmit => ErrorKind::Other,
        }
    }
}

/// The transmit half of a CAN controller.
pub trait FrameSink {
    fn send(&mut self, frame: &BusFrame) -> nb::Result<(), BusError>;
}

/// Receive side of the queue, called from the interrupt handler.
///
/// A full queue drops the new frame. The flashing tool waits for every
/// reply, so this only happens under foreign bus traffic.
pub fn enqueue<const N: usize>(
    producer: &mut Producer<'_, BusFrame, N>,
    frame: BusFrame,
) -> Result<(), BusError> {
    producer.enqueue(frame).map_err(|_| {
        boot_log!(warn, "CAN receive queue full, frame dropped");
        BusError::Overrun
    })
}

pub struct QueuedBus<'q, T, const N: usize> {
    rx: Consumer<'q, BusFrame, N>,
    tx: T,
}

impl<'q, T: FrameSink, const N: usize> QueuedBus<'q, T, N> {
    pub fn new(rx: Consumer<'q, BusFrame, N>, tx: T) -> Self {
        Self { rx, tx }
    }
}

impl<'q, T: FrameSink, const N: usize> can::nb::Can for QueuedBus<'q, T, N> {
    type Frame = BusFrame;
    type Error = BusError;

    fn transmit(&mut self, frame: &BusFrame) -> nb::Result<Option<BusFrame>, BusError> {
        self.tx.send(frame)?;
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<BusFrame, BusError> {
        self.rx.dequeue().ok_or(nb::Error::WouldBlock)
    }
}

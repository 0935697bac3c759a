//! Wire format of the bootloader protocol.
//!
//! Every command is a single classic CAN data frame with identifier
//! [`CANID_CMD`] and exactly eight data bytes:
//!
//! * 1 byte: board id the command is addressed to
//! * 1 byte: command code
//! * 2 bytes: par1, little endian
//! * 4 bytes: par2, little endian
//!
//! Every reply is a data frame with identifier [`CANID_REPLY`] and three
//! bytes: our board id, the command code being answered, and an error code.

use core::convert::TryFrom;

use embedded_hal::can::{Frame, Id, StandardId};

use crate::{
    consts::{CANID_CMD, CANID_REPLY},
    flash::FlashError,
    page_buffer::RangeError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Store par2 at word offset par1 of the page buffer
    WriteBuf = 1,
    /// Commit the page buffer to page par1 if its CRC equals par2
    WritePage = 2,
    /// Record an image of par1 pages if its CRC equals par2
    WriteCrc = 3,
    /// Answer, nothing else
    Ping = 4,
    /// Persist par1 as the new board id
    SetId = 5,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(other: u8) -> Result<Self, u8> {
        match other {
            1 => Ok(Command::WriteBuf),
            2 => Ok(Command::WritePage),
            3 => Ok(Command::WriteCrc),
            4 => Ok(Command::Ping),
            5 => Ok(Command::SetId),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    InvalidPageNum = 1,
    InvalidCrc = 2,
    FlashWrite = 3,
    InvalidId = 4,
    InvalidOffset = 5,
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(other: u8) -> Result<Self, u8> {
        match other {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::InvalidPageNum),
            2 => Ok(ErrorCode::InvalidCrc),
            3 => Ok(ErrorCode::FlashWrite),
            4 => Ok(ErrorCode::InvalidId),
            5 => Ok(ErrorCode::InvalidOffset),
            other => Err(other),
        }
    }
}

impl From<FlashError> for ErrorCode {
    fn from(_: FlashError) -> Self {
        ErrorCode::FlashWrite
    }
}

impl From<RangeError> for ErrorCode {
    fn from(_: RangeError) -> Self {
        ErrorCode::InvalidOffset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandFrame {
    pub board: u8,
    pub cmd: u8,
    pub par1: u16,
    pub par2: u32,
}

impl CommandFrame {
    pub const LEN: usize = 8;

    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            board: bytes[0],
            cmd: bytes[1],
            par1: u16::from_le_bytes([bytes[2], bytes[3]]),
            par2: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = self.board;
        bytes[1] = self.cmd;
        bytes[2..4].copy_from_slice(&self.par1.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.par2.to_le_bytes());
        bytes
    }

    /// Applies the reception filter: only standard data frames with the
    /// command identifier and exactly eight bytes are commands. Anything else
    /// on the bus is somebody else's traffic.
    pub fn from_can<F: Frame>(frame: &F) -> Option<Self> {
        match frame.id() {
            Id::Standard(id) if id.as_raw() == CANID_CMD => {}
            _ => return None,
        }

        if frame.is_remote_frame() || frame.dlc() != Self::LEN || frame.data().len() != Self::LEN {
            boot_log!(trace, "dropping command frame with dlc {=usize}", frame.dlc());
            return None;
        }

        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(frame.data());

        Some(Self::from_bytes(&bytes))
    }

    pub fn to_can<F: Frame>(&self) -> Option<F> {
        let id = StandardId::new(CANID_CMD)?;
        F::new(id, &self.to_bytes())
    }

    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.cmd).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResponseFrame {
    pub board_id: u8,
    pub cmd: u8,
    pub error: ErrorCode,
}

impl ResponseFrame {
    pub const LEN: usize = 3;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [self.board_id, self.cmd, self.error as u8]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }

        Some(Self {
            board_id: bytes[0],
            cmd: bytes[1],
            error: ErrorCode::try_from(bytes[2]).ok()?,
        })
    }

    pub fn to_can<F: Frame>(&self) -> Option<F> {
        let id = StandardId::new(CANID_REPLY)?;
        F::new(id, &self.to_bytes())
    }

    pub fn from_can<F: Frame>(frame: &F) -> Option<Self> {
        match frame.id() {
            Id::Standard(id) if id.as_raw() == CANID_REPLY => Self::from_bytes(frame.data()),
            _ => None,
        }
    }
}

/// A plain classic CAN frame, used to move frames between the bus driver's
/// receive interrupt and the foreground loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    id: Id,
    remote: bool,
    dlc: usize,
    data: [u8; 8],
}

impl Frame for BusFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }

        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);

        Some(Self {
            id: id.into(),
            remote: false,
            dlc: data.len(),
            data: buf,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }

        Some(Self {
            id: id.into(),
            remote: true,
            dlc,
            data: [0u8; 8],
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc]
        }
    }
}

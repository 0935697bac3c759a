//! The flashing side of the bootloader protocol.
//!
//! Every exchange is one command frame and at most one reply. A command that
//! gets no reply within the timeout is sent again, up to [`Timing::retries`]
//! times. A reply carrying an error code is final.

use can_boot::{
    boot_log,
    checksum::SoftCrc,
    frame::{Command, CommandFrame, ErrorCode, ResponseFrame},
};
use embedded_hal::can::nb::Can;
use groundhog::RollingTimer;

use crate::{
    boards::{BoardSet, UNASSIGNED_ID},
    image::{Image, ImageError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait for the reply to one upload command
    pub reply_timeout_ms: u32,
    /// Attempts per upload command
    pub retries: u8,
    pub ping_timeout_ms: u32,
    /// PINGs sent while connecting, and rounds of a discovery sweep
    pub ping_retries: u8,
    /// SET_ID is sent once. The board may already answer under its new id.
    pub set_id_timeout_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 50,
            retries: 10,
            ping_timeout_ms: 100,
            ping_retries: 10,
            set_id_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError<E> {
    Bus(E),
    /// The bus frame type can not carry a command frame
    Encode,
    /// Nothing came back, retries included
    NoReply { cmd: Command },
    /// The board answered with an error
    Rejected {
        cmd: Command,
        par1: u16,
        error: ErrorCode,
    },
    NotConnected { board: u8 },
    Image(ImageError),
}

impl<E> From<ImageError> for ClientError<E> {
    fn from(error: ImageError) -> Self {
        ClientError::Image(error)
    }
}

pub struct Client<B, T> {
    bus: B,
    timer: T,
    timing: Timing,
}

impl<B, T> Client<B, T>
where
    B: Can,
    T: RollingTimer<Tick = u32>,
{
    pub fn new(bus: B, timer: T) -> Self {
        Self::with_timing(bus, timer, Timing::default())
    }

    pub fn with_timing(bus: B, timer: T, timing: Timing) -> Self {
        Self { bus, timer, timing }
    }

    pub fn release(self) -> (B, T) {
        (self.bus, self.timer)
    }

    /// PINGs `board` until a reply under that id comes back.
    pub fn connect(&mut self, board: u8) -> Result<(), ClientError<B::Error>> {
        for _ in 0..self.timing.ping_retries {
            self.send(board, Command::Ping, 0, 0)?;

            let reply = self.await_reply(Some(board), Command::Ping, self.timing.ping_timeout_ms)?;
            if reply.is_some() {
                boot_log!(info, "Connected to board {=u8}", board);
                return Ok(());
            }
        }

        boot_log!(warn, "Board {=u8} does not answer", board);
        Err(ClientError::NotConnected { board })
    }

    pub fn flash(&mut self, board: u8, image: &Image<'_>) -> Result<(), ClientError<B::Error>> {
        self.flash_with_progress(board, image, |_, _| {})
    }

    /// Uploads `image` page by page, then has the board record it as the
    /// application. `progress` gets the number of pages written so far and
    /// the page count after every page.
    pub fn flash_with_progress<P>(
        &mut self,
        board: u8,
        image: &Image<'_>,
        mut progress: P,
    ) -> Result<(), ClientError<B::Error>>
    where
        P: FnMut(u16, u16),
    {
        self.connect(board)?;

        let pages = image.page_count();
        let mut crc = SoftCrc::new();

        for page in 0..pages {
            for (offset, word) in image.page_words(page).enumerate() {
                self.request(board, Command::WriteBuf, offset as u16, word)?;
            }

            let page_crc = image.page_crc(page, &mut crc);
            self.request(board, Command::WritePage, page, page_crc)?;
            boot_log!(debug, "page {=u16}/{=u16} CRC OK", page, pages);
            progress(page + 1, pages);
        }

        let image_crc = image.crc(&mut crc);
        self.request(board, Command::WriteCrc, pages, image_crc)?;

        boot_log!(info, "Board {=u8} flashed, {=u16} pages", board, pages);
        Ok(())
    }

    /// Stores `new_id` on `board`. The reply already comes back under the
    /// new id, so it is accepted from whichever id answers.
    pub fn change_id(&mut self, board: u8, new_id: u8) -> Result<(), ClientError<B::Error>> {
        self.connect(board)?;

        boot_log!(info, "Changing board id {=u8} to {=u8}", board, new_id);
        self.send(board, Command::SetId, new_id as u16, 0)?;

        match self.await_reply(None, Command::SetId, self.timing.set_id_timeout_ms)? {
            Some(reply) => check(&reply, Command::SetId, new_id as u16),
            None => Err(ClientError::NoReply {
                cmd: Command::SetId,
            }),
        }
    }

    /// Collects the ids of every board that answers a PING sweep.
    pub fn discover(&mut self) -> Result<BoardSet, ClientError<B::Error>> {
        let mut found = BoardSet::new();

        for _ in 0..self.timing.ping_retries {
            // every board answers PING, whatever the address
            self.send(UNASSIGNED_ID, Command::Ping, 0, 0)?;

            let start = self.timer.get_ticks();
            while self.millis_since(start) < self.timing.ping_timeout_ms {
                if let Some(reply) = self.receive()? {
                    if reply.cmd == Command::Ping as u8 && found.insert(reply.board_id) {
                        boot_log!(info, "Found board {=u8}", reply.board_id);
                    }
                }
            }
        }

        if found.contains(UNASSIGNED_ID) {
            boot_log!(warn, "A board with a fresh bootloader needs an id");
        }

        Ok(found)
    }

    /// Sends a command until it is answered, then checks the answer.
    fn request(
        &mut self,
        board: u8,
        cmd: Command,
        par1: u16,
        par2: u32,
    ) -> Result<(), ClientError<B::Error>> {
        for _ in 0..self.timing.retries {
            self.send(board, cmd, par1, par2)?;

            if let Some(reply) = self.await_reply(Some(board), cmd, self.timing.reply_timeout_ms)? {
                return check(&reply, cmd, par1);
            }
            boot_log!(debug, "No reply to {=u8}, sending again", cmd as u8);
        }

        Err(ClientError::NoReply { cmd })
    }

    fn send(
        &mut self,
        board: u8,
        cmd: Command,
        par1: u16,
        par2: u32,
    ) -> Result<(), ClientError<B::Error>> {
        let frame: B::Frame = CommandFrame {
            board,
            cmd: cmd as u8,
            par1,
            par2,
        }
        .to_can()
        .ok_or(ClientError::Encode)?;

        nb::block!(self.bus.transmit(&frame)).map_err(ClientError::Bus)?;
        Ok(())
    }

    /// The first reply to `cmd`, from `board` if given, that arrives in time.
    fn await_reply(
        &mut self,
        board: Option<u8>,
        cmd: Command,
        timeout_ms: u32,
    ) -> Result<Option<ResponseFrame>, ClientError<B::Error>> {
        let start = self.timer.get_ticks();

        while self.millis_since(start) < timeout_ms {
            if let Some(reply) = self.receive()? {
                let from_board = board.map_or(true, |id| id == reply.board_id);
                if from_board && reply.cmd == cmd as u8 {
                    return Ok(Some(reply));
                }
            }
        }

        Ok(None)
    }

    /// One bootloader reply, if the next frame on the bus is one.
    fn receive(&mut self) -> Result<Option<ResponseFrame>, ClientError<B::Error>> {
        match self.bus.receive() {
            Ok(frame) => Ok(ResponseFrame::from_can(&frame)),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(e)) => Err(ClientError::Bus(e)),
        }
    }

    fn millis_since(&self, start: u32) -> u32 {
        let ticks = self.timer.ticks_since(start) as u64;
        (ticks * 1000 / T::TICKS_PER_SECOND as u64) as u32
    }
}

fn check<E>(reply: &ResponseFrame, cmd: Command, par1: u16) -> Result<(), ClientError<E>> {
    match reply.error {
        ErrorCode::Success => Ok(()),
        error => {
            boot_log!(
                error,
                "Board {=u8} rejected {=u8} ({=u16}): {=u8}",
                reply.board_id,
                cmd as u8,
                par1,
                error as u8
            );
            Err(ClientError::Rejected { cmd, par1, error })
        }
    }
}

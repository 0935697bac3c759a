use core::convert::TryFrom;

use crate::{
    checksum::CrcEngine,
    consts::{APP_BASE, PAGE_BYTES, PAGE_COUNT},
    flash::{self, FlashDriver},
    frame::{Command, CommandFrame, ErrorCode, ResponseFrame},
    image,
    page_buffer::PageBuffer,
    vars::{self, AppRecord, BootloaderVariables},
};

/// Decodes commands and applies them to the page buffer and flash.
///
/// Owns everything a command can touch, so a command has been applied
/// completely by the time `handle` returns.
pub struct Dispatcher<F, C> {
    flash: F,
    crc: C,
    buffer: PageBuffer,
}

impl<F, C> Dispatcher<F, C>
where
    F: FlashDriver,
    C: CrcEngine,
{
    pub fn new(flash: F, crc: C) -> Self {
        Self {
            flash,
            crc,
            buffer: PageBuffer::new(),
        }
    }

    /// Runs one command. `None` means the frame was not for us: an unknown
    /// command, or anything but PING addressed to another board.
    pub fn handle(&mut self, frame: &CommandFrame) -> Option<ResponseFrame> {
        let command = frame.command();
        let board_id = self.variables().board.board_id;

        // Every board answers PING, whatever its id, so a tool can find
        // boards with a wrong or fresh id.
        if command == Some(Command::Ping) {
            boot_log!(debug, "ping");
            return Some(ResponseFrame {
                board_id,
                cmd: frame.cmd,
                error: ErrorCode::Success,
            });
        }

        if frame.board != board_id {
            boot_log!(trace, "frame for board {=u8}, we are {=u8}", frame.board, board_id);
            return None;
        }

        let command = match command {
            Some(command) => command,
            None => {
                boot_log!(warn, "Unexpected command: {=u8}", frame.cmd);
                return None;
            }
        };

        let result = match command {
            Command::WriteBuf => self.write_buf(frame.par1, frame.par2),
            Command::WritePage => self.write_page(frame.par1, frame.par2),
            Command::WriteCrc => self.write_crc(frame.par1, frame.par2),
            Command::SetId => self.set_id(frame.par1),
            Command::Ping => Ok(()),
        };

        let error = match result {
            Ok(()) => ErrorCode::Success,
            Err(code) => {
                boot_log!(warn, "{:?} failed: {:?}", command, code);
                code
            }
        };

        // A SET_ID reply already goes out under the new id
        Some(ResponseFrame {
            board_id: self.variables().board.board_id,
            cmd: frame.cmd,
            error,
        })
    }

    pub fn variables(&self) -> BootloaderVariables {
        vars::read(&self.flash)
    }

    /// Checks the recorded application against flash.
    pub fn image_is_bootable(&mut self) -> bool {
        let app = self.variables().app;
        image::is_bootable(&self.flash, &mut self.crc, &app)
    }

    #[cfg(test)]
    pub(crate) fn page_buffer(&self) -> &PageBuffer {
        &self.buffer
    }

    #[cfg(test)]
    pub(crate) fn flash(&self) -> &F {
        &self.flash
    }

    #[cfg(test)]
    pub(crate) fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    fn write_buf(&mut self, offset: u16, word: u32) -> Result<(), ErrorCode> {
        self.buffer.set_word(offset, word)?;
        Ok(())
    }

    fn write_page(&mut self, page: u16, expected_crc: u32) -> Result<(), ErrorCode> {
        if page >= PAGE_COUNT {
            return Err(ErrorCode::InvalidPageNum);
        }

        let crc = self.crc.checksum(self.buffer.as_slice());
        if crc != expected_crc {
            boot_log!(
                warn,
                "page {=u16}: buffer CRC {=u32:X}, expected {=u32:X}",
                page,
                crc,
                expected_crc
            );
            return Err(ErrorCode::InvalidCrc);
        }

        let address = APP_BASE + (page as u32) * PAGE_BYTES;
        boot_log!(info, "Writing page {=u16} at {=u32:X}...", page, address);
        flash::commit(&mut self.flash, address, self.buffer.as_slice())?;

        Ok(())
    }

    fn write_crc(&mut self, pages: u16, expected_crc: u32) -> Result<(), ErrorCode> {
        if pages > PAGE_COUNT {
            return Err(ErrorCode::InvalidPageNum);
        }

        let crc = image::image_crc(&self.flash, &mut self.crc, pages);
        if crc != expected_crc {
            boot_log!(
                warn,
                "image of {=u16} pages: CRC {=u32:X}, expected {=u32:X}",
                pages,
                crc,
                expected_crc
            );
            return Err(ErrorCode::InvalidCrc);
        }

        let mut vars = self.variables();
        vars.app = AppRecord {
            page_count: pages as u32,
            crc: expected_crc,
        };
        vars::write(&mut self.flash, &vars)?;

        boot_log!(info, "Image of {=u16} pages recorded, CRC {=u32:X}", pages, expected_crc);
        Ok(())
    }

    fn set_id(&mut self, new_id: u16) -> Result<(), ErrorCode> {
        let new_id = u8::try_from(new_id).map_err(|_| ErrorCode::InvalidId)?;

        let mut vars = self.variables();
        boot_log!(info, "Updating board id: from {=u8} to {=u8}", vars.board.board_id, new_id);
        vars.board.board_id = new_id;
        vars::write(&mut self.flash, &vars)?;

        Ok(())
    }
}

//! The bootloader variables page.
//!
//! One small record at [`VARS_ADDR`], the page directly below the
//! application. It is always read and written as a whole: changing one field
//! means reading the record, changing the field and committing the record
//! again, which erases and reprograms the whole page.
//!
//! Layout, little endian words:
//!
//! * 0: application page count
//! * 1: application CRC
//! * 2..=3: bootloader build id
//! * 4: board id in the low byte, upper three bytes zero

use crate::{
    consts::{PAGE_BYTES, PAGE_COUNT, VARS_ADDR},
    flash::{self, FlashDriver, FlashError},
};

/// The last application image that passed a whole image CRC check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppRecord {
    pub page_count: u32,
    pub crc: u32,
}

impl AppRecord {
    pub const EMPTY: Self = Self {
        page_count: 0,
        crc: 0,
    };

    /// The page count, if it describes an image we could boot at all.
    pub fn bootable_pages(&self) -> Option<u16> {
        if self.page_count > 0 && self.page_count <= PAGE_COUNT as u32 {
            Some(self.page_count as u16)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardRecord {
    pub build_id: u64,
    pub board_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootloaderVariables {
    pub app: AppRecord,
    pub board: BoardRecord,
}

impl BootloaderVariables {
    pub const WORDS: usize = 5;
    pub const LEN: usize = Self::WORDS * 4;

    /// What a bootloader with a new build id starts from: no application and
    /// board id zero.
    pub fn fresh(build_id: u64) -> Self {
        Self {
            app: AppRecord::EMPTY,
            board: BoardRecord {
                build_id,
                board_id: 0,
            },
        }
    }

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [
            self.app.page_count,
            self.app.crc,
            self.board.build_id as u32,
            (self.board.build_id >> 32) as u32,
            self.board.board_id as u32,
        ]
    }

    pub fn from_words(words: &[u32; Self::WORDS]) -> Self {
        Self {
            app: AppRecord {
                page_count: words[0],
                crc: words[1],
            },
            board: BoardRecord {
                build_id: (words[2] as u64) | ((words[3] as u64) << 32),
                board_id: words[4] as u8,
            },
        }
    }
}

const _: () = assert!(BootloaderVariables::LEN % 4 == 0);
const _: () = assert!(BootloaderVariables::LEN <= PAGE_BYTES as usize);

/// Reads the record straight out of the mapped flash page.
pub fn read<F: FlashDriver>(flash: &F) -> BootloaderVariables {
    let mut words = [0u32; BootloaderVariables::WORDS];
    (VARS_ADDR..)
        .step_by(4)
        .zip(words.iter_mut())
        .for_each(|(addr, w)| *w = flash.read_word(addr));

    BootloaderVariables::from_words(&words)
}

pub fn write<F: FlashDriver>(flash: &mut F, vars: &BootloaderVariables) -> Result<(), FlashError> {
    flash::commit(flash, VARS_ADDR, &vars.to_words())
}

/// Discards the stored record if it was written by a different bootloader
/// build. The page layout or the application assumptions may have changed,
/// so nothing in it can be trusted.
///
/// Returns whether the record was rewritten.
pub fn migrate<F: FlashDriver>(flash: &mut F, build_id: u64) -> Result<bool, FlashError> {
    let stored = read(flash);

    if stored.board.build_id == build_id {
        return Ok(false);
    }

    boot_log!(
        warn,
        "bootloader build changed ({=u64} -> {=u64}), resetting variables",
        stored.board.build_id,
        build_id
    );

    write(flash, &BootloaderVariables::fresh(build_id))?;
    Ok(true)
}

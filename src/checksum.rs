use ::crc::{Crc, Digest, CRC_32_MPEG_2};

/// A CRC-32 unit fed one word at a time.
///
/// The STM32 CRC peripheral computes CRC-32/MPEG-2 (poly 0x04C11DB7, init
/// 0xFFFFFFFF, no reflection, no final xor) and consumes each 32-bit word
/// most significant byte first. The flashing tool computes the same thing
/// over byte-swapped words, so every implementation of this trait has to
/// agree with [`SoftCrc`].
pub trait CrcEngine {
    fn reset(&mut self);
    fn feed(&mut self, word: u32);
    fn finish(&mut self) -> u32;

    fn checksum(&mut self, words: &[u32]) -> u32 {
        self.reset();
        words.iter().for_each(|w| self.feed(*w));
        self.finish()
    }
}

static CRC32_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Table driven software implementation.
///
/// The board uses its CRC peripheral instead. This one is for host builds:
/// the `can-flash` client checksums images with it before uploading.
pub struct SoftCrc {
    digest: Digest<'static, u32>,
}

impl SoftCrc {
    pub fn new() -> Self {
        Self {
            digest: CRC32_MPEG2.digest(),
        }
    }
}

impl Default for SoftCrc {
    fn default() -> Self {
        Self::new()
    }
}

impl CrcEngine for SoftCrc {
    fn reset(&mut self) {
        self.digest = CRC32_MPEG2.digest();
    }

    fn feed(&mut self, word: u32) {
        self.digest.update(&word.to_be_bytes());
    }

    fn finish(&mut self) -> u32 {
        core::mem::replace(&mut self.digest, CRC32_MPEG2.digest()).finalize()
    }
}

//! Application binaries the way the bootloader takes them.
//!
//! The board stores whole pages of little endian words. A binary that ends
//! part way into a page is padded with zeros up to the page boundary, and
//! the padding is part of every CRC.

use can_boot::{
    checksum::CrcEngine,
    consts::{PAGE_BYTES, PAGE_COUNT, PAGE_SIZE},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageError {
    Empty,
    /// More pages than the application region holds
    TooLarge { pages: usize },
}

/// A raw application binary, checked to fit the application region.
#[derive(Debug, Clone, Copy)]
pub struct Image<'a> {
    bytes: &'a [u8],
    pages: u16,
}

impl<'a> Image<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }

        let page_bytes = PAGE_BYTES as usize;
        let pages = (bytes.len() + page_bytes - 1) / page_bytes;
        if pages > PAGE_COUNT as usize {
            return Err(ImageError::TooLarge { pages });
        }

        Ok(Self {
            bytes,
            pages: pages as u16,
        })
    }

    pub fn page_count(&self) -> u16 {
        self.pages
    }

    /// Word `offset` of `page` as flash will hold it. Past the end of the
    /// binary every byte reads as zero.
    pub fn word(&self, page: u16, offset: usize) -> u32 {
        let start = page as usize * PAGE_BYTES as usize + offset * 4;
        let mut word = [0u8; 4];

        if let Some(tail) = self.bytes.get(start..) {
            let len = tail.len().min(4);
            word[..len].copy_from_slice(&tail[..len]);
        }

        u32::from_le_bytes(word)
    }

    pub fn page_words(&self, page: u16) -> impl Iterator<Item = u32> + '_ {
        (0..PAGE_SIZE).map(move |offset| self.word(page, offset))
    }

    /// What WRITE_PAGE expects for `page`.
    pub fn page_crc<C: CrcEngine>(&self, page: u16, crc: &mut C) -> u32 {
        crc.reset();
        self.page_words(page).for_each(|w| crc.feed(w));
        crc.finish()
    }

    /// What WRITE_CRC expects for the whole image.
    pub fn crc<C: CrcEngine>(&self, crc: &mut C) -> u32 {
        crc.reset();
        (0..self.pages)
            .flat_map(|page| self.page_words(page))
            .for_each(|w| crc.feed(w));
        crc.finish()
    }
}

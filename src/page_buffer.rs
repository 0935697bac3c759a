use crate::consts::PAGE_SIZE;

/// Offset past the end of the page buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangeError;

/// RAM staging area for exactly one flash page.
///
/// NOTE: The buffer is never cleared. After a page commit it still holds
/// that page, and a tool that only rewrites some words gets the old contents
/// in the rest.
pub struct PageBuffer {
    words: [u32; PAGE_SIZE],
}

impl PageBuffer {
    pub const fn new() -> Self {
        Self {
            words: [0u32; PAGE_SIZE],
        }
    }

    pub fn set_word(&mut self, offset: u16, value: u32) -> Result<(), RangeError> {
        let slot = self.words.get_mut(offset as usize).ok_or(RangeError)?;
        *slot = value;
        Ok(())
    }

    pub fn word(&self, offset: u16) -> Option<u32> {
        self.words.get(offset as usize).copied()
    }

    pub fn as_slice(&self) -> &[u32; PAGE_SIZE] {
        &self.words
    }
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn in_range_writes_read_back(offset in 0u16..(PAGE_SIZE as u16), value in any::<u32>()) {
            let mut buf = PageBuffer::new();
            prop_assert_eq!(buf.set_word(offset, value), Ok(()));
            prop_assert_eq!(buf.word(offset), Some(value));
        }

        #[test]
        fn out_of_range_writes_change_nothing(offset in (PAGE_SIZE as u16)..=u16::MAX, value in any::<u32>()) {
            let mut buf = PageBuffer::new();
            buf.set_word(0, 0xAAAA_5555).unwrap();
            let before = *buf.as_slice();

            prop_assert_eq!(buf.set_word(offset, value), Err(RangeError));
            prop_assert_eq!(buf.as_slice(), &before);
        }
    }

    #[test]
    fn contents_survive_until_overwritten() {
        let mut buf = PageBuffer::new();
        buf.set_word(3, 3).unwrap();
        buf.set_word(4, 4).unwrap();
        buf.set_word(3, 33).unwrap();

        assert_eq!(buf.word(3), Some(33));
        assert_eq!(buf.word(4), Some(4));
        assert_eq!(buf.word(PAGE_SIZE as u16), None);
    }
}

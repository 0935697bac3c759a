use core::ops::{Deref, DerefMut};

use crate::consts::{PAGE_BYTES, PAGE_SIZE};

/// The flash controller, as far as the bootloader needs it.
///
/// Addresses are absolute bus addresses. `erase_page` and `program_word` are
/// only called between `unlock` and `lock`.
pub trait FlashDriver {
    type Error;

    /// Flash is memory mapped, so this is a plain load.
    fn read_word(&self, address: u32) -> u32;

    fn unlock(&mut self);
    fn lock(&mut self);

    /// Erases the page starting at `address`. Blocks until done.
    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Programs one word of previously erased flash. Blocks until done.
    fn program_word(&mut self, address: u32, word: u32) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    EraseFailed,
    ProgramFailed,
    VerifyFailed,
}

/// Write access to the flash controller. Locks again when dropped, so every
/// early return re-locks the controller.
struct Unlocked<'a, F: FlashDriver> {
    flash: &'a mut F,
}

impl<'a, F: FlashDriver> Unlocked<'a, F> {
    fn new(flash: &'a mut F) -> Self {
        flash.unlock();
        Self { flash }
    }
}

impl<'a, F: FlashDriver> Deref for Unlocked<'a, F> {
    type Target = F;

    fn deref(&self) -> &F {
        self.flash
    }
}

impl<'a, F: FlashDriver> DerefMut for Unlocked<'a, F> {
    fn deref_mut(&mut self) -> &mut F {
        self.flash
    }
}

impl<'a, F: FlashDriver> Drop for Unlocked<'a, F> {
    fn drop(&mut self) {
        self.flash.lock();
    }
}

/// Does flash at `address` already hold `words`?
pub fn matches<F: FlashDriver>(flash: &F, address: u32, words: &[u32]) -> bool {
    (address..)
        .step_by(4)
        .zip(words)
        .all(|(addr, word)| flash.read_word(addr) == *word)
}

/// Writes `words` to flash starting at the page aligned `address`.
///
/// Every page the words touch is erased first. If flash already holds
/// exactly these words nothing is erased or programmed at all, so committing
/// the same data twice costs one erase cycle, not two.
///
/// This is not transactional. A failed program leaves the page partially
/// written, which is only safe because nothing is booted without a whole
/// image CRC check first.
pub fn commit<F: FlashDriver>(flash: &mut F, address: u32, words: &[u32]) -> Result<(), FlashError> {
    debug_assert!(address % PAGE_BYTES == 0);

    if matches(flash, address, words) {
        boot_log!(info, "flash at {=u32:X} already up to date", address);
        return Ok(());
    }

    {
        let mut unlocked = Unlocked::new(flash);

        for page in (address..).step_by(PAGE_BYTES as usize).take(pages_spanned(words.len())) {
            boot_log!(info, "erasing page at {=u32:X}...", page);
            if unlocked.erase_page(page).is_err() {
                boot_log!(error, "Erase failed at {=u32:X}!", page);
                return Err(FlashError::EraseFailed);
            }
        }

        for (addr, word) in (address..).step_by(4).zip(words) {
            if unlocked.program_word(addr, *word).is_err() {
                boot_log!(error, "Program failed at {=u32:X}!", addr);
                return Err(FlashError::ProgramFailed);
            }
        }
    }

    if !matches(flash, address, words) {
        boot_log!(error, "Verify failed at {=u32:X}!", address);
        return Err(FlashError::VerifyFailed);
    }

    Ok(())
}

fn pages_spanned(words: usize) -> usize {
    ((words + PAGE_SIZE - 1) / PAGE_SIZE).max(1)
}

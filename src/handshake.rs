//! Hand-off to the application across a reset.
//!
//! Peripheral state is hard to undo, so the bootloader never jumps to the
//! application directly. It stores [`MAGIC_VALUE`] in a RAM word that
//! survives a system reset and resets. The next boot finds the value,
//! clears it and jumps before touching any peripheral.

use core::ptr;

/// Magic "boot the application" value.
pub const MAGIC_VALUE: u32 = 0x3605_1BF3;

/// A RAM word outside the sections the runtime initializes.
pub const MAGIC_ADDR: usize = 0x2000_1000;

/// One word of memory that keeps its value across a system reset.
pub trait SentinelCell {
    fn read(&self) -> u32;
    fn write(&mut self, value: u32);
}

/// The real thing: a volatile word of SRAM.
pub struct RamCell {
    ptr: *mut u32,
}

impl RamCell {
    /// # Safety
    ///
    /// `address` must be a valid, aligned RAM word that nothing else uses,
    /// and the cell must be the only handle to it.
    pub unsafe fn at(address: usize) -> Self {
        Self {
            ptr: address as *mut u32,
        }
    }
}

impl SentinelCell for RamCell {
    fn read(&self) -> u32 {
        // SAFETY: see `RamCell::at`
        unsafe { ptr::read_volatile(self.ptr) }
    }

    fn write(&mut self, value: u32) {
        // SAFETY: see `RamCell::at`
        unsafe { ptr::write_volatile(self.ptr, value) }
    }
}

/// Ask the next boot to jump to the application.
pub fn arm<S: SentinelCell>(cell: &mut S) {
    cell.write(MAGIC_VALUE);
}

/// Was a jump requested? The request is consumed either way, so an
/// application that crashes and resets lands back in the bootloader.
pub fn take<S: SentinelCell>(cell: &mut S) -> bool {
    let armed = cell.read() == MAGIC_VALUE;
    cell.write(0);
    armed
}

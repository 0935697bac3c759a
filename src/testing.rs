//! Host-side stand-ins for the hardware.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use embedded_hal::{
    can::{nb::Can, StandardId},
    watchdog::Watchdog,
};
use groundhog::RollingTimer;

use crate::{
    bus::BusError,
    checksum::{CrcEngine, SoftCrc},
    consts::{APP_END, PAGE_BYTES, VARS_ADDR},
    flash::FlashDriver,
    frame::{BusFrame, CommandFrame},
    handshake::SentinelCell,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeFlashError;

#[derive(Default)]
struct FlashState {
    mem: Vec<u32>,
    unlocked: bool,
    erases: usize,
    programs: usize,
    unlocks: usize,
    fail_erase: bool,
    fail_program_at: Option<u32>,
    corrupt_programs: bool,
}

/// NOR flash covering the variables page and the application region.
///
/// Erased words read 0xFFFF_FFFF and programming can only clear bits. Clones
/// share the same memory, so a test can keep a handle while the device
/// under test owns another.
#[derive(Clone)]
pub struct FakeFlash {
    state: Rc<RefCell<FlashState>>,
}

impl FakeFlash {
    pub fn new() -> Self {
        let words = ((APP_END - VARS_ADDR) / 4) as usize;
        Self {
            state: Rc::new(RefCell::new(FlashState {
                mem: vec![0xFFFF_FFFF; words],
                ..FlashState::default()
            })),
        }
    }

    fn index(address: u32) -> usize {
        assert!(address % 4 == 0, "unaligned flash access at {:#x}", address);
        assert!(
            (VARS_ADDR..APP_END).contains(&address),
            "flash access outside the fake at {:#x}",
            address
        );
        ((address - VARS_ADDR) / 4) as usize
    }

    pub fn word(&self, address: u32) -> u32 {
        self.state.borrow().mem[Self::index(address)]
    }

    /// Stores words as they are, bypassing the controller.
    pub fn write_raw(&mut self, address: u32, words: &[u32]) {
        let mut state = self.state.borrow_mut();
        for (i, w) in words.iter().enumerate() {
            let idx = Self::index(address + 4 * i as u32);
            state.mem[idx] = *w;
        }
    }

    pub fn erase_count(&self) -> usize {
        self.state.borrow().erases
    }

    pub fn program_count(&self) -> usize {
        self.state.borrow().programs
    }

    pub fn unlock_count(&self) -> usize {
        self.state.borrow().unlocks
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.borrow().unlocked
    }

    pub fn fail_erase(&mut self, fail: bool) {
        self.state.borrow_mut().fail_erase = fail;
    }

    pub fn fail_program_at(&mut self, address: Option<u32>) {
        self.state.borrow_mut().fail_program_at = address;
    }

    /// Programmed words read back with their lowest bit cleared.
    pub fn corrupt_programs(&mut self, corrupt: bool) {
        self.state.borrow_mut().corrupt_programs = corrupt;
    }
}

impl FlashDriver for FakeFlash {
    type Error = FakeFlashError;

    fn read_word(&self, address: u32) -> u32 {
        self.word(address)
    }

    fn unlock(&mut self) {
        let mut state = self.state.borrow_mut();
        state.unlocked = true;
        state.unlocks += 1;
    }

    fn lock(&mut self) {
        self.state.borrow_mut().unlocked = false;
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FakeFlashError> {
        let mut state = self.state.borrow_mut();
        assert!(state.unlocked, "erase while locked");
        assert!(address % PAGE_BYTES == 0, "unaligned erase at {:#x}", address);

        if state.fail_erase {
            return Err(FakeFlashError);
        }

        let start = Self::index(address);
        let end = start + (PAGE_BYTES / 4) as usize;
        state.mem[start..end].iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
        state.erases += 1;
        Ok(())
    }

    fn program_word(&mut self, address: u32, word: u32) -> Result<(), FakeFlashError> {
        let mut state = self.state.borrow_mut();
        assert!(state.unlocked, "program while locked");

        if state.fail_program_at == Some(address) {
            return Err(FakeFlashError);
        }

        let word = if state.corrupt_programs { word & !1 } else { word };
        let idx = Self::index(address);
        state.mem[idx] &= word;
        state.programs += 1;
        Ok(())
    }
}

/// A millisecond clock that only moves when told to.
#[derive(Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<u32>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl RollingTimer for FakeClock {
    type Tick = u32;
    const TICKS_PER_SECOND: u32 = 1000;

    fn get_ticks(&self) -> u32 {
        self.now.get()
    }
}

#[derive(Default)]
struct BusState {
    rx: VecDeque<BusFrame>,
    sent: Vec<BusFrame>,
}

/// A CAN controller with scripted reception that records what we send.
#[derive(Clone, Default)]
pub struct FakeBus {
    state: Rc<RefCell<BusState>>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: BusFrame) {
        self.state.borrow_mut().rx.push_back(frame);
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().rx.len()
    }

    pub fn take_sent(&self) -> Vec<BusFrame> {
        core::mem::take(&mut self.state.borrow_mut().sent)
    }
}

impl Can for FakeBus {
    type Frame = BusFrame;
    type Error = BusError;

    fn transmit(&mut self, frame: &BusFrame) -> nb::Result<Option<BusFrame>, BusError> {
        self.state.borrow_mut().sent.push(*frame);
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<BusFrame, BusError> {
        self.state
            .borrow_mut()
            .rx
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }
}

#[derive(Clone, Default)]
pub struct FakeWatchdog {
    feeds: Rc<Cell<usize>>,
}

impl FakeWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> usize {
        self.feeds.get()
    }
}

impl Watchdog for FakeWatchdog {
    fn feed(&mut self) {
        self.feeds.set(self.feeds.get() + 1);
    }
}

#[derive(Clone)]
pub struct FakeCell {
    value: Rc<Cell<u32>>,
}

impl FakeCell {
    pub fn new(value: u32) -> Self {
        Self {
            value: Rc::new(Cell::new(value)),
        }
    }
}

impl SentinelCell for FakeCell {
    fn read(&self) -> u32 {
        self.value.get()
    }

    fn write(&mut self, value: u32) {
        self.value.set(value);
    }
}

/// A well formed command frame as the flashing tool sends it.
pub fn command(board: u8, cmd: u8, par1: u16, par2: u32) -> BusFrame {
    CommandFrame {
        board,
        cmd,
        par1,
        par2,
    }
    .to_can()
    .unwrap()
}

pub fn id(raw: u16) -> StandardId {
    StandardId::new(raw).unwrap()
}

pub fn page_crc(words: &[u32]) -> u32 {
    SoftCrc::new().checksum(words)
}

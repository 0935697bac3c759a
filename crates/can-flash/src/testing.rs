//! A simulated bus with real bootloader dispatchers on it.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use can_boot::{
    bus::BusError,
    checksum::SoftCrc,
    consts::{APP_END, PAGE_BYTES, VARS_ADDR},
    dispatch::Dispatcher,
    flash::FlashDriver,
    frame::{BusFrame, CommandFrame},
    vars::{self, BootloaderVariables},
};
use embedded_hal::can::nb::Can;
use groundhog::RollingTimer;

const BUILD: u64 = 0xA1B2_C3D4;

#[derive(Default)]
struct FlashState {
    mem: Vec<u32>,
    fail_erase: bool,
}

/// NOR flash over the variables page and the application region.
#[derive(Clone)]
pub struct SimFlash {
    state: Rc<RefCell<FlashState>>,
}

impl SimFlash {
    pub fn new() -> Self {
        let words = ((APP_END - VARS_ADDR) / 4) as usize;
        Self {
            state: Rc::new(RefCell::new(FlashState {
                mem: vec![0xFFFF_FFFF; words],
                fail_erase: false,
            })),
        }
    }

    fn index(address: u32) -> usize {
        assert!(
            (VARS_ADDR..APP_END).contains(&address) && address % 4 == 0,
            "bad flash access at {:#x}",
            address
        );
        ((address - VARS_ADDR) / 4) as usize
    }
}

impl FlashDriver for SimFlash {
    type Error = ();

    fn read_word(&self, address: u32) -> u32 {
        self.state.borrow().mem[Self::index(address)]
    }

    fn unlock(&mut self) {}
    fn lock(&mut self) {}

    fn erase_page(&mut self, address: u32) -> Result<(), ()> {
        let mut state = self.state.borrow_mut();
        if state.fail_erase {
            return Err(());
        }

        let start = Self::index(address);
        let end = start + (PAGE_BYTES / 4) as usize;
        state.mem[start..end].iter_mut().for_each(|w| *w = 0xFFFF_FFFF);
        Ok(())
    }

    fn program_word(&mut self, address: u32, word: u32) -> Result<(), ()> {
        let idx = Self::index(address);
        self.state.borrow_mut().mem[idx] &= word;
        Ok(())
    }
}

/// One board running the bootloader's command dispatcher.
pub struct SimBoard {
    dispatcher: Dispatcher<SimFlash, SoftCrc>,
    flash: SimFlash,
}

impl SimBoard {
    pub fn new(board_id: u8) -> Self {
        let mut flash = SimFlash::new();
        let mut vars = BootloaderVariables::fresh(BUILD);
        vars.board.board_id = board_id;
        vars::write(&mut flash, &vars).unwrap();

        Self {
            dispatcher: Dispatcher::new(flash.clone(), SoftCrc::new()),
            flash,
        }
    }

    pub fn variables(&self) -> BootloaderVariables {
        self.dispatcher.variables()
    }

    pub fn is_bootable(&mut self) -> bool {
        self.dispatcher.image_is_bootable()
    }

    pub fn word(&self, address: u32) -> u32 {
        self.flash.read_word(address)
    }

    pub fn fail_erase(&mut self, fail: bool) {
        self.flash.state.borrow_mut().fail_erase = fail;
    }
}

#[derive(Default)]
struct BusState {
    boards: Vec<SimBoard>,
    rx: VecDeque<BusFrame>,
    noise: Vec<BusFrame>,
    drop_commands: usize,
    commands: usize,
    fail_receive: bool,
}

/// Every frame the client transmits reaches every board at once. Replies
/// queue up for the client in board order.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Rc<RefCell<BusState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, board: SimBoard) -> usize {
        let mut state = self.state.borrow_mut();
        state.boards.push(board);
        state.boards.len() - 1
    }

    pub fn with_board<R>(&self, index: usize, f: impl FnOnce(&mut SimBoard) -> R) -> R {
        f(&mut self.state.borrow_mut().boards[index])
    }

    /// The next `count` transmitted frames never arrive.
    pub fn drop_commands(&self, count: usize) {
        self.state.borrow_mut().drop_commands = count;
    }

    /// Frames that show up ahead of every reply.
    pub fn inject_noise(&self, frames: Vec<BusFrame>) {
        self.state.borrow_mut().noise = frames;
    }

    pub fn fail_receive(&self, fail: bool) {
        self.state.borrow_mut().fail_receive = fail;
    }

    /// Frames transmitted so far, lost ones included.
    pub fn commands(&self) -> usize {
        self.state.borrow().commands
    }
}

impl Can for SimBus {
    type Frame = BusFrame;
    type Error = BusError;

    fn transmit(&mut self, frame: &BusFrame) -> nb::Result<Option<BusFrame>, BusError> {
        let state = &mut *self.state.borrow_mut();
        state.commands += 1;

        if state.drop_commands > 0 {
            state.drop_commands -= 1;
            return Ok(None);
        }

        let command = match CommandFrame::from_can(frame) {
            Some(command) => command,
            None => return Ok(None),
        };

        for board in state.boards.iter_mut() {
            if let Some(reply) = board.dispatcher.handle(&command) {
                state.rx.extend(state.noise.iter().copied());
                state.rx.push_back(reply.to_can().unwrap());
            }
        }

        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<BusFrame, BusError> {
        let mut state = self.state.borrow_mut();
        if state.fail_receive {
            return Err(nb::Error::Other(BusError::Overrun));
        }

        state.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

/// A millisecond clock that moves on by one every time it is read, so
/// waiting for a reply that never comes still ends.
#[derive(Clone, Default)]
pub struct StepClock {
    now: Rc<Cell<u32>>,
}

impl StepClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RollingTimer for StepClock {
    type Tick = u32;
    const TICKS_PER_SECOND: u32 = 1000;

    fn get_ticks(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(1));
        now
    }
}

// Board support for STM32F103 boards with the CAN transceiver on PA11/PA12.
//
// Boot order:
//
//   * `hand_off` runs before RAM is initialized. If the last bootloader run
//     armed the hand-off word, it jumps straight into the application.
//   * Otherwise `main` brings up clocks, SysTick, the watchdog, CRC unit and
//     CAN, then polls the boot machine until it asks for a reset.

#![no_main]
#![no_std]

use core::cell::RefCell;

use can_boot::{
    boot_log,
    boot_machine::{BootMachine, SystemReset},
    bus::{self, BusError, FrameSink, QueuedBus},
    checksum::CrcEngine,
    consts::{APP_BASE, BUILD_ID, PAGE_BYTES, PAGE_SIZE, SKIP_FLASH},
    flash::FlashDriver,
    frame::BusFrame,
    handshake::{self, RamCell, MAGIC_ADDR},
};
use cortex_m::{
    interrupt::Mutex,
    peripheral::{NVIC, SCB},
};
use cortex_m_rt::{entry, exception, pre_init};
use embedded_hal::can::{ExtendedId, Frame, Id, StandardId};
use groundhog_stm32f103::GlobalRollingTimer;
use heapless::spsc::{Producer, Queue};
use stm32f1xx_hal::{
    can::Can,
    crc::{Crc, CrcExt},
    flash::{self, FlashSize, FlashWriter, SectorSize, FLASH_START},
    pac::{self, interrupt},
    prelude::*,
    watchdog::IndependentWatchdog,
};

/// 500 kbit/s from a 36 MHz APB1: prescaler 9, BS1 6 tq, BS2 1 tq, SJW 1 tq.
const CAN_BIT_TIMING: u32 = 0x0005_0008;

/// Prescaler 4 and reload 4095 on the 40 kHz LSI.
const WATCHDOG_MS: u32 = 410;

const QUEUE_LEN: usize = 16;

type CanRx = bxcan::Rx0<Can<pac::CAN1>>;

static RX: Mutex<RefCell<Option<(CanRx, Producer<'static, BusFrame, QUEUE_LEN>)>>> =
    Mutex::new(RefCell::new(None));

#[pre_init]
unsafe fn hand_off() {
    let mut cell = RamCell::at(MAGIC_ADDR);
    if !handshake::take(&mut cell) {
        return;
    }

    let vectors = APP_BASE as *const u32;
    (*SCB::PTR).vtor.write(APP_BASE);
    cortex_m::asm::bootstrap(
        vectors.read_volatile() as *const u32,
        vectors.add(1).read_volatile() as *const u32,
    );
}

#[entry]
fn main() -> ! {
    let (dp, cp) = match (pac::Peripherals::take(), cortex_m::Peripherals::take()) {
        (Some(dp), Some(cp)) => (dp, cp),
        _ => can_boot::halt(),
    };

    //
    // Clocks: 8 MHz crystal, PLL x9
    //
    let mut flash = dp.FLASH.constrain();
    let rcc = dp.RCC.constrain();
    let clocks = rcc
        .cfgr
        .use_hse(8.MHz())
        .sysclk(72.MHz())
        .hclk(72.MHz())
        .pclk1(36.MHz())
        .pclk2(72.MHz())
        .freeze(&mut flash.acr);

    GlobalRollingTimer::init(cp.SYST, clocks.sysclk().raw());

    let mut watchdog = IndependentWatchdog::new(dp.IWDG);
    watchdog.start(WATCHDOG_MS.millis());

    //
    // CAN1 on PA11 (RX) / PA12 (TX)
    //
    let mut afio = dp.AFIO.constrain();
    let mut gpioa = dp.GPIOA.split();
    let can = Can::new(dp.CAN1, dp.USB);
    let rx_pin = gpioa.pa11.into_floating_input(&mut gpioa.crh);
    let tx_pin = gpioa.pa12.into_alternate_push_pull(&mut gpioa.crh);
    can.assign_pins((tx_pin, rx_pin), &mut afio.mapr);

    let mut can = bxcan::Can::builder(can)
        .set_bit_timing(CAN_BIT_TIMING)
        .set_automatic_retransmit(false)
        .leave_disabled();
    can.modify_filters()
        .enable_bank(0, bxcan::Fifo::Fifo0, bxcan::filter::Mask32::accept_all());
    can.enable_interrupt(bxcan::Interrupt::Fifo0MessagePending);
    nb::block!(can.enable_non_blocking()).ok();

    let (tx, rx, _) = can.split();

    let queue = match cortex_m::singleton!(: Queue<BusFrame, QUEUE_LEN> = Queue::new()) {
        Some(queue) => queue,
        None => can_boot::halt(),
    };
    let (producer, consumer) = queue.split();

    cortex_m::interrupt::free(|cs| RX.borrow(cs).replace(Some((rx, producer))));
    unsafe { NVIC::unmask(pac::Interrupt::USB_LP_CAN_RX0) };

    //
    // Boot machine
    //
    let board_flash = BoardFlash::new(flash.writer(SectorSize::Sz1K, FlashSize::Sz64K));
    let machine = BootMachine::new(
        board_flash,
        HwCrc(dp.CRC.new()),
        QueuedBus::new(consumer, CanTx(tx)),
        GlobalRollingTimer::new(),
        watchdog,
        unsafe { RamCell::at(MAGIC_ADDR) },
        BUILD_ID,
    );

    match machine {
        Ok(machine) => machine.run(&mut ChipReset),
        Err(e) => {
            boot_log!(error, "Variables page unusable: {:?}", e);
            can_boot::halt()
        }
    }
}

#[exception]
fn SysTick() {
    GlobalRollingTimer::tick();
}

#[interrupt]
fn USB_LP_CAN_RX0() {
    cortex_m::interrupt::free(|cs| {
        if let Some((rx, producer)) = RX.borrow(cs).borrow_mut().as_mut() {
            loop {
                match rx.receive() {
                    Ok(frame) => {
                        if let Some(frame) = from_bxcan(&frame) {
                            // a full queue is already logged
                            let _ = bus::enqueue(producer, frame);
                        }
                    }
                    Err(nb::Error::WouldBlock) => break,
                    Err(nb::Error::Other(_)) => {
                        boot_log!(warn, "CAN FIFO0 overrun");
                    }
                }
            }
        }
    });
}

fn from_bxcan(frame: &bxcan::Frame) -> Option<BusFrame> {
    let id: Id = match frame.id() {
        bxcan::Id::Standard(id) => StandardId::new(id.as_raw())?.into(),
        bxcan::Id::Extended(id) => ExtendedId::new(id.as_raw())?.into(),
    };

    match frame.data() {
        Some(data) => BusFrame::new(id, data),
        None => BusFrame::new_remote(id, frame.dlc() as usize),
    }
}

fn to_bxcan(frame: &BusFrame) -> Option<bxcan::Frame> {
    let id: bxcan::Id = match frame.id() {
        Id::Standard(id) => bxcan::StandardId::new(id.as_raw())?.into(),
        Id::Extended(id) => bxcan::ExtendedId::new(id.as_raw())?.into(),
    };

    Some(bxcan::Frame::new_data(id, bxcan::Data::new(frame.data())?))
}

struct CanTx(bxcan::Tx<Can<pac::CAN1>>);

impl FrameSink for CanTx {
    fn send(&mut self, frame: &BusFrame) -> nb::Result<(), BusError> {
        let frame = to_bxcan(frame).ok_or(nb::Error::Other(BusError::Transmit))?;

        match self.0.transmit(&frame) {
            Ok(_) => Ok(()),
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(never)) => match never {},
        }
    }
}

struct HwCrc(Crc);

impl CrcEngine for HwCrc {
    fn reset(&mut self) {
        self.0.reset();
    }

    fn feed(&mut self, word: u32) {
        self.0.write(word);
    }

    fn finish(&mut self) -> u32 {
        self.0.read()
    }
}

struct ChipReset;

impl SystemReset for ChipReset {
    fn system_reset(&mut self) -> ! {
        SCB::sys_reset()
    }
}

/// The on-chip flash, through the HAL's writer.
///
/// With `skip-flash` nothing is erased or programmed. The last page "written"
/// is kept in RAM instead, so the variables page still reads back and a
/// debug session survives the startup migration.
struct BoardFlash<'a> {
    writer: FlashWriter<'a>,
    shadow: Option<(u32, [u32; PAGE_SIZE])>,
}

impl<'a> BoardFlash<'a> {
    fn new(writer: FlashWriter<'a>) -> Self {
        Self {
            writer,
            shadow: None,
        }
    }

    fn shadowed(&self, address: u32) -> Option<u32> {
        let (page, words) = self.shadow.as_ref()?;
        let index = address.checked_sub(*page)? / 4;
        words.get(index as usize).copied()
    }
}

impl FlashDriver for BoardFlash<'_> {
    type Error = flash::Error;

    fn read_word(&self, address: u32) -> u32 {
        if let Some(word) = self.shadowed(address) {
            return word;
        }

        // SAFETY: flash is memory mapped and every caller stays inside it
        unsafe { core::ptr::read_volatile(address as *const u32) }
    }

    // The writer unlocks and relocks the controller around every erase and
    // program on its own.
    fn unlock(&mut self) {}
    fn lock(&mut self) {}

    fn erase_page(&mut self, address: u32) -> Result<(), flash::Error> {
        if SKIP_FLASH {
            boot_log!(warn, "Skipping real erase at {=u32:X}", address);
            self.shadow = Some((address, [0xFFFF_FFFF; PAGE_SIZE]));
            return Ok(());
        }

        self.writer.erase(address - FLASH_START, PAGE_BYTES as usize)
    }

    fn program_word(&mut self, address: u32, word: u32) -> Result<(), flash::Error> {
        if SKIP_FLASH {
            if let Some((page, words)) = self.shadow.as_mut() {
                if let Some(slot) = address
                    .checked_sub(*page)
                    .and_then(|offset| words.get_mut((offset / 4) as usize))
                {
                    *slot &= word;
                }
            }
            return Ok(());
        }

        self.writer.write(address - FLASH_START, &word.to_le_bytes())
    }
}

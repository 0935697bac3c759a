use embedded_hal::{can::nb::Can, watchdog::Watchdog};
use groundhog::RollingTimer;

use crate::{
    checksum::CrcEngine,
    consts::{SESSION_TIMEOUT_MS, STARTUP_TIMEOUT_MS},
    dispatch::Dispatcher,
    flash::{FlashDriver, FlashError},
    frame::{Command, CommandFrame, ResponseFrame},
    handshake::{self, SentinelCell},
    vars,
};

/// Resets the whole chip.
pub trait SystemReset {
    fn system_reset(&mut self) -> !;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Session {
    /// Nobody has talked to us since reset
    AwaitingFirstContact,
    /// A flashing tool is at work
    UpdateActive,
}

impl Session {
    pub fn timeout_ms(&self) -> u32 {
        match self {
            Session::AwaitingFirstContact => STARTUP_TIMEOUT_MS,
            Session::UpdateActive => SESSION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    Pending,
    /// Time is up. `launch` says whether the hand-off to the application
    /// has been armed for the next boot.
    Reset { launch: bool },
}

// This is the main interface for the bootloader. Create it once the
// hardware is up and poll it until it asks for a reset.
pub struct BootMachine<F, C, B, T, W, S> {
    dispatcher: Dispatcher<F, C>,
    bus: B,
    timer: T,
    watchdog: W,
    sentinel: S,
    session: Session,
    last_activity: u32,
}

impl<F, C, B, T, W, S> BootMachine<F, C, B, T, W, S>
where
    F: FlashDriver,
    C: CrcEngine,
    B: Can,
    T: RollingTimer<Tick = u32>,
    W: Watchdog,
    S: SentinelCell,
{
    /// Brings the variables page up to date with this bootloader build and
    /// starts the startup timeout.
    ///
    /// A failure here means the variables page can not be written at all.
    pub fn new(
        mut flash: F,
        crc: C,
        bus: B,
        timer: T,
        watchdog: W,
        sentinel: S,
        build_id: u64,
    ) -> Result<Self, FlashError> {
        if vars::migrate(&mut flash, build_id)? {
            boot_log!(info, "variables reset for build {=u64}", build_id);
        }

        let dispatcher = Dispatcher::new(flash, crc);
        boot_log!(
            info,
            "can-boot build {=u64}, board id {=u8}",
            build_id,
            dispatcher.variables().board.board_id
        );

        let last_activity = timer.get_ticks();

        Ok(Self {
            dispatcher,
            bus,
            timer,
            watchdog,
            sentinel,
            session: Session::AwaitingFirstContact,
            last_activity,
        })
    }

    /// One iteration of the main loop: handle at most one received frame,
    /// then either refresh the watchdog or decide how to reset.
    pub fn poll(&mut self) -> Step {
        match self.bus.receive() {
            Ok(frame) => self.on_frame(&frame),
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(_)) => {
                boot_log!(warn, "CAN receive error");
            }
        }

        if self.timed_out() {
            let launch = self.dispatcher.image_is_bootable();
            if launch {
                boot_log!(info, "Application valid, handing off");
                handshake::arm(&mut self.sentinel);
            } else {
                boot_log!(info, "No valid application, restarting bootloader");
            }
            return Step::Reset { launch };
        }

        self.watchdog.feed();
        Step::Pending
    }

    /// Polls until the time is up, then resets.
    pub fn run<R: SystemReset>(mut self, reset: &mut R) -> ! {
        loop {
            if let Step::Reset { .. } = self.poll() {
                reset.system_reset();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> Session {
        self.session
    }

    #[cfg(test)]
    pub(crate) fn dispatcher(&self) -> &Dispatcher<F, C> {
        &self.dispatcher
    }

    fn on_frame(&mut self, frame: &B::Frame) {
        let command = match CommandFrame::from_can(frame) {
            Some(command) => command,
            None => return,
        };

        let response = match self.dispatcher.handle(&command) {
            Some(response) => response,
            None => return,
        };

        // PING is discovery, not a session
        if response.cmd != Command::Ping as u8 {
            self.last_activity = self.timer.get_ticks();
            if self.session == Session::AwaitingFirstContact {
                boot_log!(info, "Flashing tool connected");
                self.session = Session::UpdateActive;
            }
        }

        self.reply(&response);
    }

    fn reply(&mut self, response: &ResponseFrame) {
        let frame: B::Frame = match response.to_can() {
            Some(frame) => frame,
            None => {
                boot_log!(error, "Could not build reply frame");
                return;
            }
        };

        if nb::block!(self.bus.transmit(&frame)).is_err() {
            boot_log!(warn, "Reply to {=u8} not sent", response.cmd);
        }
    }

    fn timed_out(&self) -> bool {
        let ticks = self.timer.ticks_since(self.last_activity) as u64;
        let elapsed_ms = ticks * 1000 / T::TICKS_PER_SECOND as u64;
        elapsed_ms > self.session.timeout_ms() as u64
    }
}

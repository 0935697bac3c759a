#![no_std]

use core::sync::atomic::{AtomicU32, Ordering};
use cortex_m::peripheral::{syst::SystClkSource, SYST};
use groundhog::RollingTimer;

static TICKS: AtomicU32 = AtomicU32::new(0);

/// A millisecond counter driven by the SysTick exception.
///
/// The counter wraps after about 49 days, so compare ticks with
/// `ticks_since`, never with `<`.
pub struct GlobalRollingTimer;

impl GlobalRollingTimer {
    pub const fn new() -> Self {
        Self
    }

    /// Starts SysTick at 1 kHz off the core clock. The application must call
    /// [`GlobalRollingTimer::tick`] from its `SysTick` exception handler.
    pub fn init(mut syst: SYST, core_hz: u32) {
        syst.disable_counter();
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(core_hz / 1000 - 1);
        syst.clear_current();
        syst.enable_interrupt();
        syst.enable_counter();
    }

    pub fn tick() {
        TICKS.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for GlobalRollingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingTimer for GlobalRollingTimer {
    type Tick = u32;
    const TICKS_PER_SECOND: u32 = 1_000;

    fn get_ticks(&self) -> u32 {
        TICKS.load(Ordering::Relaxed)
    }
}

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod log;
pub mod boot_machine;
pub mod bus;
pub mod checksum;
pub mod consts;
pub mod dispatch;
pub mod flash;
pub mod frame;
pub mod handshake;
pub mod image;
pub mod page_buffer;
pub mod vars;

#[cfg(test)]
mod testing;

#[cfg(feature = "defmt-log")]
mod defmt_setup {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use defmt_rtt as _; // global logger
    use panic_probe as _;

    // same panicking *behavior* as `panic-probe` but doesn't print a panic message
    // this prevents the panic message being printed *twice* when `defmt::panic` is invoked
    #[defmt::panic_handler]
    fn panic() -> ! {
        cortex_m::asm::udf()
    }

    static COUNT: AtomicUsize = AtomicUsize::new(0);

    defmt::timestamp!("{=usize}", {
        // NOTE(no-CAS) `timestamps` runs with interrupts disabled
        let n = COUNT.load(Ordering::Relaxed);
        COUNT.store(n + 1, Ordering::Relaxed);
        n
    });
}

#[cfg(all(feature = "panic-reset", not(feature = "defmt-log"), not(test)))]
use panic_reset as _;

/// Stops here for good. The watchdog is not fed any more, so on hardware
/// this ends in a reset.
pub fn halt() -> ! {
    boot_log!(error, "halted");
    loop {
        core::hint::spin_loop();
    }
}

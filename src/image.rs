use crate::{
    checksum::CrcEngine,
    consts::{APP_BASE, PAGE_BYTES},
    flash::FlashDriver,
    vars::AppRecord,
};

/// CRC over the first `pages` pages of the application region, straight out
/// of flash.
pub fn image_crc<F: FlashDriver, C: CrcEngine>(flash: &F, crc: &mut C, pages: u16) -> u32 {
    let end = APP_BASE + (pages as u32) * PAGE_BYTES;

    crc.reset();
    (APP_BASE..end)
        .step_by(4)
        .for_each(|addr| crc.feed(flash.read_word(addr)));
    crc.finish()
}

/// Is the recorded image still intact? An empty or out of range record is
/// never bootable.
pub fn is_bootable<F: FlashDriver, C: CrcEngine>(flash: &F, crc: &mut C, app: &AppRecord) -> bool {
    let pages = match app.bootable_pages() {
        Some(pages) => pages,
        None => {
            boot_log!(info, "no application recorded ({=u32} pages)", app.page_count);
            return false;
        }
    };

    let actual = image_crc(flash, crc, pages);
    if actual != app.crc {
        boot_log!(
            warn,
            "application CRC mismatch: stored {=u32:X}, flash {=u32:X}",
            app.crc,
            actual
        );
        return false;
    }

    true
}

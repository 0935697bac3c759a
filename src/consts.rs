pub const SKIP_FLASH: bool = cfg!(feature = "skip-flash");

/// Words per flash page. The page buffer and WRITE_BUF offsets are in words.
pub const PAGE_SIZE: usize = 256;

/// Bytes per flash page, the erase granularity of the flash controller.
pub const PAGE_BYTES: u32 = (PAGE_SIZE * 4) as u32;

/// First address of the application image. The application's vector table
/// lives here.
pub const APP_BASE: u32 = 0x0800_3000;

// NOTE: Make sure this is in sync with the flash size of the part and with
// the bootloader section in memory.x!
pub const PAGE_COUNT: u16 = 64 - 12;

/// One past the last byte an application image may occupy.
pub const APP_END: u32 = APP_BASE + (PAGE_COUNT as u32) * PAGE_BYTES;

/// The bootloader variables page sits directly below the application.
pub const VARS_ADDR: u32 = APP_BASE - PAGE_BYTES;

/// Standard identifier of command frames sent by the flashing tool.
pub const CANID_CMD: u16 = 0x700;

/// Standard identifier of our replies.
pub const CANID_REPLY: u16 = 0x701;

/// How long every boot waits for a flashing tool before trying the app.
pub const STARTUP_TIMEOUT_MS: u32 = 200;

/// Inactivity timeout once a tool has started talking to us.
pub const SESSION_TIMEOUT_MS: u32 = 2000;

/// Build timestamp of this bootloader binary, stamped by `build.rs`.
pub const BUILD_ID: u64 = match option_env!("CAN_BOOT_BUILD_ID") {
    Some(id) => parse_build_id(id),
    None => 0,
};

const fn parse_build_id(id: &str) -> u64 {
    let bytes = id.as_bytes();
    let mut value = 0u64;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b < b'0' || b > b'9' {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add((b - b'0') as u64);
        i += 1;
    }

    value
}

const _: () = assert!(APP_BASE % PAGE_BYTES == 0);
const _: () = assert!(VARS_ADDR % PAGE_BYTES == 0);
const _: () = assert!(PAGE_SIZE <= u16::MAX as usize);
const _: () = assert!(CANID_CMD <= 0x7FF && CANID_REPLY <= 0x7FF);

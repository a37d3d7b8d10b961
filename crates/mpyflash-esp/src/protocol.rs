//! ESP ROM loader protocol constants and packet helpers
//!
//! A request is `direction(0x00) cmd size:u16 checksum:u32 data`, a
//! response is `direction(0x01) cmd size:u16 value:u32 data`, where the
//! last `status_bytes` of `data` carry the result. All fields are little
//! endian and every packet travels inside a SLIP frame.

use std::time::Duration;

/// Request direction byte
pub const DIR_REQUEST: u8 = 0x00;
/// Response direction byte
pub const DIR_RESPONSE: u8 = 0x01;

// Command opcodes
/// Start a flash write, erasing the target region
pub const ESP_FLASH_BEGIN: u8 = 0x02;
/// Write one block of flash data
pub const ESP_FLASH_DATA: u8 = 0x03;
/// Finish a flash write
pub const ESP_FLASH_END: u8 = 0x04;
/// Synchronize with the loader
pub const ESP_SYNC: u8 = 0x08;
/// Attach the SPI flash (ESP32 family)
pub const ESP_SPI_ATTACH: u8 = 0x0D;
/// MD5 of a flash region
pub const ESP_SPI_FLASH_MD5: u8 = 0x13;

/// Initial value of the data checksum
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Flash sector size
pub const FLASH_SECTOR_SIZE: u32 = 0x1000;

/// Default per-response timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for each SYNC attempt
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(100);
/// SYNC attempts before giving up
pub const SYNC_ATTEMPTS: usize = 7;

const ERASE_TIMEOUT_PER_MB: Duration = Duration::from_secs(30);
const MD5_TIMEOUT_PER_MB: Duration = Duration::from_secs(8);

/// Payload of the SYNC command
pub fn sync_payload() -> Vec<u8> {
    let mut data = vec![0x07, 0x07, 0x12, 0x20];
    data.extend_from_slice(&[0x55; 32]);
    data
}

/// XOR checksum over FLASH_DATA payload bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b)
}

/// Build an unframed request packet
pub fn request(cmd: u8, data: &[u8], checksum: u32) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(8 + data.len());
    pkt.push(DIR_REQUEST);
    pkt.push(cmd);
    pkt.extend_from_slice(&(data.len() as u16).to_le_bytes());
    pkt.extend_from_slice(&checksum.to_le_bytes());
    pkt.extend_from_slice(data);
    pkt
}

/// Pack little-endian words into a command payload
pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A parsed loader response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Command the response answers
    pub command: u8,
    /// Register value field
    pub value: u32,
    /// Payload, including the status trailer
    pub data: Vec<u8>,
}

impl Response {
    /// Parse an unframed packet, `None` if it is not a response
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < 8 || frame[0] != DIR_RESPONSE {
            return None;
        }
        let size = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        let data = &frame[8..];
        if data.len() < size {
            return None;
        }
        Some(Self {
            command: frame[1],
            value: u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]),
            data: data[..size].to_vec(),
        })
    }

    /// Split into body and `(failed, error)` status
    pub fn status(&self, status_bytes: usize) -> Option<(&[u8], bool, u8)> {
        if self.data.len() < status_bytes || status_bytes < 2 {
            return None;
        }
        let (body, status) = self.data.split_at(self.data.len() - status_bytes);
        Some((body, status[0] != 0, status[1]))
    }
}

/// Readable name of a ROM error code
pub fn rom_error_name(code: u8) -> &'static str {
    match code {
        0x05 => "received message is invalid",
        0x06 => "failed to act on received message",
        0x07 => "invalid CRC in message",
        0x08 => "flash write error",
        0x09 => "flash read error",
        0x0A => "flash read length error",
        0x0B => "deflate error",
        _ => "unknown error",
    }
}

/// Erase size to send with FLASH_BEGIN on ESP8266
///
/// The ESP8266 ROM erases the head sectors of the first 64 KiB block twice
/// over, so the requested size is reduced to land on the intended region.
pub fn esp8266_erase_size(offset: u32, size: u32) -> u32 {
    const SECTORS_PER_BLOCK: u32 = 16;

    let num_sectors = size.div_ceil(FLASH_SECTOR_SIZE);
    let start_sector = offset / FLASH_SECTOR_SIZE;

    let head_sectors = (SECTORS_PER_BLOCK - start_sector % SECTORS_PER_BLOCK).min(num_sectors);

    if num_sectors < 2 * head_sectors {
        (num_sectors + 1) / 2 * FLASH_SECTOR_SIZE
    } else {
        (num_sectors - head_sectors) * FLASH_SECTOR_SIZE
    }
}

/// Scale a timeout with the size of the region, never below the default
pub fn timeout_for_size(per_mb: Duration, size: u32) -> Duration {
    let scaled = per_mb.mul_f64(size as f64 / 1_000_000.0);
    scaled.max(DEFAULT_TIMEOUT)
}

/// Timeout for FLASH_BEGIN, which erases `size` bytes
pub fn erase_timeout(size: u32) -> Duration {
    timeout_for_size(ERASE_TIMEOUT_PER_MB, size)
}

/// Timeout for SPI_FLASH_MD5 over `size` bytes
pub fn md5_timeout(size: u32) -> Duration {
    timeout_for_size(MD5_TIMEOUT_PER_MB, size)
}

//! Command layer over the ROM serial bootloader

use std::thread::sleep;
use std::time::{Duration, Instant};

use mpyflash_core::FlashParams;
use mpyflash_serial::Transport;

use crate::error::{FlashFailure, Result};
use crate::protocol::*;
use crate::slip::{self, Decoder};

/// Longest single wait inside a response read
const READ_SLICE_MS: u32 = 50;

/// Name of a command, for errors and logs
pub fn command_name(cmd: u8) -> &'static str {
    match cmd {
        ESP_FLASH_BEGIN => "FLASH_BEGIN",
        ESP_FLASH_DATA => "FLASH_DATA",
        ESP_FLASH_END => "FLASH_END",
        ESP_SYNC => "SYNC",
        ESP_SPI_ATTACH => "SPI_ATTACH",
        ESP_SPI_FLASH_MD5 => "SPI_FLASH_MD5",
        _ => "command",
    }
}

/// Talks to the ROM loader of one chip over a borrowed transport
pub struct EspLoader<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    params: &'a FlashParams,
    decoder: Decoder,
}

impl<'a, T: Transport + ?Sized> EspLoader<'a, T> {
    /// Create a loader for a chip with the given flash parameters
    pub fn new(transport: &'a mut T, params: &'a FlashParams) -> Self {
        Self {
            transport,
            params,
            decoder: Decoder::new(),
        }
    }

    /// Reset the chip into the serial bootloader
    ///
    /// Uses the usual auto-reset wiring where DTR drives GPIO0 and RTS
    /// drives EN, both inverted.
    pub fn enter_bootloader(&mut self) -> Result<()> {
        log::debug!("esp: Resetting into bootloader");
        self.transport.set_dtr(false)?;
        self.transport.set_rts(true)?;
        sleep(Duration::from_millis(100));
        self.transport.set_dtr(true)?;
        self.transport.set_rts(false)?;
        sleep(Duration::from_millis(50));
        self.transport.set_dtr(false)?;
        Ok(())
    }

    /// Pulse EN to leave the bootloader and boot the new firmware
    pub fn hard_reset(&mut self) -> Result<()> {
        log::debug!("esp: Hard reset");
        self.transport.set_rts(true)?;
        sleep(Duration::from_millis(100));
        self.transport.set_rts(false)?;
        Ok(())
    }

    /// Synchronize with the loader, retrying a few times
    pub fn sync(&mut self) -> Result<()> {
        let payload = sync_payload();

        for attempt in 1..=SYNC_ATTEMPTS {
            self.transport.clear_input()?;
            self.decoder.reset();

            match self.command(ESP_SYNC, &payload, 0, SYNC_TIMEOUT) {
                Ok(_) => {
                    // The ROM answers one SYNC with several responses.
                    self.drain()?;
                    log::debug!("esp: Synchronized after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(FlashFailure::TransferTimeout(_)) | Err(FlashFailure::Rejected { .. }) => {
                    log::trace!("esp: SYNC attempt {} failed", attempt);
                }
                Err(e) => return Err(e),
            }
        }

        Err(FlashFailure::TransferTimeout("SYNC"))
    }

    /// Attach the SPI flash with default pins
    pub fn spi_attach(&mut self) -> Result<()> {
        self.command(ESP_SPI_ATTACH, &[0u8; 8], 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Start writing `size` bytes at `offset`, returns the number of blocks
    pub fn flash_begin(&mut self, size: u32, offset: u32) -> Result<u32> {
        let block_size = self.params.block_size;
        let num_blocks = size.div_ceil(block_size);
        let erase_size = if self.params.erase_size_quirk {
            esp8266_erase_size(offset, size)
        } else {
            size
        };

        let mut args = vec![erase_size, num_blocks, block_size, offset];
        if self.params.begin_encrypted_param {
            args.push(0);
        }

        log::debug!(
            "esp: FLASH_BEGIN erase={:#x} blocks={} block_size={} offset={:#x}",
            erase_size,
            num_blocks,
            block_size,
            offset
        );
        self.command(ESP_FLASH_BEGIN, &words(&args), 0, erase_timeout(size))?;
        Ok(num_blocks)
    }

    /// Write block number `seq`, padding it to the block size with 0xFF
    pub fn flash_block(&mut self, block: &[u8], seq: u32) -> Result<()> {
        let block_size = self.params.block_size as usize;
        let mut padded = block.to_vec();
        padded.resize(block_size.max(block.len()), 0xFF);

        let mut data = words(&[padded.len() as u32, seq, 0, 0]);
        data.extend_from_slice(&padded);

        self.command(
            ESP_FLASH_DATA,
            &data,
            checksum(&padded) as u32,
            DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }

    /// Ask the ROM for the MD5 of a flash region, as lowercase hex
    pub fn flash_md5(&mut self, offset: u32, size: u32) -> Result<String> {
        let body = self.command(
            ESP_SPI_FLASH_MD5,
            &words(&[offset, size, 0, 0]),
            0,
            md5_timeout(size),
        )?;

        match body.len() {
            // ROM: hex text
            32 => Ok(String::from_utf8_lossy(&body).to_ascii_lowercase()),
            // Raw digest
            16 => Ok(body.iter().map(|b| format!("{:02x}", b)).collect()),
            _ => Err(FlashFailure::Protocol("SPI_FLASH_MD5")),
        }
    }

    /// Finish the write; `stay_in_loader` keeps the chip in the bootloader
    pub fn flash_end(&mut self, stay_in_loader: bool) -> Result<()> {
        let flag = u32::from(stay_in_loader);
        self.command(ESP_FLASH_END, &words(&[flag]), 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Send a command and wait for its response, returning the body
    fn command(&mut self, cmd: u8, data: &[u8], chk: u32, timeout: Duration) -> Result<Vec<u8>> {
        let name = command_name(cmd);
        log::trace!("esp: -> {} ({} bytes)", name, data.len());

        self.transport.write(&slip::encode(&request(cmd, data, chk)))?;
        self.transport.flush()?;

        let resp = self.read_response(cmd, timeout)?;
        let (body, failed, code) = resp
            .status(self.params.status_bytes)
            .ok_or(FlashFailure::Protocol(name))?;

        if failed {
            return Err(FlashFailure::Rejected {
                command: name,
                code,
                reason: rom_error_name(code),
            });
        }
        Ok(body.to_vec())
    }

    fn read_response(&mut self, cmd: u8, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 512];

        loop {
            while let Some(frame) = self.decoder.next_frame() {
                match Response::parse(&frame) {
                    Some(resp) if resp.command == cmd => return Ok(resp),
                    Some(resp) => log::trace!(
                        "esp: skipping response to {}",
                        command_name(resp.command)
                    ),
                    None => log::trace!("esp: skipping {} byte non-response frame", frame.len()),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FlashFailure::TransferTimeout(command_name(cmd)));
            }
            let slice = (deadline - now).as_millis().min(READ_SLICE_MS as u128).max(1) as u32;

            let n = match self.transport.read_nonblock(&mut buf, slice) {
                Ok(n) => n,
                Err(mpyflash_serial::SerialError::Timeout) => 0,
                Err(e) => return Err(e.into()),
            };
            self.decoder.push(&buf[..n]);
        }
    }

    fn drain(&mut self) -> Result<()> {
        let mut buf = [0u8; 256];
        for _ in 0..64 {
            if self.transport.read_nonblock(&mut buf, 10)? == 0 {
                break;
            }
        }
        self.decoder.reset();
        Ok(())
    }
}

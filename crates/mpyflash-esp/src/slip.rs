//! SLIP framing (RFC 1055) as used by the ESP ROM loader

use std::collections::VecDeque;

/// Frame delimiter
pub const END: u8 = 0xC0;
/// Escape byte
pub const ESC: u8 = 0xDB;
/// Escaped END
pub const ESC_END: u8 = 0xDC;
/// Escaped ESC
pub const ESC_ESC: u8 = 0xDD;

/// Wrap `payload` in a frame, escaping delimiter bytes
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(END);
    for &b in payload {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

/// Incremental frame decoder
///
/// Bytes outside a frame (boot messages printed by the ROM before it
/// switches to the loader) are dropped.
#[derive(Debug, Default)]
pub struct Decoder {
    in_frame: bool,
    escape: bool,
    current: Vec<u8>,
    frames: VecDeque<Vec<u8>>,
}

impl Decoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes
    pub fn push(&mut self, data: &[u8]) {
        for &b in data {
            self.push_byte(b);
        }
    }

    fn push_byte(&mut self, b: u8) {
        if b == END {
            if !self.in_frame {
                self.in_frame = true;
                self.current.clear();
            } else if !self.current.is_empty() {
                self.frames.push_back(std::mem::take(&mut self.current));
                self.in_frame = false;
            }
            self.escape = false;
            return;
        }

        if !self.in_frame {
            return;
        }

        if self.escape {
            self.escape = false;
            match b {
                ESC_END => self.current.push(END),
                ESC_ESC => self.current.push(ESC),
                other => {
                    log::trace!("slip: invalid escape 0x{:02X}, dropping frame", other);
                    self.current.clear();
                    self.in_frame = false;
                }
            }
        } else if b == ESC {
            self.escape = true;
        } else {
            self.current.push(b);
        }
    }

    /// Take the oldest complete frame
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Drop partial and queued frames
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

//! Board identity and chip profiles

use std::fmt;
use std::str::FromStr;

/// Microcontroller family of a board
///
/// Selects the build flags and the flashing protocol. A board's profile is
/// decided once, while probing, from the chip identity string the runtime
/// prints in its banner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum ChipProfile {
    /// Espressif ESP32 (Xtensa LX6)
    Esp32,
    /// Espressif ESP32-S2
    Esp32S2,
    /// Espressif ESP32-S3
    Esp32S3,
    /// Espressif ESP32-C3 (RISC-V)
    Esp32C3,
    /// Espressif ESP8266 / ESP8285
    Esp8266,
    /// A chip identity that has no mapping yet
    Unknown,
}

/// Chip identity strings (normalized to lowercase) and their profiles
const CHIP_TABLE: &[(&str, ChipProfile)] = &[
    ("esp32", ChipProfile::Esp32),
    ("esp32s2", ChipProfile::Esp32S2),
    ("esp32-s2", ChipProfile::Esp32S2),
    ("esp32s3", ChipProfile::Esp32S3),
    ("esp32-s3", ChipProfile::Esp32S3),
    ("esp32c3", ChipProfile::Esp32C3),
    ("esp32-c3", ChipProfile::Esp32C3),
    ("esp8266", ChipProfile::Esp8266),
    ("esp8285", ChipProfile::Esp8266),
];

/// ESP image header magic (first byte of every bootable image)
const ESP_IMAGE_MAGIC: u8 = 0xE9;
/// ESP8266 "v2" image magic
const ESP8266_V2_IMAGE_MAGIC: u8 = 0xEA;
/// Offset of the chip id in the ESP32-family extended image header
const EXT_HEADER_CHIP_ID_OFFSET: usize = 12;
/// ESP32 firmware images produced by MicroPython start with the second stage
/// bootloader at this offset within the binary when padded from flash 0
const ESP32_BOOTLOADER_OFFSET: usize = 0x1000;

impl ChipProfile {
    /// All profiles with a known chip, in display order
    pub const KNOWN: &'static [ChipProfile] = &[
        ChipProfile::Esp32,
        ChipProfile::Esp32S2,
        ChipProfile::Esp32S3,
        ChipProfile::Esp32C3,
        ChipProfile::Esp8266,
    ];

    /// Map a chip identity string to a profile via the fixed lookup table
    ///
    /// Unmapped identities yield [`ChipProfile::Unknown`] rather than an error.
    pub fn from_chip_id(chip_id: &str) -> Self {
        let normalized = chip_id.trim().to_ascii_lowercase();
        CHIP_TABLE
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, profile)| *profile)
            .unwrap_or(ChipProfile::Unknown)
    }

    /// Short lowercase name, used for file names and CLI values
    pub fn name(self) -> &'static str {
        match self {
            ChipProfile::Esp32 => "esp32",
            ChipProfile::Esp32S2 => "esp32s2",
            ChipProfile::Esp32S3 => "esp32s3",
            ChipProfile::Esp32C3 => "esp32c3",
            ChipProfile::Esp8266 => "esp8266",
            ChipProfile::Unknown => "unknown",
        }
    }

    /// Whether this profile maps to a known chip family
    pub fn is_known(self) -> bool {
        self != ChipProfile::Unknown
    }

    /// Guess the profile of a firmware image from its ESP image header
    ///
    /// Both bare application images and ESP32 images that carry the
    /// bootloader at offset 0x1000 are recognized. Returns
    /// [`ChipProfile::Unknown`] when the header does not identify a chip.
    pub fn sniff_image(image: &[u8]) -> Self {
        if let Some(profile) = Self::sniff_header(image) {
            return profile;
        }
        if image.len() > ESP32_BOOTLOADER_OFFSET {
            if let Some(profile) = Self::sniff_header(&image[ESP32_BOOTLOADER_OFFSET..]) {
                return profile;
            }
        }
        ChipProfile::Unknown
    }

    fn sniff_header(header: &[u8]) -> Option<Self> {
        if header.len() < 24 {
            return None;
        }
        match header[0] {
            ESP8266_V2_IMAGE_MAGIC => return Some(ChipProfile::Esp8266),
            ESP_IMAGE_MAGIC => {}
            _ => return None,
        }

        // ESP8266 images have no extended header: the first segment's load
        // address follows the 8-byte common header directly.
        let load_addr = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if (0x3FFE_0000..0x4030_0000).contains(&load_addr) {
            return Some(ChipProfile::Esp8266);
        }

        let chip_id = u16::from_le_bytes([
            header[EXT_HEADER_CHIP_ID_OFFSET],
            header[EXT_HEADER_CHIP_ID_OFFSET + 1],
        ]);
        match chip_id {
            0x0000 => Some(ChipProfile::Esp32),
            0x0002 => Some(ChipProfile::Esp32S2),
            0x0005 => Some(ChipProfile::Esp32C3),
            0x0009 => Some(ChipProfile::Esp32S3),
            _ => None,
        }
    }
}

impl fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChipProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match ChipProfile::from_chip_id(s) {
            ChipProfile::Unknown => {
                let known: Vec<&str> = ChipProfile::KNOWN.iter().map(|p| p.name()).collect();
                Err(format!(
                    "Unknown chip '{}' (expected one of: {})",
                    s,
                    known.join(", ")
                ))
            }
            profile => Ok(profile),
        }
    }
}

/// A board identified on a serial port
///
/// Created by the prober after a successful handshake and never modified
/// afterwards. Two boards are distinct when their ports differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port: String,
    /// Baud rate the board answered on
    pub baud: u32,
    /// Chip family, decided during probing
    pub chip_profile: ChipProfile,
    /// Board description from the banner (e.g. "ESP32 module with ESP32")
    pub label: String,
    /// Runtime version from the banner (e.g. "v1.20.0")
    pub firmware_version: Option<String>,
}

impl Board {
    /// Create a board record without a known runtime version
    pub fn new(
        port: impl Into<String>,
        baud: u32,
        chip_profile: ChipProfile,
        label: impl Into<String>,
    ) -> Self {
        Self {
            port: port.into(),
            baud,
            chip_profile,
            label: label.into(),
            firmware_version: None,
        }
    }

    /// Attach the runtime version reported by the board
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({}", self.label, self.port, self.chip_profile)?;
        if let Some(version) = &self.firmware_version {
            write!(f, ", MicroPython {}", version)?;
        }
        write!(f, ")")
    }
}

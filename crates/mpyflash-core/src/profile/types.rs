//! Runtime profile types

use crate::board::ChipProfile;

/// How the ROM serial bootloader of a chip family is driven
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashParams {
    /// Flash address the firmware binary is written to
    pub offset: u32,
    /// Bytes per FLASH_DATA packet
    pub block_size: u32,
    /// Length of the status trailer in ROM responses
    pub status_bytes: usize,
    /// The ROM needs SPI_ATTACH before flash commands
    pub spi_attach: bool,
    /// FLASH_BEGIN takes a fifth "encrypted" word
    pub begin_encrypted_param: bool,
    /// The ROM erases too much on FLASH_BEGIN and needs a corrected size
    pub erase_size_quirk: bool,
    /// The ROM implements SPI_FLASH_MD5 for post-write verification
    pub md5_verify: bool,
}

/// Build and flash parameters for one chip profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Chip family this entry describes
    pub profile: ChipProfile,
    /// Port directory under `ports/` in the source tree
    pub port_dir: String,
    /// `BOARD=` value passed to make
    pub board: String,
    /// Extra make arguments, passed verbatim
    pub make_args: Vec<String>,
    /// Binary produced by the build, relative to the build directory
    pub artifact: String,
    /// Stock frozen manifest, included before the staged modules
    pub stock_manifest: String,
    /// Flash protocol parameters (`None` if flashing is not supported)
    pub flash: Option<FlashParams>,
}

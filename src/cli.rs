//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use mpyflash_core::ChipProfile;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mpyflash")]
#[command(author, version, about = "Find, build and flash MicroPython boards", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Serial port of the board, instead of probing every port
    #[arg(short, long, env = "MPYFLASH_PORT", global = true)]
    pub port: Option<String>,

    /// Baud rate of the serial connection [default: 115200]
    #[arg(short, long, env = "MPYFLASH_BAUD", global = true)]
    pub baud: Option<u32>,

    /// Directory of the MicroPython source and build cache
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// RON file with chip profiles overriding the built-in ones
    #[arg(long, global = true)]
    pub profile_db: Option<PathBuf>,

    /// How long to wait for each board to answer, in milliseconds
    #[arg(long, global = true, default_value_t = 2000)]
    pub probe_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List MicroPython boards attached via USB serial
    ///
    /// Every board found is soft-reset.
    Devices,

    /// Stream the output of a board to stdout
    Logs,

    /// Flash a firmware image to the selected boards
    Flash {
        /// Firmware binary
        firmware: PathBuf,

        /// Chip the firmware was built for (read from the image header if not given)
        #[arg(long)]
        chip: Option<ChipProfile>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Build MicroPython firmware for the selected boards
    Build(BuildArgs),
}

/// Options of the build command
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Delete the local source and build cache, then exit
    #[arg(short, long)]
    pub clean: bool,

    /// MicroPython git tag or branch (tracks master if not given)
    #[arg(long)]
    pub mpy_version: Option<String>,

    /// Build the development firmware
    #[arg(short, long)]
    pub dev: bool,

    /// Python module or package directory to freeze. Can be used multiple times.
    #[arg(short, long)]
    pub module: Vec<PathBuf>,

    /// Module or `module:function` to run on boot. Can be used multiple times.
    #[arg(short, long)]
    pub entrypoint: Vec<String>,

    /// Flash without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Also copy the built firmware here
    #[arg(short, long)]
    pub output_path: Option<PathBuf>,
}

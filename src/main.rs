//! mpyflash - Find, build and flash MicroPython boards
//!
//! # Architecture
//!
//! The binary is a thin shell over the library crates:
//! - **mpyflash-serial** finds boards by talking to the MicroPython REPL on
//!   every serial port and streams their output
//! - **mpyflash-build** keeps a cached MicroPython checkout and assembles
//!   firmware with a caller-chosen set of frozen modules
//! - **mpyflash-esp** writes firmware through the Espressif ROM bootloader
//!
//! Board selection prompts, progress display and the process exit status
//! live here; the libraries never touch the terminal.

mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Commands};
use config::{FileConfig, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let file = match FileConfig::discover() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let settings = Settings::resolve(&cli, file);

    match cli.command {
        Commands::Devices => commands::devices::run(&settings),
        Commands::Logs => commands::logs::run(&settings),
        Commands::Flash { firmware, chip, yes } => {
            let db = load_profiles(&settings);
            commands::flash::run(&settings, &db, &firmware, chip, yes)
        }
        Commands::Build(args) => {
            let db = load_profiles(&settings);
            commands::build::run(&settings, &db, &args)
        }
    }
}

fn load_profiles(settings: &Settings) -> mpyflash_core::ProfileDatabase {
    match commands::load_profiles(settings.profile_db.as_deref()) {
        Ok(db) => {
            log::debug!("Loaded {} chip profiles", db.len());
            db
        }
        Err(e) => {
            eprintln!("Failed to load chip profiles: {}", e);
            std::process::exit(1);
        }
    }
}

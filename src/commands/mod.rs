//! Command implementations

pub mod build;
pub mod devices;
pub mod flash;
pub mod logs;

use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use dialoguer::{MultiSelect, Select};
use indicatif::{ProgressBar, ProgressStyle};
use mpyflash_core::{Board, BoardRegistry, DiscoveryFailure, ProfileDatabase, ProfileDbError};
use mpyflash_esp::{FlashProgress, FlashState};
use mpyflash_serial::{discover, SystemPorts};

use crate::config::Settings;

/// Result type shared by all commands
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Printed when discovery or flashing gets no answer from a board
pub const ESP32_HINT: &str = "\tNote: If you're using an ESP32, you may need to hold down the 'BOOT' button \
on your device while running this command.\n\
\t      Read more @ https://randomnerdtutorials.com/solved-failed-to-connect-to-esp32-timed-out-waiting-for-packet-header/";

/// Load the built-in chip profiles, overlaid with `extra` if given
pub fn load_profiles(extra: Option<&Path>) -> Result<ProfileDatabase, ProfileDbError> {
    let mut db = ProfileDatabase::builtin()?;
    if let Some(path) = extra {
        let count = db.load_file(path)?;
        log::debug!("Loaded {} profile(s) from {}", count, path.display());
    }
    Ok(db)
}

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Create the per-board flashing bar style
fn create_flash_bar_style(port: &str) -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} blocks {}",
            port
        ))?
        .progress_chars("#>-"))
}

/// Find boards, or stop the process when there are none
pub fn find_boards(settings: &Settings) -> BoardRegistry {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
    spinner.set_message("Finding boards connected to your computer...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let registry = discover(&SystemPorts, &settings.discovery);

    if registry.is_empty() {
        spinner.finish_and_clear();
        eprintln!("{}", DiscoveryFailure::NoBoards);
        eprintln!("{}", ESP32_HINT);
        std::process::exit(1);
    }

    spinner.finish_with_message(format!("Found {} board(s)", registry.len()));
    registry
}

fn interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

/// Let the user pick any number of boards
///
/// A single board, or a session without a terminal, selects everything.
pub fn select_boards(registry: &BoardRegistry) -> Result<BoardRegistry, Box<dyn std::error::Error>> {
    if registry.len() <= 1 || !interactive() {
        return Ok(registry.clone());
    }

    let items: Vec<String> = registry.all().iter().map(|b| b.to_string()).collect();
    let chosen = MultiSelect::new()
        .with_prompt("Please choose any number of boards you want")
        .items(&items)
        .interact()?;

    let ports: Vec<&str> = chosen.iter().map(|&i| registry.all()[i].port.as_str()).collect();
    Ok(registry.narrow(&ports)?)
}

/// Let the user pick exactly one board
pub fn select_board(registry: &BoardRegistry) -> Result<Board, Box<dyn std::error::Error>> {
    match registry.single() {
        Ok(board) => return Ok(board.clone()),
        Err(DiscoveryFailure::Ambiguous(_)) if interactive() => {}
        Err(e) => return Err(e.into()),
    }

    let items: Vec<String> = registry.all().iter().map(|b| b.to_string()).collect();
    let chosen = Select::new()
        .with_prompt("Please choose a single board")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(registry.all()[chosen].clone())
}

/// Progress bar fed by the flasher
#[derive(Default)]
pub struct FlashBar {
    bar: Option<ProgressBar>,
}

impl FlashProgress for FlashBar {
    fn state_changed(&mut self, board: &Board, state: FlashState) {
        match state {
            FlashState::Identified => {}
            FlashState::Flashing => {
                let pb = ProgressBar::new(0);
                pb.set_style(
                    create_flash_bar_style(&board.port)
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                pb.enable_steady_tick(Duration::from_millis(100));
                self.bar = Some(pb);
            }
            FlashState::Flashed => {
                if let Some(pb) = self.bar.take() {
                    pb.finish();
                }
            }
            FlashState::FlashFailed => {
                if let Some(pb) = self.bar.take() {
                    pb.abandon();
                }
            }
        }
    }

    fn blocks_written(&mut self, _board: &Board, done: u32, total: u32) {
        if let Some(pb) = &self.bar {
            pb.set_length(u64::from(total));
            pb.set_position(u64::from(done));
        }
    }
}

/// Turn a failure count into the command's exit status
pub fn summarize(failed: usize, total: usize) -> CommandResult {
    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{} of {} board(s) failed", failed, total).into())
    }
}

//! Flash an existing firmware image

use std::path::Path;

use mpyflash_core::{Board, BoardRegistry, BuildArtifact, ChipProfile, ProfileDatabase};
use mpyflash_esp::{FlashFailure, Flasher};
use mpyflash_serial::SystemPorts;

use super::{find_boards, select_boards, summarize, CommandResult, FlashBar, ESP32_HINT};
use crate::config::Settings;

/// Flash `firmware` to the selected boards
pub fn run(
    settings: &Settings,
    db: &ProfileDatabase,
    firmware: &Path,
    chip: Option<ChipProfile>,
    yes: bool,
) -> CommandResult {
    let artifact = BuildArtifact::from_image(firmware, chip)?;
    if !artifact.chip_profile.is_known() {
        return Err(format!(
            "Cannot tell which chip {} was built for; pass --chip",
            firmware.display()
        )
        .into());
    }
    log::info!("{} is a {} image", firmware.display(), artifact.chip_profile);

    let registry = find_boards(settings);
    let boards = select_boards(&registry)?;
    if boards.is_empty() {
        println!("No boards selected.");
        return Ok(());
    }

    if !yes && !confirm(&boards, firmware)? {
        println!("Aborted.");
        return Ok(());
    }

    let mut failed = 0;
    for board in boards.all() {
        if flash_board(db, board, &artifact).is_err() {
            failed += 1;
        }
    }

    summarize(failed, boards.len())
}

fn confirm(boards: &BoardRegistry, firmware: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    if !super::interactive() {
        return Ok(true);
    }
    let prompt = format!(
        "Flash {} to {} board(s)?",
        firmware.display(),
        boards.len()
    );
    Ok(dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()?)
}

/// Flash one board, reporting the outcome on the terminal
pub fn flash_board(
    db: &ProfileDatabase,
    board: &Board,
    artifact: &BuildArtifact,
) -> Result<(), FlashFailure> {
    println!("Flashing firmware to board: {}", board);

    let mut progress = FlashBar::default();
    let result = Flasher::new(&SystemPorts, db).flash(board, artifact, &mut progress);

    match &result {
        Ok(()) => println!("Done: {}", board.port),
        Err(e) => {
            eprintln!("Failed to flash {}: {}", board.port, e);
            let no_answer = matches!(e, FlashFailure::TransferTimeout(_));
            if no_answer && board.chip_profile != ChipProfile::Esp8266 {
                eprintln!("{}", ESP32_HINT);
            }
        }
    }
    result
}

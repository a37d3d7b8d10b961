//! Build firmware for the selected boards and offer to flash it

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use mpyflash_build::{
    Assembler, BuildFailure, GitFetcher, MakeToolchain, SourceManager, DEFAULT_BRANCH,
};
use mpyflash_core::{Board, BuildArtifact, ChipProfile, FirmwareSpec, ProfileDatabase};

use super::flash::flash_board;
use super::{find_boards, interactive, select_boards, summarize, CommandResult};
use crate::cli::BuildArgs;
use crate::config::Settings;

const OUTPUT_PATH_AMBIGUOUS: &str =
    "The '--output-path' option is ambiguous with multiple boards attached.";

/// Run the build command
pub fn run(settings: &Settings, db: &ProfileDatabase, args: &BuildArgs) -> CommandResult {
    let sources = SourceManager::new(&settings.cache_dir, GitFetcher::default());

    if args.clean {
        sources.clean()?;
        println!("Cleaned {}", settings.cache_dir.display());
        return Ok(());
    }

    let spec = FirmwareSpec::new(
        args.module.clone(),
        args.entrypoint.clone(),
        args.mpy_version.clone(),
        args.dev,
    )?;

    let registry = find_boards(settings);
    let boards = select_boards(&registry)?;
    if boards.is_empty() {
        println!("No boards selected.");
        return Ok(());
    }

    println!(
        "Updating MicroPython source ({})...",
        spec.version_tag().unwrap_or(DEFAULT_BRANCH)
    );
    let tree = sources.update_to(spec.version_tag())?;

    let assembler = Assembler::new(&settings.cache_dir, tree, db, MakeToolchain::default());
    let modules = spec.resolved_modules();

    let outcome = build_each(
        boards.all(),
        args.output_path.as_deref(),
        |profile| assembler.build(profile, spec.entrypoints(), &modules),
        |board, artifact| offer_flash(db, board, artifact, args.yes),
    );

    summarize(outcome.failed, boards.len())
}

/// What happened across all boards of one build command
#[derive(Debug, Default, PartialEq, Eq)]
struct BuildOutcome {
    /// Boards that did not get through build and delivery
    failed: usize,
    /// `--output-path` was given with several boards
    ambiguous_output: bool,
}

/// Build once per chip profile and hand each board its artifact
///
/// A failure on one board never stops the others.
fn build_each<B, D>(
    boards: &[Board],
    output_path: Option<&Path>,
    mut build: B,
    mut deliver: D,
) -> BuildOutcome
where
    B: FnMut(ChipProfile) -> Result<BuildArtifact, BuildFailure>,
    D: FnMut(&Board, &BuildArtifact) -> CommandResult,
{
    let mut outcome = BuildOutcome {
        failed: 0,
        ambiguous_output: output_path.is_some() && boards.len() > 1,
    };
    if outcome.ambiguous_output {
        log::warn!("{}", OUTPUT_PATH_AMBIGUOUS);
    }

    let mut built: HashMap<ChipProfile, Option<BuildArtifact>> = HashMap::new();

    for board in boards {
        println!("Building firmware for: {}", board);

        let artifact = built
            .entry(board.chip_profile)
            .or_insert_with(|| match build(board.chip_profile) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    eprintln!("Build failed for {}: {}", board.chip_profile, e);
                    None
                }
            })
            .clone();
        let Some(mut artifact) = artifact else {
            outcome.failed += 1;
            continue;
        };

        if let Some(out) = output_path {
            match export(&artifact, out) {
                Ok(exported) => artifact = exported,
                Err(e) => {
                    eprintln!("Failed to copy firmware to {}: {}", out.display(), e);
                    outcome.failed += 1;
                    continue;
                }
            }
        }
        println!("Built firmware: {}", artifact.path.display());

        if let Err(e) = deliver(board, &artifact) {
            log::debug!("{}: {}", board.port, e);
            outcome.failed += 1;
        }
    }

    outcome
}

/// Copy an artifact to a user path; a directory receives `<profile>.bin`
fn export(artifact: &BuildArtifact, out: &Path) -> std::io::Result<BuildArtifact> {
    let dest: PathBuf = if out.is_dir() {
        out.join(format!("{}.bin", artifact.chip_profile.name()))
    } else {
        out.to_path_buf()
    };
    fs::copy(&artifact.path, &dest)?;
    Ok(BuildArtifact::new(dest, artifact.chip_profile))
}

fn offer_flash(
    db: &ProfileDatabase,
    board: &Board,
    artifact: &BuildArtifact,
    yes: bool,
) -> CommandResult {
    let later = format!(
        "You can flash it later using:\n\t$ mpyflash flash {}\n",
        artifact.path.display()
    );

    if !yes {
        if !interactive() {
            println!("{}", later);
            return Ok(());
        }
        let flash_now = dialoguer::Confirm::new()
            .with_prompt(format!("Do you want to flash this firmware right now? {}", later))
            .default(false)
            .interact()?;
        if !flash_now {
            return Ok(());
        }
    }

    flash_board(db, board, artifact)?;
    Ok(())
}

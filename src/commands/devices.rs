//! List boards

use super::{find_boards, CommandResult};
use crate::config::Settings;

/// Print every board that answered discovery
pub fn run(settings: &Settings) -> CommandResult {
    let registry = find_boards(settings);

    for board in registry.all() {
        println!("{}", board);
    }

    Ok(())
}

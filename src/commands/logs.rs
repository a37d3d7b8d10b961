//! Stream a board's output

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mpyflash_serial::{stream_logs, SystemPorts};

use super::{find_boards, select_board, CommandResult};
use crate::config::Settings;

/// Copy one board's serial output to stdout until Ctrl-C
pub fn run(settings: &Settings) -> CommandResult {
    let registry = find_boards(settings);
    let board = select_board(&registry)?;

    println!(
        "Streaming output for: {}.\nYou may need to reset the device once.",
        board
    );

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = ctrlc::set_handler(stopper(stop.clone())) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let copied = stream_logs(&SystemPorts, &board.port, board.baud, &mut out, &stop)?;
    writeln!(out)?;

    log::debug!("Copied {} bytes from {}, released the port", copied, board.port);
    Ok(())
}

/// Signal handler that asks the stream to stop
fn stopper(stop: Arc<AtomicBool>) -> impl Fn() + Send + 'static {
    move || stop.store(true, Ordering::SeqCst)
}

//! `make` adapter for [`BuildToolchain`]

use std::path::PathBuf;
use std::process::Command;

use crate::assembler::{BuildToolchain, ToolchainRequest};
use crate::error::BuildFailure;

/// Builds MicroPython ports with their makefiles
///
/// The port's own environment requirements (ESP-IDF for the ESP32 family,
/// the xtensa toolchain for ESP8266) must already be set up in the shell.
#[derive(Debug, Clone)]
pub struct MakeToolchain {
    make: PathBuf,
    jobs: usize,
}

impl Default for MakeToolchain {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::new("make", jobs)
    }
}

impl MakeToolchain {
    /// Use the `make` executable at `make` with `jobs` parallel jobs
    pub fn new(make: impl Into<PathBuf>, jobs: usize) -> Self {
        Self {
            make: make.into(),
            jobs: jobs.max(1),
        }
    }

    fn run(&self, mut cmd: Command) -> Result<(), BuildFailure> {
        log::debug!("Running {:?}", cmd);
        let output = cmd.output()?;

        if !output.status.success() {
            let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
            diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(BuildFailure::Toolchain {
                status: output.status.code(),
                diagnostics,
            });
        }
        log::trace!("{}", String::from_utf8_lossy(&output.stdout));
        Ok(())
    }
}

impl BuildToolchain for MakeToolchain {
    fn build(&self, request: &ToolchainRequest<'_>) -> Result<PathBuf, BuildFailure> {
        let profile = request.profile;

        let mut mpy_cross = Command::new(&self.make);
        mpy_cross
            .arg("-C")
            .arg(request.tree.join("mpy-cross"))
            .arg(format!("-j{}", self.jobs));
        self.run(mpy_cross)?;

        let mut port = Command::new(&self.make);
        port.arg("-C")
            .arg(request.tree.join("ports").join(&profile.port_dir))
            .arg(format!("-j{}", self.jobs))
            .arg(format!("BOARD={}", profile.board))
            .arg(format!("FROZEN_MANIFEST={}", request.manifest.display()))
            .arg(format!("BUILD={}", request.build_dir.display()))
            .args(&profile.make_args);
        self.run(port)?;

        Ok(request.build_dir.join(&profile.artifact))
    }
}

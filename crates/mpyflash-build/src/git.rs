//! Git adapter for [`SourceFetcher`]

use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::SourceManagerFailure;
use crate::source::{FetchedRef, SourceFetcher};

/// Upstream MicroPython repository
pub const DEFAULT_REPO_URL: &str = "https://github.com/micropython/micropython.git";

/// Upper bound on a whole fetch, including submodules
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30 * 60);

type Result<T> = std::result::Result<T, SourceManagerFailure>;

/// Fetches MicroPython with the `git` command line tool
#[derive(Debug, Clone)]
pub struct GitFetcher {
    url: String,
    timeout: Duration,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_REPO_URL, DEFAULT_FETCH_TIMEOUT)
    }
}

struct Finished {
    success: bool,
    output: String,
}

impl GitFetcher {
    /// Fetch from `url`, giving up on any single fetch after `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    fn git(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd
    }

    /// Run a command, killing it at `deadline`
    fn run(&self, mut cmd: Command, deadline: Instant) -> Result<Finished> {
        let description = describe(&cmd);
        log::debug!("Running {}", description);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => SourceManagerFailure::Fetch {
                    command: description.clone(),
                    diagnostics: "git is not installed or not in PATH".into(),
                },
                _ => e.into(),
            })?;

        let readers: Vec<_> = [
            child.stdout.take().map(|r| Box::new(r) as Box<dyn Read + Send>),
            child.stderr.take().map(|r| Box::new(r) as Box<dyn Read + Send>),
        ]
        .into_iter()
        .flatten()
        .map(|mut r| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = r.read_to_end(&mut buf);
                buf
            })
        })
        .collect();

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceManagerFailure::NetworkUnavailable(format!(
                    "{} did not finish within {:?}",
                    description, self.timeout
                )));
            }
            thread::sleep(Duration::from_millis(100));
        };

        let mut output = Vec::new();
        for reader in readers {
            output.extend(reader.join().unwrap_or_default());
        }

        Ok(Finished {
            success: status.success(),
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }

    fn run_checked(&self, cmd: Command, deadline: Instant) -> Result<()> {
        let description = describe(&cmd);
        let finished = self.run(cmd, deadline)?;
        if finished.success {
            Ok(())
        } else {
            Err(classify(description, finished.output))
        }
    }

    /// Detach `dest` at `version`, trying tags before remote branches
    fn checkout(&self, dest: &Path, version: &str, deadline: Instant) -> Result<FetchedRef> {
        let candidates = [
            (format!("refs/tags/{}", version), FetchedRef::Tag),
            (format!("refs/remotes/origin/{}", version), FetchedRef::Branch),
        ];
        for (candidate, kind) in candidates {
            let mut probe = self.git(Some(dest));
            probe
                .args(["rev-parse", "--verify", "--quiet"])
                .arg(format!("{}^{{commit}}", candidate));
            if !self.run(probe, deadline)?.success {
                continue;
            }

            let mut checkout = self.git(Some(dest));
            checkout.args(["checkout", "--quiet", "--detach"]).arg(&candidate);
            self.run_checked(checkout, deadline)?;

            let mut submodules = self.git(Some(dest));
            submodules.args(["submodule", "update", "--init", "--quiet"]);
            self.run_checked(submodules, deadline)?;
            return Ok(kind);
        }

        Err(SourceManagerFailure::VersionNotFound(version.to_string()))
    }
}

impl SourceFetcher for GitFetcher {
    fn fetch_fresh(&self, version: &str, dest: &Path) -> Result<FetchedRef> {
        let deadline = Instant::now() + self.timeout;

        let mut clone = self.git(None);
        clone
            .args(["clone", "--quiet", "--no-checkout"])
            .arg(&self.url)
            .arg(dest);
        self.run_checked(clone, deadline)?;

        self.checkout(dest, version, deadline)
    }

    fn fetch_incremental(&self, from: &Path, version: &str, dest: &Path) -> Result<FetchedRef> {
        let deadline = Instant::now() + self.timeout;

        // A local clone hardlinks the existing objects.
        let mut clone = self.git(None);
        clone
            .args(["clone", "--quiet", "--no-checkout"])
            .arg(from)
            .arg(dest);
        self.run_checked(clone, deadline)?;

        let mut set_url = self.git(Some(dest));
        set_url.args(["remote", "set-url", "origin"]).arg(&self.url);
        self.run_checked(set_url, deadline)?;

        let mut fetch = self.git(Some(dest));
        fetch.args(["fetch", "--quiet", "--force", "--tags", "origin"]);
        self.run_checked(fetch, deadline)?;

        self.checkout(dest, version, deadline)
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Map git's complaints to a failure the user can act on
fn classify(command: String, output: String) -> SourceManagerFailure {
    const NETWORK_ERRORS: &[&str] = &[
        "Could not resolve host",
        "unable to access",
        "Failed to connect",
        "Connection timed out",
        "Connection refused",
        "Network is unreachable",
        "Could not read from remote repository",
    ];

    if NETWORK_ERRORS.iter().any(|pattern| output.contains(pattern)) {
        let first_line = output.lines().next().unwrap_or_default().trim();
        SourceManagerFailure::NetworkUnavailable(first_line.to_string())
    } else {
        SourceManagerFailure::Fetch {
            command,
            diagnostics: output,
        }
    }
}

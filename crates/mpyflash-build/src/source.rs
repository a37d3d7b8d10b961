//! Firmware source cache
//!
//! The live checkout is whatever `<root>/current` names. An update fetches
//! into a new directory under `checkouts/`, then swaps the pointer with a
//! rename. Until that rename the previous checkout stays live; after it the
//! old directory is only garbage. Either way the next update can proceed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::SourceManagerFailure;
use crate::state::{write_atomic, SourceCacheState, StateFile};

/// Branch tracked when no version is requested
pub const DEFAULT_BRANCH: &str = "master";

const STATE_FILE: &str = "state.toml";
const POINTER_FILE: &str = "current";
const CHECKOUTS_DIR: &str = "checkouts";

type Result<T> = std::result::Result<T, SourceManagerFailure>;

/// What a requested version resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchedRef {
    /// A tag; fetching it again yields the same tree
    Tag,
    /// A branch, which may have moved since the last fetch
    Branch,
}

/// Produces source trees
///
/// Implementations create `dest` themselves; on failure they may leave a
/// partial `dest` behind, which the caller removes.
pub trait SourceFetcher {
    /// Fetch `version` from upstream into the empty path `dest`
    fn fetch_fresh(&self, version: &str, dest: &Path) -> Result<FetchedRef>;

    /// Create `dest` at `version`, reusing the objects of the checkout at `from`
    fn fetch_incremental(&self, from: &Path, version: &str, dest: &Path) -> Result<FetchedRef>;
}

/// What the cache currently holds
#[derive(Debug)]
struct Snapshot {
    state: Option<SourceCacheState>,
    live: Option<String>,
}

/// Manages the on-disk source cache
pub struct SourceManager<F: SourceFetcher> {
    root: PathBuf,
    fetcher: F,
}

impl<F: SourceFetcher> SourceManager<F> {
    /// Manage the cache at `root`
    pub fn new(root: impl Into<PathBuf>, fetcher: F) -> Self {
        Self {
            root: root.into(),
            fetcher,
        }
    }

    /// Cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current state, `None` for an empty cache
    pub fn state(&self) -> Result<Option<SourceCacheState>> {
        Ok(self.snapshot()?.state)
    }

    /// Path of the live source tree, `None` for an empty cache
    pub fn current_tree(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .snapshot()?
            .live
            .map(|name| self.checkouts_dir().join(name)))
    }

    /// Delete the whole cache
    ///
    /// The root is first renamed to a sibling tombstone, so the cache is
    /// either fully gone or untouched.
    pub fn clean(&self) -> Result<()> {
        if !self.root.exists() {
            log::debug!("Source cache {} does not exist", self.root.display());
            return Ok(());
        }

        let mut tombstone = self.root.as_os_str().to_owned();
        tombstone.push(format!(".deleting-{}", std::process::id()));
        let tombstone = PathBuf::from(tombstone);

        fs::rename(&self.root, &tombstone)?;
        log::info!("Removed source cache {}", self.root.display());

        if let Err(e) = fs::remove_dir_all(&tombstone) {
            log::warn!(
                "Could not delete {}: {}; remove it manually",
                tombstone.display(),
                e
            );
        }
        Ok(())
    }

    /// Bring the cache to `version`, or to the tip of the default branch
    ///
    /// Returns the path of the live source tree.
    pub fn update_to(&self, version: Option<&str>) -> Result<PathBuf> {
        let target = version.unwrap_or(DEFAULT_BRANCH);
        let snapshot = self.snapshot()?;

        if let (Some(state), Some(live)) = (&snapshot.state, &snapshot.live) {
            // Only a tag is known not to have moved upstream.
            if version.is_some()
                && state.is_tag
                && !state.dirty
                && state.checked_out_version == target
            {
                log::debug!("Source cache already at {}", target);
                return Ok(self.checkouts_dir().join(live));
            }
        }

        fs::create_dir_all(self.checkouts_dir())?;
        self.remove_orphans(snapshot.live.as_deref());

        let previous = snapshot.state.clone();
        let mut marker = previous.clone().unwrap_or_else(|| SourceCacheState {
            checked_out_version: target.to_string(),
            is_tag: false,
            dirty: true,
        });
        marker.dirty = true;
        marker.save(&self.state_path())?;

        let name = self.fresh_checkout_name(target);
        let dest = self.checkouts_dir().join(&name);

        let fetched = match &snapshot.live {
            Some(live) => {
                log::info!("Updating MicroPython source to {}", target);
                self.fetcher
                    .fetch_incremental(&self.checkouts_dir().join(live), target, &dest)
            }
            None => {
                log::info!("Fetching MicroPython source at {}", target);
                self.fetcher.fetch_fresh(target, &dest)
            }
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                remove_best_effort(&dest);
                // Nothing live changed, so the previous state still holds. A
                // state that was already dirty may not describe the live
                // checkout and stays dirty.
                if let (Some(state), Some(_)) = (previous, &snapshot.live) {
                    state.save(&self.state_path())?;
                }
                return Err(e);
            }
        };

        write_atomic(&self.pointer_path(), name.as_bytes())?;
        SourceCacheState {
            checked_out_version: target.to_string(),
            is_tag: fetched == FetchedRef::Tag,
            dirty: false,
        }
        .save(&self.state_path())?;

        if let Some(old) = &snapshot.live {
            remove_best_effort(&self.checkouts_dir().join(old));
        }

        log::info!("MicroPython source at {} ({})", target, dest.display());
        Ok(dest)
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let corrupted = |reason: String| SourceManagerFailure::CacheCorrupted {
            root: self.root.clone(),
            reason,
        };

        let state = match SourceCacheState::load(&self.state_path())? {
            StateFile::Missing => None,
            StateFile::Present(state) => Some(state),
            StateFile::Unreadable(e) => {
                return Err(corrupted(format!("unreadable {}: {}", STATE_FILE, e)));
            }
        };

        let live = match fs::read_to_string(self.pointer_path()) {
            Ok(name) => Some(name.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match (&state, &live) {
            (_, Some(name)) if name.is_empty() || name.contains(['/', '\\']) => {
                return Err(corrupted(format!("invalid pointer '{}'", name)));
            }
            (_, Some(name)) if !self.checkouts_dir().join(name).is_dir() => {
                return Err(corrupted(format!("checkout '{}' is missing", name)));
            }
            (None, Some(_)) => {
                return Err(corrupted(format!("{} is missing", STATE_FILE)));
            }
            (Some(state), None) if !state.dirty => {
                return Err(corrupted(format!("{} is missing", POINTER_FILE)));
            }
            _ => {}
        }

        Ok(Snapshot { state, live })
    }

    fn remove_orphans(&self, live: Option<&str>) {
        let entries = match fs::read_dir(self.checkouts_dir()) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if live != Some(&*name.to_string_lossy()) {
                log::debug!("Removing leftover checkout {}", entry.path().display());
                remove_best_effort(&entry.path());
            }
        }
    }

    fn fresh_checkout_name(&self, target: &str) -> String {
        let base: String = target
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        (0..)
            .map(|n| format!("{}-{}", base, n))
            .find(|name| !self.checkouts_dir().join(name).exists())
            .unwrap_or(base)
    }

    fn checkouts_dir(&self) -> PathBuf {
        self.root.join(CHECKOUTS_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER_FILE)
    }
}

fn remove_best_effort(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

//! Persisted source cache state

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// What the cache holds, stored as `state.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCacheState {
    /// Tag or branch of the live checkout
    pub checked_out_version: String,
    /// `checked_out_version` resolved to a tag, which never moves
    #[serde(default)]
    pub is_tag: bool,
    /// An update started and has not finished
    pub dirty: bool,
}

/// Outcome of reading the state file
#[derive(Debug)]
pub enum StateFile {
    /// No state file
    Missing,
    /// Parsed state
    Present(SourceCacheState),
    /// The file exists but cannot be parsed
    Unreadable(String),
}

impl SourceCacheState {
    /// Read the state file at `path`
    pub fn load(path: &Path) -> io::Result<StateFile> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateFile::Missing),
            Err(e) => return Err(e),
        };
        Ok(match toml::from_str(&content) {
            Ok(state) => StateFile::Present(state),
            Err(e) => StateFile::Unreadable(e.to_string()),
        })
    }

    /// Write the state file through a temporary file and a rename
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = toml::to_string(self).map_err(io::Error::other)?;
        write_atomic(path, content.as_bytes())
    }
}

/// Replace `path` with `content` so readers see either the old or the new file
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        assert!(matches!(SourceCacheState::load(&path).unwrap(), StateFile::Missing));

        let state = SourceCacheState {
            checked_out_version: "v1.20.0".into(),
            is_tag: true,
            dirty: true,
        };
        state.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("checked_out_version = \"v1.20.0\""));
        assert!(text.contains("is_tag = true"));
        assert!(!dir.path().join("state.toml.tmp").exists());

        match SourceCacheState::load(&path).unwrap() {
            StateFile::Present(loaded) => assert_eq!(loaded, state),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_tag_flag_reads_as_branch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "checked_out_version = \"v1.20.0\"\ndirty = false\n").unwrap();

        match SourceCacheState::load(&path).unwrap() {
            StateFile::Present(loaded) => assert!(!loaded.is_tag),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        assert!(matches!(SourceCacheState::load(&path).unwrap(), StateFile::Unreadable(_)));
    }
}

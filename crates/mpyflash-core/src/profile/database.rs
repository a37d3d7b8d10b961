//! Profile database for runtime loading and lookup
//!
//! Profiles are described in RON. Loading a file on top of the built-in
//! table replaces the entries for the profiles the file mentions.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use super::types::{FlashParams, ProfileEntry};
use crate::board::ChipProfile;

/// Built-in profile table
pub const BUILTIN_PROFILES: &str = include_str!("../../assets/profiles.ron");

/// Error type for profile database operations
#[derive(Error, Debug)]
pub enum ProfileDbError {
    /// I/O error reading files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RON parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
    /// Size in mebibytes (1024 * 1024 bytes)
    MiB(u32),
}

impl Size {
    /// Convert to bytes, `None` if the size does not fit in 32 bits
    pub fn to_bytes(self) -> Option<u32> {
        match self {
            Size::B(n) => Some(n),
            Size::KiB(n) => n.checked_mul(1024),
            Size::MiB(n) => n.checked_mul(1024 * 1024),
        }
    }
}

/// Flash protocol parameters (RON format)
#[derive(Debug, Clone, serde::Deserialize)]
struct FlashDef {
    offset: Size,
    block_size: Size,
    status_bytes: usize,
    #[serde(default)]
    spi_attach: bool,
    #[serde(default)]
    begin_encrypted_param: bool,
    #[serde(default)]
    erase_size_quirk: bool,
    #[serde(default)]
    md5_verify: bool,
}

impl TryFrom<FlashDef> for FlashParams {
    type Error = String;

    fn try_from(def: FlashDef) -> Result<Self, String> {
        let bytes = |size: Size, what: &str| {
            size.to_bytes()
                .ok_or_else(|| format!("{} {:?} does not fit in 32 bits", what, size))
        };
        Ok(FlashParams {
            offset: bytes(def.offset, "offset")?,
            block_size: bytes(def.block_size, "block_size")?,
            status_bytes: def.status_bytes,
            spi_attach: def.spi_attach,
            begin_encrypted_param: def.begin_encrypted_param,
            erase_size_quirk: def.erase_size_quirk,
            md5_verify: def.md5_verify,
        })
    }
}

/// Single profile definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct ProfileDef {
    profile: ChipProfile,
    port: String,
    board: String,
    #[serde(default)]
    make_args: Vec<String>,
    artifact: String,
    #[serde(default = "default_stock_manifest")]
    stock_manifest: String,
    #[serde(default)]
    flash: Option<FlashDef>,
}

fn default_stock_manifest() -> String {
    "$(PORT_DIR)/boards/manifest.py".to_string()
}

/// Top-level RON document
#[derive(Debug, Clone, serde::Deserialize)]
struct ProfilesDef {
    profiles: Vec<ProfileDef>,
}

/// Check a definition and turn it into an entry
fn to_entry(def: ProfileDef) -> Result<ProfileEntry, ProfileDbError> {
    let profile = def.profile;
    let invalid = |reason: String| ProfileDbError::Validation(format!("{}: {}", profile, reason));

    if def.profile == ChipProfile::Unknown {
        return Err(ProfileDbError::Validation(
            "the Unknown profile cannot be configured".into(),
        ));
    }
    if def.port.is_empty() || def.board.is_empty() || def.artifact.is_empty() {
        return Err(invalid("port, board and artifact must not be empty".into()));
    }

    let flash = match def.flash {
        Some(flash) => Some(FlashParams::try_from(flash).map_err(invalid)?),
        None => None,
    };
    if let Some(flash) = &flash {
        if flash.block_size == 0 || flash.block_size % 4 != 0 {
            return Err(invalid(format!(
                "block_size must be a non-zero multiple of 4 (got {})",
                flash.block_size
            )));
        }
        if !(2..=4).contains(&flash.status_bytes) {
            return Err(invalid(format!(
                "status_bytes must be 2..=4 (got {})",
                flash.status_bytes
            )));
        }
    }

    Ok(ProfileEntry {
        profile: def.profile,
        port_dir: def.port,
        board: def.board,
        make_args: def.make_args,
        artifact: def.artifact,
        stock_manifest: def.stock_manifest,
        flash,
    })
}

// ============================================================================
// Profile database
// ============================================================================

/// Runtime profile database
#[derive(Debug, Clone, Default)]
pub struct ProfileDatabase {
    entries: Vec<ProfileEntry>,
}

impl ProfileDatabase {
    /// Create an empty profile database
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Database holding the built-in profiles
    pub fn builtin() -> Result<Self, ProfileDbError> {
        let mut db = Self::new();
        db.load_ron(BUILTIN_PROFILES)?;
        Ok(db)
    }

    /// Load profile definitions from a RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ProfileDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load profile definitions from a RON string
    ///
    /// Entries replace any existing entry for the same profile. The whole
    /// document is validated before anything is replaced.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, ProfileDbError> {
        let defs: ProfilesDef = ron::from_str(content)?;

        let mut entries: Vec<ProfileEntry> = Vec::with_capacity(defs.profiles.len());
        for def in defs.profiles {
            if entries.iter().any(|e| e.profile == def.profile) {
                return Err(ProfileDbError::Validation(format!(
                    "{} is defined more than once",
                    def.profile
                )));
            }
            entries.push(to_entry(def)?);
        }

        let count = entries.len();
        for entry in entries {
            match self.entries.iter_mut().find(|e| e.profile == entry.profile) {
                Some(existing) => {
                    log::debug!("Overriding profile {}", entry.profile);
                    *existing = entry;
                }
                None => self.entries.push(entry),
            }
        }

        Ok(count)
    }

    /// Look up the entry for a profile
    pub fn get(&self, profile: ChipProfile) -> Option<&ProfileEntry> {
        self.entries.iter().find(|e| e.profile == profile)
    }

    /// Get the number of profiles in the database
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = &ProfileEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_known_profiles() {
        let db = ProfileDatabase::builtin().unwrap();
        for profile in ChipProfile::KNOWN {
            let entry = db.get(*profile).unwrap();
            assert!(entry.flash.is_some(), "{profile} has no flash parameters");
        }
        assert!(db.get(ChipProfile::Unknown).is_none());

        let esp32 = db.get(ChipProfile::Esp32).unwrap();
        assert_eq!(esp32.port_dir, "esp32");
        assert_eq!(esp32.stock_manifest, "$(PORT_DIR)/boards/manifest.py");
        let flash = esp32.flash.as_ref().unwrap();
        assert_eq!(flash.offset, 0x1000);
        assert_eq!(flash.block_size, 0x400);
        assert!(flash.md5_verify);

        let esp8266 = db.get(ChipProfile::Esp8266).unwrap().flash.as_ref().unwrap();
        assert_eq!(esp8266.status_bytes, 2);
        assert!(esp8266.erase_size_quirk);
        assert!(!esp8266.md5_verify);
    }

    #[test]
    fn test_override_replaces_entry() {
        let mut db = ProfileDatabase::builtin().unwrap();
        let before = db.len();
        let ron = r#"
        (
            profiles: [
                (
                    profile: Esp32,
                    port: "esp32",
                    board: "GENERIC",
                    make_args: ["V=1"],
                    artifact: "firmware.bin",
                ),
            ],
        )
        "#;

        assert_eq!(db.load_ron(ron).unwrap(), 1);
        assert_eq!(db.len(), before);
        let esp32 = db.get(ChipProfile::Esp32).unwrap();
        assert_eq!(esp32.board, "GENERIC");
        assert_eq!(esp32.make_args, vec!["V=1".to_string()]);
        assert!(esp32.flash.is_none());
    }

    #[test]
    fn test_rejects_invalid_documents() {
        let mut db = ProfileDatabase::new();

        let unknown = r#"(profiles: [(profile: Unknown, port: "x", board: "y", artifact: "z")])"#;
        assert!(matches!(db.load_ron(unknown), Err(ProfileDbError::Validation(_))));

        let duplicate = r#"(profiles: [
            (profile: Esp32, port: "esp32", board: "A", artifact: "f.bin"),
            (profile: Esp32, port: "esp32", board: "B", artifact: "f.bin"),
        ])"#;
        assert!(matches!(db.load_ron(duplicate), Err(ProfileDbError::Validation(_))));

        let bad_block = r#"(profiles: [(profile: Esp8266, port: "esp8266", board: "A", artifact: "f.bin",
            flash: Some((offset: B(0), block_size: B(3), status_bytes: 2)))])"#;
        assert!(matches!(db.load_ron(bad_block), Err(ProfileDbError::Validation(_))));

        let huge_offset = r#"(profiles: [(profile: Esp32, port: "esp32", board: "A", artifact: "f.bin",
            flash: Some((offset: MiB(5000), block_size: KiB(1), status_bytes: 4)))])"#;
        match db.load_ron(huge_offset) {
            Err(ProfileDbError::Validation(msg)) => assert!(msg.contains("offset")),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(db.load_ron("(profiles: ["), Err(ProfileDbError::Parse(_))));
        assert!(db.is_empty());
    }

    #[test]
    fn test_size_conversion() {
        assert_eq!(Size::B(256).to_bytes(), Some(256));
        assert_eq!(Size::KiB(4).to_bytes(), Some(4096));
        assert_eq!(Size::MiB(1).to_bytes(), Some(1048576));
        assert_eq!(Size::MiB(4095).to_bytes(), Some(4095 * 1024 * 1024));
        assert_eq!(Size::MiB(5000).to_bytes(), None);
        assert_eq!(Size::KiB(u32::MAX).to_bytes(), None);
    }
}

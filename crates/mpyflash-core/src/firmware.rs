//! Firmware requests and build artifacts

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::board::ChipProfile;
use crate::error::FirmwareSpecError;

/// Name of the module frozen into dev firmware
pub const DEV_MODULE_NAME: &str = "mpyflash_dev.py";

/// Source of the module frozen into dev firmware
pub const DEV_MODULE_SOURCE: &str = include_str!("../assets/mpyflash_dev.py");

/// A module to be frozen into the firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// A `.py` file or a package directory on the host
    Path(PathBuf),
    /// A module shipped inside mpyflash
    Embedded {
        /// File name inside the staging tree
        name: &'static str,
        /// Python source
        contents: &'static str,
    },
}

impl ModuleSource {
    /// The module used by dev firmware
    pub fn dev() -> Self {
        ModuleSource::Embedded {
            name: DEV_MODULE_NAME,
            contents: DEV_MODULE_SOURCE,
        }
    }

    /// File or directory name this module gets in the staging tree
    pub fn staged_name(&self) -> Option<&str> {
        match self {
            ModuleSource::Path(path) => path.file_name().and_then(|n| n.to_str()),
            ModuleSource::Embedded { name, .. } => Some(name),
        }
    }
}

/// Something to run at boot, in the form `pkg.module` or `pkg.module:function`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entrypoint {
    /// Dotted module path to import
    pub module: String,
    /// Function in `module` to call after importing, if any
    pub function: Option<String>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl FromStr for Entrypoint {
    type Err = FirmwareSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FirmwareSpecError::InvalidEntrypoint(s.to_string());
        let (module, function) = match s.split_once(':') {
            Some((module, function)) => (module, Some(function)),
            None => (s, None),
        };

        if !module.split('.').all(is_identifier) {
            return Err(invalid());
        }
        if let Some(function) = function {
            if !is_identifier(function) {
                return Err(invalid());
            }
        }

        Ok(Entrypoint {
            module: module.to_string(),
            function: function.map(str::to_string),
        })
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{}:{}", self.module, function),
            None => f.write_str(&self.module),
        }
    }
}

/// What the caller asked to build
///
/// Constructed once per invocation. Validation happens entirely in
/// [`FirmwareSpec::new`], before any build work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSpec {
    modules: Vec<PathBuf>,
    entrypoints: Vec<Entrypoint>,
    version_tag: Option<String>,
    dev_mode: bool,
}

impl FirmwareSpec {
    /// Validate a firmware request
    ///
    /// Dev mode forces a fixed module set, so it must come with no explicit
    /// modules or entrypoints.
    pub fn new(
        modules: Vec<PathBuf>,
        entrypoints: Vec<String>,
        version_tag: Option<String>,
        dev_mode: bool,
    ) -> Result<Self, FirmwareSpecError> {
        if dev_mode && !(modules.is_empty() && entrypoints.is_empty()) {
            return Err(FirmwareSpecError::DevModeConflict);
        }

        for module in &modules {
            if module.file_name().and_then(|n| n.to_str()).is_none() {
                return Err(FirmwareSpecError::InvalidModulePath(module.clone()));
            }
        }

        let entrypoints = entrypoints
            .iter()
            .map(|e| e.parse())
            .collect::<Result<Vec<Entrypoint>, _>>()?;

        Ok(Self {
            modules,
            entrypoints,
            version_tag,
            dev_mode,
        })
    }

    /// Explicit module paths, in caller order
    pub fn modules(&self) -> &[PathBuf] {
        &self.modules
    }

    /// Boot entrypoints, in execution order
    pub fn entrypoints(&self) -> &[Entrypoint] {
        &self.entrypoints
    }

    /// Requested source version tag (`None` tracks the default branch)
    pub fn version_tag(&self) -> Option<&str> {
        self.version_tag.as_deref()
    }

    /// Whether this is a dev firmware request
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Modules to stage, with the dev set substituted in dev mode
    pub fn resolved_modules(&self) -> Vec<ModuleSource> {
        if self.dev_mode {
            vec![ModuleSource::dev()]
        } else {
            self.modules.iter().cloned().map(ModuleSource::Path).collect()
        }
    }
}

/// A firmware binary ready to be flashed
///
/// One artifact can be flashed to every board sharing its chip profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Location of the binary
    pub path: PathBuf,
    /// Chip family the binary was built for
    pub chip_profile: ChipProfile,
}

impl BuildArtifact {
    /// Wrap a binary built for a known profile
    pub fn new(path: impl Into<PathBuf>, chip_profile: ChipProfile) -> Self {
        Self {
            path: path.into(),
            chip_profile,
        }
    }

    /// Wrap an existing image file
    ///
    /// The profile is `chip` when given, otherwise it is read from the
    /// image header (see [`ChipProfile::sniff_image`]).
    pub fn from_image(path: &Path, chip: Option<ChipProfile>) -> io::Result<Self> {
        let chip_profile = match chip {
            Some(profile) => profile,
            None => {
                let mut header = Vec::with_capacity(0x1100);
                File::open(path)?.take(0x1100).read_to_end(&mut header)?;
                ChipProfile::sniff_image(&header)
            }
        };
        log::debug!("Firmware {} identified as {}", path.display(), chip_profile);
        Ok(Self::new(path, chip_profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dev_mode_conflict() {
        assert_eq!(
            FirmwareSpec::new(vec!["app.py".into()], vec![], None, true),
            Err(FirmwareSpecError::DevModeConflict)
        );
        assert_eq!(
            FirmwareSpec::new(vec![], vec!["app".into()], None, true),
            Err(FirmwareSpecError::DevModeConflict)
        );
    }

    #[test]
    fn test_dev_mode_does_no_io() {
        // Module paths that do not exist are fine: validation never touches disk.
        let spec = FirmwareSpec::new(
            vec!["/definitely/not/here.py".into()],
            vec!["here:run".into()],
            None,
            false,
        )
        .unwrap();
        assert_eq!(spec.modules().len(), 1);
    }

    #[test]
    fn test_dev_resolves_fixed_module_set() {
        let spec = FirmwareSpec::new(vec![], vec![], Some("v1.20.0".into()), true).unwrap();
        assert_eq!(spec.resolved_modules(), vec![ModuleSource::dev()]);
        assert!(spec.entrypoints().is_empty());
        assert_eq!(spec.version_tag(), Some("v1.20.0"));
    }

    #[test]
    fn test_empty_request_is_valid() {
        let spec = FirmwareSpec::new(vec![], vec![], None, false).unwrap();
        assert!(spec.resolved_modules().is_empty());
        assert!(!spec.dev_mode());
    }

    #[test]
    fn test_entrypoint_parsing() {
        let e: Entrypoint = "app.main:run".parse().unwrap();
        assert_eq!(e.module, "app.main");
        assert_eq!(e.function.as_deref(), Some("run"));
        assert_eq!(e.to_string(), "app.main:run");

        let e: Entrypoint = "blink".parse().unwrap();
        assert_eq!(e.function, None);

        for bad in ["", "1app", "app.", "app:", "app:run()", "app-main", "a:b:c"] {
            assert!(bad.parse::<Entrypoint>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_artifact_from_image_sniffs_profile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut header = [0u8; 32];
        header[0] = 0xE9;
        header[8] = 0xEE;
        header[12..14].copy_from_slice(&9u16.to_le_bytes());
        file.write_all(&header).unwrap();

        let artifact = BuildArtifact::from_image(file.path(), None).unwrap();
        assert_eq!(artifact.chip_profile, ChipProfile::Esp32S3);

        let forced = BuildArtifact::from_image(file.path(), Some(ChipProfile::Esp32)).unwrap();
        assert_eq!(forced.chip_profile, ChipProfile::Esp32);
    }
}

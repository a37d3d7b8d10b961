//! Firmware assembly
//!
//! A build stages the requested modules into `<root>/staging/<profile>/`,
//! writes a frozen manifest (and a boot `main.py` for entrypoints) beside
//! them, runs the port build through a [`BuildToolchain`] and copies the
//! binary to `<root>/artifacts/<profile>.bin`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mpyflash_core::{
    BuildArtifact, ChipProfile, Entrypoint, ModuleSource, ProfileDatabase, ProfileEntry,
};
use sha2::{Digest, Sha256};

use crate::error::BuildFailure;
use crate::manifest::{render_main, render_manifest, Staged, StagedKind};

const MANIFEST_NAME: &str = "manifest.py";
const MAIN_NAME: &str = "main.py";

type Result<T> = std::result::Result<T, BuildFailure>;

/// Everything a toolchain needs to build one firmware
#[derive(Debug, Clone, Copy)]
pub struct ToolchainRequest<'a> {
    /// Root of the MicroPython source tree
    pub tree: &'a Path,
    /// Build parameters of the target profile
    pub profile: &'a ProfileEntry,
    /// Frozen manifest to build with
    pub manifest: &'a Path,
    /// Directory for build outputs
    pub build_dir: &'a Path,
}

/// Builds a firmware binary from a source tree and a manifest
pub trait BuildToolchain {
    /// Run the build and return the path of the produced binary
    fn build(&self, request: &ToolchainRequest<'_>) -> Result<PathBuf>;
}

/// Stages modules and drives a [`BuildToolchain`]
pub struct Assembler<'a, B: BuildToolchain> {
    root: PathBuf,
    tree: PathBuf,
    profiles: &'a ProfileDatabase,
    toolchain: B,
}

impl<'a, B: BuildToolchain> Assembler<'a, B> {
    /// Assemble inside the cache at `root`, building the source tree at `tree`
    pub fn new(
        root: impl Into<PathBuf>,
        tree: impl Into<PathBuf>,
        profiles: &'a ProfileDatabase,
        toolchain: B,
    ) -> Self {
        Self {
            root: root.into(),
            tree: tree.into(),
            profiles,
            toolchain,
        }
    }

    /// Staging directory used for `profile`
    pub fn staging_dir(&self, profile: ChipProfile) -> PathBuf {
        self.root.join("staging").join(profile.name())
    }

    /// Build firmware for `profile` freezing `modules` and running `entrypoints` at boot
    ///
    /// Empty `modules` and `entrypoints` build the stock firmware.
    pub fn build(
        &self,
        profile: ChipProfile,
        entrypoints: &[Entrypoint],
        modules: &[ModuleSource],
    ) -> Result<BuildArtifact> {
        let entry = self
            .profiles
            .get(profile)
            .filter(|_| profile.is_known())
            .ok_or(BuildFailure::UnsupportedProfile(profile))?;

        let staging = self.staging_dir(profile);
        let manifest = self.stage(&staging, entry, entrypoints, modules)?;

        let build_dir = self.root.join("build").join(profile.name());
        fs::create_dir_all(&build_dir)?;

        log::info!("Building {} firmware ({})", profile, entry.board);
        let produced = self.toolchain.build(&ToolchainRequest {
            tree: &self.tree,
            profile: entry,
            manifest: &manifest,
            build_dir: &build_dir,
        })?;
        if !produced.is_file() {
            return Err(BuildFailure::MissingArtifact(produced));
        }

        let artifacts = self.root.join("artifacts");
        fs::create_dir_all(&artifacts)?;
        let dest = artifacts.join(format!("{}.bin", profile.name()));
        fs::copy(&produced, &dest)?;

        let digest = Sha256::digest(fs::read(&dest)?);
        log::info!("Built {} (sha256 {:x})", dest.display(), digest);

        Ok(BuildArtifact::new(dest, profile))
    }

    /// Recreate the staging tree, returning the manifest path
    fn stage(
        &self,
        staging: &Path,
        entry: &ProfileEntry,
        entrypoints: &[Entrypoint],
        modules: &[ModuleSource],
    ) -> Result<PathBuf> {
        match fs::remove_dir_all(staging) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(staging)?;

        let mut names = HashSet::new();
        let mut staged = Vec::new();
        let mut claim = |name: &str| -> Result<()> {
            if name == MANIFEST_NAME || !names.insert(name.to_string()) {
                return Err(BuildFailure::DuplicateModule(name.to_string()));
            }
            Ok(())
        };

        for module in modules {
            let item = match module {
                ModuleSource::Path(path) => {
                    let name = module
                        .staged_name()
                        .ok_or_else(|| BuildFailure::ModuleNotFound(path.clone()))?;
                    claim(name)?;
                    stage_path(path, &staging.join(name), name)?
                }
                ModuleSource::Embedded { name, contents } => {
                    let name: &str = name;
                    claim(name)?;
                    fs::write(staging.join(name), contents.as_bytes())?;
                    Staged {
                        name: name.to_string(),
                        kind: StagedKind::Module,
                    }
                }
            };
            log::debug!("Staged {}", item.name);
            staged.push(item);
        }

        if !entrypoints.is_empty() {
            claim(MAIN_NAME)?;
            fs::write(staging.join(MAIN_NAME), render_main(entrypoints))?;
            staged.push(Staged {
                name: MAIN_NAME.to_string(),
                kind: StagedKind::Module,
            });
        }

        let manifest = staging.join(MANIFEST_NAME);
        fs::write(&manifest, render_manifest(&entry.stock_manifest, &staged))?;
        Ok(manifest)
    }
}

fn stage_path(src: &Path, dest: &Path, name: &str) -> Result<Staged> {
    let meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BuildFailure::ModuleNotFound(src.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let kind = if meta.is_dir() {
        copy_tree(src, dest)?;
        StagedKind::Package
    } else {
        fs::copy(src, dest)?;
        StagedKind::Module
    };
    Ok(Staged {
        name: name.to_string(),
        kind,
    })
}

/// Copy a package directory, visiting entries in name order
fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;

    let mut entries = fs::read_dir(src)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name == "__pycache__" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            copy_tree(&path, &dest.join(&name))?;
        } else {
            fs::copy(&path, dest.join(&name))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Pretends to build by hashing the staging tree into the binary
    #[derive(Default)]
    struct FakeToolchain {
        builds: RefCell<Vec<String>>,
        fail_with: Option<(i32, &'static str)>,
    }

    impl BuildToolchain for FakeToolchain {
        fn build(&self, request: &ToolchainRequest<'_>) -> Result<PathBuf> {
            self.builds.borrow_mut().push(request.profile.board.clone());
            if let Some((code, output)) = self.fail_with {
                return Err(BuildFailure::Toolchain {
                    status: Some(code),
                    diagnostics: output.to_string(),
                });
            }

            let staging = request.manifest.parent().unwrap();
            let mut image = Vec::new();
            for name in listing(staging) {
                image.extend(name.as_bytes());
                let path = staging.join(&name);
                if path.is_file() {
                    image.extend(fs::read(path).unwrap());
                }
            }
            let out = request.build_dir.join(&request.profile.artifact);
            fs::write(&out, image).unwrap();
            Ok(out)
        }
    }

    /// Relative paths of every file and directory under `root`, sorted
    fn listing(root: &Path) -> Vec<String> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                out.push(path.strip_prefix(root).unwrap().to_string_lossy().into_owned());
                if path.is_dir() {
                    walk(root, &path, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(root, root, &mut out);
        out.sort();
        out
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        src: PathBuf,
        db: ProfileDatabase,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("cache");
            let src = dir.path().join("project");
            fs::create_dir_all(src.join("lib/drivers")).unwrap();
            fs::write(src.join("app.py"), "print('app')\n").unwrap();
            fs::write(src.join("lib/__init__.py"), "").unwrap();
            fs::write(src.join("lib/util.py"), "X = 1\n").unwrap();
            fs::write(src.join("lib/drivers/bme280.py"), "class BME280: pass\n").unwrap();
            Self {
                _dir: dir,
                root,
                src,
                db: ProfileDatabase::builtin().unwrap(),
            }
        }

        fn assembler<B: BuildToolchain>(&self, toolchain: B) -> Assembler<'_, B> {
            Assembler::new(&self.root, self.root.join("tree"), &self.db, toolchain)
        }

        fn module(&self, rel: &str) -> ModuleSource {
            ModuleSource::Path(self.src.join(rel))
        }
    }

    fn entrypoints(list: &[&str]) -> Vec<Entrypoint> {
        list.iter().map(|e| e.parse().unwrap()).collect()
    }

    #[test]
    fn test_build_stages_modules_and_main() {
        let fx = Fixture::new();
        let asm = fx.assembler(FakeToolchain::default());

        let artifact = asm
            .build(
                ChipProfile::Esp32,
                &entrypoints(&["app", "lib.util:main"]),
                &[fx.module("app.py"), fx.module("lib")],
            )
            .unwrap();

        assert_eq!(artifact.chip_profile, ChipProfile::Esp32);
        assert_eq!(artifact.path, fx.root.join("artifacts/esp32.bin"));
        assert!(artifact.path.is_file());

        let staging = asm.staging_dir(ChipProfile::Esp32);
        assert_eq!(
            listing(&staging),
            vec![
                "app.py",
                "lib",
                "lib/__init__.py",
                "lib/drivers",
                "lib/drivers/bme280.py",
                "lib/util.py",
                "main.py",
                "manifest.py",
            ]
        );

        let manifest = fs::read_to_string(staging.join("manifest.py")).unwrap();
        let body: Vec<&str> = manifest.lines().skip(1).collect();
        assert_eq!(
            body,
            vec![
                "include(\"$(PORT_DIR)/boards/manifest.py\")",
                "module(\"app.py\")",
                "package(\"lib\")",
                "module(\"main.py\")",
            ]
        );

        let main = fs::read_to_string(staging.join("main.py")).unwrap();
        assert!(main.ends_with("import app\nimport lib.util\nlib.util.main()\n"));
    }

    #[test]
    fn test_build_is_repeatable() {
        let fx = Fixture::new();
        let asm = fx.assembler(FakeToolchain::default());
        let modules = [fx.module("lib"), fx.module("app.py")];
        let eps = entrypoints(&["app"]);

        let first = asm.build(ChipProfile::Esp8266, &eps, &modules).unwrap();
        let first_bytes = fs::read(&first.path).unwrap();

        // Leftovers from an earlier build must not leak into the next one.
        fs::write(asm.staging_dir(ChipProfile::Esp8266).join("stale.py"), "").unwrap();

        let second = asm.build(ChipProfile::Esp8266, &eps, &modules).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(fs::read(&second.path).unwrap(), first_bytes);
        assert!(!asm.staging_dir(ChipProfile::Esp8266).join("stale.py").exists());
    }

    #[test]
    fn test_empty_build_is_stock_firmware() {
        let fx = Fixture::new();
        let asm = fx.assembler(FakeToolchain::default());

        asm.build(ChipProfile::Esp32C3, &[], &[]).unwrap();

        let staging = asm.staging_dir(ChipProfile::Esp32C3);
        assert_eq!(listing(&staging), vec!["manifest.py"]);
        let manifest = fs::read_to_string(staging.join("manifest.py")).unwrap();
        assert_eq!(manifest.lines().count(), 2);
    }

    #[test]
    fn test_dev_module_is_embedded() {
        let fx = Fixture::new();
        let asm = fx.assembler(FakeToolchain::default());

        asm.build(ChipProfile::Esp32, &[], &[ModuleSource::dev()]).unwrap();

        let staged = asm
            .staging_dir(ChipProfile::Esp32)
            .join(mpyflash_core::firmware::DEV_MODULE_NAME);
        assert_eq!(
            fs::read_to_string(staged).unwrap(),
            mpyflash_core::firmware::DEV_MODULE_SOURCE
        );
    }

    #[test]
    fn test_unknown_profile_is_refused() {
        let fx = Fixture::new();
        let toolchain = FakeToolchain::default();
        let asm = fx.assembler(toolchain);

        assert!(matches!(
            asm.build(ChipProfile::Unknown, &[], &[]),
            Err(BuildFailure::UnsupportedProfile(ChipProfile::Unknown))
        ));
        assert!(asm.toolchain.builds.borrow().is_empty());
        assert!(!asm.staging_dir(ChipProfile::Unknown).exists());
    }

    #[test]
    fn test_duplicate_modules_rejected() {
        let fx = Fixture::new();
        let other = fx.src.join("other");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("app.py"), "").unwrap();
        let asm = fx.assembler(FakeToolchain::default());

        let err = asm
            .build(
                ChipProfile::Esp32,
                &[],
                &[fx.module("app.py"), ModuleSource::Path(other.join("app.py"))],
            )
            .unwrap_err();
        assert!(matches!(err, BuildFailure::DuplicateModule(ref name) if name == "app.py"));

        // A module called main.py collides with the generated boot script.
        fs::write(fx.src.join("main.py"), "").unwrap();
        let err = asm
            .build(ChipProfile::Esp32, &entrypoints(&["app"]), &[fx.module("main.py")])
            .unwrap_err();
        assert!(matches!(err, BuildFailure::DuplicateModule(ref name) if name == "main.py"));
        assert!(asm.toolchain.builds.borrow().is_empty());
    }

    #[test]
    fn test_missing_module() {
        let fx = Fixture::new();
        let asm = fx.assembler(FakeToolchain::default());
        assert!(matches!(
            asm.build(ChipProfile::Esp32, &[], &[fx.module("nope.py")]),
            Err(BuildFailure::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_toolchain_output_passed_through() {
        let fx = Fixture::new();
        let diagnostics = "CC main.c\nmain.c:12: error: 'foo' undeclared\n";
        let asm = fx.assembler(FakeToolchain {
            fail_with: Some((2, diagnostics)),
            ..Default::default()
        });

        match asm.build(ChipProfile::Esp32, &[], &[]) {
            Err(BuildFailure::Toolchain { status, diagnostics: out }) => {
                assert_eq!(status, Some(2));
                assert_eq!(out, diagnostics);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!fx.root.join("artifacts/esp32.bin").exists());
    }
}

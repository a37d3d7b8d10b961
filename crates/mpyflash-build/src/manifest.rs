//! Frozen manifest and boot script generation

use std::fmt::Write;

use mpyflash_core::Entrypoint;

/// Header line of every generated file
const GENERATED: &str = "# Generated by mpyflash; changes are overwritten on the next build.";

/// How a staged item is frozen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedKind {
    /// A single `.py` file
    Module,
    /// A package directory
    Package,
}

/// An item in the staging tree, in staging order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    /// File or directory name relative to the staging root
    pub name: String,
    /// How it is frozen
    pub kind: StagedKind,
}

/// Render `manifest.py` for the staging root
///
/// Paths are relative to the manifest itself, so the same inputs always
/// give the same file regardless of where the cache lives.
pub fn render_manifest(stock_manifest: &str, staged: &[Staged]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", GENERATED);
    let _ = writeln!(out, "include({})", py_str(stock_manifest));
    for item in staged {
        let _ = match item.kind {
            StagedKind::Module => writeln!(out, "module({})", py_str(&item.name)),
            StagedKind::Package => writeln!(out, "package({})", py_str(&item.name)),
        };
    }
    out
}

/// Render a `main.py` that runs `entrypoints` in order
pub fn render_main(entrypoints: &[Entrypoint]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", GENERATED);
    for entry in entrypoints {
        let _ = writeln!(out, "import {}", entry.module);
        if let Some(function) = &entry.function {
            let _ = writeln!(out, "{}.{}()", entry.module, function);
        }
    }
    out
}

fn py_str(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_keeps_order() {
        let staged = vec![
            Staged {
                name: "zeta.py".into(),
                kind: StagedKind::Module,
            },
            Staged {
                name: "alpha".into(),
                kind: StagedKind::Package,
            },
        ];
        let manifest = render_manifest("$(PORT_DIR)/boards/manifest.py", &staged);
        let lines: Vec<&str> = manifest.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "include(\"$(PORT_DIR)/boards/manifest.py\")",
                "module(\"zeta.py\")",
                "package(\"alpha\")",
            ]
        );
    }

    #[test]
    fn test_main_runs_entrypoints() {
        let entrypoints: Vec<Entrypoint> = ["app.server:run", "sensors"]
            .iter()
            .map(|e| e.parse().unwrap())
            .collect();
        let main = render_main(&entrypoints);
        let lines: Vec<&str> = main.lines().skip(1).collect();
        assert_eq!(lines, vec!["import app.server", "app.server.run()", "import sensors"]);
    }

    #[test]
    fn test_quotes_are_escaped() {
        assert_eq!(py_str(r#"we"ird\name.py"#), r#""we\"ird\\name.py""#);
    }
}

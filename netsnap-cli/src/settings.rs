//! Per-project CLI settings, read from `<project>/netsnap.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use netsnap::store::STATE_DIR;
use netsnap::{ExtractOptions, NamingPolicy, ProjectContext};
use serde::{Deserialize, Serialize};

use crate::render::OutputFormat;

pub const SETTINGS_FILE: &str = "netsnap.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rendered snapshot written by `update`, relative to the project.
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Changelog appended by `update`, relative to the project.
    pub changelog: PathBuf,
    pub debounce_ms: u64,
    pub root: Option<String>,
    /// External symbol libraries, nickname to `.kicad_sym` path.
    pub libraries: BTreeMap<String, PathBuf>,
    pub naming: NamingPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: Path::new(STATE_DIR).join("snapshot.txt"),
            format: OutputFormat::Compact,
            changelog: Path::new(STATE_DIR).join("changelog.txt"),
            debounce_ms: 2000,
            root: None,
            libraries: BTreeMap::new(),
            naming: NamingPolicy::default(),
        }
    }
}

impl Settings {
    /// Settings for `dir`; defaults when no settings file exists.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            root: self.root.clone(),
            naming: self.naming.clone(),
            ..ExtractOptions::default()
        }
    }

    /// Read the project sources plus every configured library.
    pub fn project_context(&self, dir: &Path) -> Result<ProjectContext> {
        let mut context = ProjectContext::load_dir(dir)
            .with_context(|| format!("Failed to read project: {}", dir.display()))?;
        for (nickname, path) in &self.libraries {
            let path = dir.join(path);
            context = context
                .load_symbol_library(nickname, &path)
                .with_context(|| format!("Failed to read library: {}", path.display()))?;
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsnap::TieBreak;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.debounce(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"format": "summary", "root": "main.kicad_sch", "naming": {"tie_break": "shortest"}}"#,
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.format, OutputFormat::Summary);
        assert_eq!(settings.debounce_ms, 2000);

        let options = settings.extract_options();
        assert_eq!(options.root.as_deref(), Some("main.kicad_sch"));
        assert_eq!(options.naming.tie_break, TieBreak::Shortest);
        assert_eq!(options.naming.synthetic_prefix, "Net_");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        let err = Settings::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid settings file"));
    }
}

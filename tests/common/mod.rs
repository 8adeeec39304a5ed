//! Shared helpers for the integration suite.

#![allow(dead_code)]

use anyhow::{Context, Result};
use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary source tree plus configuration file for CLI tests.
pub struct TestProject {
    _temp_dir: TempDir, // Keep alive for RAII cleanup
    source_dir: PathBuf,
    config_path: PathBuf,
}

impl TestProject {
    /// Empty source directory and an empty configuration file.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let source_dir = temp_dir.path().join("web");
        let config_path = temp_dir.path().join("config.toml");

        fs::create_dir_all(&source_dir)?;
        fs::write(&config_path, "")?;

        Ok(Self {
            _temp_dir: temp_dir,
            source_dir,
            config_path,
        })
    }

    /// Project holding the given `(uri, content)` sources.
    pub fn with_sources(files: &[(&str, &str)]) -> Result<Self> {
        let project = Self::new()?;
        for (uri, content) in files {
            project.write_source(uri, content)?;
        }
        Ok(project)
    }

    /// Source directory
    pub fn source_path(&self) -> &Path {
        &self.source_dir
    }

    /// Write (or overwrite) a source file.
    pub fn write_source(&self, uri: &str, content: &str) -> Result<()> {
        let path = self.source_dir.join(uri);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Replace the configuration file.
    pub fn write_config(&self, content: &str) -> Result<()> {
        fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config to {}", self.config_path.display()))
    }

    /// `amdagg` invocation with this project's config and root.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("amdagg").expect("amdagg binary is built for tests");
        cmd.arg("--config")
            .arg(&self.config_path)
            .arg("--root")
            .arg(&self.source_dir)
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG");
        cmd
    }
}

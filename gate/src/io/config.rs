//! Gate configuration stored under `<home>/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Gate configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values a
/// plain checkout of the checks directory expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// File name of the per-directory rule manifest.
    pub manifest_name: String,

    /// Directory holding checker executables, relative to the gate home.
    pub checks_dir: PathBuf,

    /// Directory holding helper utilities for checkers, relative to the gate home.
    pub helpers_dir: PathBuf,

    /// Search-path variable that exposes `helpers_dir` to checkers.
    pub helper_path_var: String,

    /// Warn when a checker runs longer than this many seconds. Advisory only.
    pub slow_check_secs: u64,

    /// Granularity of process completion polling.
    pub poll_interval_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            manifest_name: "PRECOMMIT".to_string(),
            checks_dir: PathBuf::from("checks"),
            helpers_dir: PathBuf::from("helpers"),
            helper_path_var: "PYTHONPATH".to_string(),
            slow_check_secs: 10,
            poll_interval_ms: 10,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.manifest_name.trim().is_empty() || self.manifest_name.contains('/') {
            return Err(anyhow!("manifest_name must be a non-empty file name"));
        }
        if self.helper_path_var.trim().is_empty() {
            return Err(anyhow!("helper_path_var must be non-empty"));
        }
        if self.slow_check_secs == 0 {
            return Err(anyhow!("slow_check_secs must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        Ok(())
    }

    pub fn slow_check_after(&self) -> Duration {
        Duration::from_secs(self.slow_check_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Resolved locations inside a gate home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePaths {
    pub checks_dir: PathBuf,
    pub helpers_dir: PathBuf,
}

impl GatePaths {
    pub fn new(home: &Path, cfg: &GateConfig) -> Self {
        Self {
            checks_dir: home.join(&cfg.checks_dir),
            helpers_dir: home.join(&cfg.helpers_dir),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GateConfig::default()`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        let cfg = GateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GateConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "manifest_name = \"CHECKS\"\nslow_check_secs = 3\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.manifest_name, "CHECKS");
        assert_eq!(cfg.slow_check_after(), Duration::from_secs(3));
        assert_eq!(cfg.checks_dir, PathBuf::from("checks"));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "slow_check_secs = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("slow_check_secs"));
    }

    #[test]
    fn paths_resolve_under_home() {
        let cfg = GateConfig::default();
        let paths = GatePaths::new(Path::new("/repo/.gate"), &cfg);
        assert_eq!(paths.checks_dir, PathBuf::from("/repo/.gate/checks"));
        assert_eq!(paths.helpers_dir, PathBuf::from("/repo/.gate/helpers"));
    }
}

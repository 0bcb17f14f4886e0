//! Per-directory rule manifests.
//!
//! A manifest is a TOML file with a `rules` array. Rules are validated and
//! compiled once here; downstream code only sees typed [`Rule`] values.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use crate::core::pattern::Pattern;
use crate::core::rule::Rule;
use crate::error::GateError;

/// Rules loaded from one directory's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Where the manifest was read from (for error messages).
    pub location: String,
    pub rules: Vec<Rule>,
}

/// Provides the manifest of a repository directory, if it has one.
pub trait ManifestSource {
    /// `dir` is repository-relative and `""` for the root.
    fn load(&self, dir: &str) -> Result<Option<Manifest>, GateError>;
}

/// Reads manifests from a checkout on disk.
#[derive(Debug, Clone)]
pub struct FsManifestSource {
    root: PathBuf,
    file_name: String,
}

impl FsManifestSource {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
        }
    }
}

impl ManifestSource for FsManifestSource {
    fn load(&self, dir: &str) -> Result<Option<Manifest>, GateError> {
        let path = self.root.join(dir).join(&self.file_name);
        if !path.is_file() {
            return Ok(None);
        }
        let location = path.display().to_string();
        debug!(manifest = %location, "loading manifest");
        let contents = fs::read_to_string(&path)
            .map_err(|err| GateError::manifest(&location, format!("read failed: {err}")))?;
        parse_manifest(&location, &contents).map(Some)
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    rules: Option<Vec<RawRule>>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: Option<RawPattern>,
    check: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    no_new: bool,
    #[serde(default)]
    hint: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    One(String),
    Many(Vec<String>),
}

/// Parse and validate manifest text. `location` is used in error messages.
pub fn parse_manifest(location: &str, contents: &str) -> Result<Manifest, GateError> {
    let raw: RawManifest = toml::from_str(contents)
        .map_err(|err| GateError::manifest(location, err.message().to_string()))?;
    let raw_rules = raw
        .rules
        .ok_or_else(|| GateError::manifest(location, "manifest should have a 'rules' member"))?;
    if raw_rules.is_empty() {
        return Err(GateError::manifest(location, "'rules' must not be empty"));
    }

    let rules = raw_rules
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            validate_rule(raw).map_err(|msg| GateError::manifest(location, format!("rule {idx}: {msg}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Manifest {
        location: location.to_string(),
        rules,
    })
}

fn validate_rule(raw: RawRule) -> Result<Rule, String> {
    let pattern = match raw.pattern {
        None => return Err("rule should have a 'pattern' member".to_string()),
        Some(RawPattern::One(source)) => Pattern::single(&source)?,
        Some(RawPattern::Many(sources)) => Pattern::new(&sources)?,
    };
    let check = match raw.check {
        Some(check) if !check.trim().is_empty() => check,
        Some(_) => return Err("'check' must not be empty".to_string()),
        None => return Err("rule should have a 'check' member".to_string()),
    };
    if check.contains('/') {
        return Err(format!("'check' must name a script in the checks directory, got '{check}'"));
    }
    Ok(Rule {
        pattern,
        check,
        env: raw.env,
        no_new: raw.no_new,
        hint: raw.hint,
    })
}

//! Test-only helpers: rule builders, in-memory manifests, a scripted runner
//! and filesystem fixtures.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use tempfile::TempDir;

use crate::core::pattern::Pattern;
use crate::core::rule::Rule;
use crate::error::GateError;
use crate::io::git::Git;
use crate::io::manifest::{Manifest, ManifestSource};
use crate::io::process::{RunResult, ScriptRequest, ScriptRunner};

/// Create a rule with default flags for a single pattern.
pub fn rule(pattern: &str, check: &str) -> Rule {
    Rule::new(Pattern::single(pattern).expect("valid test pattern"), check)
}

/// Create a `no_new` rule with a hint.
pub fn no_new_rule(pattern: &str, check: &str, hint: &str) -> Rule {
    let mut rule = rule(pattern, check);
    rule.no_new = true;
    rule.hint = hint.to_string();
    rule
}

/// Successful result with the given stdout.
pub fn output(stdout: &str) -> RunResult {
    RunResult {
        exit_code: 0,
        output: stdout.to_string(),
        aborted: false,
    }
}

/// Failed result with the given exit code and stdout.
pub fn failed(exit_code: i32, stdout: &str) -> RunResult {
    RunResult {
        exit_code,
        output: stdout.to_string(),
        aborted: false,
    }
}

/// In-memory manifests keyed by directory; records which directories were asked for.
#[derive(Debug, Default)]
pub struct StaticManifests {
    manifests: BTreeMap<String, Result<Manifest, GateError>>,
    requested: RefCell<Vec<String>>,
}

impl StaticManifests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dir: &str, rules: Vec<Rule>) -> Self {
        let location = if dir.is_empty() {
            "PRECOMMIT".to_string()
        } else {
            format!("{dir}/PRECOMMIT")
        };
        self.manifests
            .insert(dir.to_string(), Ok(Manifest { location, rules }));
        self
    }

    pub fn with_error(mut self, dir: &str, location: &str, message: &str) -> Self {
        self.manifests
            .insert(dir.to_string(), Err(GateError::manifest(location, message)));
        self
    }

    /// Directories requested so far, sorted.
    pub fn requested(&self) -> Vec<String> {
        let mut dirs = self.requested.borrow().clone();
        dirs.sort();
        dirs
    }
}

impl ManifestSource for StaticManifests {
    fn load(&self, dir: &str) -> Result<Option<Manifest>, GateError> {
        self.requested.borrow_mut().push(dir.to_string());
        match self.manifests.get(dir) {
            Some(Ok(manifest)) => Ok(Some(manifest.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }
}

/// Script runner returning canned results; records every command line it runs.
///
/// Results are keyed by script name and first argument (if any). Unknown
/// invocations of an existing script succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: BTreeSet<String>,
    results: BTreeMap<(String, Option<PathBuf>), RunResult>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `script` exists in the checks directory.
    pub fn with_script(mut self, script: &str) -> Self {
        self.scripts.insert(script.to_string());
        self
    }

    /// Result of running `script` with `arg`.
    pub fn respond(mut self, script: &str, arg: impl Into<PathBuf>, result: RunResult) -> Self {
        self.scripts.insert(script.to_string());
        self.results
            .insert((script.to_string(), Some(arg.into())), result);
        self
    }

    /// Result of running `script` without arguments.
    pub fn respond_no_args(mut self, script: &str, result: RunResult) -> Self {
        self.scripts.insert(script.to_string());
        self.results.insert((script.to_string(), None), result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ScriptRunner for ScriptedRunner {
    fn script_exists(&self, name: &str) -> bool {
        self.scripts.contains(name)
    }

    fn execute(&self, request: &ScriptRequest<'_>) -> Result<RunResult, GateError> {
        let command_line = request.command_line();
        self.calls.borrow_mut().push(command_line.clone());
        if !self.scripts.contains(request.script) {
            return Err(GateError::execution(
                command_line,
                "error while executing: No such file or directory",
            ));
        }
        let key = (request.script.to_string(), request.args.first().cloned());
        Ok(self.results.get(&key).cloned().unwrap_or_else(|| output("")))
    }
}

/// Shared in-memory sink for console output.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().expect("captured output lock");
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .map_err(|_| io::Error::other("captured output lock poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> io::Result<PathBuf> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)?;
    Ok(path)
}

/// Write an executable `/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, name, &format!("#!/bin/sh\n{body}"))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Throwaway git repository with a committer identity configured.
#[derive(Debug)]
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        for args in [
            &["init", "-q"][..],
            &["config", "user.email", "test@example.com"],
            &["config", "user.name", "test"],
        ] {
            let status = Command::new("git").args(args).current_dir(dir.path()).status()?;
            if !status.success() {
                bail!("git {} failed", args.join(" "));
            }
        }
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.root())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_file(self.root(), rel, contents)?;
        Ok(())
    }

    /// Stage everything and commit it.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        let git = self.git();
        git.add_all()?;
        git.commit(message)
    }
}

//! Git adapter: staged file discovery and source tree materialization.
//!
//! Checks run against snapshots rather than the working copy, so the new tree
//! is the index (what is about to be committed) and the old tree is `HEAD`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Files added, copied, modified or renamed in the index, relative to the repo root.
    #[instrument(skip_all)]
    pub fn staged_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&[
            "diff",
            "--cached",
            "--name-only",
            "--diff-filter=ACMR",
            "-z",
        ])?;
        let files = parse_name_list(&out);
        debug!(count = files.len(), "staged files");
        Ok(files)
    }

    /// True if `HEAD` points at a commit (false on an unborn branch).
    pub fn has_head(&self) -> Result<bool> {
        let status = self
            .run(&["rev-parse", "--verify", "--quiet", "HEAD"], &[])?
            .status;
        Ok(status.success())
    }

    /// Write every file in the index under `dest`.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub fn materialize_index(&self, dest: &Path) -> Result<()> {
        let prefix = checkout_prefix(dest);
        self.run_checked(&["checkout-index", "--all", &prefix], &[])?;
        Ok(())
    }

    /// Write every file of the `HEAD` commit under `dest`.
    ///
    /// Uses a scratch index so the repository's own index is untouched. An
    /// unborn `HEAD` leaves `dest` empty.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub fn materialize_head(&self, dest: &Path) -> Result<()> {
        if !self.has_head()? {
            debug!("no HEAD commit, previous tree is empty");
            return Ok(());
        }
        let scratch = tempfile::tempdir().context("create scratch index dir")?;
        let index = scratch.path().join("index");
        let env = [("GIT_INDEX_FILE", index.as_os_str())];
        self.run_checked(&["read-tree", "HEAD"], &env)?;
        let prefix = checkout_prefix(dest);
        self.run_checked(&["checkout-index", "--all", &prefix], &env)?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"], &[])?;
        Ok(())
    }

    /// Commit staged changes with a message.
    pub fn commit(&self, message: &str) -> Result<()> {
        self.run_checked(&["commit", "-q", "-m", message], &[])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args, &[])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str], env: &[(&str, &OsStr)]) -> Result<Output> {
        let output = self.run(args, env)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], env: &[(&str, &OsStr)]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .envs(env.iter().copied())
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn checkout_prefix(dest: &Path) -> String {
    let mut prefix = dest.display().to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    format!("--prefix={prefix}")
}

fn parse_name_list(out: &str) -> Vec<String> {
    out.split('\0')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_nul_separated_names() {
        let files = parse_name_list("a/b.py\0c d.txt\0");
        assert_eq!(files, vec!["a/b.py".to_string(), "c d.txt".to_string()]);
    }

    #[test]
    fn empty_name_list_is_empty() {
        assert!(parse_name_list("").is_empty());
    }

    #[test]
    fn prefix_ends_with_separator() {
        assert_eq!(
            checkout_prefix(Path::new("/tmp/tree")),
            "--prefix=/tmp/tree/"
        );
        assert_eq!(
            checkout_prefix(Path::new("/tmp/tree/")),
            "--prefix=/tmp/tree/"
        );
    }

    #[test]
    fn staged_files_lists_only_the_index() {
        let repo = TestRepo::new().expect("repo");
        repo.write("kept.py", "x = 1\n").expect("write");
        repo.commit_all("init").expect("commit");

        repo.write("kept.py", "x = 2\n").expect("write");
        repo.write("a/new.py", "y = 1\n").expect("write");
        repo.write("unstaged.py", "z = 1\n").expect("write");
        let git = repo.git();
        git.run_checked(&["add", "kept.py", "a/new.py"], &[]).expect("add");

        assert_eq!(git.staged_files().expect("staged"), vec!["a/new.py", "kept.py"]);
    }

    #[test]
    fn materializes_index_and_head_separately() {
        let repo = TestRepo::new().expect("repo");
        repo.write("a/b.py", "old\n").expect("write");
        repo.commit_all("init").expect("commit");
        repo.write("a/b.py", "new\n").expect("write");
        repo.git().add_all().expect("add");
        repo.write("a/b.py", "working copy\n").expect("write");

        let new = tempfile::tempdir().expect("new");
        let old = tempfile::tempdir().expect("old");
        let git = repo.git();
        git.materialize_index(new.path()).expect("index");
        git.materialize_head(old.path()).expect("head");

        let read = |root: &Path| std::fs::read_to_string(root.join("a/b.py")).expect("read");
        assert_eq!(read(new.path()), "new\n");
        assert_eq!(read(old.path()), "old\n");
        assert_eq!(git.staged_files().expect("staged"), vec!["a/b.py"]);
    }

    #[test]
    fn unborn_head_materializes_nothing() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        assert!(!git.has_head().expect("has head"));

        let old = tempfile::tempdir().expect("old");
        git.materialize_head(old.path()).expect("head");
        assert_eq!(std::fs::read_dir(old.path()).expect("read dir").count(), 0);
    }
}

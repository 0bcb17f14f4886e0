//! Incremental pre-commit check runner.
//!
//! Resolves the checks that apply to the staged (or given) files, runs them
//! against the new and previous source trees, and fails only on new findings.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use gate::core::rule::CheckSet;
use gate::exit_codes;
use gate::interrupt;
use gate::io::config::{GateConfig, GatePaths, load_config};
use gate::io::git::Git;
use gate::io::manifest::FsManifestSource;
use gate::io::process::{CancellationToken, ProcessRegistry, ProcessScriptRunner};
use gate::io::source::{DirTree, EmptyTree, SourceTree, TempTree};
use gate::logging;
use gate::report::ConsoleWriter;
use gate::resolve::resolve_checks;
use gate::run::{RunContext, RunOutcome};

const HOME_ENV: &str = "GATE_HOME";

#[derive(Parser)]
#[command(
    name = "gate",
    version,
    about = "Incremental pre-commit check runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Location {
    /// Repository root; changed files are relative to it.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Gate home holding `checks/`, `helpers/` and `config.toml` [default: $GATE_HOME or <root>/.gate].
    #[arg(long)]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the checks that apply to the changed files.
    Check {
        #[command(flatten)]
        location: Location,
        /// Use this directory as the new source tree instead of the git index.
        #[arg(long)]
        new_dir: Option<PathBuf>,
        /// Use this directory as the previous source tree instead of `HEAD`.
        #[arg(long)]
        old_dir: Option<PathBuf>,
        /// Changed files (default: files staged in git).
        files: Vec<String>,
    },
    /// Print the checks that apply to the changed files without running them.
    List {
        #[command(flatten)]
        location: Location,
        /// Emit JSON instead of one `check<TAB>file` line per check.
        #[arg(long)]
        json: bool,
        /// Changed files (default: files staged in git).
        files: Vec<String>,
    },
}

/// Repository, gate home and configuration for one invocation.
struct Setup {
    root: PathBuf,
    paths: GatePaths,
    cfg: GateConfig,
}

#[derive(Serialize)]
struct ListedCheck<'a> {
    check: &'a str,
    file: &'a str,
    pattern: String,
    no_new: bool,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check {
            location,
            new_dir,
            old_dir,
            files,
        } => cmd_check(&location, new_dir, old_dir, files),
        Command::List {
            location,
            json,
            files,
        } => cmd_list(&location, json, files),
    }
}

fn cmd_check(
    location: &Location,
    new_dir: Option<PathBuf>,
    old_dir: Option<PathBuf>,
    files: Vec<String>,
) -> Result<i32> {
    let setup = load_setup(location)?;
    let git = Git::new(&setup.root);
    let mut checks = resolve(&setup, &git, files)?;
    if checks.is_empty() {
        debug!("no checks apply");
        return Ok(exit_codes::OK);
    }

    // Trees are released when they go out of scope, on every exit path.
    let new_tree: Box<dyn SourceTree> = match new_dir {
        Some(dir) => Box::new(DirTree::new(absolute(&dir)?)),
        None => {
            let tree = TempTree::new("new")?;
            git.materialize_index(tree.root())
                .context("materialize new source tree")?;
            Box::new(tree)
        }
    };
    let old_tree: Box<dyn SourceTree> = match old_dir {
        _ if !checks.requires_old_source() => Box::new(EmptyTree),
        Some(dir) => Box::new(DirTree::new(absolute(&dir)?)),
        None => {
            let tree = TempTree::new("old")?;
            git.materialize_head(tree.root())
                .context("materialize previous source tree")?;
            Box::new(tree)
        }
    };

    let cancel = CancellationToken::new();
    let registry = ProcessRegistry::new();
    interrupt::install(cancel.clone(), registry.clone())?;
    let runner = ProcessScriptRunner::new(
        &setup.paths.checks_dir,
        &setup.paths.helpers_dir,
        cancel,
        registry,
    )
    .with_helper_path_var(&setup.cfg.helper_path_var)
    .with_poll_interval(setup.cfg.poll_interval());

    let mut ctx = RunContext::new(
        &runner,
        new_tree.as_ref(),
        old_tree.as_ref(),
        ConsoleWriter::stderr(),
    )
    .with_slow_check_after(setup.cfg.slow_check_after());

    let code = match ctx.run_checks(&mut checks) {
        RunOutcome::Passed => exit_codes::OK,
        RunOutcome::Failed { .. } => {
            ctx.report();
            exit_codes::FAILED
        }
        RunOutcome::Aborted { reason } => {
            eprintln!("\n[gate] {reason}");
            exit_codes::INTERRUPTED
        }
    };
    Ok(code)
}

fn cmd_list(location: &Location, json: bool, files: Vec<String>) -> Result<i32> {
    let setup = load_setup(location)?;
    let git = Git::new(&setup.root);
    let checks = resolve(&setup, &git, files)?;

    if json {
        let listed: Vec<ListedCheck<'_>> = checks
            .iter()
            .map(|check| ListedCheck {
                check: &check.rule.check,
                file: &check.file,
                pattern: check.rule.pattern.to_string(),
                no_new: check.rule.no_new,
            })
            .collect();
        let payload = serde_json::to_string_pretty(&listed).context("serialize checks")?;
        println!("{payload}");
    } else {
        for check in &checks {
            println!("{}\t{}", check.rule.check, check.file);
        }
    }
    Ok(exit_codes::OK)
}

fn load_setup(location: &Location) -> Result<Setup> {
    let root = absolute(&location.root)?;
    let home = match location
        .home
        .clone()
        .or_else(|| env::var_os(HOME_ENV).map(PathBuf::from))
    {
        Some(home) => absolute(&home)?,
        None => root.join(".gate"),
    };
    let cfg = load_config(&home.join("config.toml"))?;
    let paths = GatePaths::new(&home, &cfg);
    debug!(root = %root.display(), home = %home.display(), "gate setup");
    Ok(Setup { root, paths, cfg })
}

fn resolve(setup: &Setup, git: &Git, files: Vec<String>) -> Result<CheckSet> {
    let files = if files.is_empty() {
        git.staged_files().context("list staged files")?
    } else {
        files.iter().map(|file| normalize(file)).collect()
    };
    let manifests = FsManifestSource::new(&setup.root, &setup.cfg.manifest_name);
    let checks = resolve_checks(&files, &manifests)?;
    Ok(checks)
}

/// Checkers run from the checks directory, so every path handed to them is absolute.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))
}

/// Repository-relative form of a user-supplied path.
fn normalize(file: &str) -> String {
    let mut rel = Path::new(file);
    while let Ok(stripped) = rel.strip_prefix(".") {
        rel = stripped;
    }
    rel.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check_with_files() {
        let cli = Cli::parse_from(["gate", "check", "a.py", "b/c.py"]);
        match cli.command {
            Command::Check {
                location, files, ..
            } => {
                assert_eq!(location.root, PathBuf::from("."));
                assert!(location.home.is_none());
                assert_eq!(files, vec!["a.py", "b/c.py"]);
            }
            Command::List { .. } => panic!("expected check"),
        }
    }

    #[test]
    fn parse_check_tree_overrides() {
        let cli = Cli::parse_from([
            "gate", "check", "--new-dir", "/tmp/new", "--old-dir", "/tmp/old", "--home", "/g",
        ]);
        match cli.command {
            Command::Check {
                location,
                new_dir,
                old_dir,
                files,
            } => {
                assert_eq!(new_dir, Some(PathBuf::from("/tmp/new")));
                assert_eq!(old_dir, Some(PathBuf::from("/tmp/old")));
                assert_eq!(location.home, Some(PathBuf::from("/g")));
                assert!(files.is_empty());
            }
            Command::List { .. } => panic!("expected check"),
        }
    }

    #[test]
    fn parse_list_json() {
        let cli = Cli::parse_from(["gate", "list", "--json", "x.sh"]);
        assert!(matches!(cli.command, Command::List { json: true, .. }));
    }

    #[test]
    fn normalize_strips_current_dir() {
        assert_eq!(normalize("./a/b.py"), "a/b.py");
        assert_eq!(normalize("a/b.py"), "a/b.py");
        assert_eq!(normalize("././c.py"), "c.py");
    }
}

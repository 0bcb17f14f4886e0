//! Execution harness for checker scripts.
//!
//! Checkers run from the checks directory with stdout captured by a background
//! reader thread (stderr is inherited). Completion is polled so that an
//! interrupt can kill every in-flight child through the [`ProcessRegistry`].

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::GateError;

/// Reason attached to [`GateError::Aborted`] when the user interrupts a run.
pub const INTERRUPTED: &str = "Interrupted by user";

/// Cooperative cancellation flag shared with the interrupt handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct OpenProcesses {
    next_id: u64,
    children: BTreeMap<u64, Arc<Mutex<Child>>>,
}

/// Child processes currently running for one invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<OpenProcesses>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, child: Arc<Mutex<Child>>) -> u64 {
        let mut open = lock(&self.inner);
        let id = open.next_id;
        open.next_id += 1;
        open.children.insert(id, child);
        id
    }

    fn unregister(&self, id: u64) {
        lock(&self.inner).children.remove(&id);
    }

    pub fn open_count(&self) -> usize {
        lock(&self.inner).children.len()
    }

    /// Kill every registered process. Safe to call repeatedly.
    pub fn kill_all(&self) -> usize {
        let open = lock(&self.inner);
        let mut killed = 0;
        for (id, child) in &open.children {
            if kill(child, &format!("child {id}")) {
                killed += 1;
            }
        }
        killed
    }
}

/// Kill `child`, returning false if it had already exited or could not be killed.
fn kill(child: &Mutex<Child>, label: &str) -> bool {
    match lock(child).kill() {
        Ok(()) => true,
        // Already exited; nothing to do.
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => false,
        Err(err) => {
            warn!(child = label, err = %err, "failed to kill child process");
            false
        }
    }
}

// Kills are idempotent, so a panic elsewhere must not wedge the registry.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of one script execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub output: String,
    pub aborted: bool,
}

impl RunResult {
    pub fn aborted() -> Self {
        Self {
            exit_code: -1,
            output: String::new(),
            aborted: true,
        }
    }

    pub fn ok(&self) -> bool {
        !self.aborted && self.exit_code == 0
    }

    /// Fail with `Aborted` if the run was interrupted.
    pub fn not_aborted(self) -> Result<Self, GateError> {
        if self.aborted {
            return Err(GateError::aborted(INTERRUPTED));
        }
        Ok(self)
    }

    /// Captured output, or an error for interrupted or (unless ignored) failed runs.
    pub fn into_output(self, command: &str, ignore_exit_code: bool) -> Result<String, GateError> {
        let result = self.not_aborted()?;
        if result.exit_code != 0 && !ignore_exit_code {
            return Err(GateError::execution(
                command,
                format!("exited with non-zero exit code {}", result.exit_code),
            ));
        }
        Ok(result.output)
    }
}

/// One invocation of a script from the checks directory.
#[derive(Debug, Clone)]
pub struct ScriptRequest<'a> {
    /// Script name relative to the checks directory.
    pub script: &'a str,
    pub args: Vec<PathBuf>,
    /// Overrides layered on top of the inherited environment.
    pub env: &'a BTreeMap<String, String>,
    /// Warn (without cancelling) once the script runs longer than this.
    pub slow_after: Option<Duration>,
}

impl ScriptRequest<'_> {
    /// Human-readable command line for messages.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.script.to_string()];
        parts.extend(self.args.iter().map(|arg| arg.display().to_string()));
        parts.join(" ")
    }
}

/// Abstraction over script execution backends.
pub trait ScriptRunner {
    /// True if `name` exists in the checks directory.
    fn script_exists(&self, name: &str) -> bool;

    /// Run the script to completion and report what happened.
    ///
    /// Launch failures are errors; exit codes and interrupts are reported in
    /// the returned [`RunResult`].
    fn execute(&self, request: &ScriptRequest<'_>) -> Result<RunResult, GateError>;

    /// Run the script and return its stdout.
    fn run(&self, request: &ScriptRequest<'_>, ignore_exit_code: bool) -> Result<String, GateError> {
        self.execute(request)?
            .into_output(&request.command_line(), ignore_exit_code)
    }
}

/// Runs scripts as child processes.
#[derive(Debug, Clone)]
pub struct ProcessScriptRunner {
    checks_dir: PathBuf,
    helpers_dir: PathBuf,
    helper_path_var: String,
    poll_interval: Duration,
    cancel: CancellationToken,
    registry: ProcessRegistry,
}

impl ProcessScriptRunner {
    pub fn new(
        checks_dir: impl Into<PathBuf>,
        helpers_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
        registry: ProcessRegistry,
    ) -> Self {
        Self {
            checks_dir: checks_dir.into(),
            helpers_dir: helpers_dir.into(),
            helper_path_var: "PYTHONPATH".to_string(),
            poll_interval: Duration::from_millis(10),
            cancel,
            registry,
        }
    }

    pub fn with_helper_path_var(mut self, var: impl Into<String>) -> Self {
        self.helper_path_var = var.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Helpers directory prepended to the search path the script would otherwise see.
    fn helper_search_path(&self, overrides: &BTreeMap<String, String>) -> Result<OsString, String> {
        let existing = overrides
            .get(&self.helper_path_var)
            .map(OsString::from)
            .or_else(|| env::var_os(&self.helper_path_var))
            .unwrap_or_default();
        let mut entries = vec![self.helpers_dir.clone()];
        entries.extend(env::split_paths(&existing).filter(|entry| !entry.as_os_str().is_empty()));
        env::join_paths(entries).map_err(|err| format!("invalid {}: {err}", self.helper_path_var))
    }

    fn wait(
        &self,
        child: &Mutex<Child>,
        slow_after: Option<Duration>,
        command_line: &str,
    ) -> io::Result<ExitStatus> {
        let started = Instant::now();
        let mut warned = false;
        let mut killed = false;
        loop {
            if !killed && self.cancel.is_cancelled() {
                // The interrupt may have landed before this child was registered.
                kill(child, command_line);
                killed = true;
            }
            if let Some(status) = lock(child).wait_timeout(self.poll_interval)? {
                return Ok(status);
            }
            if !warned && slow_after.is_some_and(|limit| started.elapsed() >= limit) {
                warn!(command = %command_line, "command is taking a long time to complete");
                warned = true;
            }
        }
    }
}

impl ScriptRunner for ProcessScriptRunner {
    fn script_exists(&self, name: &str) -> bool {
        self.checks_dir.join(name).is_file()
    }

    #[instrument(skip_all, fields(script = request.script))]
    fn execute(&self, request: &ScriptRequest<'_>) -> Result<RunResult, GateError> {
        let command_line = request.command_line();
        if self.cancel.is_cancelled() {
            debug!("run already interrupted, not launching");
            return Ok(RunResult::aborted());
        }

        let search_path = self
            .helper_search_path(request.env)
            .map_err(|msg| GateError::execution(&command_line, msg))?;
        let mut cmd = Command::new(self.checks_dir.join(request.script));
        cmd.args(&request.args)
            .current_dir(&self.checks_dir)
            .envs(request.env)
            .env(&self.helper_path_var, search_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        debug!(command = %command_line, "spawning checker");
        let mut child = cmd.spawn().map_err(|err| {
            error!(err = %err, command = %command_line, "failed to spawn command");
            GateError::execution(&command_line, format!("error while executing: {err}"))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GateError::execution(&command_line, "stdout was not piped"))?;
        let reader = thread::spawn(move || drain(stdout));

        let child = Arc::new(Mutex::new(child));
        let id = self.registry.register(Arc::clone(&child));
        let waited = self.wait(&child, request.slow_after, &command_line);
        self.registry.unregister(id);

        let status = match waited {
            Ok(status) => status,
            Err(err) => {
                let _ = lock(&child).kill();
                return Err(GateError::execution(&command_line, format!("wait failed: {err}")));
            }
        };

        if self.cancel.is_cancelled() {
            // The reader may be blocked on a pipe held open by a grandchild; leave it.
            debug!("interrupted, discarding output");
            return Ok(RunResult::aborted());
        }

        let output = match reader.join() {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(err)) => {
                return Err(GateError::execution(&command_line, format!("read output: {err}")));
            }
            Err(_) => {
                return Err(GateError::execution(&command_line, "output reader thread panicked"));
            }
        };

        let exit_code = exit_code(status);
        debug!(exit_code, bytes = output.len(), "checker finished");
        Ok(RunResult {
            exit_code,
            output,
            aborted: false,
        })
    }
}

fn drain(mut stdout: ChildStdout) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stdout.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

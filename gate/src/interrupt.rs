//! Ctrl-C handling for a run.
//!
//! Once git has received SIGINT it gives up on the commit, so there is nothing
//! to resume: the handler cancels the run and kills every open checker.

use anyhow::{Context, Result};
use tracing::warn;

use crate::io::process::{CancellationToken, ProcessRegistry};

/// Cancel `token` and kill everything in `registry`.
pub fn interrupt(token: &CancellationToken, registry: &ProcessRegistry) -> usize {
    token.cancel();
    let killed = registry.kill_all();
    warn!(killed, "interrupted, killed open checkers");
    killed
}

/// Install the process-wide Ctrl-C handler for this invocation.
///
/// Can only be called once per process.
pub fn install(token: CancellationToken, registry: ProcessRegistry) -> Result<()> {
    ctrlc::set_handler(move || {
        interrupt(&token, &registry);
    })
    .context("install interrupt handler")
}

//! Incremental pre-commit check runner.
//!
//! Given the files changed by a commit, the gate finds the checks that apply
//! to them (per-directory manifests of glob rules), runs each checker against
//! the new and, where asked, the previous version of the file, and fails only
//! on findings the change introduced.
//!
//! - **[`core`]**: Pure logic (pattern matching, rule types, output diffing).
//! - **[`io`]**: Side-effecting adapters (manifests, processes, source trees, git).
//!
//! [`resolve`] and [`run`] combine the two into the two phases of an invocation.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod report;
pub mod resolve;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

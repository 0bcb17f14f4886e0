//! Stable exit codes for the `gate` CLI.

/// Every applicable check passed (or none applied).
pub const OK: i32 = 0;
/// One or more checks failed.
pub const FAILED: i32 = 1;
/// Invalid invocation, configuration or manifest.
pub const INVALID: i32 = 2;
/// The run was interrupted by the user.
pub const INTERRUPTED: i32 = 130;

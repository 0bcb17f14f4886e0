//! Error taxonomy for resolving and running checks.

/// Errors raised while resolving or running checks.
///
/// Everything except [`GateError::Aborted`] is recorded per check and reported
/// at the end of the run. `Aborted` stops the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("error parsing {location}: {message}")]
    Manifest { location: String, message: String },

    #[error("prerequisites for '{checker}' failed: {message}")]
    Prerequisite { checker: String, message: String },

    #[error("{command}: {message}")]
    Execution { command: String, message: String },

    #[error("{check}: {file} failed: {report}")]
    CheckFailed {
        check: String,
        file: String,
        report: String,
        hint: String,
    },

    #[error("{reason}")]
    Aborted { reason: String },
}

impl GateError {
    pub fn manifest(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Manifest {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn execution(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Stable kind name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manifest { .. } => "ManifestError",
            Self::Prerequisite { .. } => "PrerequisiteError",
            Self::Execution { .. } => "ExecutionError",
            Self::CheckFailed { .. } => "CheckFailure",
            Self::Aborted { .. } => "Aborted",
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

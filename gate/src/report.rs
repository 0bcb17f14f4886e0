//! Console output: progress marks and the final failure report.

use std::io::{self, Write};

use crate::error::GateError;

const TOOL: &str = "gate";

/// Line-oriented writer for user-facing output (stderr by default).
///
/// Write failures are ignored.
pub struct ConsoleWriter<'a> {
    out: Box<dyn Write + 'a>,
}

impl<'a> ConsoleWriter<'a> {
    pub fn new(out: impl Write + 'a) -> Self {
        Self { out: Box::new(out) }
    }

    /// Write `[title] msg` on its own line.
    pub fn tagged(&mut self, title: &str, msg: &str) {
        self.line(&format!("[{title}] {msg}"));
    }

    pub fn line(&mut self, msg: &str) {
        let _ = writeln!(self.out, "{msg}");
    }

    /// Progress mark for a passed unit of work.
    pub fn ok(&mut self) {
        self.mark(".");
    }

    /// Progress mark for a failed unit of work.
    pub fn fail(&mut self) {
        self.mark("X");
    }

    /// End the progress line.
    pub fn done(&mut self) {
        self.mark("\n");
    }

    fn mark(&mut self, mark: &str) {
        let _ = self.out.write_all(mark.as_bytes());
        let _ = self.out.flush();
    }
}

impl ConsoleWriter<'static> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

/// Render the summary of all recorded failures. Prints nothing when there are none.
pub fn render_report(failures: &[GateError], writer: &mut ConsoleWriter<'_>) {
    if failures.is_empty() {
        return;
    }
    let count = failures.len();
    let plural = if count == 1 { "" } else { "s" };
    writer.tagged(TOOL, &format!("Found {count} error{plural}."));

    for failure in failures {
        match failure {
            GateError::CheckFailed {
                check,
                file,
                report,
                hint,
            } => {
                writer.tagged(check, file);
                for line in report.trim().split('\n') {
                    writer.tagged(check, &format!("    {line}"));
                }
                if !hint.is_empty() {
                    writer.tagged(check, hint);
                }
            }
            other => writer.tagged(other.kind(), other.to_string().trim()),
        }
    }
    writer.tagged(
        TOOL,
        "One or more pre-commit checks failed. Please fix them, or commit with --no-verify.",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(failures: &[GateError]) -> String {
        let mut buf = Vec::new();
        {
            let mut writer = ConsoleWriter::new(&mut buf);
            render_report(failures, &mut writer);
        }
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn no_failures_prints_nothing() {
        assert_eq!(rendered(&[]), "");
    }

    #[test]
    fn check_failure_is_indented_with_hint() {
        let out = rendered(&[GateError::CheckFailed {
            check: "pyflakes".to_string(),
            file: "a/b.py".to_string(),
            report: "a/b.py:3: unused import\na/b.py:7: undefined name\n".to_string(),
            hint: "run pyflakes".to_string(),
        }]);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "[gate] Found 1 error.");
        assert_eq!(lines[1], "[pyflakes] a/b.py");
        assert_eq!(lines[2], "[pyflakes]     a/b.py:3: unused import");
        assert_eq!(lines[3], "[pyflakes]     a/b.py:7: undefined name");
        assert_eq!(lines[4], "[pyflakes] run pyflakes");
        assert!(lines[5].contains("--no-verify"));
    }

    #[test]
    fn other_errors_use_kind_name() {
        let out = rendered(&[
            GateError::execution("lint x.py", "exited with non-zero exit code 2"),
            GateError::Prerequisite {
                checker: "lint".to_string(),
                message: "lint-deps failed".to_string(),
            },
        ]);
        assert!(out.starts_with("[gate] Found 2 errors."));
        assert!(out.contains("[ExecutionError] lint x.py: exited with non-zero exit code 2"));
        assert!(out.contains("[PrerequisiteError] prerequisites for 'lint' failed"));
    }

    #[test]
    fn progress_marks_share_a_line() {
        let mut buf = Vec::new();
        {
            let mut writer = ConsoleWriter::new(&mut buf);
            writer.ok();
            writer.fail();
            writer.ok();
            writer.done();
        }
        assert_eq!(String::from_utf8(buf).expect("utf8"), ".X.\n");
    }
}

//! Run context: executes a resolved check set and aggregates failures.
//!
//! A run has two strictly ordered phases. First every checker's `-deps` script
//! is verified (once per checker); if any fails, nothing is executed. Then each
//! check runs inside its own failure boundary, so one failing check does not
//! stop the others. Only an interrupt ends the run early.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::core::incremental::filter_new;
use crate::core::rule::{Check, CheckSet};
use crate::error::GateError;
use crate::io::process::{ScriptRequest, ScriptRunner};
use crate::io::source::SourceTree;
use crate::report::{ConsoleWriter, render_report};

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed { failures: usize },
    /// The user interrupted the run; remaining work was skipped.
    Aborted { reason: String },
}

/// State for one invocation over one check set.
pub struct RunContext<'a, R: ScriptRunner + ?Sized> {
    runner: &'a R,
    new_source: &'a dyn SourceTree,
    old_source: &'a dyn SourceTree,
    writer: ConsoleWriter<'a>,
    slow_check_after: Option<Duration>,
    prereqs_checked: HashMap<String, bool>,
    failures: Vec<GateError>,
}

impl<'a, R: ScriptRunner + ?Sized> RunContext<'a, R> {
    pub fn new(
        runner: &'a R,
        new_source: &'a dyn SourceTree,
        old_source: &'a dyn SourceTree,
        writer: ConsoleWriter<'a>,
    ) -> Self {
        Self {
            runner,
            new_source,
            old_source,
            writer,
            slow_check_after: None,
            prereqs_checked: HashMap::new(),
            failures: Vec::new(),
        }
    }

    /// Warn about checker runs exceeding `limit` (they are not cancelled).
    pub fn with_slow_check_after(mut self, limit: Duration) -> Self {
        self.slow_check_after = Some(limit);
        self
    }

    pub fn failures(&self) -> &[GateError] {
        &self.failures
    }

    /// Memoized prerequisite verdict for `checker`, if it was checked.
    pub fn prerequisite_status(&self, checker: &str) -> Option<bool> {
        self.prereqs_checked.get(checker).copied()
    }

    /// Run the prerequisite phase, then the execution phase.
    #[instrument(skip_all, fields(checks = checks.len()))]
    pub fn run_checks(&mut self, checks: &mut CheckSet) -> RunOutcome {
        for check in checks.iter_mut() {
            if let Err(err) = self.guarded(false, |ctx| ctx.check_prerequisites(check)) {
                return aborted(err);
            }
        }
        if !self.failures.is_empty() {
            info!(failures = self.failures.len(), "prerequisites failed, skipping checks");
            return self.outcome();
        }

        for check in checks.iter() {
            if let Err(err) = self.guarded(true, |ctx| ctx.run_check(check)) {
                return aborted(err);
            }
        }
        self.writer.done();
        self.outcome()
    }

    /// Print the failure summary, if there is anything to report.
    pub fn report(&mut self) {
        render_report(&self.failures, &mut self.writer);
    }

    fn outcome(&self) -> RunOutcome {
        if self.failures.is_empty() {
            RunOutcome::Passed
        } else {
            RunOutcome::Failed {
                failures: self.failures.len(),
            }
        }
    }

    /// Run one unit of work inside a failure boundary.
    ///
    /// Failures are recorded and reported as `Ok(false)`; only `Aborted` is
    /// returned as an error. With `progress`, a mark is printed either way.
    fn guarded(
        &mut self,
        progress: bool,
        work: impl FnOnce(&mut Self) -> Result<(), GateError>,
    ) -> Result<bool, GateError> {
        match work(self) {
            Ok(()) => {
                if progress {
                    self.writer.ok();
                }
                Ok(true)
            }
            Err(err) if err.is_aborted() => Err(err),
            Err(err) => {
                debug!(kind = err.kind(), err = %err, "recorded failure");
                self.failures.push(err);
                if progress {
                    self.writer.fail();
                }
                Ok(false)
            }
        }
    }

    fn check_prerequisites(&mut self, check: &mut Check) -> Result<(), GateError> {
        let checker = check.rule.check.clone();
        let satisfied = match self.prereqs_checked.get(&checker) {
            Some(&satisfied) => satisfied,
            None => {
                let deps = check.rule.deps_script();
                if self.runner.script_exists(&deps) {
                    self.prereqs_checked.insert(checker.clone(), false);
                    let request = ScriptRequest {
                        script: &deps,
                        args: Vec::new(),
                        env: &check.rule.env,
                        slow_after: None,
                    };
                    self.runner
                        .run(&request, false)
                        .map_err(|err| prerequisite_error(&checker, err))?;
                    debug!(checker = %checker, "prerequisites satisfied");
                }
                self.prereqs_checked.insert(checker, true);
                true
            }
        };
        check.prerequisite_satisfied = satisfied;
        Ok(())
    }

    fn run_check(&self, check: &Check) -> Result<(), GateError> {
        if !check.prerequisite_satisfied {
            return Ok(());
        }
        let rule = &check.rule;

        let mut old_output = String::new();
        if rule.no_new && self.old_source.exists(&check.file) {
            let request = self.check_request(check, self.old_source.resolve(&check.file));
            old_output = self.runner.execute(&request)?.not_aborted()?.output;
        }

        let request = self.check_request(check, self.new_source.resolve(&check.file));
        let new_run = self.runner.execute(&request)?.not_aborted()?;

        let report = filter_new(&old_output, &new_run.output);
        if !report.trim().is_empty() {
            return Err(self.check_failed(check, report));
        }
        if old_output.is_empty() && new_run.exit_code != 0 {
            let report = format!(
                "{} exited with non-zero exit code {} without reporting findings",
                request.command_line(),
                new_run.exit_code
            );
            return Err(self.check_failed(check, report));
        }
        Ok(())
    }

    fn check_request<'r>(&self, check: &'r Check, path: PathBuf) -> ScriptRequest<'r> {
        ScriptRequest {
            script: &check.rule.check,
            args: vec![path],
            env: &check.rule.env,
            slow_after: self.slow_check_after,
        }
    }

    fn check_failed(&self, check: &Check, report: String) -> GateError {
        GateError::CheckFailed {
            check: check.rule.check.clone(),
            file: check.file.clone(),
            report,
            hint: check.rule.hint.clone(),
        }
    }
}

fn prerequisite_error(checker: &str, err: GateError) -> GateError {
    match err {
        GateError::Aborted { .. } => err,
        other => GateError::Prerequisite {
            checker: checker.to_string(),
            message: other.to_string(),
        },
    }
}

fn aborted(err: GateError) -> RunOutcome {
    RunOutcome::Aborted {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::core::rule::Rule;
    use crate::io::process::RunResult;
    use crate::io::source::DirTree;
    use crate::test_support::{
        CapturedOutput, ScriptedRunner, failed, no_new_rule, output, rule, write_file,
    };

    struct Trees {
        old: tempfile::TempDir,
        new: tempfile::TempDir,
    }

    impl Trees {
        fn new() -> Self {
            Self {
                old: tempfile::tempdir().expect("old tree"),
                new: tempfile::tempdir().expect("new tree"),
            }
        }

        fn old_path(&self, rel: &str) -> PathBuf {
            self.old.path().join(rel)
        }

        fn new_path(&self, rel: &str) -> PathBuf {
            self.new.path().join(rel)
        }
    }

    fn check_set(pairs: Vec<(Rule, &str)>) -> CheckSet {
        CheckSet::from_pairs(
            pairs
                .into_iter()
                .map(|(rule, file)| (rule, file.to_string()))
                .collect::<BTreeSet<_>>(),
        )
    }

    fn run(
        runner: &ScriptedRunner,
        trees: &Trees,
        mut checks: CheckSet,
    ) -> (RunOutcome, Vec<GateError>, String) {
        let console = CapturedOutput::new();
        let old = DirTree::new(trees.old.path());
        let new = DirTree::new(trees.new.path());
        let mut ctx = RunContext::new(runner, &new, &old, ConsoleWriter::new(console.clone()));
        let outcome = ctx.run_checks(&mut checks);
        ctx.report();
        let failures = ctx.failures().to_vec();
        (outcome, failures, console.contents())
    }

    #[test]
    fn only_new_lines_are_reported() {
        let trees = Trees::new();
        write_file(trees.old.path(), "a.py", "old").expect("old file");
        write_file(trees.new.path(), "a.py", "new").expect("new file");
        let runner = ScriptedRunner::new()
            .respond("pyflakes", trees.old_path("a.py"), output("line1\n"))
            .respond("pyflakes", trees.new_path("a.py"), output("line1\nline2\n"));

        let (outcome, failures, console) = run(
            &runner,
            &trees,
            check_set(vec![(no_new_rule("*.py", "pyflakes", "fix it"), "a.py")]),
        );

        assert_eq!(outcome, RunOutcome::Failed { failures: 1 });
        match &failures[0] {
            GateError::CheckFailed { report, hint, .. } => {
                assert_eq!(report, "line2");
                assert_eq!(hint, "fix it");
            }
            other => panic!("unexpected failure {other:?}"),
        }
        assert!(console.contains("[pyflakes]     line2"));
    }

    #[test]
    fn unchanged_output_passes() {
        let trees = Trees::new();
        write_file(trees.old.path(), "a.py", "old").expect("old file");
        write_file(trees.new.path(), "a.py", "new").expect("new file");
        let runner = ScriptedRunner::new()
            .respond("pyflakes", trees.old_path("a.py"), output("line1\n"))
            .respond("pyflakes", trees.new_path("a.py"), output("line1\n"));

        let (outcome, failures, console) = run(
            &runner,
            &trees,
            check_set(vec![(no_new_rule("*.py", "pyflakes", ""), "a.py")]),
        );

        assert_eq!(outcome, RunOutcome::Passed);
        assert!(failures.is_empty());
        assert_eq!(console, ".\n");
    }

    #[test]
    fn old_tree_is_run_before_new_tree() {
        let trees = Trees::new();
        write_file(trees.old.path(), "a.py", "old").expect("old file");
        let runner = ScriptedRunner::new().with_script("pyflakes");

        run(
            &runner,
            &trees,
            check_set(vec![(no_new_rule("*.py", "pyflakes", ""), "a.py")]),
        );

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains(&trees.old_path("a.py").display().to_string()));
        assert!(calls[1].contains(&trees.new_path("a.py").display().to_string()));
    }

    #[test]
    fn plain_rule_skips_old_tree_and_reports_everything() {
        let trees = Trees::new();
        write_file(trees.old.path(), "a.py", "old").expect("old file");
        let runner = ScriptedRunner::new()
            .respond("pyflakes", trees.old_path("a.py"), output("line1\n"))
            .respond("pyflakes", trees.new_path("a.py"), output("line1\nline2\n"));

        let (_, failures, _) = run(
            &runner,
            &trees,
            check_set(vec![(rule("*.py", "pyflakes"), "a.py")]),
        );

        assert_eq!(runner.calls().len(), 1);
        match &failures[0] {
            GateError::CheckFailed { report, .. } => assert_eq!(report, "line1\nline2\n"),
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn plain_rule_with_whitespace_only_output_passes() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .respond("pyflakes", trees.new_path("a.py"), output("  \n\n\t\n"));

        let (outcome, failures, console) = run(
            &runner,
            &trees,
            check_set(vec![(rule("*.py", "pyflakes"), "a.py")]),
        );

        assert_eq!(outcome, RunOutcome::Passed);
        assert!(failures.is_empty());
        assert_eq!(console, ".\n");
    }

    #[test]
    fn file_missing_from_old_tree_reports_all_output() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .respond("pyflakes", trees.new_path("new.py"), output("line1\n"));

        let (_, failures, _) = run(
            &runner,
            &trees,
            check_set(vec![(no_new_rule("*.py", "pyflakes", ""), "new.py")]),
        );

        assert_eq!(runner.calls().len(), 1);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn silent_non_zero_exit_fails() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .respond("lint", trees.new_path("a.sh"), failed(2, ""));

        let (_, failures, _) = run(&runner, &trees, check_set(vec![(rule("*.sh", "lint"), "a.sh")]));

        match &failures[0] {
            GateError::CheckFailed { report, .. } => assert!(report.contains("exit code 2")),
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn pre_existing_findings_with_non_zero_exit_pass() {
        let trees = Trees::new();
        write_file(trees.old.path(), "a.sh", "old").expect("old file");
        let runner = ScriptedRunner::new()
            .respond("lint", trees.old_path("a.sh"), failed(1, "warn\n"))
            .respond("lint", trees.new_path("a.sh"), failed(1, "warn\n"));

        let (outcome, _, _) = run(
            &runner,
            &trees,
            check_set(vec![(no_new_rule("*.sh", "lint", ""), "a.sh")]),
        );
        assert_eq!(outcome, RunOutcome::Passed);
    }

    #[test]
    fn deps_script_runs_once_per_checker() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .with_script("pyflakes")
            .respond_no_args("pyflakes-deps", output("installed\n"));

        let (outcome, _, _) = run(
            &runner,
            &trees,
            check_set(vec![
                (rule("*.py", "pyflakes"), "a.py"),
                (rule("*.py", "pyflakes"), "b.py"),
            ]),
        );

        assert_eq!(outcome, RunOutcome::Passed);
        let deps_runs = runner
            .calls()
            .iter()
            .filter(|call| call.as_str() == "pyflakes-deps")
            .count();
        assert_eq!(deps_runs, 1);
    }

    #[test]
    fn failed_prerequisite_blocks_execution_but_not_other_prerequisites() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .with_script("pyflakes")
            .with_script("shellcheck")
            .respond_no_args("pyflakes-deps", failed(1, ""))
            .respond_no_args("shellcheck-deps", output(""));

        let console = CapturedOutput::new();
        let old = DirTree::new(trees.old.path());
        let new = DirTree::new(trees.new.path());
        let mut ctx = RunContext::new(&runner, &new, &old, ConsoleWriter::new(console.clone()));
        let mut checks = check_set(vec![
            (rule("*.py", "pyflakes"), "a.py"),
            (rule("*.py", "pyflakes"), "b.py"),
            (rule("*.sh", "shellcheck"), "c.sh"),
        ]);

        let outcome = ctx.run_checks(&mut checks);

        assert_eq!(outcome, RunOutcome::Failed { failures: 1 });
        assert_eq!(ctx.failures()[0].kind(), "PrerequisiteError");
        assert_eq!(ctx.prerequisite_status("pyflakes"), Some(false));
        assert_eq!(ctx.prerequisite_status("shellcheck"), Some(true));
        assert_eq!(runner.calls(), vec!["pyflakes-deps", "shellcheck-deps"]);
        assert!(checks.iter().all(|check| check.rule.check != "pyflakes" || !check.prerequisite_satisfied));
    }

    #[test]
    fn one_failing_check_does_not_stop_the_others() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .respond("shellcheck", trees.new_path("b.sh"), output("SC2086\n"));

        let (outcome, failures, console) = run(
            &runner,
            &trees,
            check_set(vec![
                (rule("*.py", "missing-checker"), "a.py"),
                (rule("*.sh", "shellcheck"), "b.sh"),
            ]),
        );

        assert_eq!(outcome, RunOutcome::Failed { failures: 2 });
        assert_eq!(failures[0].kind(), "ExecutionError");
        assert_eq!(failures[1].kind(), "CheckFailure");
        assert!(console.starts_with("XX\n"));
        assert!(console.contains("Found 2 errors."));
    }

    #[test]
    fn interrupt_stops_remaining_checks() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new()
            .respond("lint", trees.new_path("a.py"), RunResult::aborted())
            .respond("lint", trees.new_path("b.py"), output("finding\n"));

        let (outcome, failures, console) = run(
            &runner,
            &trees,
            check_set(vec![(rule("*.py", "lint"), "a.py"), (rule("*.py", "lint"), "b.py")]),
        );

        assert!(matches!(outcome, RunOutcome::Aborted { .. }));
        assert!(failures.is_empty());
        assert_eq!(runner.calls().len(), 1);
        assert!(!console.contains("Found"));
    }

    #[test]
    fn empty_check_set_passes() {
        let trees = Trees::new();
        let runner = ScriptedRunner::new();
        let (outcome, failures, _) = run(&runner, &trees, CheckSet::default());
        assert_eq!(outcome, RunOutcome::Passed);
        assert!(failures.is_empty());
    }
}

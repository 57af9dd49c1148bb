//! Build-and-retry session
//!
//! A session makes at most two build attempts. After the first failure the
//! output is saved, classified and shown to the operator; if they accept and
//! at least one automatic fix succeeds, the build runs once more. A second
//! failure is final, and fixes are never attempted twice.

use super::applicator::{ApplyFix, FixOutcome};
use super::classifier::Classifier;
use super::{AnalysisResult, ErrorReport, FixAction, SuggestedFix};
use crate::context::ProjectContext;
use crate::logs::ErrorLogSink;
use crate::runner::CommandRunner;
use std::fmt;
use tracing::{debug, info, warn};

/// Two attempts: the original build and one retry after fixes.
pub const MAX_ATTEMPTS: u8 = 2;

/// The person (or policy) driving the session.
pub trait Operator {
    fn show_analysis(&mut self, analysis: &AnalysisResult);

    /// Ask a yes/no question. Fixes are only applied on `true`.
    fn confirm(&mut self, question: &str) -> bool;

    fn attempt_started(&mut self, _attempt: u8, _command: &str) {}

    fn fix_finished(&mut self, _fix: &SuggestedFix, _outcome: &FixOutcome) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Nothing in the output matched a known failure
    Unrecognized,
    /// Issues were found but every fix needs a human
    ManualOnly,
    /// Auto-fix is switched off in config
    AutoFixDisabled,
    /// The operator said no
    Declined,
    /// Every fix that was tried failed
    NoFixApplied,
    /// The retry failed too
    RetryExhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::Unrecognized => "build failed with an error pageship does not recognize",
            FailureReason::ManualOnly => "build failed and the detected issues need manual fixes",
            FailureReason::AutoFixDisabled => "build failed and automatic fixes are disabled",
            FailureReason::Declined => "build failed and automatic fixes were declined",
            FailureReason::NoFixApplied => "build failed and none of the automatic fixes succeeded",
            FailureReason::RetryExhausted => "build failed again after applying fixes",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// No build command, nothing to do
    Skipped,
    Succeeded {
        attempts: u8,
        fixes_applied: usize,
        command: String,
    },
    Failed {
        reason: FailureReason,
        attempts: u8,
        /// Error text from the last attempt
        error_text: String,
        analysis: Option<AnalysisResult>,
    },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, BuildOutcome::Failed { .. })
    }
}

/// Transient state of one session.
#[derive(Debug)]
struct Attempt {
    number: u8,
    build_command: String,
    last_analysis: Option<AnalysisResult>,
    fixes_applied: usize,
}

pub struct BuildOrchestrator<'a> {
    runner: &'a mut dyn CommandRunner,
    fixer: &'a mut dyn ApplyFix,
    log: &'a mut dyn ErrorLogSink,
    operator: &'a mut dyn Operator,
    auto_fix: bool,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(
        runner: &'a mut dyn CommandRunner,
        fixer: &'a mut dyn ApplyFix,
        log: &'a mut dyn ErrorLogSink,
        operator: &'a mut dyn Operator,
    ) -> Self {
        Self {
            runner,
            fixer,
            log,
            operator,
            auto_fix: true,
        }
    }

    pub fn auto_fix(mut self, enabled: bool) -> Self {
        self.auto_fix = enabled;
        self
    }

    pub fn run(&mut self, ctx: &ProjectContext) -> BuildOutcome {
        let Some(command) = ctx.build_command.clone() else {
            return BuildOutcome::Skipped;
        };
        let mut attempt = Attempt {
            number: 0,
            build_command: command,
            last_analysis: None,
            fixes_applied: 0,
        };

        loop {
            self.operator
                .attempt_started(attempt.number + 1, &attempt.build_command);
            let report = match self.runner.run(&attempt.build_command, &ctx.root, &[]) {
                Ok(output) if output.success() => {
                    info!(attempt = attempt.number + 1, "build succeeded");
                    return BuildOutcome::Succeeded {
                        attempts: attempt.number + 1,
                        fixes_applied: attempt.fixes_applied,
                        command: attempt.build_command,
                    };
                }
                Ok(output) => {
                    let report = ErrorReport::from_outputs(
                        &output.stderr,
                        &output.stdout,
                        Some("build exited without output"),
                    );
                    if output.timed_out {
                        report.with_summary("build timed out")
                    } else {
                        report
                    }
                }
                Err(err) => ErrorReport::from_outputs("", "", Some(&format!("{:#}", err)))
                    .with_summary("build command could not be started"),
            };

            if let Err(err) = self.log.persist(&report.text) {
                warn!(error = %err, "could not save build error log");
            }

            if attempt.number + 1 >= MAX_ATTEMPTS {
                return self.fail(FailureReason::RetryExhausted, attempt, report);
            }

            let analysis = Classifier::new(ctx.manifest.as_ref())
                .with_memory_limit(ctx.memory_limit_or_default())
                .analyze(&report);
            debug!(
                issues = analysis.issues.len(),
                fixes = analysis.suggested_fixes.len(),
                can_auto_fix = analysis.can_auto_fix,
                "classified build failure"
            );
            self.operator.show_analysis(&analysis);
            attempt.last_analysis = Some(analysis.clone());

            if analysis.is_empty() {
                return self.fail(FailureReason::Unrecognized, attempt, report);
            }
            if !analysis.can_auto_fix {
                return self.fail(FailureReason::ManualOnly, attempt, report);
            }
            if !self.auto_fix {
                return self.fail(FailureReason::AutoFixDisabled, attempt, report);
            }

            let count = analysis.distinct_auto_fixes().len();
            let question = if count == 1 {
                "Apply the automatic fix and rebuild?".to_string()
            } else {
                format!("Apply {} automatic fixes and rebuild?", count)
            };
            if !self.operator.confirm(&question) {
                return self.fail(FailureReason::Declined, attempt, report);
            }

            let applied = self.apply_fixes(&analysis, &mut attempt.build_command);
            if applied == 0 {
                return self.fail(FailureReason::NoFixApplied, attempt, report);
            }

            attempt.fixes_applied += applied;
            attempt.number += 1;
            info!(
                applied,
                command = %attempt.build_command,
                "retrying build after fixes"
            );
        }
    }

    /// Apply each distinct auto-fixable fix once; returns how many succeeded.
    fn apply_fixes(&mut self, analysis: &AnalysisResult, build_command: &mut String) -> usize {
        let mut applied = 0;
        for fix in analysis.distinct_auto_fixes() {
            let outcome = self.fixer.apply(fix);
            self.operator.fix_finished(fix, &outcome);
            if !outcome.is_success() {
                continue;
            }
            applied += 1;
            if let FixAction::IncreaseMemory { max_old_space_mb } = fix.action {
                *build_command = with_memory_limit(build_command, max_old_space_mb);
            }
        }
        applied
    }

    fn fail(&mut self, reason: FailureReason, attempt: Attempt, report: ErrorReport) -> BuildOutcome {
        warn!(%reason, attempts = attempt.number + 1, "build session failed");
        BuildOutcome::Failed {
            reason,
            attempts: attempt.number + 1,
            error_text: report.text,
            analysis: attempt.last_analysis,
        }
    }
}

const HEAP_FLAG: &str = "--max-old-space-size=";
const NODE_OPTIONS: &str = "NODE_OPTIONS=";

/// Rewrite a build command so Node gets a larger heap.
///
/// The result always differs from `command`:
/// - an existing `--max-old-space-size=N` becomes `max(2 * N, max_old_space_mb)`
/// - an existing `NODE_OPTIONS=` assignment gets the flag merged into its value
/// - otherwise the command is prefixed with a `NODE_OPTIONS` assignment
pub fn with_memory_limit(command: &str, max_old_space_mb: u32) -> String {
    if let Some(start) = command.find(HEAP_FLAG) {
        let value_start = start + HEAP_FLAG.len();
        let value_end = command[value_start..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|offset| value_start + offset)
            .unwrap_or(command.len());
        let raised = match command[value_start..value_end].parse::<u64>() {
            Ok(existing) => existing.saturating_mul(2).max(u64::from(max_old_space_mb)).max(1),
            Err(_) => u64::from(max_old_space_mb),
        };
        return format!(
            "{}{}{}",
            &command[..value_start],
            raised,
            &command[value_end..]
        );
    }

    if let Some(merged) = merge_into_node_options(command, max_old_space_mb) {
        return merged;
    }

    if cfg!(windows) {
        format!(
            "set \"NODE_OPTIONS={}{}\" && {}",
            HEAP_FLAG, max_old_space_mb, command
        )
    } else {
        format!("NODE_OPTIONS={}{} {}", HEAP_FLAG, max_old_space_mb, command)
    }
}

/// Add the heap flag to a `NODE_OPTIONS=` assignment already in `command`.
///
/// A second assignment in front would be shadowed by the existing one.
fn merge_into_node_options(command: &str, max_old_space_mb: u32) -> Option<String> {
    let start = command.match_indices(NODE_OPTIONS).map(|(i, _)| i).find(|&i| {
        command[..i]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace() || c == '"')
    })?;
    let value_start = start + NODE_OPTIONS.len();
    let flag = format!("{}{}", HEAP_FLAG, max_old_space_mb);
    let rest = &command[value_start..];

    // `set "NODE_OPTIONS=..."` or `NODE_OPTIONS="..."` / `NODE_OPTIONS='...'`
    let quote = if command[..start].ends_with('"') {
        Some(('"', value_start))
    } else {
        rest.chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .map(|c| (c, value_start + 1))
    };
    if let Some((q, content_start)) = quote {
        if let Some(len) = command[content_start..].find(q) {
            let close = content_start + len;
            let sep = if close == content_start { "" } else { " " };
            return Some(format!(
                "{}{}{}{}",
                &command[..close],
                sep,
                flag,
                &command[close..]
            ));
        }
    }

    let value_end = rest
        .find(char::is_whitespace)
        .map(|offset| value_start + offset)
        .unwrap_or(command.len());
    let value = &command[value_start..value_end];
    let merged = if value.is_empty() {
        flag
    } else {
        format!("\"{} {}\"", value, flag)
    };
    Some(format!(
        "{}{}{}",
        &command[..value_start],
        merged,
        &command[value_end..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Framework, PackageManager};
    use crate::manifest::Manifest;
    use crate::runner::CommandOutput;
    use anyhow::Result;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};

    struct ScriptedRunner {
        results: VecDeque<CommandOutput>,
        commands: Vec<String>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<CommandOutput>) -> Self {
            Self {
                results: results.into(),
                commands: Vec::new(),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &mut self,
            command: &str,
            _cwd: &Path,
            _env: &[(String, String)],
        ) -> Result<CommandOutput> {
            self.commands.push(command.to_string());
            Ok(self.results.pop_front().unwrap_or_else(|| ok()))
        }
    }

    #[derive(Default)]
    struct SpyFixer {
        applied: Vec<SuggestedFix>,
        fail_all: bool,
    }

    impl ApplyFix for SpyFixer {
        fn apply(&mut self, fix: &SuggestedFix) -> FixOutcome {
            self.applied.push(fix.clone());
            if self.fail_all {
                FixOutcome::Failed("boom".to_string())
            } else {
                FixOutcome::Applied
            }
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        entries: Vec<String>,
    }

    impl ErrorLogSink for MemoryLog {
        fn persist(&mut self, text: &str) -> Result<PathBuf> {
            self.entries.push(text.to_string());
            Ok(PathBuf::from("latest.log"))
        }
    }

    struct ScriptedOperator {
        answer: bool,
        questions: usize,
        shown: usize,
    }

    impl ScriptedOperator {
        fn answering(answer: bool) -> Self {
            Self {
                answer,
                questions: 0,
                shown: 0,
            }
        }
    }

    impl Operator for ScriptedOperator {
        fn show_analysis(&mut self, _analysis: &AnalysisResult) {
            self.shown += 1;
        }

        fn confirm(&mut self, _question: &str) -> bool {
            self.questions += 1;
            self.answer
        }
    }

    fn ok() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(1),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    fn ctx() -> ProjectContext {
        ProjectContext {
            root: PathBuf::from("."),
            manifest: Manifest::from_value(serde_json::json!({ "name": "site" })),
            package_manager: PackageManager::Npm,
            framework: Framework::Node,
            build_command: Some("npm run build".to_string()),
            output_dir: PathBuf::from("dist"),
            memory_limit_mb: 4096,
            pages_url: None,
        }
    }

    struct Harness {
        runner: ScriptedRunner,
        fixer: SpyFixer,
        log: MemoryLog,
        operator: ScriptedOperator,
    }

    impl Harness {
        fn new(results: Vec<CommandOutput>, answer: bool) -> Self {
            Self {
                runner: ScriptedRunner::new(results),
                fixer: SpyFixer::default(),
                log: MemoryLog::default(),
                operator: ScriptedOperator::answering(answer),
            }
        }

        fn run(&mut self) -> BuildOutcome {
            self.run_with(true)
        }

        fn run_with(&mut self, auto_fix: bool) -> BuildOutcome {
            BuildOrchestrator::new(
                &mut self.runner,
                &mut self.fixer,
                &mut self.log,
                &mut self.operator,
            )
            .auto_fix(auto_fix)
            .run(&ctx())
        }
    }

    #[test]
    fn test_success_on_first_attempt() {
        let mut h = Harness::new(vec![ok()], true);
        let outcome = h.run();
        assert_eq!(
            outcome,
            BuildOutcome::Succeeded {
                attempts: 1,
                fixes_applied: 0,
                command: "npm run build".to_string()
            }
        );
        assert!(h.log.entries.is_empty());
        assert_eq!(h.operator.questions, 0);
    }

    #[test]
    fn test_fix_then_retry_succeeds() {
        let mut h = Harness::new(vec![failed("Error: Cannot find module 'left-pad'"), ok()], true);
        let outcome = h.run();
        assert!(matches!(
            outcome,
            BuildOutcome::Succeeded {
                attempts: 2,
                fixes_applied: 1,
                ..
            }
        ));
        assert_eq!(h.runner.commands.len(), 2);
        assert_eq!(h.log.entries.len(), 1);
    }

    #[test]
    fn test_never_more_than_two_builds() {
        let oom = "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory";
        let mut h = Harness::new(vec![failed(oom), failed(oom), ok()], true);
        let outcome = h.run();
        match outcome {
            BuildOutcome::Failed {
                reason, attempts, ..
            } => {
                assert_eq!(reason, FailureReason::RetryExhausted);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.runner.commands.len(), 2);
        assert_eq!(h.fixer.applied.len(), 1);
        assert_eq!(h.operator.questions, 1);
    }

    #[test]
    fn test_manual_only_stops_after_one_build() {
        let mut h = Harness::new(vec![failed("SyntaxError: Unexpected token '<'")], true);
        let outcome = h.run();
        assert!(matches!(
            outcome,
            BuildOutcome::Failed {
                reason: FailureReason::ManualOnly,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(h.runner.commands.len(), 1);
        assert!(h.fixer.applied.is_empty());
        assert_eq!(h.operator.questions, 0);
        assert_eq!(h.operator.shown, 1);
    }

    #[test]
    fn test_memory_fix_rewrites_retry_command() {
        let oom = "<--- JS stacktrace --->\nFATAL ERROR: Ineffective mark-compacts near heap limit Allocation failed - JavaScript heap out of memory";
        let mut h = Harness::new(vec![failed(oom), ok()], true);
        assert!(h.run().is_success());

        assert_eq!(h.runner.commands.len(), 2);
        assert_eq!(h.runner.commands[0], "npm run build");
        assert_ne!(h.runner.commands[1], h.runner.commands[0]);
        assert!(h.runner.commands[1].contains("--max-old-space-size=4096"));
        assert!(h.runner.commands[1].contains("npm run build"));
    }

    #[test]
    fn test_declined_applies_nothing() {
        let mut h = Harness::new(vec![failed("Error: Cannot find module 'left-pad'")], false);
        let outcome = h.run();
        assert!(matches!(
            outcome,
            BuildOutcome::Failed {
                reason: FailureReason::Declined,
                ..
            }
        ));
        assert!(h.fixer.applied.is_empty());
        assert_eq!(h.runner.commands.len(), 1);
    }

    #[test]
    fn test_unrecognized_failure_does_not_retry() {
        let mut h = Harness::new(vec![failed("something odd happened")], true);
        match h.run() {
            BuildOutcome::Failed {
                reason,
                error_text,
                analysis,
                ..
            } => {
                assert_eq!(reason, FailureReason::Unrecognized);
                assert_eq!(error_text, "something odd happened");
                assert!(analysis.unwrap().is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.runner.commands.len(), 1);
    }

    #[test]
    fn test_all_fixes_failing_is_terminal() {
        let mut h = Harness::new(vec![failed("Error: Cannot find module 'left-pad'")], true);
        h.fixer.fail_all = true;
        let outcome = h.run();
        assert!(matches!(
            outcome,
            BuildOutcome::Failed {
                reason: FailureReason::NoFixApplied,
                ..
            }
        ));
        assert_eq!(h.runner.commands.len(), 1);
        assert_eq!(h.fixer.applied.len(), 1);
    }

    #[test]
    fn test_auto_fix_disabled() {
        let mut h = Harness::new(vec![failed("Error: Cannot find module 'left-pad'")], true);
        let outcome = h.run_with(false);
        assert!(matches!(
            outcome,
            BuildOutcome::Failed {
                reason: FailureReason::AutoFixDisabled,
                ..
            }
        ));
        assert_eq!(h.operator.questions, 0);
        assert!(h.fixer.applied.is_empty());
    }

    #[test]
    fn test_only_auto_fixable_fixes_are_applied() {
        let text = "Error: Cannot find module 'left-pad'\nSyntaxError: Unexpected token";
        let mut h = Harness::new(vec![failed(text), ok()], true);
        assert!(h.run().is_success());
        assert_eq!(h.fixer.applied.len(), 1);
        assert!(h.fixer.applied.iter().all(|fix| fix.auto_fixable));
    }

    #[test]
    fn test_no_build_command_is_skipped() {
        let mut runner = ScriptedRunner::new(Vec::new());
        let mut fixer = SpyFixer::default();
        let mut log = MemoryLog::default();
        let mut operator = ScriptedOperator::answering(true);
        let mut context = ctx();
        context.build_command = None;
        let outcome =
            BuildOrchestrator::new(&mut runner, &mut fixer, &mut log, &mut operator).run(&context);
        assert_eq!(outcome, BuildOutcome::Skipped);
        assert!(runner.commands.is_empty());
    }

    #[test]
    fn test_repeated_install_runs_once() {
        let text = "Error: ENOENT: no such file or directory, open '/site/node_modules/.bin/vite'\n\
                    Error: Cannot find module './build/index.js'";
        let mut h = Harness::new(vec![failed(text), ok()], true);
        assert!(h.run().is_success());
        let installs = h
            .fixer
            .applied
            .iter()
            .filter(|fix| fix.action == FixAction::InstallDependencies)
            .count();
        assert_eq!(installs, 1);
    }

    #[test]
    fn test_memory_fix_raises_limit_already_in_command() {
        let oom = "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory";
        let mut h = Harness::new(vec![failed(oom), ok()], true);
        let mut context = ctx();
        context.build_command =
            Some("NODE_OPTIONS=--max-old-space-size=4096 npm run build".to_string());
        let outcome = BuildOrchestrator::new(
            &mut h.runner,
            &mut h.fixer,
            &mut h.log,
            &mut h.operator,
        )
        .run(&context);
        assert!(outcome.is_success());
        assert_eq!(
            h.runner.commands[1],
            "NODE_OPTIONS=--max-old-space-size=8192 npm run build"
        );
    }

    #[test]
    fn test_with_memory_limit_always_changes_command() {
        for command in [
            "npm run build",
            "NODE_OPTIONS=--max-old-space-size=4096 npm run build",
            "NODE_OPTIONS=--max-old-space-size=0 vite build",
            "NODE_OPTIONS=--openssl-legacy-provider react-scripts build",
            "NODE_OPTIONS= npm run build",
        ] {
            assert_ne!(with_memory_limit(command, 4096), command);
        }
    }

    #[test]
    fn test_with_memory_limit_doubles_when_configured_is_lower() {
        assert_eq!(
            with_memory_limit("node --max-old-space-size=6144 build.js", 4096),
            "node --max-old-space-size=12288 build.js"
        );
    }

    #[test]
    fn test_with_memory_limit_merges_existing_node_options() {
        assert_eq!(
            with_memory_limit("NODE_OPTIONS=--openssl-legacy-provider react-scripts build", 4096),
            "NODE_OPTIONS=\"--openssl-legacy-provider --max-old-space-size=4096\" react-scripts build"
        );
        assert_eq!(
            with_memory_limit("CI=true NODE_OPTIONS='--no-warnings' vite build", 4096),
            "CI=true NODE_OPTIONS='--no-warnings --max-old-space-size=4096' vite build"
        );
        assert_eq!(
            with_memory_limit("NODE_OPTIONS=\"\" npm run build", 4096),
            "NODE_OPTIONS=\"--max-old-space-size=4096\" npm run build"
        );
        assert_eq!(
            with_memory_limit("set \"NODE_OPTIONS=--no-warnings\" && npm run build", 4096),
            "set \"NODE_OPTIONS=--no-warnings --max-old-space-size=4096\" && npm run build"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_merged_node_options_reach_the_child() {
        use crate::runner::ShellRunner;

        let dir = tempfile::tempdir().unwrap();
        let command = with_memory_limit(
            "NODE_OPTIONS=--openssl-legacy-provider sh -c 'echo \"$NODE_OPTIONS\"'",
            4096,
        );
        let output = ShellRunner::default().run(&command, dir.path(), &[]).unwrap();
        assert_eq!(
            output.stdout.trim(),
            "--openssl-legacy-provider --max-old-space-size=4096"
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_with_memory_limit() {
        assert_eq!(
            with_memory_limit("npm run build", 4096),
            "NODE_OPTIONS=--max-old-space-size=4096 npm run build"
        );
        assert_eq!(
            with_memory_limit("NODE_OPTIONS=--max-old-space-size=2048 npm run build", 8192),
            "NODE_OPTIONS=--max-old-space-size=8192 npm run build"
        );
    }
}

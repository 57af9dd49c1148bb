//! Build-error auto-fix engine
//!
//! Classifies captured build output into known failure categories, proposes
//! remedies, applies the ones that are safe to automate, and drives a bounded
//! build-and-retry session.
//!
//! - [`patterns`]: the ordered rule table and package-name heuristics
//! - [`classifier`]: turns an [`ErrorReport`] into an [`AnalysisResult`]
//! - [`applicator`]: performs a single [`SuggestedFix`]
//! - [`orchestrator`]: the two-attempt build session

pub mod applicator;
pub mod classifier;
pub mod orchestrator;
pub mod patterns;

pub use applicator::{FixApplicator, FixOutcome, InstallDirective};
pub use classifier::{analyze, Classifier};
pub use orchestrator::{BuildOrchestrator, BuildOutcome, FailureReason};

use crate::context::PackageManager;
use serde::{Deserialize, Serialize};

/// Captured error text from a failed build or a saved log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub text: String,
    /// Short one-line description, if the producer had one
    pub summary: Option<String>,
}

impl ErrorReport {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Build a report from process output.
    ///
    /// stderr comes first, stdout is appended after it. The fallback message is
    /// only used when neither stream carried any text.
    pub fn from_outputs(stderr: &str, stdout: &str, fallback: Option<&str>) -> Self {
        let mut text = String::new();
        for part in [stderr, stdout] {
            if part.trim().is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(part);
        }
        if text.is_empty() {
            if let Some(message) = fallback {
                text.push_str(message);
            }
        }
        Self::new(text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// How bad an issue is for the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Category of a detected build problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    MissingPackage { package: Option<String> },
    MissingNodeModules,
    MissingBuildScript,
    SyntaxError,
    TypescriptError,
    PermissionError,
    MemoryError,
    PortInUse,
}

impl IssueKind {
    pub fn label(&self) -> &'static str {
        match self {
            IssueKind::MissingPackage { .. } => "missing_package",
            IssueKind::MissingNodeModules => "missing_node_modules",
            IssueKind::MissingBuildScript => "missing_build_script",
            IssueKind::SyntaxError => "syntax_error",
            IssueKind::TypescriptError => "typescript_error",
            IssueKind::PermissionError => "permission_error",
            IssueKind::MemoryError => "memory_error",
            IssueKind::PortInUse => "port_in_use",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::TypescriptError | IssueKind::PortInUse => Severity::Medium,
            _ => Severity::High,
        }
    }

    pub fn package(&self) -> Option<&str> {
        match self {
            IssueKind::MissingPackage { package } => package.as_deref(),
            _ => None,
        }
    }
}

/// A problem found in an [`ErrorReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(flatten)]
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        let severity = kind.severity();
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }
}

/// Concrete remediation carried by a [`SuggestedFix`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixAction {
    /// Install one package, as a dev dependency when `dev` is set
    InstallPackage { package: String, dev: bool },
    /// Install everything the manifest declares
    InstallDependencies,
    /// Insert `name: command` into the manifest scripts
    AddBuildScript { name: String, command: String },
    /// Raise the Node heap limit for the next build attempt
    IncreaseMemory { max_old_space_mb: u32 },
    /// Needs a human
    ManualFix { instructions: String },
}

impl FixAction {
    pub fn label(&self) -> &'static str {
        match self {
            FixAction::InstallPackage { .. } => "install_package",
            FixAction::InstallDependencies => "install_dependencies",
            FixAction::AddBuildScript { .. } => "add_build_script",
            FixAction::IncreaseMemory { .. } => "increase_memory",
            FixAction::ManualFix { .. } => "manual_fix",
        }
    }

    pub fn auto_fixable(&self) -> bool {
        !matches!(self, FixAction::ManualFix { .. })
    }

    pub fn install_directive(&self) -> Option<InstallDirective> {
        match self {
            FixAction::InstallPackage { package, dev } => Some(InstallDirective::Package {
                name: package.clone(),
                dev: *dev,
            }),
            FixAction::InstallDependencies => Some(InstallDirective::All),
            _ => None,
        }
    }

    /// Render the action as the command line or directive a user would run.
    pub fn command_line(&self, package_manager: PackageManager) -> String {
        match self {
            FixAction::InstallPackage { .. } | FixAction::InstallDependencies => self
                .install_directive()
                .map(|directive| directive.command_line(package_manager))
                .unwrap_or_default(),
            FixAction::AddBuildScript { name, command } => {
                format!("\"scripts\": {{ \"{}\": \"{}\" }}", name, command)
            }
            FixAction::IncreaseMemory { max_old_space_mb } => {
                format!("NODE_OPTIONS=--max-old-space-size={}", max_old_space_mb)
            }
            FixAction::ManualFix { instructions } => instructions.clone(),
        }
    }
}

/// A remedy proposed for one or more issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub description: String,
    #[serde(flatten)]
    pub action: FixAction,
    pub auto_fixable: bool,
}

impl SuggestedFix {
    pub fn new(description: impl Into<String>, action: FixAction) -> Self {
        let auto_fixable = action.auto_fixable();
        Self {
            description: description.into(),
            action,
            auto_fixable,
        }
    }

    pub fn manual(description: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self::new(
            description,
            FixAction::ManualFix {
                instructions: instructions.into(),
            },
        )
    }

    pub fn package(&self) -> Option<&str> {
        match &self.action {
            FixAction::InstallPackage { package, .. } => Some(package),
            _ => None,
        }
    }
}

/// Output of one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issues: Vec<Issue>,
    pub suggested_fixes: Vec<SuggestedFix>,
    pub can_auto_fix: bool,
}

impl AnalysisResult {
    pub fn new(issues: Vec<Issue>, suggested_fixes: Vec<SuggestedFix>) -> Self {
        let can_auto_fix = suggested_fixes.iter().any(|fix| fix.auto_fixable);
        Self {
            issues,
            suggested_fixes,
            can_auto_fix,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn auto_fixes(&self) -> impl Iterator<Item = &SuggestedFix> {
        self.suggested_fixes.iter().filter(|fix| fix.auto_fixable)
    }

    /// Auto-fixable fixes with repeated actions dropped, first one wins.
    pub fn distinct_auto_fixes(&self) -> Vec<&SuggestedFix> {
        let mut out: Vec<&SuggestedFix> = Vec::new();
        for fix in self.auto_fixes() {
            if !out.iter().any(|kept| kept.action == fix.action) {
                out.push(fix);
            }
        }
        out
    }

    pub fn has_issue(&self, label: &str) -> bool {
        self.issues.iter().any(|issue| issue.kind.label() == label)
    }
}

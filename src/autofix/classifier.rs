//! Error classifier
//!
//! Runs every rule in [`patterns::RULES`] against a report and collects what
//! the matching rules emit, in table order. Classification never fails: text
//! that matches nothing yields an empty result.

use super::patterns::{self, RuleInput, DEFAULT_MEMORY_LIMIT_MB};
use super::{AnalysisResult, ErrorReport};
use crate::manifest::Manifest;
use tracing::debug;

/// Classifier bound to the read-only project lookups it needs.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    manifest: Option<&'a Manifest>,
    memory_limit_mb: u32,
}

impl Default for Classifier<'_> {
    fn default() -> Self {
        Self {
            manifest: None,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }
}

impl<'a> Classifier<'a> {
    pub fn new(manifest: Option<&'a Manifest>) -> Self {
        Self {
            manifest,
            ..Self::default()
        }
    }

    pub fn with_memory_limit(mut self, mb: u32) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn analyze(&self, report: &ErrorReport) -> AnalysisResult {
        let input = RuleInput::new(&report.text, self.manifest, self.memory_limit_mb);
        let mut issues = Vec::new();
        let mut fixes = Vec::new();

        for rule in patterns::RULES {
            if !(rule.matches)(&input) {
                continue;
            }
            let emission = (rule.emit)(&input);
            debug!(
                rule = rule.name,
                issues = emission.issues.len(),
                fixes = emission.fixes.len(),
                "build error rule matched"
            );
            issues.extend(emission.issues);
            fixes.extend(emission.fixes);
        }

        AnalysisResult::new(issues, fixes)
    }
}

/// Classify raw error text without any project lookups.
pub fn analyze(text: &str) -> AnalysisResult {
    Classifier::default().analyze(&ErrorReport::new(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofix::{FixAction, IssueKind};
    use crate::context::PackageManager;
    use serde_json::json;

    fn manifest(value: serde_json::Value) -> Manifest {
        Manifest::from_value(value).unwrap()
    }

    #[test]
    fn test_same_text_same_result() {
        let text = "Error: Cannot find module 'left-pad'\n\
                    SyntaxError: Unexpected token\n\
                    FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory";
        let first = analyze(text);
        let second = analyze(text);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_missing_module_yields_install_fix() {
        let result = analyze("Error: Cannot find module 'left-pad'");

        let missing: Vec<_> = result
            .issues
            .iter()
            .filter(|issue| matches!(issue.kind, IssueKind::MissingPackage { .. }))
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].kind.package(), Some("left-pad"));

        assert_eq!(result.suggested_fixes.len(), 1);
        let fix = &result.suggested_fixes[0];
        assert!(fix.auto_fixable);
        assert!(fix.action.command_line(PackageManager::Npm).contains("left-pad"));
        assert!(result.can_auto_fix);
    }

    #[test]
    fn test_dev_dependency_routing_in_fix() {
        let vite = analyze("Error: Cannot find module 'vite'");
        assert_eq!(
            vite.suggested_fixes[0].action,
            FixAction::InstallPackage {
                package: "vite".to_string(),
                dev: true
            }
        );
        assert!(vite.suggested_fixes[0]
            .action
            .command_line(PackageManager::Npm)
            .contains("--save-dev"));

        let left_pad = analyze("Error: Cannot find module 'left-pad'");
        assert_eq!(
            left_pad.suggested_fixes[0].action,
            FixAction::InstallPackage {
                package: "left-pad".to_string(),
                dev: false
            }
        );
    }

    #[test]
    fn test_unrecognized_text_is_empty() {
        let result = analyze("hello world");
        assert!(result.issues.is_empty());
        assert!(result.suggested_fixes.is_empty());
        assert!(!result.can_auto_fix);
    }

    #[test]
    fn test_unnamed_module_falls_back_to_install_all() {
        let result = analyze("Module not found: Error: Can't resolve './App' in '/site/src'");
        assert_eq!(
            result.issues[0].kind,
            IssueKind::MissingPackage { package: None }
        );
        assert_eq!(result.suggested_fixes[0].action, FixAction::InstallDependencies);
    }

    #[test]
    fn test_multiple_rules_emit_in_table_order() {
        let text = "listen EADDRINUSE :::3000\n\
                    SyntaxError: Unexpected token '<'\n\
                    Error: Cannot find module 'left-pad'\n\
                    Require stack:\n- /site/node_modules/thing/index.js";
        let result = analyze(text);
        let labels: Vec<_> = result.issues.iter().map(|i| i.kind.label()).collect();
        assert_eq!(
            labels,
            vec![
                "missing_package",
                "missing_node_modules",
                "syntax_error",
                "port_in_use"
            ]
        );
        let fixes: Vec<_> = result
            .suggested_fixes
            .iter()
            .map(|f| f.action.label())
            .collect();
        assert_eq!(
            fixes,
            vec![
                "install_package",
                "install_dependencies",
                "manual_fix",
                "manual_fix"
            ]
        );
    }

    #[test]
    fn test_manual_only_result_cannot_auto_fix() {
        let result = analyze("SyntaxError: Unexpected end of input");
        assert_eq!(result.issues.len(), 1);
        assert!(!result.can_auto_fix);
    }

    #[test]
    fn test_build_script_prefers_react_scripts() {
        let m = manifest(json!({
            "dependencies": { "react-scripts": "5.0.1" },
            "devDependencies": { "vite": "^5.0.0" }
        }));
        let result = Classifier::new(Some(&m))
            .analyze(&ErrorReport::new("npm ERR! Missing script: \"build\""));
        assert_eq!(
            result.suggested_fixes[0].action,
            FixAction::AddBuildScript {
                name: "build".to_string(),
                command: "react-scripts build".to_string()
            }
        );
    }

    #[test]
    fn test_build_script_uses_vite() {
        let m = manifest(json!({ "devDependencies": { "vite": "^5.0.0" } }));
        let result = Classifier::new(Some(&m))
            .analyze(&ErrorReport::new("npm ERR! Missing script: \"build\""));
        assert_eq!(
            result.suggested_fixes[0].action,
            FixAction::AddBuildScript {
                name: "build".to_string(),
                command: "vite build".to_string()
            }
        );
    }

    #[test]
    fn test_build_script_without_known_builder_has_no_fix() {
        let m = manifest(json!({ "dependencies": { "express": "^4.0.0" } }));
        let result = Classifier::new(Some(&m))
            .analyze(&ErrorReport::new("npm ERR! Missing script: \"build\""));
        assert!(result.has_issue("missing_build_script"));
        assert!(result.suggested_fixes.is_empty());
        assert!(!result.can_auto_fix);
    }

    #[test]
    fn test_memory_fix_uses_configured_limit() {
        let result = Classifier::default()
            .with_memory_limit(8192)
            .analyze(&ErrorReport::new("JavaScript heap out of memory"));
        assert_eq!(
            result.suggested_fixes[0].action,
            FixAction::IncreaseMemory {
                max_old_space_mb: 8192
            }
        );
        assert!(result.can_auto_fix);
    }
}

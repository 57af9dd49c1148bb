//! Rule-based assistant for `pageship ask`
//!
//! Questions are routed by keyword to a handful of canned answers. Questions
//! about errors go through the same classifier the build session uses.

use crate::autofix::{AnalysisResult, Classifier, ErrorReport};
use crate::context::ProjectContext;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BuildError,
    SiteUrl,
    Deploy,
    BuildSetup,
    Help,
}

const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::BuildError,
        &["error", "fail", "broken", "fix", "wrong", "crash", "not working"],
    ),
    (Intent::SiteUrl, &["url", "link", "where", "live", "address"]),
    (Intent::Deploy, &["deploy", "publish", "pages", "push", "ship"]),
    (Intent::BuildSetup, &["build", "command", "output", "dist", "framework"]),
];

/// Pick the first intent whose keywords appear in the question.
pub fn classify_intent(question: &str) -> Intent {
    let lower = question.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::Help)
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub intent: Intent,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
}

pub struct Assistant<'a> {
    ctx: &'a ProjectContext,
    latest_error: Option<String>,
}

impl<'a> Assistant<'a> {
    pub fn new(ctx: &'a ProjectContext, latest_error: Option<String>) -> Self {
        Self { ctx, latest_error }
    }

    pub fn answer(&self, question: &str) -> Answer {
        let intent = classify_intent(question);
        match intent {
            Intent::BuildError => self.answer_error(),
            Intent::SiteUrl => Answer {
                intent,
                text: self.site_url_text(),
                analysis: None,
            },
            Intent::Deploy => Answer {
                intent,
                text: self.deploy_text(),
                analysis: None,
            },
            Intent::BuildSetup => Answer {
                intent,
                text: self.build_setup_text(),
                analysis: None,
            },
            Intent::Help => Answer {
                intent,
                text: help_text(),
                analysis: None,
            },
        }
    }

    fn answer_error(&self) -> Answer {
        let Some(text) = self.latest_error.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Answer {
                intent: Intent::BuildError,
                text: "No build errors have been recorded for this project. \
                       Run `pageship build` and ask again if it fails."
                    .to_string(),
                analysis: None,
            };
        };

        let analysis = Classifier::new(self.ctx.manifest.as_ref())
            .with_memory_limit(self.ctx.memory_limit_or_default())
            .analyze(&ErrorReport::new(text));

        let mut out = String::new();
        if analysis.is_empty() {
            out.push_str(
                "I couldn't match the last build error to a known problem. \
                 Check the full log in .pageship/logs/latest.log.",
            );
        } else {
            out.push_str("Here's what went wrong in the last build:\n");
            out.push_str(&render_analysis(&analysis, self.ctx));
            if analysis.can_auto_fix {
                out.push_str("\nRun `pageship build` to apply the automatic fixes.");
            }
        }

        Answer {
            intent: Intent::BuildError,
            text: out,
            analysis: Some(analysis),
        }
    }

    fn site_url_text(&self) -> String {
        match &self.ctx.pages_url {
            Some(url) => format!("Your site is published at {}", url),
            None => "I can't tell where the site lives: this project has no GitHub `origin` remote."
                .to_string(),
        }
    }

    fn deploy_text(&self) -> String {
        let mut out = String::from("To publish this project:\n");
        match &self.ctx.build_command {
            Some(cmd) => {
                let _ = writeln!(out, "  1. Build it with `{}`", cmd);
            }
            None => {
                let _ = writeln!(out, "  1. Nothing to build: files are published as they are");
            }
        }
        let _ = writeln!(
            out,
            "  2. The contents of `{}` are committed to the gh-pages branch",
            self.ctx.output_dir.display()
        );
        let _ = write!(out, "  3. The branch is pushed to GitHub");
        if let Some(url) = &self.ctx.pages_url {
            let _ = write!(out, " and served at {}", url);
        }
        out
    }

    fn build_setup_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Framework: {}", self.ctx.framework.name());
        let _ = writeln!(out, "Package manager: {}", self.ctx.package_manager.name());
        let _ = writeln!(
            out,
            "Build command: {}",
            self.ctx.build_command.as_deref().unwrap_or("(none)")
        );
        let _ = write!(out, "Output directory: {}", self.ctx.output_dir.display());
        out
    }
}

fn help_text() -> String {
    "I can help with:\n  \
     - why did my build fail?\n  \
     - how do I deploy?\n  \
     - where is my site?\n  \
     - what build command do you use?"
        .to_string()
}

/// Human-readable listing of issues and fixes.
pub fn render_analysis(analysis: &AnalysisResult, ctx: &ProjectContext) -> String {
    let mut out = String::new();
    for issue in &analysis.issues {
        let _ = writeln!(
            out,
            "  ● [{}] {} ({})",
            issue.severity.label(),
            issue.message,
            issue.kind.label()
        );
    }
    if !analysis.suggested_fixes.is_empty() {
        let _ = writeln!(out, "\n  Suggested fixes:");
        for fix in &analysis.suggested_fixes {
            let marker = if fix.auto_fixable { "+" } else { "·" };
            let _ = writeln!(out, "  {} {}", marker, fix.description);
            let _ = writeln!(out, "      {}", fix.action.command_line(ctx.package_manager));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Framework, PackageManager};
    use std::path::PathBuf;

    fn ctx() -> ProjectContext {
        ProjectContext {
            root: PathBuf::from("."),
            manifest: None,
            package_manager: PackageManager::Npm,
            framework: Framework::Vite,
            build_command: Some("npm run build".to_string()),
            output_dir: PathBuf::from("dist"),
            memory_limit_mb: 4096,
            pages_url: Some("https://octo.github.io/site/".to_string()),
        }
    }

    #[test]
    fn test_intent_routing() {
        assert_eq!(classify_intent("Why did my build fail?"), Intent::BuildError);
        assert_eq!(classify_intent("where is my site"), Intent::SiteUrl);
        assert_eq!(classify_intent("how do I deploy this"), Intent::Deploy);
        assert_eq!(classify_intent("what build command is used"), Intent::BuildSetup);
        assert_eq!(classify_intent("hello"), Intent::Help);
    }

    #[test]
    fn test_error_question_uses_classifier() {
        let ctx = ctx();
        let assistant = Assistant::new(
            &ctx,
            Some("Error: Cannot find module 'left-pad'".to_string()),
        );
        let answer = assistant.answer("what's the error?");
        let analysis = answer.analysis.unwrap();
        assert_eq!(analysis.issues[0].kind.package(), Some("left-pad"));
        assert!(answer.text.contains("npm install left-pad"));
        assert!(answer.text.contains("pageship build"));
    }

    #[test]
    fn test_error_question_without_log() {
        let ctx = ctx();
        let answer = Assistant::new(&ctx, None).answer("fix it");
        assert!(answer.analysis.is_none());
        assert!(answer.text.contains("No build errors"));
    }

    #[test]
    fn test_site_url_answer() {
        let ctx = ctx();
        let answer = Assistant::new(&ctx, None).answer("what's the url?");
        assert!(answer.text.contains("https://octo.github.io/site/"));
    }

    #[test]
    fn test_deploy_answer_mentions_output_dir() {
        let ctx = ctx();
        let answer = Assistant::new(&ctx, None).answer("how do I publish?");
        assert!(answer.text.contains("`dist`"));
        assert!(answer.text.contains("npm run build"));
    }
}

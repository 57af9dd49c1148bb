//! Pattern library for build failures
//!
//! Each rule pairs a trigger over the captured text with the issues and fixes it
//! emits. Rules match independently against the whole text, but they always
//! emit in table order so callers see fixes in a stable sequence.

use super::{FixAction, Issue, IssueKind, SuggestedFix};
use crate::manifest::Manifest;
use regex::Regex;
use std::sync::LazyLock;

/// Default Node heap size proposed by the out-of-memory rule (MB)
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 4096;

/// Known module specifiers that install under a different package name.
const PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("react/react", "react"),
    ("react/jsx-runtime", "react"),
    ("react/jsx-dev-runtime", "react"),
    ("react-dom/client", "react-dom"),
    ("react-dom/server", "react-dom"),
    ("vite/client", "vite"),
];

/// Substrings that route an install to dev dependencies.
///
/// Heuristic only: any package not listed here installs as a regular
/// dependency, whatever the project actually intends.
const DEV_DEPENDENCY_HINTS: &[&str] = &[
    "react-scripts",
    "vite",
    "webpack",
    "typescript",
    "@types/",
    "eslint",
    "jest",
    "babel",
    "@vitejs/",
    "vite-plugin",
];

static CANNOT_FIND_MODULE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)cannot find module\s+['"`]([^'"`]+)['"`]"#).ok());
static CANNOT_RESOLVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:can't|cannot|could not|unable to) resolve\s+['"`]([^'"`]+)['"`]"#).ok()
});
static REACT_SCRIPTS_NOT_FOUND: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:react-scripts:?\s+(?:command\s+)?not found|'react-scripts' is not recognized)"#)
        .ok()
});
static COMMAND_NOT_FOUND: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:^|\s)([@A-Za-z][\w@./-]*):\s+(?:command\s+)?not found").ok()
});
static NPM_MISSING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)missing:\s+(@?[^\s@,]+)").ok());
static TS_DIAGNOSTIC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\bTS\d{4,5}\b").ok());
static PORT_IN_USE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\bport\b[^\n]*already in use").ok());

/// What a rule sees: the raw text, a lower-cased copy, and read-only lookups.
pub struct RuleInput<'a> {
    pub text: &'a str,
    pub lower: String,
    pub manifest: Option<&'a Manifest>,
    pub memory_limit_mb: u32,
}

impl<'a> RuleInput<'a> {
    pub fn new(text: &'a str, manifest: Option<&'a Manifest>, memory_limit_mb: u32) -> Self {
        Self {
            text,
            lower: text.to_lowercase(),
            manifest,
            memory_limit_mb,
        }
    }

    fn contains(&self, needle: &str) -> bool {
        self.lower.contains(needle)
    }

    fn contains_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.lower.contains(needle))
    }
}

/// Issues and fixes emitted by one matching rule.
#[derive(Debug, Default)]
pub struct Emission {
    pub issues: Vec<Issue>,
    pub fixes: Vec<SuggestedFix>,
}

impl Emission {
    fn issue(issue: Issue) -> Self {
        Self {
            issues: vec![issue],
            fixes: Vec::new(),
        }
    }

    fn with_fix(mut self, fix: SuggestedFix) -> Self {
        self.fixes.push(fix);
        self
    }
}

pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&RuleInput) -> bool,
    pub emit: fn(&RuleInput) -> Emission,
}

/// Rule table in emission order.
pub static RULES: &[Rule] = &[
    Rule {
        name: "missing_package",
        matches: matches_missing_package,
        emit: emit_missing_package,
    },
    Rule {
        name: "missing_node_modules",
        matches: matches_missing_node_modules,
        emit: emit_missing_node_modules,
    },
    Rule {
        name: "missing_build_script",
        matches: matches_missing_build_script,
        emit: emit_missing_build_script,
    },
    Rule {
        name: "syntax_error",
        matches: matches_syntax_error,
        emit: emit_syntax_error,
    },
    Rule {
        name: "typescript_error",
        matches: matches_typescript_error,
        emit: emit_typescript_error,
    },
    Rule {
        name: "permission_error",
        matches: matches_permission_error,
        emit: emit_permission_error,
    },
    Rule {
        name: "memory_error",
        matches: matches_memory_error,
        emit: emit_memory_error,
    },
    Rule {
        name: "port_in_use",
        matches: matches_port_in_use,
        emit: emit_port_in_use,
    },
];

fn regex_matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

fn first_capture(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    let re = re.as_ref()?;
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .find(|name| !is_local_path(name))
}

// --- missing package ---

fn matches_missing_package(input: &RuleInput) -> bool {
    input.contains_any(&["cannot find module", "module not found", "cannot resolve"])
        || regex_matches(&REACT_SCRIPTS_NOT_FOUND, input.text)
}

fn emit_missing_package(input: &RuleInput) -> Emission {
    match extract_missing_package(input.text) {
        Some(package) => {
            let dev = is_dev_dependency(&package);
            let description = if dev {
                format!("Install {} as a dev dependency", package)
            } else {
                format!("Install {}", package)
            };
            Emission::issue(Issue::new(
                IssueKind::MissingPackage {
                    package: Some(package.clone()),
                },
                format!("Missing package: {}", package),
            ))
            .with_fix(SuggestedFix::new(
                description,
                FixAction::InstallPackage { package, dev },
            ))
        }
        None => Emission::issue(Issue::new(
            IssueKind::MissingPackage { package: None },
            "A required module could not be found",
        ))
        .with_fix(SuggestedFix::new(
            "Install all dependencies",
            FixAction::InstallDependencies,
        )),
    }
}

/// Pull the implicated package name out of the error text.
///
/// Tries each source in turn and returns the first usable name, normalized and
/// mapped through the alias table. Relative or absolute file paths are not
/// packages and are skipped.
pub fn extract_missing_package(text: &str) -> Option<String> {
    let raw = first_capture(&CANNOT_FIND_MODULE, text)
        .or_else(|| first_capture(&CANNOT_RESOLVE, text))
        .or_else(|| {
            regex_matches(&REACT_SCRIPTS_NOT_FOUND, text).then(|| "react-scripts".to_string())
        })
        .or_else(|| first_capture(&COMMAND_NOT_FOUND, text))
        .or_else(|| first_capture(&NPM_MISSING, text))?;

    if let Some(alias) = lookup_alias(&raw) {
        return Some(alias.to_string());
    }
    let normalized = normalize_package_name(&raw)?;
    Some(
        lookup_alias(&normalized)
            .map(str::to_string)
            .unwrap_or(normalized),
    )
}

/// Reduce a module specifier to the package that provides it.
///
/// `@scope/pkg/deep/path` keeps the scope and package; `pkg/deep/path` keeps
/// the package.
pub fn normalize_package_name(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '\'' || c == '"' || c == '`')
        .trim();
    if trimmed.is_empty() || is_local_path(trimmed) {
        return None;
    }

    if trimmed.contains('/') {
        let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        if first.starts_with('@') {
            let second = segments.next()?;
            return Some(format!("{}/{}", first, second));
        }
        return Some(first.to_string());
    }

    Some(trimmed.to_string())
}

fn lookup_alias(name: &str) -> Option<&'static str> {
    PACKAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
}

fn is_local_path(name: &str) -> bool {
    let name = name.trim();
    name.starts_with('.')
        || name.starts_with('/')
        || name.starts_with('\\')
        || name.chars().nth(1) == Some(':')
}

/// Whether an install of `package` should go to dev dependencies.
pub fn is_dev_dependency(package: &str) -> bool {
    let lower = package.to_lowercase();
    DEV_DEPENDENCY_HINTS.iter().any(|hint| lower.contains(hint))
}

// --- node_modules ---

fn matches_missing_node_modules(input: &RuleInput) -> bool {
    input.contains("node_modules")
        && (input.contains("enoent") || input.contains("cannot find module"))
}

fn emit_missing_node_modules(_input: &RuleInput) -> Emission {
    Emission::issue(Issue::new(
        IssueKind::MissingNodeModules,
        "node_modules is missing or incomplete",
    ))
    .with_fix(SuggestedFix::new(
        "Install all dependencies",
        FixAction::InstallDependencies,
    ))
}

// --- build script ---

fn matches_missing_build_script(input: &RuleInput) -> bool {
    input.contains("missing script")
}

fn emit_missing_build_script(input: &RuleInput) -> Emission {
    let emission = Emission::issue(Issue::new(
        IssueKind::MissingBuildScript,
        "package.json has no \"build\" script",
    ));

    let builder = input.manifest.and_then(|manifest| {
        if manifest.has_dependency("react-scripts") {
            Some(("react-scripts build", "Create React App"))
        } else if manifest.has_dependency("vite") {
            Some(("vite build", "Vite"))
        } else {
            None
        }
    });

    match builder {
        Some((command, tool)) => emission.with_fix(SuggestedFix::new(
            format!("Add a {} build script: \"{}\"", tool, command),
            FixAction::AddBuildScript {
                name: "build".to_string(),
                command: command.to_string(),
            },
        )),
        None => emission,
    }
}

// --- manual-only rules ---

fn matches_syntax_error(input: &RuleInput) -> bool {
    input.contains_any(&["syntaxerror", "parseerror", "unexpected token"])
}

fn emit_syntax_error(_input: &RuleInput) -> Emission {
    Emission::issue(Issue::new(
        IssueKind::SyntaxError,
        "The build hit a syntax error in your source",
    ))
    .with_fix(SuggestedFix::manual(
        "Fix the syntax error",
        "Open the file and line named in the error output, correct the syntax, then rebuild",
    ))
}

fn matches_typescript_error(input: &RuleInput) -> bool {
    input.contains("type error") || regex_matches(&TS_DIAGNOSTIC, input.text)
}

fn emit_typescript_error(_input: &RuleInput) -> Emission {
    Emission::issue(Issue::new(
        IssueKind::TypescriptError,
        "TypeScript reported type errors",
    ))
    .with_fix(SuggestedFix::manual(
        "Fix the TypeScript errors",
        "Resolve the reported TS diagnostics, or run `npx tsc --noEmit` to list them",
    ))
}

fn matches_permission_error(input: &RuleInput) -> bool {
    input.contains_any(&["eacces", "permission denied"])
}

fn emit_permission_error(_input: &RuleInput) -> Emission {
    Emission::issue(Issue::new(
        IssueKind::PermissionError,
        "The build was denied access to a file or directory",
    ))
    .with_fix(SuggestedFix::manual(
        "Fix file permissions",
        "Check ownership of the project and node_modules; avoid running installs with sudo",
    ))
}

fn matches_memory_error(input: &RuleInput) -> bool {
    input.contains_any(&["heap out of memory", "reached heap limit"])
}

fn emit_memory_error(input: &RuleInput) -> Emission {
    Emission::issue(Issue::new(
        IssueKind::MemoryError,
        "Node ran out of memory during the build",
    ))
    .with_fix(SuggestedFix::new(
        format!(
            "Retry the build with a {} MB heap",
            input.memory_limit_mb
        ),
        FixAction::IncreaseMemory {
            max_old_space_mb: input.memory_limit_mb,
        },
    ))
}

fn matches_port_in_use(input: &RuleInput) -> bool {
    input.contains("eaddrinuse") || regex_matches(&PORT_IN_USE, input.text)
}

fn emit_port_in_use(_input: &RuleInput) -> Emission {
    Emission::issue(Issue::new(
        IssueKind::PortInUse,
        "A port needed by the build is already in use",
    ))
    .with_fix(SuggestedFix::manual(
        "Free the port",
        "Stop the process holding the port (for example a running dev server) and rebuild",
    ))
}

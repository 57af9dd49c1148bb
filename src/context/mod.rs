//! Per-session project context
//!
//! Everything pageship needs to know about the project is detected once, up
//! front, and passed to whatever needs it:
//! - package manager (from lockfiles)
//! - framework and build output directory
//! - the build command
//! - the GitHub Pages URL, when the project has a GitHub `origin` remote

use crate::autofix::patterns::DEFAULT_MEMORY_LIMIT_MB;
use crate::config::{Config, ProjectOverrides};
use crate::manifest::{Manifest, ManifestFile, ManifestStore};
use anyhow::{Context, Result};
use git2::Repository;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "npm" => Some(PackageManager::Npm),
            "yarn" => Some(PackageManager::Yarn),
            "pnpm" => Some(PackageManager::Pnpm),
            _ => None,
        }
    }

    /// Pick the package manager from the lockfile in `root`.
    pub fn detect(root: &Path) -> Self {
        if root.join("pnpm-lock.yaml").exists() {
            PackageManager::Pnpm
        } else if root.join("yarn.lock").exists() {
            PackageManager::Yarn
        } else {
            PackageManager::Npm
        }
    }

    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm install",
            PackageManager::Yarn => "yarn install",
            PackageManager::Pnpm => "pnpm install",
        }
    }

    pub fn add_command(&self, package: &str, dev: bool) -> String {
        let (base, dev_flag) = match self {
            PackageManager::Npm => ("npm install", "--save-dev"),
            PackageManager::Yarn => ("yarn add", "--dev"),
            PackageManager::Pnpm => ("pnpm add", "--save-dev"),
        };
        if dev {
            format!("{} {} {}", base, dev_flag, package)
        } else {
            format!("{} {}", base, package)
        }
    }

    pub fn run_script_command(&self, script: &str) -> String {
        match self {
            PackageManager::Yarn => format!("yarn {}", script),
            _ => format!("{} run {}", self.name(), script),
        }
    }
}

/// Build tool the project appears to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    CreateReactApp,
    Vite,
    Node,
    Static,
}

impl Framework {
    pub fn name(&self) -> &'static str {
        match self {
            Framework::CreateReactApp => "Create React App",
            Framework::Vite => "Vite",
            Framework::Node => "Node.js",
            Framework::Static => "Static site",
        }
    }

    pub fn detect(manifest: Option<&Manifest>) -> Self {
        match manifest {
            None => Framework::Static,
            Some(m) if m.has_dependency("react-scripts") => Framework::CreateReactApp,
            Some(m) if m.has_dependency("vite") => Framework::Vite,
            Some(_) => Framework::Node,
        }
    }

    pub fn default_output_dir(&self) -> &'static str {
        match self {
            Framework::CreateReactApp => "build",
            Framework::Vite | Framework::Node => "dist",
            Framework::Static => ".",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub manifest: Option<Manifest>,
    pub package_manager: PackageManager,
    pub framework: Framework,
    /// None for static sites with nothing to build
    pub build_command: Option<String>,
    pub output_dir: PathBuf,
    pub memory_limit_mb: u32,
    pub pages_url: Option<String>,
}

impl ProjectContext {
    /// Detect the project rooted at `path`.
    pub fn load(path: &Path, config: &Config) -> Result<Self> {
        let root = path
            .canonicalize()
            .with_context(|| format!("Project directory not found: {}", path.display()))?;
        let overrides = ProjectOverrides::load(&root)?;

        let manifest_file = ManifestFile::in_dir(&root);
        let manifest = if manifest_file.exists() {
            match manifest_file.load() {
                Ok(manifest) => Some(manifest),
                Err(err) => {
                    warn!(error = %err, "ignoring unreadable package.json");
                    None
                }
            }
        } else {
            None
        };

        let package_manager = overrides
            .package_manager
            .as_deref()
            .or(config.package_manager.as_deref())
            .and_then(PackageManager::from_name)
            .unwrap_or_else(|| PackageManager::detect(&root));
        let framework = Framework::detect(manifest.as_ref());

        let build_command = overrides.build_command.clone().or_else(|| {
            manifest
                .as_ref()
                .map(|_| package_manager.run_script_command("build"))
        });
        let output_dir = overrides
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(framework.default_output_dir()));
        let memory_limit_mb = overrides
            .memory_limit_mb
            .unwrap_or(config.memory_limit_mb);
        let pages_url = detect_pages_url(&root);

        debug!(
            root = %root.display(),
            package_manager = package_manager.name(),
            framework = framework.name(),
            build_command = ?build_command,
            "project context loaded"
        );

        Ok(Self {
            root,
            manifest,
            package_manager,
            framework,
            build_command,
            output_dir,
            memory_limit_mb,
            pages_url,
        })
    }

    pub fn with_build_command(mut self, command: Option<String>) -> Self {
        if command.is_some() {
            self.build_command = command;
        }
        self
    }

    pub fn manifest_file(&self) -> ManifestFile {
        ManifestFile::in_dir(&self.root)
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join(&self.output_dir)
    }

    pub fn memory_limit_or_default(&self) -> u32 {
        if self.memory_limit_mb == 0 {
            DEFAULT_MEMORY_LIMIT_MB
        } else {
            self.memory_limit_mb
        }
    }
}

fn detect_pages_url(root: &Path) -> Option<String> {
    let repo = Repository::discover(root).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    github_pages_url(remote.url()?)
}

/// Map a GitHub remote URL to its Pages site.
///
/// `owner/owner.github.io` is a user site served from the root; any other
/// repository is a project site under `/<repo>/`.
pub fn github_pages_url(remote_url: &str) -> Option<String> {
    let trimmed = remote_url.trim().trim_end_matches('/');
    let path = trimmed
        .strip_prefix("git@github.com:")
        .or_else(|| trimmed.strip_prefix("ssh://git@github.com/"))
        .or_else(|| trimmed.strip_prefix("https://github.com/"))
        .or_else(|| trimmed.strip_prefix("http://github.com/"))?;
    let path = path.strip_suffix(".git").unwrap_or(path);

    let mut parts = path.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let owner = owner.to_lowercase();

    if repo.eq_ignore_ascii_case(&format!("{}.github.io", owner)) {
        Some(format!("https://{}.github.io/", owner))
    } else {
        Some(format!("https://{}.github.io/{}/", owner, repo))
    }
}

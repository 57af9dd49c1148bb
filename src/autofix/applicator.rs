//! Fix applicator
//!
//! Performs one suggested fix at a time. Failures are returned as a
//! [`FixOutcome`] rather than an error so a loop over several fixes keeps going
//! when one of them fails.

use super::{FixAction, SuggestedFix};
use crate::context::PackageManager;
use crate::manifest::ManifestStore;
use anyhow::Result;
use tracing::{info, warn};

/// What to install: one package, or everything the manifest declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDirective {
    Package { name: String, dev: bool },
    All,
}

impl InstallDirective {
    pub fn command_line(&self, package_manager: PackageManager) -> String {
        match self {
            InstallDirective::Package { name, dev } => package_manager.add_command(name, *dev),
            InstallDirective::All => package_manager.install_command().to_string(),
        }
    }
}

/// Installs packages for the project.
pub trait PackageInstaller {
    fn install(&mut self, directive: &InstallDirective) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    Applied,
    /// The fix was attempted and failed; carries the error for logging
    Failed(String),
    /// Manual fixes are never applied
    NotApplicable,
}

impl FixOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FixOutcome::Applied)
    }
}

/// Anything that can carry out a [`SuggestedFix`].
pub trait ApplyFix {
    fn apply(&mut self, fix: &SuggestedFix) -> FixOutcome;
}

pub struct FixApplicator<I, M> {
    installer: I,
    manifest: M,
}

impl<I: PackageInstaller, M: ManifestStore> FixApplicator<I, M> {
    pub fn new(installer: I, manifest: M) -> Self {
        Self {
            installer,
            manifest,
        }
    }

    fn add_script(&mut self, name: &str, command: &str) -> Result<()> {
        let mut manifest = self.manifest.load()?;
        manifest.set_script(name, command)?;
        self.manifest.save(&manifest)?;
        Ok(())
    }
}

impl<I: PackageInstaller, M: ManifestStore> ApplyFix for FixApplicator<I, M> {
    fn apply(&mut self, fix: &SuggestedFix) -> FixOutcome {
        let result = match &fix.action {
            FixAction::InstallPackage { .. } | FixAction::InstallDependencies => {
                match fix.action.install_directive() {
                    Some(directive) => self.installer.install(&directive),
                    None => return FixOutcome::NotApplicable,
                }
            }
            FixAction::AddBuildScript { name, command } => self.add_script(name, command),
            // The orchestrator swaps the build command for the next attempt.
            FixAction::IncreaseMemory { .. } => Ok(()),
            FixAction::ManualFix { .. } => return FixOutcome::NotApplicable,
        };

        match result {
            Ok(()) => {
                info!(fix = fix.action.label(), "applied fix: {}", fix.description);
                FixOutcome::Applied
            }
            Err(err) => {
                warn!(fix = fix.action.label(), error = %err, "fix failed");
                FixOutcome::Failed(format!("{:#}", err))
            }
        }
    }
}

//! Getting plugin sources onto disk.
//!
//! Work is split into small steps so the event loop can redraw progress and
//! observe cancellation between them. Each step performs at most one git
//! invocation or one HTTP request.

mod direct;
mod git_sync;

use direct::DirectSync;
use git_sync::GitSync;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::installer::git::{GitRunner, GitStatus};
use crate::installer::http::{FetchError, Fetcher};
use crate::model::catalog::{Catalog, PluginCatalogEntry, PluginId};
use crate::model::config::DownloadConfig;
use crate::model::selection::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Install,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    Removed,
    Failed(String),
    /// Not attempted because the run was cancelled.
    Skipped,
}

/// What happened to one catalog entry during acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub id: PluginId,
    pub name: String,
    pub delta: Delta,
    pub outcome: Outcome,
}

impl ItemResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    /// Whether the plugin is on disk after this item was handled.
    pub fn present_after(&self) -> bool {
        match (self.delta, &self.outcome) {
            (Delta::Install, Outcome::Installed) => true,
            (Delta::Install, _) => false,
            (Delta::Remove, Outcome::Removed) => false,
            (Delta::Remove, _) => true,
        }
    }
}

/// Selection as it stands after acquisition: failed or skipped installs are
/// unchecked, failed or skipped removals stay checked.
pub fn apply_outcomes(selection: &Selection, results: &[ItemResult]) -> Selection {
    let mut updated = selection.clone();
    for result in results {
        updated.set(result.id, result.present_after());
    }
    updated
}

/// A catalog entry whose checked state differs from its presence on disk.
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub id: PluginId,
    pub entry: PluginCatalogEntry,
    pub delta: Delta,
    pub dir: PathBuf,
}

impl PendingItem {
    fn finish(&self, outcome: Outcome) -> ItemResult {
        match &outcome {
            Outcome::Failed(reason) => tracing::warn!("{}: {reason}", self.entry.name),
            other => tracing::info!("{}: {other:?}", self.entry.name),
        }
        ItemResult {
            id: self.id,
            name: self.entry.name.clone(),
            delta: self.delta,
            outcome,
        }
    }
}

/// Entries to act on, in catalog order.
pub fn plan(catalog: &Catalog, selection: &Selection, plugins_dir: &Path) -> Vec<PendingItem> {
    catalog
        .iter()
        .filter_map(|(id, entry)| {
            let dir = plugins_dir.join(&entry.name);
            let checked = selection.is_checked(id);
            if checked == dir.exists() {
                return None;
            }
            Some(PendingItem {
                id,
                entry: entry.clone(),
                delta: if checked { Delta::Install } else { Delta::Remove },
                dir,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("cannot prepare {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("download endpoint unreachable: {0}")]
    Unreachable(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Git { submodule: bool },
    Direct,
}

/// Decide how to acquire sources. Both probes use `timeout`.
pub fn probe_strategy(git: &dyn GitRunner, plugins_dir: &Path, timeout: Duration) -> Strategy {
    let version = git.run(&["--version"], plugins_dir, Some(timeout));
    if !version.is_success() {
        tracing::info!("git unusable ({version:?}), falling back to direct download");
        return Strategy::Direct;
    }

    match git.run(&["status"], plugins_dir, Some(timeout)) {
        GitStatus::Success => Strategy::Git { submodule: true },
        GitStatus::Failed(_) => Strategy::Git { submodule: false },
        other => {
            tracing::info!("git status probe failed ({other:?}), falling back to direct download");
            Strategy::Direct
        }
    }
}

pub enum Acquisition {
    Git(GitSync),
    Direct(DirectSync),
}

impl Acquisition {
    pub fn start(
        strategy: Strategy,
        items: Vec<PendingItem>,
        plugins_dir: PathBuf,
        tracking_file: PathBuf,
        download: DownloadConfig,
    ) -> Self {
        match strategy {
            Strategy::Git { submodule } => {
                Self::Git(GitSync::new(items, plugins_dir, tracking_file, submodule))
            }
            Strategy::Direct => Self::Direct(DirectSync::new(items, download)),
        }
    }

    /// Run one unit of work. Returns `Ok(true)` once everything is done.
    pub fn step(
        &mut self,
        git: &dyn GitRunner,
        fetcher: &dyn Fetcher,
        cancel: &CancelToken,
    ) -> Result<bool, AcquireError> {
        match self {
            Self::Git(sync) => Ok(sync.step(git, cancel)),
            Self::Direct(sync) => sync.step(fetcher, cancel),
        }
    }

    /// Percent complete, 0 to 100.
    pub fn progress(&self) -> f64 {
        match self {
            Self::Git(sync) => sync.progress(),
            Self::Direct(sync) => sync.progress(),
        }
    }

    /// One-line description of the work in flight.
    pub fn describe(&self) -> String {
        match self {
            Self::Git(sync) => format!(
                "git: {}/{} plugins processed",
                sync.results().len(),
                sync.total()
            ),
            Self::Direct(sync) => match sync.current_job() {
                Some(job) if job.initial_file_count > 0 => format!(
                    "downloading {} ({}/{} files)",
                    job.item.entry.name,
                    job.initial_file_count - job.remaining(),
                    job.initial_file_count
                ),
                Some(job) => format!("listing files of {}", job.item.entry.name),
                None => format!("{} plugins processed", sync.results().len()),
            },
        }
    }

    pub fn into_results(self) -> Vec<ItemResult> {
        match self {
            Self::Git(sync) => sync.into_results(),
            Self::Direct(sync) => sync.into_results(),
        }
    }
}

/// Best-effort directory removal shared by both strategies.
fn remove_plugin_dir(dir: &Path) -> Outcome {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Outcome::Removed,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Outcome::Removed,
        Err(err) => Outcome::Failed(format!("cannot remove {}: {err}", dir.display())),
    }
}

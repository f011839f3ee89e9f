//! Sequencing of one install run:
//! load manifest and plan → probe → acquire → reconcile → patch → persist.
//!
//! Per-item acquisition results are threaded into reconciliation explicitly,
//! so a failed install ends up unchecked and unreferenced.

use std::fs;
use std::path::{Path, PathBuf};

use crate::installer::acquire::{
    self, Acquisition, CancelToken, ItemResult, PendingItem, apply_outcomes, probe_strategy,
};
use crate::installer::git::GitRunner;
use crate::installer::http::Fetcher;
use crate::installer::manifest::{ManifestError, ProjectManifest, reconcile};
use crate::installer::patcher::{PatchOutcome, patch_project};
use crate::model::catalog::Catalog;
use crate::model::config::AppConfig;
use crate::model::selection::{InstalledSet, Selection};

/// External collaborators the run talks to.
pub struct Toolkit {
    pub git: Box<dyn GitRunner + Send>,
    pub fetcher: Box<dyn Fetcher + Send>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("project file has no parent directory: {0}")]
    NoProjectDir(String),
    #[error("cannot create {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct RunReport {
    pub items: Vec<ItemResult>,
    pub patches: Vec<PatchOutcome>,
    /// Set when acquisition failed hard; later stages were skipped.
    pub aborted: Option<String>,
    /// Set when the manifest could not be written.
    pub persist_error: Option<String>,
    pub selection: Selection,
    pub installed: InstalledSet,
}

impl RunReport {
    pub fn failed_items(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.is_failure())
            .map(|item| item.name.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        self.aborted.is_none() && self.persist_error.is_none()
    }

    /// At most one warning per failure class.
    pub fn warnings(&self) -> Vec<String> {
        if let Some(reason) = &self.aborted {
            return vec![format!("install aborted: {reason}")];
        }

        let mut warnings = Vec::new();
        let failed = self.failed_items();
        if !failed.is_empty() {
            warnings.push(format!(
                "some plugins couldn't be downloaded: {}",
                failed.join(", ")
            ));
        }
        if self.patches.iter().any(|patch| !patch.is_ok()) {
            warnings.push(
                "adding code dependencies failed, but plugins were installed; add them manually"
                    .to_string(),
            );
        }
        if let Some(reason) = &self.persist_error {
            warnings.push(format!("cannot update project file: {reason}"));
        }
        warnings
    }
}

enum Stage {
    Probe(Vec<PendingItem>),
    Acquire(Acquisition),
    Finalize(Vec<ItemResult>),
    Done,
}

pub struct InstallRun {
    catalog: Catalog,
    selection: Selection,
    installed: InstalledSet,
    manifest_path: PathBuf,
    project_dir: PathBuf,
    plugins_dir: PathBuf,
    manifest: Option<ProjectManifest>,
    config: AppConfig,
    cancel: CancelToken,
    stage: Stage,
    report: Option<RunReport>,
}

impl InstallRun {
    /// Load and validate the manifest, prepare `Plugins/`, and plan the deltas.
    /// Any failure here aborts before anything on disk changes.
    pub fn start(
        catalog: Catalog,
        selection: Selection,
        installed: InstalledSet,
        manifest_path: PathBuf,
        config: AppConfig,
    ) -> Result<Self, RunError> {
        let manifest = ProjectManifest::load(&manifest_path)?;
        let project_dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| RunError::NoProjectDir(manifest_path.display().to_string()))?;

        let plugins_dir = project_dir.join("Plugins");
        fs::create_dir_all(&plugins_dir).map_err(|source| RunError::Io {
            path: plugins_dir.display().to_string(),
            source,
        })?;

        let items = acquire::plan(&catalog, &selection, &plugins_dir);
        tracing::info!(
            "install run for {}: {} pending changes",
            manifest_path.display(),
            items.len()
        );

        Ok(Self {
            catalog,
            selection,
            installed,
            manifest_path,
            project_dir,
            plugins_dir,
            manifest: Some(manifest),
            config,
            cancel: CancelToken::new(),
            stage: Stage::Probe(items),
            report: None,
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_done(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    pub fn progress(&self) -> f64 {
        match &self.stage {
            Stage::Probe(_) => 0.0,
            Stage::Acquire(acquisition) => acquisition.progress(),
            Stage::Finalize(_) | Stage::Done => 100.0,
        }
    }

    pub fn describe(&self) -> String {
        match &self.stage {
            Stage::Probe(_) => "checking for git".to_string(),
            Stage::Acquire(acquisition) => acquisition.describe(),
            Stage::Finalize(_) => "updating project files".to_string(),
            Stage::Done => "done".to_string(),
        }
    }

    /// Advance by one unit of work. Returns `true` once the run is over.
    pub fn step(&mut self, tools: &Toolkit) -> bool {
        let stage = std::mem::replace(&mut self.stage, Stage::Done);
        self.stage = match stage {
            Stage::Probe(items) => {
                let strategy = probe_strategy(
                    tools.git.as_ref(),
                    &self.plugins_dir,
                    self.config.git.probe_timeout(),
                );
                tracing::info!("acquisition strategy: {strategy:?}");
                Stage::Acquire(Acquisition::start(
                    strategy,
                    items,
                    self.plugins_dir.clone(),
                    self.project_dir.join(".gitmodules"),
                    self.config.download.clone(),
                ))
            }
            Stage::Acquire(mut acquisition) => {
                match acquisition.step(tools.git.as_ref(), tools.fetcher.as_ref(), &self.cancel) {
                    Ok(false) => Stage::Acquire(acquisition),
                    Ok(true) => Stage::Finalize(acquisition.into_results()),
                    Err(err) => {
                        tracing::error!("acquisition failed: {err}");
                        self.abort(acquisition.into_results(), err.to_string());
                        Stage::Done
                    }
                }
            }
            Stage::Finalize(results) => {
                self.finalize(results);
                Stage::Done
            }
            Stage::Done => Stage::Done,
        };

        self.is_done()
    }

    /// Drive the run to the end without yielding.
    #[cfg(test)]
    pub fn run_to_completion(mut self, tools: &Toolkit) -> RunReport {
        while !self.step(tools) {}
        self.finish()
    }

    pub fn finish(mut self) -> RunReport {
        self.report.take().unwrap_or_else(|| RunReport {
            items: Vec::new(),
            patches: Vec::new(),
            aborted: Some("install run did not finish".to_string()),
            persist_error: None,
            selection: self.selection.clone(),
            installed: self.installed.clone(),
        })
    }

    fn abort(&mut self, items: Vec<ItemResult>, reason: String) {
        self.report = Some(RunReport {
            items,
            patches: Vec::new(),
            aborted: Some(reason),
            persist_error: None,
            selection: self.selection.clone(),
            installed: self.installed.clone(),
        });
    }

    fn finalize(&mut self, items: Vec<ItemResult>) {
        let selection = apply_outcomes(&self.selection, &items);
        let Some(manifest) = self.manifest.take() else {
            return;
        };

        let (manifest, installed) =
            reconcile(&self.catalog, &selection, manifest, self.installed.clone());

        let patches = patch_project(
            &self.project_dir,
            &manifest,
            &self.catalog,
            &installed,
            &self.config.patcher,
        );

        let persist_error = match manifest.save(&self.manifest_path) {
            Ok(()) => {
                tracing::info!("project file updated: {}", self.manifest_path.display());
                None
            }
            Err(err) => {
                tracing::error!("{err}");
                Some(err.to_string())
            }
        };

        // A manifest that was not written still references the old set.
        let installed = if persist_error.is_some() {
            self.installed.clone()
        } else {
            installed
        };

        self.report = Some(RunReport {
            items,
            patches,
            aborted: None,
            persist_error,
            selection,
            installed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::acquire::Outcome;
    use crate::installer::acquire::testing::{FakeFetcher, FakeGit};
    use crate::installer::git::GitStatus;
    use crate::model::catalog::PluginId;

    const BUILD: &str = "public class Game : GameModule\n{\n    public override void Setup(BuildOptions options)\n    {\n        base.Setup(options);\n    }\n}\n";

    fn catalog() -> Catalog {
        Catalog::from_json(
            r#"[
                {"name": "A", "url": "https://github.com/x/a", "projectFile": "A.flaxproj", "moduleName": "A"},
                {"name": "B", "url": "https://github.com/x/b", "projectFile": "B.flaxproj", "moduleName": "B"}
            ]"#,
        )
        .unwrap()
    }

    fn project(manifest: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Demo.flaxproj");
        fs::write(&path, manifest).unwrap();
        let source = dir.path().join("Source/Game");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("Game.Build.cs"), BUILD).unwrap();
        (dir, path)
    }

    fn toolkit(git: FakeGit, fetcher: FakeFetcher) -> Toolkit {
        Toolkit {
            git: Box::new(git),
            fetcher: Box::new(fetcher),
        }
    }

    fn start(path: &Path, checked: Vec<bool>) -> InstallRun {
        let catalog = catalog();
        let manifest = ProjectManifest::load(path).unwrap();
        let installed = InstalledSet::from_references(&catalog, manifest.reference_names());
        InstallRun::start(
            catalog,
            Selection::from_checked(checked),
            installed,
            path.to_path_buf(),
            AppConfig::defaults().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn single_plugin_install_end_to_end() {
        let (dir, path) = project(r#"{"GameTarget": "GameTarget", "References": []}"#);
        let run = start(&path, vec![true, false]);

        let report = run.run_to_completion(&toolkit(
            FakeGit::with(&[("status", GitStatus::Failed(Some(128)))]),
            FakeFetcher::default(),
        ));

        assert!(report.succeeded(), "{:?}", report.warnings());
        assert!(report.warnings().is_empty());
        assert!(dir.path().join("Plugins/A").is_dir());
        assert!(report.installed.contains(PluginId(0)));

        let manifest = ProjectManifest::load(&path).unwrap();
        assert_eq!(
            manifest.reference_names(),
            vec!["$(ProjectPath)/Plugins/A/A.flaxproj"]
        );

        let build = fs::read_to_string(dir.path().join("Source/Game/Game.Build.cs")).unwrap();
        assert_eq!(build.matches("options.PrivateDependencies.Add(\"A\");").count(), 1);
        assert!(build.contains("        options.PrivateDependencies.Add(\"A\");\n        base.Setup(options);"));
    }

    #[test]
    fn failed_clone_is_not_referenced() {
        let (dir, path) = project(r#"{"References": []}"#);
        let run = start(&path, vec![true, true]);

        let report = run.run_to_completion(&toolkit(
            FakeGit::with(&[
                ("status", GitStatus::Failed(Some(128))),
                ("clone https://github.com/x/a A", GitStatus::Failed(Some(128))),
            ]),
            FakeFetcher::default(),
        ));

        assert!(report.succeeded());
        assert_eq!(report.failed_items(), vec!["A"]);
        assert_eq!(report.warnings().len(), 1);
        assert!(!report.selection.is_checked(PluginId(0)));
        assert!(report.selection.is_checked(PluginId(1)));

        let manifest = ProjectManifest::load(&path).unwrap();
        assert_eq!(
            manifest.reference_names(),
            vec!["$(ProjectPath)/Plugins/B/B.flaxproj"]
        );
        let build = fs::read_to_string(dir.path().join("Source/Game/Game.Build.cs")).unwrap();
        assert!(!build.contains("\"A\""));
        assert!(build.contains("\"B\""));
    }

    #[test]
    fn unreachable_fallback_aborts_without_touching_manifest() {
        let original = r#"{"GameTarget": "GameTarget", "References": []}"#;
        let (dir, path) = project(original);
        let mut run = start(&path, vec![true, false]);

        let tools = toolkit(
            FakeGit::with(&[("--version", GitStatus::TimedOut)]),
            FakeFetcher::default(),
        );
        let mut steps = 0;
        while !run.step(&tools) {
            steps += 1;
            assert!(steps < 100);
        }
        let report = run.finish();

        assert!(!report.succeeded());
        assert_eq!(report.warnings().len(), 1);
        assert!(report.patches.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert_eq!(
            fs::read_to_string(dir.path().join("Source/Game/Game.Build.cs")).unwrap(),
            BUILD
        );
    }

    #[test]
    fn missing_build_file_is_a_soft_warning() {
        let (dir, path) = project(r#"{"References": []}"#);
        fs::remove_dir_all(dir.path().join("Source")).unwrap();
        let run = start(&path, vec![true, false]);

        let report = run.run_to_completion(&toolkit(FakeGit::with(&[]), FakeFetcher::default()));

        assert!(report.succeeded());
        assert_eq!(report.warnings().len(), 1);
        assert!(report.warnings()[0].contains("manually"));
        assert_eq!(
            ProjectManifest::load(&path).unwrap().reference_names(),
            vec!["$(ProjectPath)/Plugins/A/A.flaxproj"]
        );
    }

    #[test]
    fn invalid_manifest_fails_before_any_work() {
        let (dir, path) = project("{ not json");
        let result = InstallRun::start(
            catalog(),
            Selection::from_checked(vec![true, false]),
            InstalledSet::new(),
            path.clone(),
            AppConfig::defaults().unwrap(),
        );

        assert!(matches!(result, Err(RunError::Manifest(_))));
        assert!(!dir.path().join("Plugins").exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn cancelled_run_keeps_disk_and_manifest_consistent() {
        let (dir, path) = project(r#"{"References": []}"#);
        let mut run = start(&path, vec![true, true]);
        let tools = toolkit(
            FakeGit::with(&[("status", GitStatus::Failed(Some(128)))]),
            FakeFetcher::default(),
        );

        assert!(!run.step(&tools)); // probe
        assert!(!run.step(&tools)); // clone A
        run.cancel_token().cancel();
        while !run.step(&tools) {}
        let report = run.finish();

        assert!(report.succeeded());
        assert_eq!(report.items[1].outcome, Outcome::Skipped);
        assert!(dir.path().join("Plugins/A").exists());
        assert!(!dir.path().join("Plugins/B").exists());
        assert_eq!(
            ProjectManifest::load(&path).unwrap().reference_names(),
            vec!["$(ProjectPath)/Plugins/A/A.flaxproj"]
        );
    }

    #[test]
    fn rerun_with_same_selection_changes_nothing() {
        let (_dir, path) = project(r#"{"References": []}"#);
        let tools = toolkit(FakeGit::with(&[]), FakeFetcher::default());

        let first = start(&path, vec![true, false]).run_to_completion(&tools);
        assert!(first.succeeded());
        let after_first = fs::read_to_string(&path).unwrap();

        let second = start(&path, vec![true, false]).run_to_completion(&tools);
        assert!(second.items.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
    }
}

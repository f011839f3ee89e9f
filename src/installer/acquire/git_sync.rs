use std::path::PathBuf;

use super::{CancelToken, Delta, ItemResult, Outcome, PendingItem, remove_plugin_dir};
use crate::installer::git::GitRunner;
use crate::installer::gitmodules;

/// Clone / submodule strategy. One entry per step, then a single
/// `submodule update` when running in submodule mode.
pub struct GitSync {
    items: Vec<PendingItem>,
    next: usize,
    plugins_dir: PathBuf,
    tracking_file: PathBuf,
    submodule: bool,
    updated: bool,
    results: Vec<ItemResult>,
}

impl GitSync {
    pub fn new(
        items: Vec<PendingItem>,
        plugins_dir: PathBuf,
        tracking_file: PathBuf,
        submodule: bool,
    ) -> Self {
        Self {
            items,
            next: 0,
            plugins_dir,
            tracking_file,
            submodule,
            updated: !submodule,
            results: Vec::new(),
        }
    }

    pub fn step(&mut self, git: &dyn GitRunner, cancel: &CancelToken) -> bool {
        if self.next < self.items.len() && cancel.is_cancelled() {
            for item in &self.items[self.next..] {
                self.results.push(item.finish(Outcome::Skipped));
            }
            self.next = self.items.len();
            return self.is_done();
        }

        if let Some(item) = self.items.get(self.next) {
            let outcome = match item.delta {
                Delta::Remove => self.remove(item, git),
                Delta::Install => self.install(item, git),
            };
            self.results.push(item.finish(outcome));
            self.next += 1;
            return self.is_done();
        }

        if !self.updated {
            let status = git.run(
                &["submodule", "update", "--recursive"],
                &self.plugins_dir,
                None,
            );
            if !status.is_success() {
                tracing::warn!("submodule update failed: {status:?}");
            }
            self.updated = true;
        }

        true
    }

    fn is_done(&self) -> bool {
        self.next >= self.items.len() && self.updated
    }

    fn install(&self, item: &PendingItem, git: &dyn GitRunner) -> Outcome {
        let name = item.entry.name.as_str();
        let url = item.entry.url.as_str();
        let args: Vec<&str> = if self.submodule {
            vec!["submodule", "add", "--force", url, name]
        } else {
            vec!["clone", url, name]
        };

        let status = git.run(&args, &self.plugins_dir, None);
        if status.is_success() {
            Outcome::Installed
        } else {
            Outcome::Failed(format!("git {} failed: {status:?}", args[0]))
        }
    }

    fn remove(&self, item: &PendingItem, git: &dyn GitRunner) -> Outcome {
        let name = item.entry.name.as_str();
        if self.submodule {
            let status = git.run(&["submodule", "deinit", "-f", name], &self.plugins_dir, None);
            if !status.is_success() {
                tracing::warn!("submodule deinit {name} failed: {status:?}");
            }
            if let Err(err) = gitmodules::remove_stanza_from_file(&self.tracking_file, name) {
                tracing::warn!("cannot edit {}: {err}", self.tracking_file.display());
            }
        }
        remove_plugin_dir(&item.dir)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// `processed / total * 100`, recomputed after every entry.
    pub fn progress(&self) -> f64 {
        if self.items.is_empty() {
            return 100.0;
        }
        (self.results.len() as f64 / self.items.len() as f64) * 100.0
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ItemResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::installer::acquire::testing::FakeGit;
    use crate::installer::acquire::{ItemResult, plan};
    use crate::installer::git::GitStatus;
    use crate::model::catalog::{Catalog, PluginCatalogEntry};
    use crate::model::selection::Selection;

    fn catalog() -> Catalog {
        let entry = |name: &str| PluginCatalogEntry {
            name: name.to_string(),
            url: format!("https://github.com/x/{}", name.to_lowercase()),
            project_file: format!("{name}.flaxproj"),
            module_name: Some(name.to_string()),
            editor_module_name: None,
            branch: None,
            description: String::new(),
        };
        Catalog::new(vec![entry("A"), entry("B"), entry("C")]).unwrap()
    }

    fn run(sync: &mut GitSync, git: &FakeGit) -> Vec<f64> {
        let cancel = CancelToken::new();
        let mut progress = Vec::new();
        while !sync.step(git, &cancel) {
            progress.push(sync.progress());
        }
        progress.push(sync.progress());
        progress
    }

    #[test]
    fn clones_missing_and_removes_unchecked() {
        let project = tempfile::tempdir().unwrap();
        let plugins = project.path().join("Plugins");
        fs::create_dir_all(plugins.join("B")).unwrap();
        fs::write(plugins.join("B/file.txt"), "x").unwrap();

        let selection = Selection::from_checked(vec![true, false, true]);
        let items = plan(&catalog(), &selection, &plugins);
        let mut sync = GitSync::new(items, plugins.clone(), project.path().join(".gitmodules"), false);

        let git = FakeGit::with(&[]);
        let progress = run(&mut sync, &git);

        assert_eq!(
            git.calls(),
            vec![
                "clone https://github.com/x/a A",
                "clone https://github.com/x/c C",
            ]
        );
        assert!(!plugins.join("B").exists());
        assert!(plugins.join("A").exists());
        assert_eq!(progress.last().copied(), Some(100.0));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn failed_clone_is_soft() {
        let project = tempfile::tempdir().unwrap();
        let plugins = project.path().join("Plugins");
        fs::create_dir_all(&plugins).unwrap();

        let selection = Selection::from_checked(vec![true, true, false]);
        let items = plan(&catalog(), &selection, &plugins);
        let mut sync = GitSync::new(items, plugins.clone(), project.path().join(".gitmodules"), false);

        let git = FakeGit::with(&[(
            "clone https://github.com/x/a A",
            GitStatus::Failed(Some(128)),
        )]);
        run(&mut sync, &git);

        let results = sync.into_results();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_failure());
        assert!(!results[0].present_after());
        assert_eq!(results[1].outcome, Outcome::Installed);
    }

    #[test]
    fn submodule_mode_adds_deinits_and_updates() {
        let project = tempfile::tempdir().unwrap();
        let plugins = project.path().join("Plugins");
        fs::create_dir_all(plugins.join("B")).unwrap();
        let tracking = project.path().join(".gitmodules");
        fs::write(
            &tracking,
            "[submodule \"Plugins/B\"]\n\tpath = Plugins/B\n\turl = https://github.com/x/b\n",
        )
        .unwrap();

        let selection = Selection::from_checked(vec![true, false, false]);
        let items = plan(&catalog(), &selection, &plugins);
        let mut sync = GitSync::new(items, plugins.clone(), tracking.clone(), true);

        let git = FakeGit::with(&[]);
        run(&mut sync, &git);

        assert_eq!(
            git.calls(),
            vec![
                "submodule add --force https://github.com/x/a A",
                "submodule deinit -f B",
                "submodule update --recursive",
            ]
        );
        assert_eq!(fs::read_to_string(&tracking).unwrap(), "");
        assert!(!plugins.join("B").exists());
    }

    #[test]
    fn cancellation_skips_the_rest() {
        let project = tempfile::tempdir().unwrap();
        let plugins = project.path().join("Plugins");
        fs::create_dir_all(&plugins).unwrap();

        let selection = Selection::from_checked(vec![true, true, true]);
        let items = plan(&catalog(), &selection, &plugins);
        let mut sync = GitSync::new(items, plugins, project.path().join(".gitmodules"), false);

        let git = FakeGit::with(&[]);
        let cancel = CancelToken::new();
        assert!(!sync.step(&git, &cancel));
        cancel.cancel();
        assert!(sync.step(&git, &cancel));

        let outcomes: Vec<&Outcome> = sync.results().iter().map(|r: &ItemResult| &r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![&Outcome::Installed, &Outcome::Skipped, &Outcome::Skipped]
        );
        assert_eq!(git.calls().len(), 1);
    }
}

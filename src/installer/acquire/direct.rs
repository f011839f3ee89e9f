use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::{AcquireError, CancelToken, Delta, ItemResult, Outcome, PendingItem, remove_plugin_dir};
use crate::installer::http::Fetcher;
use crate::model::config::DownloadConfig;

static REPO_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid repo slug regex"));

#[derive(Debug, Deserialize)]
struct TreeListing {
    tree: Vec<TreeNode>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

/// One plugin fetched file by file from the raw content endpoint.
#[derive(Debug)]
pub struct DownloadJob {
    pub item: PendingItem,
    /// Raw content URL prefix; file URLs are this plus the tree path.
    raw_base: String,
    pending: VecDeque<String>,
    pub initial_file_count: usize,
}

impl DownloadJob {
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn destination(&self) -> &Path {
        &self.item.dir
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    ResolveTree,
    FetchFile,
    JobDone,
    JobFailed(String),
    Finished,
}

/// Direct download fallback: removals first, then each job's tree listing
/// followed by its files, strictly one request at a time.
pub struct DirectSync {
    removals: VecDeque<PendingItem>,
    jobs: Vec<DownloadJob>,
    current: usize,
    state: State,
    config: DownloadConfig,
    results: Vec<ItemResult>,
}

impl DirectSync {
    pub fn new(items: Vec<PendingItem>, config: DownloadConfig) -> Self {
        let (installs, removals): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| item.delta == Delta::Install);

        let jobs: Vec<DownloadJob> = installs
            .into_iter()
            .map(|item| DownloadJob {
                item,
                raw_base: String::new(),
                pending: VecDeque::new(),
                initial_file_count: 0,
            })
            .collect();

        let state = if jobs.is_empty() {
            State::Finished
        } else {
            State::ResolveTree
        };

        Self {
            removals: removals.into(),
            jobs,
            current: 0,
            state,
            config,
            results: Vec::new(),
        }
    }

    pub fn step(
        &mut self,
        fetcher: &dyn Fetcher,
        cancel: &CancelToken,
    ) -> Result<bool, AcquireError> {
        if cancel.is_cancelled() && !self.is_done() {
            self.skip_remaining();
            return Ok(true);
        }

        if let Some(item) = self.removals.pop_front() {
            let outcome = remove_plugin_dir(&item.dir);
            self.results.push(item.finish(outcome));
            return Ok(self.is_done());
        }

        let state = std::mem::replace(&mut self.state, State::Finished);
        self.state = match state {
            State::ResolveTree => self.resolve_tree(fetcher)?,
            State::FetchFile => self.fetch_file(fetcher),
            State::JobDone => self.finish_job(Outcome::Installed),
            State::JobFailed(reason) => self.finish_job(Outcome::Failed(reason)),
            State::Finished => State::Finished,
        };

        Ok(self.is_done())
    }

    fn is_done(&self) -> bool {
        self.removals.is_empty() && self.state == State::Finished
    }

    fn resolve_tree(&mut self, fetcher: &dyn Fetcher) -> Result<State, AcquireError> {
        let config = &self.config;
        let Some(job) = self.jobs.get_mut(self.current) else {
            return Ok(State::Finished);
        };

        let Some(repo) = repo_location(&job.item.entry.url, &config.github_url) else {
            return Ok(State::JobFailed(format!(
                "{} is not a GitHub repository URL",
                job.item.entry.url
            )));
        };
        let branch = job
            .item
            .entry
            .branch
            .clone()
            .unwrap_or_else(|| config.default_branch.clone());

        // A transport failure here means the fallback itself is unusable.
        let response = fetcher.get(&config.tree_url_for(&repo, &branch))?;
        if !response.is_success() {
            return Ok(State::JobFailed(format!(
                "tree listing returned status {}",
                response.status
            )));
        }

        let listing: TreeListing = match serde_json::from_slice(&response.body) {
            Ok(listing) => listing,
            Err(err) => return Ok(State::JobFailed(format!("malformed tree listing: {err}"))),
        };

        job.raw_base = config.raw_base_for(&repo, &branch);
        job.pending = listing
            .tree
            .into_iter()
            .filter(|node| node.kind == "blob")
            .map(|node| format!("{}{}", job.raw_base, node.path))
            .collect();
        job.initial_file_count = job.pending.len();
        tracing::info!(
            "{}: {} files to download",
            job.item.entry.name,
            job.initial_file_count
        );

        if let Err(err) = fs::create_dir_all(job.destination()) {
            return Err(AcquireError::Io {
                path: job.destination().display().to_string(),
                source: err,
            });
        }

        Ok(if job.pending.is_empty() {
            State::JobDone
        } else {
            State::FetchFile
        })
    }

    fn fetch_file(&mut self, fetcher: &dyn Fetcher) -> State {
        let Some(job) = self.jobs.get_mut(self.current) else {
            return State::Finished;
        };
        let Some(url) = job.pending.pop_front() else {
            return State::JobDone;
        };

        let response = match fetcher.get(&url) {
            Ok(response) => response,
            Err(err) => return State::JobFailed(err.to_string()),
        };
        if !response.is_success() {
            return State::JobFailed(format!("{url} returned status {}", response.status));
        }

        if let Err(reason) = write_fetched_file(job.destination(), &job.raw_base, &url, &response.body)
        {
            return State::JobFailed(reason);
        }

        if job.pending.is_empty() {
            State::JobDone
        } else {
            State::FetchFile
        }
    }

    fn finish_job(&mut self, outcome: Outcome) -> State {
        if let Some(job) = self.jobs.get(self.current) {
            self.results.push(job.item.finish(outcome));
        }
        self.current += 1;
        if self.current < self.jobs.len() {
            State::ResolveTree
        } else {
            State::Finished
        }
    }

    fn skip_remaining(&mut self) {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::JobDone => {
                self.finish_job(Outcome::Installed);
            }
            State::JobFailed(reason) => {
                self.finish_job(Outcome::Failed(reason));
            }
            _ => {}
        }
        for item in self.removals.drain(..) {
            self.results.push(item.finish(Outcome::Skipped));
        }
        for job in self.jobs.iter().skip(self.current) {
            self.results.push(job.item.finish(Outcome::Skipped));
        }
        self.current = self.jobs.len();
        self.state = State::Finished;
    }

    /// `100 * (done/jobs + (initial - remaining) / (initial * jobs))`
    pub fn progress(&self) -> f64 {
        let total = self.jobs.len();
        if total == 0 || self.state == State::Finished {
            return 100.0;
        }

        let total = total as f64;
        let mut fraction = self.current as f64 / total;
        if let Some(job) = self.jobs.get(self.current)
            && job.initial_file_count > 0
        {
            let fetched = (job.initial_file_count - job.remaining()) as f64;
            fraction += fetched / (job.initial_file_count as f64 * total);
        }
        100.0 * fraction
    }

    /// The job currently being resolved or fetched.
    pub fn current_job(&self) -> Option<&DownloadJob> {
        match self.state {
            State::Finished => None,
            _ => self.jobs.get(self.current),
        }
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ItemResult> {
        self.results
    }
}

/// `owner/repo` for a GitHub URL, `None` for anything else.
fn repo_location(url: &str, github_url: &str) -> Option<String> {
    let rest = url.strip_prefix(github_url)?;
    let slug = rest.trim_end_matches('/').trim_end_matches(".git");
    REPO_SLUG_RE.is_match(slug).then(|| slug.to_string())
}

/// Store a downloaded body under `dest`, mirroring the URL path past `raw_base`.
fn write_fetched_file(dest: &Path, raw_base: &str, url: &str, body: &[u8]) -> Result<(), String> {
    let relative = url
        .strip_prefix(raw_base)
        .ok_or_else(|| format!("{url} is outside {raw_base}"))?;
    let segments: Vec<&str> = relative.split('/').collect();
    if segments
        .iter()
        .any(|seg| seg.is_empty() || *seg == "." || *seg == "..")
    {
        return Err(format!("refusing to write {relative}"));
    }

    let mut dir: PathBuf = dest.to_path_buf();
    let (file_name, parents) = segments
        .split_last()
        .ok_or_else(|| format!("empty path in {url}"))?;
    for seg in parents {
        dir.push(seg);
    }
    fs::create_dir_all(&dir).map_err(|err| format!("cannot create {}: {err}", dir.display()))?;

    let path = dir.join(file_name);
    fs::write(&path, body).map_err(|err| format!("cannot write {}: {err}", path.display()))
}

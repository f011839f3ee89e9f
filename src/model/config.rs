use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub git: GitConfig,
    pub download: DownloadConfig,
    pub patcher: PatcherConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// HTTP(S) URL or a local JSON file.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    pub program: String,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    pub github_url: String,
    pub tree_url: String,
    pub raw_url: String,
    pub default_branch: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatcherConfig {
    pub anchor: String,
    pub dependency_template: String,
    pub default_target: String,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let mut config = Self::defaults()?;

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "plugman") {
            let config_path = proj_dirs.config_dir().join("config.toml");
            if config_path.exists() {
                let user_str = fs::read_to_string(&config_path)?;
                config = toml::from_str(&user_str)?;
                tracing::info!("loaded user config from {}", config_path.display());
            }
        }

        Ok(config)
    }

    pub fn defaults() -> Result<Self> {
        let defaults = include_str!("../../config/default.toml");
        Ok(toml::from_str(defaults)?)
    }
}

impl GitConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tree_url_for(&self, repo: &str, branch: &str) -> String {
        self.tree_url
            .replace("{repo}", repo)
            .replace("{branch}", branch)
    }

    pub fn raw_base_for(&self, repo: &str, branch: &str) -> String {
        self.raw_url.replace("{repo}", repo).replace("{branch}", branch)
    }
}

impl PatcherConfig {
    pub fn declaration_for(&self, module: &str) -> String {
        self.dependency_template.replace("{module}", module)
    }
}

pub fn log_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "plugman")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

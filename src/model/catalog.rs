use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::installer::http::{FetchError, Fetcher};

/// Position of an entry in the catalog. Catalog order is processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCatalogEntry {
    pub name: String,
    pub url: String,
    /// Path fragment matched by substring inside manifest references.
    pub project_file: String,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub editor_module_name: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl PluginCatalogEntry {
    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn editor_module_name(&self) -> Option<&str> {
        self.editor_module_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Manifest reference token for this plugin.
    pub fn reference_name(&self) -> String {
        format!("$(ProjectPath)/Plugins/{}/{}", self.name, self.project_file)
    }

    pub fn is_referenced_by(&self, reference: &str) -> bool {
        !self.project_file.is_empty() && reference.contains(&self.project_file)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read catalog file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot fetch catalog: {0}")]
    Fetch(#[from] FetchError),
    #[error("catalog request returned status {0}")]
    Status(u16),
    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog entry has an unusable name: {0:?}")]
    InvalidName(String),
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<PluginCatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<PluginCatalogEntry>) -> Result<Self, CatalogError> {
        if let Some(bad) = entries.iter().find(|entry| !is_safe_dir_name(&entry.name)) {
            return Err(CatalogError::InvalidName(bad.name.clone()));
        }
        Ok(Self { entries })
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let entries: Vec<PluginCatalogEntry> = serde_json::from_str(raw)?;
        Self::new(entries)
    }

    /// Load from an HTTP(S) URL through `fetcher`, or from a local file otherwise.
    pub fn load(source: &str, fetcher: &dyn Fetcher) -> Result<Self, CatalogError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let response = fetcher.get(source)?;
            if !response.is_success() {
                return Err(CatalogError::Status(response.status));
            }
            let raw = String::from_utf8_lossy(&response.body);
            return Self::from_json(&raw);
        }

        let path = Path::new(source);
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: PluginId) -> Option<&PluginCatalogEntry> {
        self.entries.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PluginId, &PluginCatalogEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (PluginId(idx), entry))
    }

    pub fn has_editor_modules(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.editor_module_name().is_some())
    }
}

fn is_safe_dir_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

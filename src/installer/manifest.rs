//! Project manifest (`.flaxproj`) access and the reconciler.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::model::catalog::Catalog;
use crate::model::selection::{InstalledSet, Selection};

const GAME_TARGET: &str = "GameTarget";
const GAME_TARGET_EDITOR: &str = "GameTargetEditor";
const REFERENCES: &str = "References";
const NAME: &str = "Name";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("project file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("project file is invalid: {0}")]
    Invalid(&'static str),
}

/// The project document. Unknown keys and key order survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectManifest {
    root: Map<String, Value>,
}

impl ProjectManifest {
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let Value::Object(root) = serde_json::from_str::<Value>(raw)? else {
            return Err(ManifestError::Invalid("top level must be an object"));
        };

        match root.get(REFERENCES) {
            None => {}
            Some(Value::Array(items)) => {
                let well_formed = items
                    .iter()
                    .all(|item| item.get(NAME).is_some_and(Value::is_string));
                if !well_formed {
                    return Err(ManifestError::Invalid("every reference needs a string Name"));
                }
            }
            Some(_) => return Err(ManifestError::Invalid("References must be an array")),
        }

        for key in [GAME_TARGET, GAME_TARGET_EDITOR] {
            if root.get(key).is_some_and(|value| !value.is_string()) {
                return Err(ManifestError::Invalid("game targets must be strings"));
            }
        }

        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn game_target(&self) -> Option<&str> {
        self.root.get(GAME_TARGET).and_then(Value::as_str)
    }

    pub fn game_target_editor(&self) -> Option<&str> {
        self.root.get(GAME_TARGET_EDITOR).and_then(Value::as_str)
    }

    pub fn reference_names(&self) -> Vec<&str> {
        self.root
            .get(REFERENCES)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(NAME).and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn push_reference(&mut self, name: String) {
        let mut reference = Map::new();
        reference.insert(NAME.to_string(), Value::String(name));
        if let Some(references) = self.references_mut() {
            references.push(Value::Object(reference));
        }
    }

    /// Remove the first reference whose name contains `fragment`.
    pub fn remove_first_reference(&mut self, fragment: &str) -> bool {
        let Some(references) = self.references_mut() else {
            return false;
        };
        let position = references.iter().position(|item| {
            item.get(NAME)
                .and_then(Value::as_str)
                .is_some_and(|name| name.contains(fragment))
        });

        match position {
            Some(idx) => {
                references.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn to_pretty_json(&self) -> Result<String, ManifestError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.root.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Truncate and rewrite the file. Not atomic.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let text = self.to_pretty_json()?;
        fs::write(path, text).map_err(|source| ManifestError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    fn references_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.root
            .entry(REFERENCES.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
    }
}

/// Bring the manifest's references in line with the selection.
///
/// Entries whose checked state already matches the installed set are left
/// alone. Unchecking removes only the first matching reference.
pub fn reconcile(
    catalog: &Catalog,
    selection: &Selection,
    mut manifest: ProjectManifest,
    mut installed: InstalledSet,
) -> (ProjectManifest, InstalledSet) {
    for (id, entry) in catalog.iter() {
        let checked = selection.is_checked(id);
        if checked == installed.contains(id) {
            continue;
        }

        if checked {
            manifest.push_reference(entry.reference_name());
            installed.insert(id);
            tracing::info!("reference added: {}", entry.name);
        } else if manifest.remove_first_reference(&entry.project_file) {
            installed.remove(id);
            tracing::info!("reference removed: {}", entry.name);
        } else {
            // Nothing left to remove; the entry is not referenced any more.
            installed.remove(id);
        }
    }

    (manifest, installed)
}

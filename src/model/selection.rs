use std::collections::BTreeSet;

use crate::model::catalog::{Catalog, PluginId};

/// Per-entry checked state, owned by the UI and read by the installer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    checked: Vec<bool>,
}

impl Selection {
    pub fn new(len: usize) -> Self {
        Self {
            checked: vec![false; len],
        }
    }

    pub fn from_checked(checked: Vec<bool>) -> Self {
        Self { checked }
    }

    pub fn len(&self) -> usize {
        self.checked.len()
    }

    pub fn is_checked(&self, id: PluginId) -> bool {
        self.checked.get(id.0).copied().unwrap_or(false)
    }

    pub fn set(&mut self, id: PluginId, checked: bool) {
        if let Some(slot) = self.checked.get_mut(id.0) {
            *slot = checked;
        }
    }

    pub fn toggle(&mut self, id: PluginId) {
        if let Some(slot) = self.checked.get_mut(id.0) {
            *slot = !*slot;
        }
    }

    pub fn checked_count(&self) -> usize {
        self.checked.iter().filter(|checked| **checked).count()
    }
}

/// Catalog entries believed to be referenced by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledSet(BTreeSet<PluginId>);

impl InstalledSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every catalog entry whose path fragment appears in any reference.
    pub fn from_references<'a>(
        catalog: &Catalog,
        references: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut installed = Self::new();
        for reference in references {
            for (id, entry) in catalog.iter() {
                if entry.is_referenced_by(reference) {
                    installed.0.insert(id);
                }
            }
        }
        installed
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.0.contains(&id)
    }

    pub fn insert(&mut self, id: PluginId) {
        self.0.insert(id);
    }

    pub fn remove(&mut self, id: PluginId) {
        self.0.remove(&id);
    }

    pub fn iter(&self) -> impl Iterator<Item = PluginId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The selection a freshly opened project starts from.
    pub fn as_selection(&self, len: usize) -> Selection {
        Selection::from_checked((0..len).map(|idx| self.contains(PluginId(idx))).collect())
    }
}

//! Project snapshot: the single aggregate record persisted by the editor.
//!
//! The snapshot is a set of named collections (documents and their folder
//! groupings, one pair per editable category) plus a pointer to the document
//! currently open in the editor. Documents and folders are opaque JSON values;
//! only the collection structure is typed, so a snapshot of the wrong shape is
//! rejected when it is decoded instead of failing at some later read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};

/// Document id -> opaque document body.
pub type DocumentMap = BTreeMap<String, Value>;

/// Folder id -> opaque folder record (name, member ids, ordering, ...).
pub type FolderMap = BTreeMap<String, Value>;

/// Independent editable categories of the project.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Quest,
    Dialogue,
    Item,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Quest, Category::Dialogue, Category::Item];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Quest => "quest",
            Category::Dialogue => "dialogue",
            Category::Item => "item",
        }
    }
}

/// Pointer to the document currently selected in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveFile {
    pub category: Category,
    pub id: String,
}

/// The whole persisted editor state.
///
/// Every collection defaults to empty when absent from the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(default)]
    pub quest_files: DocumentMap,
    #[serde(default)]
    pub quest_folders: FolderMap,
    #[serde(default)]
    pub dialogue_files: DocumentMap,
    #[serde(default)]
    pub dialogue_folders: FolderMap,
    #[serde(default)]
    pub item_files: DocumentMap,
    #[serde(default)]
    pub item_folders: FolderMap,
    #[serde(default)]
    pub active_file: Option<ActiveFile>,
}

impl ProjectSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn files(&self, category: Category) -> &DocumentMap {
        match category {
            Category::Quest => &self.quest_files,
            Category::Dialogue => &self.dialogue_files,
            Category::Item => &self.item_files,
        }
    }

    pub fn files_mut(&mut self, category: Category) -> &mut DocumentMap {
        match category {
            Category::Quest => &mut self.quest_files,
            Category::Dialogue => &mut self.dialogue_files,
            Category::Item => &mut self.item_files,
        }
    }

    pub fn folders(&self, category: Category) -> &FolderMap {
        match category {
            Category::Quest => &self.quest_folders,
            Category::Dialogue => &self.dialogue_folders,
            Category::Item => &self.item_folders,
        }
    }

    pub fn folders_mut(&mut self, category: Category) -> &mut FolderMap {
        match category {
            Category::Quest => &mut self.quest_folders,
            Category::Dialogue => &mut self.dialogue_folders,
            Category::Item => &mut self.item_folders,
        }
    }

    /// Total number of documents across all categories.
    pub fn document_count(&self) -> usize {
        Category::ALL.iter().map(|c| self.files(*c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.active_file.is_none()
            && Category::ALL
                .iter()
                .all(|c| self.files(*c).is_empty() && self.folders(*c).is_empty())
    }

    /// Decode a snapshot from a JSON value, failing on a malformed shape.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        serde_json::from_value(value).map_err(|e| DomainError::corrupt(e.to_string()))
    }

    /// Decode a snapshot from its stored JSON text.
    pub fn from_json(json: &str) -> DomainResult<Self> {
        serde_json::from_str(json).map_err(|e| DomainError::corrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_collections_default_to_empty() {
        let snapshot = ProjectSnapshot::from_value(json!({
            "questFiles": { "f1": { "name": "Intro" } }
        }))
        .unwrap();

        assert_eq!(snapshot.quest_files["f1"]["name"], "Intro");
        assert!(snapshot.dialogue_files.is_empty());
        assert!(snapshot.item_folders.is_empty());
        assert_eq!(snapshot.active_file, None);
        assert_eq!(snapshot.document_count(), 1);
    }

    #[test]
    fn malformed_collection_is_rejected() {
        let err = ProjectSnapshot::from_value(json!({ "questFiles": ["not", "a", "map"] }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Corrupt(_)));
    }

    #[test]
    fn serializes_with_camel_case_collection_names() {
        let mut snapshot = ProjectSnapshot::empty();
        snapshot
            .files_mut(Category::Item)
            .insert("sword".to_string(), json!({ "damage": 4 }));
        snapshot.active_file = Some(ActiveFile {
            category: Category::Item,
            id: "sword".to_string(),
        });

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["itemFiles"]["sword"]["damage"], 4);
        assert_eq!(value["activeFile"]["category"], "item");
        assert!(value.get("questFolders").is_some());
    }

    #[test]
    fn empty_snapshot_reports_empty() {
        let mut snapshot = ProjectSnapshot::empty();
        assert!(snapshot.is_empty());
        snapshot
            .folders_mut(Category::Quest)
            .insert("act-1".to_string(), json!({ "name": "Act 1" }));
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.document_count(), 0);
    }
}

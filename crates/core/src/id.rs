//! Strongly-typed identifiers used across the persistence core.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a pending save task.
///
/// Chosen by the caller (typically `"<category>:<document id>"`); the queue
/// coalesces writes by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

/// Name of a record in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Validate and wrap an identifier.
            ///
            /// Rejects empty values and control characters.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, ": empty")));
                }
                if value.chars().any(char::is_control) {
                    return Err(DomainError::invalid_id(format!(
                        "{}: control character in {:?}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<&str> for $t {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(TaskId, "TaskId");
impl_string_newtype!(SnapshotName, "SnapshotName");

impl TaskId {
    /// Task id for a document of a given category, e.g. `quest:f1`.
    pub fn for_document(category: crate::Category, document_id: &str) -> Result<Self, DomainError> {
        Self::parse(format!("{}:{}", category.as_str(), document_id))
    }
}

impl SnapshotName {
    /// The single aggregate record holding the whole editor project.
    pub fn project() -> Self {
        Self("project".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Category;

    #[test]
    fn rejects_empty_and_control_characters() {
        assert!(TaskId::parse("").is_err());
        assert!(TaskId::parse("   ").is_err());
        assert!(matches!(
            TaskId::parse("quest:\u{7}"),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn document_task_ids_are_namespaced_by_category() {
        let id = TaskId::for_document(Category::Dialogue, "d7").unwrap();
        assert_eq!(id.as_str(), "dialogue:d7");
        assert_eq!(id.to_string(), "dialogue:d7");
    }

    #[test]
    fn parses_from_str() {
        let id: TaskId = "quest:f1".parse().unwrap();
        assert_eq!(id, TaskId::parse("quest:f1").unwrap());
        assert_eq!(SnapshotName::project().as_str(), "project");
    }
}

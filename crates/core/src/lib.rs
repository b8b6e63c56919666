//! `questdesk-core`: editor data model shared by the persistence layer.
//!
//! This crate contains **pure** types (no I/O): the project snapshot, the
//! identifiers used to address save tasks and stored records, and the domain
//! error model.

pub mod error;
pub mod id;
pub mod snapshot;

pub use error::{DomainError, DomainResult};
pub use id::{SnapshotName, TaskId};
pub use snapshot::{ActiveFile, Category, DocumentMap, FolderMap, ProjectSnapshot};

//! Persistence layer: libSQL-backed storage for rules, labels and the poll
//! watermark.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{CheckpointStore, RuleStore, SyncedLabel};

//! Persistence traits consumed by the rule pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::{ActionSpec, BlockKind, BlockedPattern, NlRule};

/// A label recorded as synced with the mail provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedLabel {
    pub id: i64,
    pub name: String,
    pub provider_id: String,
}

/// Storage for blocked senders, natural-language rules and synced labels.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_all_blocked_senders(&self) -> Result<Vec<BlockedPattern>, DatabaseError>;

    async fn create_blocked_sender(
        &self,
        pattern: &str,
        kind: BlockKind,
    ) -> Result<i64, DatabaseError>;

    /// Returns whether a row was removed.
    async fn delete_blocked_sender(&self, id: i64) -> Result<bool, DatabaseError>;

    async fn get_all_nl_rules(&self) -> Result<Vec<NlRule>, DatabaseError>;

    async fn create_nl_rule(&self, text: &str, actions: &[ActionSpec])
    -> Result<i64, DatabaseError>;

    async fn get_nl_rule(&self, id: i64) -> Result<Option<NlRule>, DatabaseError>;

    /// Returns whether a row was removed.
    async fn delete_nl_rule(&self, id: i64) -> Result<bool, DatabaseError>;

    /// Record a provider label. Fails with `Constraint` if the name exists.
    async fn create_label_with_uri(
        &self,
        name: &str,
        provider_id: &str,
    ) -> Result<i64, DatabaseError>;

    async fn get_all_labels(&self) -> Result<Vec<SyncedLabel>, DatabaseError>;
}

/// Durable poll watermark.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    async fn set_watermark(&self, at: DateTime<Utc>) -> Result<(), DatabaseError>;
}

//! Mailbox service: the mail provider the daemon reads from and acts on.
//!
//! The rule engine only ever talks to `dyn MailboxService`; `GmailMailbox`
//! is the production implementation over the Gmail REST API.

pub mod gmail;
pub mod message;

pub use gmail::GmailMailbox;
pub use message::{MailMessage, strip_html};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// System label removed to archive a message.
pub const INBOX: &str = "INBOX";
/// System label removed to mark a message read.
pub const UNREAD: &str = "UNREAD";
/// System label added to star a message.
pub const STARRED: &str = "STARRED";

/// A provider label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// How much of a message to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    /// Headers and bodies.
    #[default]
    Full,
    /// Headers only.
    Metadata,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Full => "full",
            MessageFormat::Metadata => "metadata",
        }
    }
}

/// Operations the daemon needs from a mail provider.
#[async_trait]
pub trait MailboxService: Send + Sync {
    /// Ids of messages matching a provider search query, in service order.
    async fn list_messages(&self, query: &str, max: u32) -> Result<Vec<String>, MailboxError>;

    async fn get_message(&self, id: &str, format: MessageFormat)
    -> Result<MailMessage, MailboxError>;

    /// Add and remove label ids on a message.
    async fn modify_message(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailboxError>;

    async fn trash_message(&self, id: &str) -> Result<(), MailboxError>;

    /// Send an RFC 5322 message already base64url-encoded, optionally into
    /// an existing thread.
    async fn send_message(
        &self,
        raw_encoded: &str,
        thread_id: Option<&str>,
    ) -> Result<(), MailboxError>;

    /// Save an encoded message as a draft. Returns the draft id.
    async fn create_draft(
        &self,
        raw_encoded: &str,
        thread_id: Option<&str>,
    ) -> Result<String, MailboxError>;

    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError>;

    async fn create_label(&self, name: &str) -> Result<Label, MailboxError>;

    /// Attach one label to many messages.
    async fn batch_add_label(&self, ids: &[String], label_id: &str) -> Result<(), MailboxError>;
}

/// Find a label by exact name, creating it if absent.
pub async fn get_or_create_label(
    mailbox: &dyn MailboxService,
    name: &str,
) -> Result<Label, MailboxError> {
    let labels = mailbox.list_labels().await?;
    if let Some(existing) = labels.into_iter().find(|l| l.name == name) {
        return Ok(existing);
    }
    tracing::info!(label = name, "Creating label");
    mailbox.create_label(name).await
}

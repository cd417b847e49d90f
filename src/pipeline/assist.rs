//! One-off AI help on a single message: summaries and replies.
//!
//! Replies go back to the sender on the original thread. They are saved as
//! drafts unless the caller asks for an immediate send.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use tracing::info;

use crate::error::{ManageError, ValidationError};
use crate::mailbox::{MailMessage, MailboxService, MessageFormat};
use crate::oracle::DecisionOracle;
use crate::pipeline::dispatcher::single_line;

/// Where a generated reply ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    #[default]
    Draft,
    Send,
}

/// A reply that was drafted or sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub mode: ReplyMode,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Set when the reply was saved as a draft.
    pub draft_id: Option<String>,
}

/// Summarizes and replies to individual messages.
pub struct MessageAssistant {
    mailbox: Arc<dyn MailboxService>,
    oracle: Arc<dyn DecisionOracle>,
}

impl MessageAssistant {
    pub fn new(mailbox: Arc<dyn MailboxService>, oracle: Arc<dyn DecisionOracle>) -> Self {
        Self { mailbox, oracle }
    }

    /// Summary of a message. A message with no readable body yields an
    /// empty summary without asking the oracle.
    pub async fn summarize(&self, message_id: &str) -> Result<String, ManageError> {
        let message = self
            .mailbox
            .get_message(message_id, MessageFormat::Full)
            .await?;
        if message.plain_text().trim().is_empty() {
            return Ok(String::new());
        }
        Ok(self.oracle.summarize(&message).await?)
    }

    /// Generate a reply to the sender and draft or send it on the thread.
    pub async fn reply(
        &self,
        message_id: &str,
        context: &str,
        mode: ReplyMode,
    ) -> Result<ReplyOutcome, ManageError> {
        let message = self
            .mailbox
            .get_message(message_id, MessageFormat::Full)
            .await?;
        if message.plain_text().trim().is_empty() {
            return Err(ValidationError::EmptyMessage(message_id.to_string()).into());
        }
        let to = message.from().trim().to_string();
        if to.is_empty() {
            return Err(ValidationError::InvalidEmail(to).into());
        }

        let body = self.oracle.draft_reply(&message, context).await?;
        let subject = reply_subject(message.subject());
        let raw = compose_reply(&message, &to, &subject, &body);
        let encoded = URL_SAFE.encode(raw.as_bytes());
        let thread_id = message.thread_id.as_deref();

        let draft_id = match mode {
            ReplyMode::Send => {
                self.mailbox.send_message(&encoded, thread_id).await?;
                info!(message_id, to = %to, "Reply sent");
                None
            }
            ReplyMode::Draft => {
                let id = self.mailbox.create_draft(&encoded, thread_id).await?;
                info!(message_id, draft_id = %id, "Reply drafted");
                Some(id)
            }
        };

        Ok(ReplyOutcome {
            mode,
            to,
            subject,
            body,
            draft_id,
        })
    }
}

/// `Re:` subject, without stacking prefixes.
fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        return "Re: (no subject)".to_string();
    }
    if subject
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        return subject.to_string();
    }
    format!("Re: {subject}")
}

/// Plain-text reply. Threading headers are added when the original has a
/// Message-ID.
fn compose_reply(original: &MailMessage, to: &str, subject: &str, body: &str) -> String {
    let mut raw = format!(
        "From: me\r\nTo: {}\r\nSubject: {}\r\n",
        single_line(to),
        single_line(subject)
    );
    if let Some(message_id) = original.header("Message-ID") {
        let message_id = single_line(message_id.trim());
        let references = match original.header("References") {
            Some(refs) => format!("{} {message_id}", single_line(refs.trim())),
            None => message_id.clone(),
        };
        raw.push_str(&format!(
            "In-Reply-To: {message_id}\r\nReferences: {references}\r\n"
        ));
    }
    raw.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
    raw.push_str(body);
    raw
}

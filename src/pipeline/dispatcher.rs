//! Action dispatcher.
//!
//! Applies an ordered action list to one message. Every action is isolated:
//! a failure is logged, recorded in the report, and the next action still
//! runs. Nothing is rolled back.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::{self, INBOX, MailboxService, MessageFormat, STARRED, UNREAD};
use crate::pipeline::types::ActionSpec;

/// What happened to a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped(String),
    Failed(String),
}

/// Per-action result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: ActionSpec,
    pub outcome: Outcome,
}

/// Result of dispatching one action list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<ActionOutcome>,
}

impl DispatchReport {
    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Applied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

/// Applies actions against the mailbox.
pub struct ActionDispatcher {
    mailbox: Arc<dyn MailboxService>,
}

impl ActionDispatcher {
    pub fn new(mailbox: Arc<dyn MailboxService>) -> Self {
        Self { mailbox }
    }

    /// Apply `actions` to `message_id` in order.
    pub async fn apply(&self, message_id: &str, actions: &[ActionSpec]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for action in actions {
            let outcome = match self.apply_one(message_id, action).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        message_id,
                        action = action.kind(),
                        error = %e,
                        "Action failed"
                    );
                    Outcome::Failed(e.to_string())
                }
            };
            if let Outcome::Skipped(reason) = &outcome {
                warn!(message_id, action = action.kind(), reason = %reason, "Action skipped");
            }
            report.outcomes.push(ActionOutcome {
                action: action.clone(),
                outcome,
            });
        }
        if !report.outcomes.is_empty() {
            info!(
                message_id,
                applied = report.applied(),
                skipped = report.skipped(),
                failed = report.failed(),
                "Actions dispatched"
            );
        }
        report
    }

    async fn apply_one(
        &self,
        message_id: &str,
        action: &ActionSpec,
    ) -> Result<Outcome, MailboxError> {
        match action {
            ActionSpec::Label { value } => {
                let label = mailbox::get_or_create_label(self.mailbox.as_ref(), value).await?;
                self.mailbox
                    .batch_add_label(&[message_id.to_string()], &label.id)
                    .await?;
                debug!(message_id, label = %value, "Label applied");
            }
            ActionSpec::Archive => {
                self.mailbox
                    .modify_message(message_id, &[], &[INBOX.to_string()])
                    .await?;
            }
            ActionSpec::Delete => {
                self.mailbox.trash_message(message_id).await?;
            }
            ActionSpec::MarkRead => {
                self.mailbox
                    .modify_message(message_id, &[], &[UNREAD.to_string()])
                    .await?;
            }
            ActionSpec::Star => {
                self.mailbox
                    .modify_message(message_id, &[STARRED.to_string()], &[])
                    .await?;
            }
            ActionSpec::Forward { to } => {
                let to = to.trim();
                if to.is_empty() {
                    return Ok(Outcome::Skipped("forward has no destination".into()));
                }
                if to.parse::<lettre::Address>().is_err() {
                    return Ok(Outcome::Skipped(format!("invalid forward address '{to}'")));
                }
                let original = self
                    .mailbox
                    .get_message(message_id, MessageFormat::Full)
                    .await?;
                let raw = compose_forward(
                    to,
                    original.from(),
                    original.subject(),
                    original.plain_text(),
                );
                self.mailbox
                    .send_message(&URL_SAFE.encode(raw.as_bytes()), None)
                    .await?;
                info!(message_id, to, "Message forwarded");
            }
        }
        Ok(Outcome::Applied)
    }
}

/// Build a plain-text forward of an existing message.
pub fn compose_forward(to: &str, from: &str, subject: &str, body: &str) -> String {
    format!(
        "From: me\r\nTo: {to}\r\nSubject: Fwd: {subject}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n\
         ---------- Forwarded message ---------\r\nFrom: {from}\r\nSubject: {subject}\r\n\r\n{body}",
        to = single_line(to),
        subject = single_line(subject),
        from = single_line(from),
    )
}

/// Header values must not carry line breaks.
pub(crate) fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MailMessage;
    use crate::testing::{FakeMailbox, MailOp};

    #[tokio::test]
    async fn archive_mark_read_and_star_modify_labels() {
        let mailbox = FakeMailbox::new();
        let dispatcher = ActionDispatcher::new(mailbox.clone());
        let report = dispatcher
            .apply(
                "m1",
                &[ActionSpec::Archive, ActionSpec::MarkRead, ActionSpec::Star],
            )
            .await;
        assert_eq!(report.applied(), 3);
        assert_eq!(
            mailbox.ops(),
            vec![
                MailOp::Modify {
                    id: "m1".into(),
                    add: vec![],
                    remove: vec!["INBOX".into()]
                },
                MailOp::Modify {
                    id: "m1".into(),
                    add: vec![],
                    remove: vec!["UNREAD".into()]
                },
                MailOp::Modify {
                    id: "m1".into(),
                    add: vec!["STARRED".into()],
                    remove: vec![]
                },
            ]
        );
    }

    #[tokio::test]
    async fn label_reuses_existing_by_exact_name() {
        let mailbox = FakeMailbox::new();
        mailbox.add_label("Label_9", "Work");
        let dispatcher = ActionDispatcher::new(mailbox.clone());

        dispatcher.apply("m1", &[ActionSpec::label("Work")]).await;
        dispatcher.apply("m2", &[ActionSpec::label("work")]).await;

        let labels = mailbox.labels();
        assert_eq!(labels.len(), 2, "case differs, so a second label is created");
        assert!(mailbox.ops().contains(&MailOp::BatchAdd {
            ids: vec!["m1".into()],
            label_id: "Label_9".into()
        }));
    }

    #[tokio::test]
    async fn label_created_once() {
        let mailbox = FakeMailbox::new();
        let dispatcher = ActionDispatcher::new(mailbox.clone());
        dispatcher.apply("m1", &[ActionSpec::label("New")]).await;
        dispatcher.apply("m2", &[ActionSpec::label("New")]).await;
        let created = mailbox
            .ops()
            .into_iter()
            .filter(|op| matches!(op, MailOp::CreateLabel(_)))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn failed_action_does_not_stop_later_ones() {
        let mailbox = FakeMailbox::new();
        mailbox.fail_on("batch_add_label");
        let dispatcher = ActionDispatcher::new(mailbox.clone());

        let report = dispatcher
            .apply("m1", &[ActionSpec::label("X"), ActionSpec::Delete])
            .await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.applied(), 1);
        assert!(mailbox.ops().contains(&MailOp::Trash("m1".into())));
    }

    #[tokio::test]
    async fn forward_without_destination_is_skipped() {
        let mailbox = FakeMailbox::new();
        let dispatcher = ActionDispatcher::new(mailbox.clone());
        let report = dispatcher.apply("m1", &[ActionSpec::forward("")]).await;
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
        assert!(mailbox.sent().is_empty());
    }

    #[tokio::test]
    async fn forward_sends_encoded_copy() {
        let mailbox = FakeMailbox::new();
        mailbox.add_message(
            MailMessage::new("m1")
                .with_header("From", "alice@example.com")
                .with_header("Subject", "Report")
                .with_text("numbers inside"),
        );
        let dispatcher = ActionDispatcher::new(mailbox.clone());
        let report = dispatcher
            .apply("m1", &[ActionSpec::forward("bob@example.com")])
            .await;
        assert_eq!(report.applied(), 1);

        let sent = mailbox.sent();
        assert_eq!(sent.len(), 1);
        let decoded = String::from_utf8(URL_SAFE.decode(&sent[0]).unwrap()).unwrap();
        assert!(decoded.contains("To: bob@example.com\r\n"));
        assert!(decoded.contains("Subject: Fwd: Report\r\n"));
        assert!(decoded.contains("---------- Forwarded message ---------"));
        assert!(decoded.contains("From: alice@example.com"));
        assert!(decoded.ends_with("numbers inside"));
    }

    #[tokio::test]
    async fn forward_to_invalid_address_is_skipped() {
        let mailbox = FakeMailbox::new();
        let dispatcher = ActionDispatcher::new(mailbox.clone());
        let report = dispatcher.apply("m1", &[ActionSpec::forward("not an address")]).await;
        assert_eq!(report.skipped(), 1);
        assert!(mailbox.sent().is_empty());
    }

    #[test]
    fn compose_forward_strips_header_newlines() {
        let raw = compose_forward("a@b.com", "x@y.com", "Hi\r\nBcc: evil@z.com", "body");
        assert!(!raw.contains("\r\nBcc:"));
    }
}

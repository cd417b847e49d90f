//! Bulk unsubscribe over a mailbox folder.
//!
//! For each message in the folder the oracle looks for an unsubscribe link.
//! Confident links are followed with a plain GET; when the landing page
//! confirms the unsubscribe, a static rule is appended that trashes any
//! further mail from the sender's domain. A link that fails or is not
//! confirmed gets the message labelled `to_unsubscribe` for manual follow-up.
//! Messages without a confident link are left alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{LinkError, MailboxError, ManageError};
use crate::mailbox::{self, MailMessage, MailboxService, MessageFormat};
use crate::oracle::DecisionOracle;
use crate::pipeline::rules::{StaticRule, StaticRuleSet};
use crate::pipeline::types::ActionSpec;

/// Label for messages that need a manual unsubscribe.
pub const TO_UNSUBSCRIBE_LABEL: &str = "to_unsubscribe";

/// Minimum oracle confidence before a link is followed.
pub const UNSUBSCRIBE_CONFIDENCE: f64 = 0.7;

const LINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Follows an unsubscribe link and returns the response body.
#[async_trait]
pub trait LinkVisitor: Send + Sync {
    async fn visit(&self, url: &str) -> Result<String, LinkError>;
}

/// `LinkVisitor` over reqwest. Redirects follow the client's policy.
pub struct HttpLinkVisitor {
    client: reqwest::Client,
}

impl HttpLinkVisitor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LinkVisitor for HttpLinkVisitor {
    async fn visit(&self, url: &str) -> Result<String, LinkError> {
        let fail = |reason: String| LinkError {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .timeout(LINK_TIMEOUT)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}")));
        }
        response.text().await.map_err(|e| fail(e.to_string()))
    }
}

/// Outcome of an unsubscribe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsubscribeReport {
    pub examined: usize,
    /// Domains that confirmed the unsubscribe.
    pub unsubscribed: Vec<String>,
    /// Messages labelled for manual follow-up.
    pub flagged: usize,
    /// Messages without a confident link; left untouched.
    pub no_link: usize,
    pub failed: usize,
}

enum Verdict {
    Unsubscribed(String),
    Flagged,
    NoLink,
}

/// Runs unsubscribe passes.
pub struct Unsubscriber {
    mailbox: Arc<dyn MailboxService>,
    oracle: Arc<dyn DecisionOracle>,
    rules: Arc<StaticRuleSet>,
    visitor: Arc<dyn LinkVisitor>,
}

impl Unsubscriber {
    pub fn new(
        mailbox: Arc<dyn MailboxService>,
        oracle: Arc<dyn DecisionOracle>,
        rules: Arc<StaticRuleSet>,
        visitor: Arc<dyn LinkVisitor>,
    ) -> Self {
        Self {
            mailbox,
            oracle,
            rules,
            visitor,
        }
    }

    /// Process up to `max` messages in the folder labelled `folder`.
    pub async fn process_unsubscribes(
        &self,
        folder: &str,
        max: u32,
    ) -> Result<UnsubscribeReport, ManageError> {
        let labels = self.mailbox.list_labels().await?;
        if !labels.iter().any(|l| l.name == folder) {
            return Err(MailboxError::LabelNotFound(folder.to_string()).into());
        }
        let flag = mailbox::get_or_create_label(self.mailbox.as_ref(), TO_UNSUBSCRIBE_LABEL).await?;

        let ids = self.mailbox.list_messages(&label_query(folder), max).await?;
        info!(folder, count = ids.len(), "Processing unsubscribes");

        let mut report = UnsubscribeReport::default();
        for id in ids {
            report.examined += 1;
            let message = match self.mailbox.get_message(&id, MessageFormat::Full).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Failed to fetch message");
                    report.failed += 1;
                    continue;
                }
            };

            match self.handle(&message).await {
                Some(Verdict::Unsubscribed(domain)) => report.unsubscribed.push(domain),
                Some(Verdict::NoLink) => report.no_link += 1,
                Some(Verdict::Flagged) => {
                    match self
                        .mailbox
                        .batch_add_label(&[id.clone()], &flag.id)
                        .await
                    {
                        Ok(()) => report.flagged += 1,
                        Err(e) => {
                            warn!(message_id = %id, error = %e, "Failed to flag message");
                            report.failed += 1;
                        }
                    }
                }
                None => report.failed += 1,
            }
        }

        info!(
            examined = report.examined,
            unsubscribed = report.unsubscribed.len(),
            flagged = report.flagged,
            no_link = report.no_link,
            failed = report.failed,
            "Unsubscribe pass complete"
        );
        Ok(report)
    }

    /// `None` when the message could not be judged at all.
    async fn handle(&self, message: &MailMessage) -> Option<Verdict> {
        let verdict = match self.oracle.find_unsubscribe_link(message).await {
            Ok(v) => v,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Unsubscribe link lookup failed");
                return None;
            }
        };

        let link = match verdict.link {
            Some(link) if verdict.confidence >= UNSUBSCRIBE_CONFIDENCE => link,
            _ => {
                info!(
                    message_id = %message.id,
                    confidence = verdict.confidence,
                    reason = %verdict.reason,
                    "No confident unsubscribe link"
                );
                return Some(Verdict::NoLink);
            }
        };

        let body = match self.visitor.visit(&link).await {
            Ok(body) => body,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Unsubscribe link failed");
                return Some(Verdict::Flagged);
            }
        };
        if !confirms_unsubscribe(&body) {
            info!(message_id = %message.id, link = %link, "Unsubscribe not confirmed");
            return Some(Verdict::Flagged);
        }

        let Some(domain) = sender_domain(message.from()) else {
            warn!(message_id = %message.id, from = %message.from(), "Sender has no domain");
            return Some(Verdict::Flagged);
        };
        if let Err(e) = self.add_auto_delete(&domain).await {
            warn!(domain = %domain, error = %e, "Failed to add auto-delete rule");
        }
        Some(Verdict::Unsubscribed(domain))
    }

    async fn add_auto_delete(&self, domain: &str) -> Result<(), ManageError> {
        let name = format!("Auto-delete {domain}");
        let exists = self.rules.snapshot().await.iter().any(|r| r.rule.name == name);
        if exists {
            return Ok(());
        }
        self.rules
            .add(StaticRule {
                name,
                conditions: [(
                    "from".to_string(),
                    format!(".*@{}", regex::escape(domain)),
                )]
                .into(),
                actions: vec![ActionSpec::Delete],
            })
            .await?;
        info!(domain, "Unsubscribed and added auto-delete rule");
        Ok(())
    }
}

/// Search query for messages carrying the named label.
fn label_query(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' { '-' } else { c })
        .collect();
    format!("label:{slug}")
}

fn confirms_unsubscribe(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("unsubscribed") || body.contains("success")
}

/// Domain part of a From header, e.g. `News <news@shop.com>` → `shop.com`.
pub fn sender_domain(from: &str) -> Option<String> {
    let (_, rest) = from.rsplit_once('@')?;
    let domain = rest
        .trim()
        .trim_end_matches('>')
        .trim()
        .to_lowercase();
    (!domain.is_empty()).then_some(domain)
}

//! Periodic auto-archive sweep over the inbox.
//!
//! Flow:
//! 1. List up to `max` inbox messages not yet labelled `auto_archived`
//! 2. Ask the oracle for an archive verdict on each
//! 3. Archive and label the ones at or above the confidence threshold
//! 4. Mail a plain-text report of archived vs kept messages to the user

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::mailbox::{MailboxService, MessageFormat};
use crate::pipeline::dispatcher::ActionDispatcher;
use crate::pipeline::engine::RuleEngine;
use crate::pipeline::types::{AUTO_ARCHIVED_LABEL, ActionSpec, EmailContext};

/// Search query for sweep candidates.
pub const SWEEP_QUERY: &str = "in:inbox -label:auto_archived";

const RULE_WIDTH: usize = 50;

/// One message considered by the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepEntry {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub reason: String,
    pub summary: Option<String>,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub archived: Vec<SweepEntry>,
    pub kept: Vec<SweepEntry>,
    /// Messages that could not be fetched or archived.
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.archived.is_empty() && self.kept.is_empty()
    }

    /// Plain-text report body.
    pub fn render(&self, at: DateTime<Utc>) -> String {
        let mut out = format!(
            "Email Archive Report - {}\n\n",
            at.format("%Y-%m-%d %H:%M UTC")
        );

        out.push_str(&format!("Archived Emails ({}):\n", self.archived.len()));
        out.push_str(&"=".repeat(RULE_WIDTH));
        out.push('\n');
        for entry in &self.archived {
            out.push_str(&format!(
                "From: {}\nSubject: {}\nReason: {}\n{}\n",
                entry.from,
                entry.subject,
                entry.reason,
                "-".repeat(RULE_WIDTH)
            ));
        }

        out.push_str(&format!("\nKept Emails ({}):\n", self.kept.len()));
        out.push_str(&"=".repeat(RULE_WIDTH));
        out.push('\n');
        for entry in &self.kept {
            out.push_str(&format!("From: {}\nSubject: {}\n", entry.from, entry.subject));
            if let Some(summary) = &entry.summary {
                out.push_str(&format!("Summary: {summary}\n"));
            }
            out.push_str(&format!("Reason: {}\n{}\n", entry.reason, "-".repeat(RULE_WIDTH)));
        }
        out
    }
}

/// Runs auto-archive sweeps.
pub struct ArchiveSweeper {
    mailbox: Arc<dyn MailboxService>,
    engine: Arc<RuleEngine>,
    dispatcher: Arc<ActionDispatcher>,
    max: u32,
}

impl ArchiveSweeper {
    pub fn new(
        mailbox: Arc<dyn MailboxService>,
        engine: Arc<RuleEngine>,
        dispatcher: Arc<ActionDispatcher>,
        max: u32,
    ) -> Self {
        Self {
            mailbox,
            engine,
            dispatcher,
            max,
        }
    }

    /// Run one sweep and mail the report if anything was considered.
    pub async fn run(&self, now: DateTime<Utc>) -> SweepReport {
        let ids = match self.mailbox.list_messages(SWEEP_QUERY, self.max).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Auto-archive sweep could not list inbox");
                return SweepReport::default();
            }
        };
        info!(count = ids.len(), "Starting auto-archive sweep");

        let mut report = SweepReport::default();
        for id in ids {
            let message = match self.mailbox.get_message(&id, MessageFormat::Full).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Sweep could not fetch message");
                    report.failed += 1;
                    continue;
                }
            };

            let mut ctx = EmailContext::from_message(&message);
            if ctx.date.is_none() {
                ctx.date = Some(now.format("%Y-%m-%d").to_string());
            }
            let decision = self.engine.archive_decision(&ctx).await;
            let entry = SweepEntry {
                id: id.clone(),
                from: ctx.from,
                subject: ctx.subject,
                reason: decision.reason.clone(),
                summary: decision.summary.clone(),
            };

            if decision.should_archive() {
                let dispatch = self
                    .dispatcher
                    .apply(
                        &id,
                        &[ActionSpec::Archive, ActionSpec::label(AUTO_ARCHIVED_LABEL)],
                    )
                    .await;
                if dispatch.failed() > 0 {
                    report.failed += 1;
                } else {
                    report.archived.push(entry);
                }
            } else {
                report.kept.push(entry);
            }
        }

        info!(
            archived = report.archived.len(),
            kept = report.kept.len(),
            failed = report.failed,
            "Auto-archive sweep complete"
        );

        if !report.is_empty() {
            self.send_report(&report, now).await;
        }
        report
    }

    async fn send_report(&self, report: &SweepReport, now: DateTime<Utc>) {
        let raw = format!(
            "From: me\r\nTo: me\r\nSubject: Email Archive Report - {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            now.format("%Y-%m-%d"),
            report.render(now)
        );
        let encoded = URL_SAFE.encode(raw.as_bytes());
        if let Err(e) = self.mailbox.send_message(&encoded, None).await {
            warn!(error = %e, "Failed to send archive report");
        }
    }
}

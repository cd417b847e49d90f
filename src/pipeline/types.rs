//! Shared types for the rule pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Confidence at or above which an archive verdict is acted on.
pub const AUTO_ARCHIVE_THRESHOLD: f64 = 0.8;

/// Label applied to messages from blocked senders.
pub const BLOCKED_LABEL: &str = "Blocked";

/// Label applied to messages archived by the oracle.
pub const AUTO_ARCHIVED_LABEL: &str = "auto_archived";

// ── Actions ─────────────────────────────────────────────────────────

/// A single side effect to apply to a message.
///
/// Wire form is `{"type": "...", ...}`; unknown types fail to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionSpec {
    #[serde(rename = "label")]
    Label { value: String },
    #[serde(rename = "archive")]
    Archive,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "markRead", alias = "mark_read")]
    MarkRead,
    #[serde(rename = "star")]
    Star,
    #[serde(rename = "forward")]
    Forward {
        #[serde(default, alias = "value")]
        to: String,
    },
}

impl ActionSpec {
    pub fn label(value: impl Into<String>) -> Self {
        Self::Label {
            value: value.into(),
        }
    }

    pub fn forward(to: impl Into<String>) -> Self {
        Self::Forward { to: to.into() }
    }

    /// Short kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Label { .. } => "label",
            Self::Archive => "archive",
            Self::Delete => "delete",
            Self::MarkRead => "markRead",
            Self::Star => "star",
            Self::Forward { .. } => "forward",
        }
    }

    /// Parse a JSON action list, mapping unknown kinds to a validation error.
    pub fn parse_list(value: serde_json::Value) -> Result<Vec<Self>, ValidationError> {
        let items = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        items
            .into_iter()
            .map(|item| {
                let kind = item
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("<missing>")
                    .to_string();
                serde_json::from_value(item).map_err(|_| ValidationError::UnknownAction(kind))
            })
            .collect()
    }
}

// ── Blocked senders ─────────────────────────────────────────────────

/// How a blocked pattern is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Case-insensitive substring of the From header.
    ExactSender,
    /// Case-insensitive regex over the From header.
    SenderRegex,
    /// Case-insensitive regex over the plain-text body.
    BodyRegex,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactSender => "email",
            Self::SenderRegex => "pattern",
            Self::BodyRegex => "body_pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::ExactSender),
            "pattern" => Some(Self::SenderRegex),
            "body_pattern" => Some(Self::BodyRegex),
            _ => None,
        }
    }
}

/// A stored blocked-sender pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPattern {
    pub id: i64,
    pub pattern: String,
    pub kind: BlockKind,
}

// ── Natural-language rules ──────────────────────────────────────────

/// Max length of a natural-language rule's text.
pub const NL_RULE_MAX_CHARS: usize = 50;

/// A free-text rule matched by the decision oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NlRule {
    pub id: i64,
    pub text: String,
    pub actions: Vec<ActionSpec>,
    pub created_at: DateTime<Utc>,
}

// ── Oracle judgments ────────────────────────────────────────────────

/// Oracle verdict on whether a message can be archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDecision {
    #[serde(default)]
    pub can_archive: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_importance")]
    pub importance_score: f64,
    #[serde(default)]
    pub summary: Option<String>,
}

fn default_importance() -> f64 {
    0.5
}

impl ArchiveDecision {
    /// Safe verdict used when the oracle fails.
    pub fn keep(reason: impl Into<String>) -> Self {
        Self {
            can_archive: false,
            confidence: 0.0,
            reason: reason.into(),
            importance_score: 0.5,
            summary: None,
        }
    }

    /// Whether this verdict should trigger an archive.
    pub fn should_archive(&self) -> bool {
        self.can_archive && self.confidence >= AUTO_ARCHIVE_THRESHOLD
    }
}

/// Oracle verdict on an unsubscribe link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeLink {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// Summary of a message handed to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContext {
    pub from: String,
    pub subject: String,
    /// First 1000 characters of the plain-text body.
    pub body: String,
    pub has_attachments: bool,
    /// Optional date line, used by the sweep.
    pub date: Option<String>,
}

impl EmailContext {
    pub const BODY_CHARS: usize = 1000;

    pub fn from_message(message: &crate::mailbox::MailMessage) -> Self {
        Self {
            from: message.from().to_string(),
            subject: message.subject().to_string(),
            body: message.plain_text().chars().take(Self::BODY_CHARS).collect(),
            has_attachments: message.has_attachments,
            date: message.header("Date").map(str::to_string),
        }
    }
}

// ── Evaluation result ───────────────────────────────────────────────

/// Which pipeline stage produced the actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Blocked,
    AutoArchive,
    StaticRule { name: String },
    NaturalLanguage { rule_ids: Vec<i64> },
    NoMatch,
}

impl Stage {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::AutoArchive => "auto_archive",
            Self::StaticRule { .. } => "static_rule",
            Self::NaturalLanguage { .. } => "natural_language",
            Self::NoMatch => "no_match",
        }
    }
}

/// Output of evaluating one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub stage: Stage,
    pub actions: Vec<ActionSpec>,
}

impl Evaluation {
    pub fn no_match() -> Self {
        Self {
            stage: Stage::NoMatch,
            actions: Vec::new(),
        }
    }
}

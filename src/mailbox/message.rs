//! Read-only view of a mail message as seen by the rule engine.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use crate::error::MailboxError;

/// A fetched mail message.
///
/// Header lookup is case-insensitive. The plain-text body view is derived
/// from the HTML part when no text part exists and is cached on first use.
#[derive(Debug, Clone, Default)]
pub struct MailMessage {
    /// Provider message id.
    pub id: String,
    /// Provider conversation id, when known.
    pub thread_id: Option<String>,
    headers: Vec<(String, String)>,
    body_text: Option<String>,
    body_html: Option<String>,
    /// Whether the message carries at least one attachment.
    pub has_attachments: bool,
    /// Provider-side receive time.
    pub internal_date: Option<DateTime<Utc>>,
    plain_text: OnceLock<String>,
}

impl MailMessage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self.plain_text = OnceLock::new();
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self.plain_text = OnceLock::new();
        self
    }

    pub fn with_attachments(mut self, has_attachments: bool) -> Self {
        self.has_attachments = has_attachments;
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_internal_date(mut self, date: DateTime<Utc>) -> Self {
        self.internal_date = Some(date);
        self
    }

    /// Parse an RFC 5322 message.
    pub fn from_rfc822(id: impl Into<String>, raw: &[u8]) -> Result<Self, MailboxError> {
        let id = id.into();
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| {
                MailboxError::invalid("parse_message", format!("message {id} is not valid RFC 5322"))
            })?;

        let mut message = Self::new(id);

        let raw_message = parsed.raw_message();
        for header in parsed.headers() {
            let name = header.name().to_string();
            if message.header(&name).is_some() {
                continue;
            }
            let value = if name.eq_ignore_ascii_case("subject") {
                parsed.subject().map(str::to_string)
            } else {
                raw_message
                    .get(header.offset_start as usize..header.offset_end as usize)
                    .map(|bytes| unfold(&String::from_utf8_lossy(bytes)))
            };
            if let Some(value) = value {
                message.headers.push((name, value));
            }
        }

        message.body_text = parsed.body_text(0).map(|t| t.into_owned());
        message.body_html = parsed.body_html(0).map(|h| h.into_owned());
        message.has_attachments = parsed.attachment_count() > 0;
        Ok(message)
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn from(&self) -> &str {
        self.header("From").unwrap_or("")
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or("")
    }

    pub fn body_html(&self) -> Option<&str> {
        self.body_html.as_deref()
    }

    /// Plain-text body: the text part, else the HTML part with tags stripped.
    pub fn plain_text(&self) -> &str {
        self.plain_text.get_or_init(|| {
            if let Some(text) = &self.body_text {
                text.clone()
            } else if let Some(html) = &self.body_html {
                strip_html(html)
            } else {
                String::new()
            }
        })
    }
}

/// Collapse folded header continuation lines.
fn unfold(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip HTML tags and normalize whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

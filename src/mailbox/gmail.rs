//! Gmail REST implementation of `MailboxService`.
//!
//! Talks to `https://www.googleapis.com/gmail/v1/users/me` with a bearer
//! access token. Full messages are fetched in `raw` format and parsed
//! locally with mail-parser.

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::MailboxError;
use crate::mailbox::{Label, MailMessage, MailboxService, MessageFormat};

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
            let list_params: Vec<&str> = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

/// Gmail caps `maxResults` per page at 500.
const MAX_PAGE_SIZE: u32 = 500;

/// Gmail's `raw` field may or may not carry padding.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    thread_id: Option<String>,
    raw: Option<String>,
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct MessagePart {
    #[serde(default)]
    headers: Vec<PartHeader>,
}

#[derive(Debug, Deserialize)]
struct PartHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct DraftRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListLabelsResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

// ── Client ──────────────────────────────────────────────────────────

/// Gmail mailbox over reqwest.
pub struct GmailMailbox {
    http: reqwest::Client,
    access_token: SecretString,
}

impl GmailMailbox {
    pub fn new(http: reqwest::Client, access_token: SecretString) -> Self {
        Self { http, access_token }
    }

    /// Confirm the token is accepted; returns the account address.
    pub async fn verify(&self) -> Result<String, MailboxError> {
        let resp = self
            .http
            .get(gmail_url!("profile"))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::request("profile", e))?;
        let resp = check_status("profile", resp).await?;
        let profile: Profile = resp
            .json()
            .await
            .map_err(|e| MailboxError::invalid("profile", e))?;
        Ok(profile.email_address)
    }

    async fn get(
        &self,
        operation: &str,
        url: String,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, MailboxError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| MailboxError::request(operation, e))?;
        check_status(operation, resp).await
    }

    async fn post(
        &self,
        operation: &str,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, MailboxError> {
        let mut req = self
            .http
            .post(url)
            .bearer_auth(self.access_token.expose_secret());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MailboxError::request(operation, e))?;
        check_status(operation, resp).await
    }
}

/// Map non-2xx responses to typed errors.
async fn check_status(
    operation: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, MailboxError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(MailboxError::AuthFailed(format!("{operation}: {body}")));
    }
    Err(MailboxError::Api {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Message resource for send and draft requests.
fn outgoing(raw_encoded: &str, thread_id: Option<&str>) -> serde_json::Value {
    let mut body = json!({ "raw": raw_encoded });
    if let Some(thread_id) = thread_id {
        body["threadId"] = json!(thread_id);
    }
    body
}

fn parse_internal_date(ms: Option<&str>) -> Option<DateTime<Utc>> {
    ms.and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

#[async_trait]
impl MailboxService for GmailMailbox {
    async fn list_messages(&self, query: &str, max: u32) -> Result<Vec<String>, MailboxError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while (ids.len() as u32) < max {
            let remaining = max - ids.len() as u32;
            let mut params = vec![
                ("q", query.to_string()),
                ("maxResults", remaining.min(MAX_PAGE_SIZE).to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: ListMessagesResponse = self
                .get("list_messages", gmail_url!("messages"), &params)
                .await?
                .json()
                .await
                .map_err(|e| MailboxError::invalid("list_messages", e))?;

            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        ids.truncate(max as usize);
        debug!(query, count = ids.len(), "Listed messages");
        Ok(ids)
    }

    async fn get_message(
        &self,
        id: &str,
        format: MessageFormat,
    ) -> Result<MailMessage, MailboxError> {
        let wire_format = match format {
            MessageFormat::Full => "raw",
            MessageFormat::Metadata => format.as_str(),
        };
        let msg: RawMessage = self
            .get(
                "get_message",
                gmail_url!("messages", id),
                &[("format", wire_format.to_string())],
            )
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::invalid("get_message", e))?;

        let internal_date = parse_internal_date(msg.internal_date.as_deref());

        let mut message = match (format, msg.raw) {
            (MessageFormat::Full, Some(raw)) => {
                let bytes = RAW_ENGINE
                    .decode(raw.trim())
                    .map_err(|e| MailboxError::invalid("get_message", format!("raw decode: {e}")))?;
                MailMessage::from_rfc822(msg.id, &bytes)?
            }
            (MessageFormat::Full, None) => {
                return Err(MailboxError::invalid(
                    "get_message",
                    format!("message {id} has no raw content"),
                ));
            }
            (MessageFormat::Metadata, _) => {
                let headers = msg.payload.map(|p| p.headers).unwrap_or_default();
                headers
                    .into_iter()
                    .fold(MailMessage::new(msg.id), |m, h| m.with_header(h.name, h.value))
            }
        };

        if let Some(date) = internal_date {
            message = message.with_internal_date(date);
        }
        if let Some(thread_id) = msg.thread_id {
            message = message.with_thread_id(thread_id);
        }
        Ok(message)
    }

    async fn modify_message(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailboxError> {
        self.post(
            "modify_message",
            gmail_url!("messages", id, "modify"),
            Some(json!({ "addLabelIds": add, "removeLabelIds": remove })),
        )
        .await?;
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<(), MailboxError> {
        self.post("trash_message", gmail_url!("messages", id, "trash"), None)
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        raw_encoded: &str,
        thread_id: Option<&str>,
    ) -> Result<(), MailboxError> {
        self.post(
            "send_message",
            gmail_url!("messages", "send"),
            Some(outgoing(raw_encoded, thread_id)),
        )
        .await?;
        Ok(())
    }

    async fn create_draft(
        &self,
        raw_encoded: &str,
        thread_id: Option<&str>,
    ) -> Result<String, MailboxError> {
        let draft: DraftRef = self
            .post(
                "create_draft",
                gmail_url!("drafts"),
                Some(json!({ "message": outgoing(raw_encoded, thread_id) })),
            )
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::invalid("create_draft", e))?;
        Ok(draft.id)
    }

    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError> {
        let data: ListLabelsResponse = self
            .get("list_labels", gmail_url!("labels"), &[])
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::invalid("list_labels", e))?;
        Ok(data.labels)
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailboxError> {
        let resp = self
            .post(
                "create_label",
                gmail_url!("labels"),
                Some(json!({
                    "name": name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                })),
            )
            .await?;
        resp.json::<Label>()
            .await
            .map_err(|e| MailboxError::invalid("create_label", e))
    }

    async fn batch_add_label(&self, ids: &[String], label_id: &str) -> Result<(), MailboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post(
            "batch_add_label",
            gmail_url!("messages", "batchModify"),
            Some(json!({ "ids": ids, "addLabelIds": [label_id] })),
        )
        .await?;
        Ok(())
    }
}

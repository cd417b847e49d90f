//! Prompt construction for the decision oracle.

use crate::mailbox::MailMessage;
use crate::pipeline::types::{EmailContext, NlRule};

/// Max characters of each body variant sent for unsubscribe detection.
const UNSUBSCRIBE_BODY_CHARS: usize = 8000;

/// Max body characters sent for summaries and replies.
const ASSIST_BODY_CHARS: usize = 8000;

pub fn archive_system_prompt() -> String {
    r#"You decide whether an email can be archived without the user reading it.

Archive candidates:
- promotions and marketing
- automated notifications that need no action
- social network updates
- newsletters with nothing critical
- duplicates of earlier mail

Keep:
- anything asking the user to act or reply
- personal or direct correspondence
- important business mail
- financial or legal content
- anything time-sensitive

Respond with a single JSON object and nothing else:
{
  "can_archive": true | false,
  "confidence": number between 0 and 1,
  "reason": "why",
  "importance_score": number between 0 and 1,
  "summary": "one-line summary if the email matters, otherwise null"
}"#
    .to_string()
}

pub fn archive_user_prompt(ctx: &EmailContext) -> String {
    let mut value = serde_json::json!({
        "from": ctx.from,
        "subject": ctx.subject,
        "body": ctx.body,
        "has_attachments": ctx.has_attachments,
    });
    if let Some(date) = &ctx.date {
        value["date"] = serde_json::Value::String(date.clone());
    }
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

pub fn nl_rules_system_prompt(rules: &[NlRule]) -> String {
    let mut prompt = String::from(
        "You match emails against the user's plain-language filing rules.\n\nRules:\n",
    );
    for rule in rules {
        prompt.push_str(&format!("Rule {}: {}\n", rule.id, rule.text));
    }
    prompt.push_str(
        "\nReturn the ids of every rule the email clearly satisfies, most relevant first. \
         Only include a rule when you are highly confident it applies.\n\
         Respond with a single JSON object and nothing else:\n\
         {\"id\": [rule ids], \"name\": \"short description of the match\"}\n\
         Use {\"id\": []} when nothing matches.",
    );
    prompt
}

pub fn nl_rules_user_prompt(message: &MailMessage) -> String {
    let body: String = message
        .plain_text()
        .chars()
        .take(EmailContext::BODY_CHARS)
        .collect();
    format!(
        "From: {}\nSubject: {}\n\nEmail content:\n{}",
        message.from(),
        message.subject(),
        body
    )
}

pub fn unsubscribe_system_prompt() -> String {
    r#"You locate unsubscribe links in emails.

- The List-Unsubscribe header is the most reliable source; check it first.
- Otherwise look for links in the HTML whose text or URL mentions unsubscribing or opting out.
- For links found in the HTML, give a CSS selector path as the location.
- Only return links that literally appear in the email. Never invent one.
- Rate how sure you are that the link unsubscribes, from 0 to 1.

Respond with a single JSON object and nothing else:
{
  "link": "URL or null",
  "location": "header" or a CSS selector path,
  "confidence": number between 0 and 1,
  "reason": "why"
}"#
    .to_string()
}

pub fn unsubscribe_user_prompt(message: &MailMessage) -> String {
    let html: String = message
        .body_html()
        .unwrap_or("")
        .chars()
        .take(UNSUBSCRIBE_BODY_CHARS)
        .collect();
    let text: String = message
        .plain_text()
        .chars()
        .take(UNSUBSCRIBE_BODY_CHARS)
        .collect();
    let value = serde_json::json!({
        "headers": {
            "subject": message.subject(),
            "from": message.from(),
            "list_unsubscribe": message.header("List-Unsubscribe").unwrap_or(""),
        },
        "body_html": html,
        "body_text": text,
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

pub fn propose_rule_system_prompt() -> String {
    r#"You turn a user's request into a Gmail filter.

Respond with a single JSON object and nothing else, using this shape:
{
  "from": "",
  "to": "",
  "subject": "",
  "hasWords": "",
  "doesNotHaveWords": "",
  "size": { "greaterThan": false, "sizeInMB": null },
  "hasAttachment": false,
  "includeChats": false,
  "action": {
    "delete": false,
    "archive": false,
    "markAsRead": false,
    "star": false,
    "label": "",
    "forwardTo": ""
  }
}

"from", "to" and "subject" are regular expressions matched case-insensitively against those headers. Leave unused fields empty."#
        .to_string()
}

pub fn propose_rule_user_prompt(request: &str) -> String {
    format!("Create a Gmail rule for the following request: {request}")
}

pub fn summarize_system_prompt() -> String {
    "Provide a concise summary of the following email in a few sentences. \
     Respond with the summary text only."
        .to_string()
}

pub fn reply_system_prompt(context: &str) -> String {
    let mut prompt = String::from(
        "Write a professional reply to the email below. \
         Respond with the reply body only: no subject line, no headers, no placeholders.",
    );
    let context = context.trim();
    if !context.is_empty() {
        prompt.push_str("\n\nAdditional context: ");
        prompt.push_str(context);
    }
    prompt
}

/// Sender, subject and body of a message, for summaries and replies.
pub fn email_text_prompt(message: &MailMessage) -> String {
    let body: String = message.plain_text().chars().take(ASSIST_BODY_CHARS).collect();
    format!(
        "From: {}\nSubject: {}\n\nOriginal email:\n{}",
        message.from(),
        message.subject(),
        body
    )
}

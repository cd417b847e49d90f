//! Decision oracle: structured AI judgments consumed by the rule pipeline.
//!
//! The pipeline depends only on `dyn DecisionOracle`. `LlmOracle` is the
//! production implementation: it prompts an `LlmProvider`, extracts the JSON
//! object from the reply and deserializes it. Parse failures are surfaced as
//! `OracleError::InvalidResponse` so callers can fall back to a safe choice.

pub mod parse;
pub mod prompts;

pub use parse::{FilterAction, FilterSize, ProposedFilter};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mailbox::MailMessage;
use crate::pipeline::types::{ArchiveDecision, EmailContext, NlRule, UnsubscribeLink};

/// Max tokens for classification calls (runs on every message).
const DECISION_MAX_TOKENS: u32 = 512;

/// Max tokens for rule proposals.
const PROPOSAL_MAX_TOKENS: u32 = 1024;

/// Max tokens for summaries and reply drafts.
const ASSIST_MAX_TOKENS: u32 = 1024;

/// Temperature for all oracle calls (deterministic-ish).
const ORACLE_TEMPERATURE: f32 = 0.1;

/// AI judgments the pipeline asks for.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Whether a message can be archived, with confidence.
    async fn archive_decision(&self, ctx: &EmailContext) -> Result<ArchiveDecision, OracleError>;

    /// Ids of the natural-language rules the message satisfies, in match order.
    async fn match_nl_rules(
        &self,
        rules: &[NlRule],
        message: &MailMessage,
    ) -> Result<Vec<i64>, OracleError>;

    /// Locate an unsubscribe link in the message.
    async fn find_unsubscribe_link(
        &self,
        message: &MailMessage,
    ) -> Result<UnsubscribeLink, OracleError>;

    /// Turn a free-text request into a Gmail-style filter.
    async fn propose_rule(&self, request: &str) -> Result<ProposedFilter, OracleError>;

    /// Short plain-text summary of a message.
    async fn summarize(&self, message: &MailMessage) -> Result<String, OracleError>;

    /// Body of a reply to a message. `context` steers the reply and may be empty.
    async fn draft_reply(&self, message: &MailMessage, context: &str)
    -> Result<String, OracleError>;
}

/// `DecisionOracle` backed by an LLM.
pub struct LlmOracle {
    llm: Arc<dyn LlmProvider>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn ask<T>(
        &self,
        operation: &str,
        system: String,
        user: String,
        max_tokens: u32,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, OracleError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .with_temperature(ORACLE_TEMPERATURE)
        .with_max_tokens(max_tokens);

        let response = self.llm.complete(request).await?;
        debug!(
            operation,
            model = self.llm.model_name(),
            output_tokens = response.output_tokens,
            "Oracle responded"
        );

        parse(&response.content).map_err(|reason| {
            warn!(
                operation,
                raw_response = %response.content,
                error = %reason,
                "Failed to parse oracle response"
            );
            OracleError::InvalidResponse {
                reason,
                raw: response.content.clone(),
            }
        })
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn archive_decision(&self, ctx: &EmailContext) -> Result<ArchiveDecision, OracleError> {
        self.ask(
            "archive_decision",
            prompts::archive_system_prompt(),
            prompts::archive_user_prompt(ctx),
            DECISION_MAX_TOKENS,
            parse::parse_archive_decision,
        )
        .await
    }

    async fn match_nl_rules(
        &self,
        rules: &[NlRule],
        message: &MailMessage,
    ) -> Result<Vec<i64>, OracleError> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        self.ask(
            "match_nl_rules",
            prompts::nl_rules_system_prompt(rules),
            prompts::nl_rules_user_prompt(message),
            DECISION_MAX_TOKENS,
            parse::parse_nl_match,
        )
        .await
    }

    async fn find_unsubscribe_link(
        &self,
        message: &MailMessage,
    ) -> Result<UnsubscribeLink, OracleError> {
        self.ask(
            "find_unsubscribe_link",
            prompts::unsubscribe_system_prompt(),
            prompts::unsubscribe_user_prompt(message),
            DECISION_MAX_TOKENS,
            parse::parse_unsubscribe,
        )
        .await
    }

    async fn propose_rule(&self, request: &str) -> Result<ProposedFilter, OracleError> {
        self.ask(
            "propose_rule",
            prompts::propose_rule_system_prompt(),
            prompts::propose_rule_user_prompt(request),
            PROPOSAL_MAX_TOKENS,
            parse::parse_proposed_filter,
        )
        .await
    }

    async fn summarize(&self, message: &MailMessage) -> Result<String, OracleError> {
        self.ask(
            "summarize",
            prompts::summarize_system_prompt(),
            prompts::email_text_prompt(message),
            ASSIST_MAX_TOKENS,
            parse::parse_text,
        )
        .await
    }

    async fn draft_reply(
        &self,
        message: &MailMessage,
        context: &str,
    ) -> Result<String, OracleError> {
        self.ask(
            "draft_reply",
            prompts::reply_system_prompt(context),
            prompts::email_text_prompt(message),
            ASSIST_MAX_TOKENS,
            parse::parse_text,
        )
        .await
    }
}

//! Rule evaluation engine.
//!
//! Flow for one message, each stage short-circuiting the rest:
//! 1. Blocked senders (no oracle call) → `[Label("Blocked")]`
//! 2. Oracle archive verdict, acted on at confidence ≥ 0.8
//!    → `[Archive, Label("auto_archived")]`
//! 3. First matching static rule → its actions
//! 4. Oracle natural-language match → concatenated actions of matched rules
//!
//! Oracle and store failures never abort evaluation; they degrade to
//! "no match" for the stage that hit them.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::mailbox::MailMessage;
use crate::oracle::DecisionOracle;
use crate::pipeline::blocklist::Blocklist;
use crate::pipeline::rules::StaticRuleSet;
use crate::pipeline::types::{
    AUTO_ARCHIVED_LABEL, ActionSpec, ArchiveDecision, BLOCKED_LABEL, BlockedPattern, EmailContext,
    Evaluation, Stage,
};
use crate::store::RuleStore;

/// Decides which actions apply to a message.
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    oracle: Arc<dyn DecisionOracle>,
    rules: Arc<StaticRuleSet>,
    blocklist: RwLock<Arc<Blocklist>>,
}

impl RuleEngine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        oracle: Arc<dyn DecisionOracle>,
        rules: Arc<StaticRuleSet>,
    ) -> Self {
        Self {
            store,
            oracle,
            rules,
            blocklist: RwLock::new(Arc::new(Blocklist::empty())),
        }
    }

    pub fn static_rules(&self) -> &Arc<StaticRuleSet> {
        &self.rules
    }

    /// Evaluate a message through all stages.
    pub async fn evaluate(&self, message: &MailMessage) -> Evaluation {
        // Stage 1: blocked senders
        if self.is_blocked(message).await {
            return Evaluation {
                stage: Stage::Blocked,
                actions: vec![ActionSpec::label(BLOCKED_LABEL)],
            };
        }

        // Stage 2: oracle archive verdict
        let decision = self.archive_decision(&EmailContext::from_message(message)).await;
        if decision.should_archive() {
            info!(
                message_id = %message.id,
                confidence = decision.confidence,
                reason = %decision.reason,
                "Auto-archiving message"
            );
            return Evaluation {
                stage: Stage::AutoArchive,
                actions: vec![ActionSpec::Archive, ActionSpec::label(AUTO_ARCHIVED_LABEL)],
            };
        }

        // Stage 3: static rules
        if let Some(rule) = self.rules.first_match(message).await {
            return Evaluation {
                stage: Stage::StaticRule { name: rule.name },
                actions: rule.actions,
            };
        }

        // Stage 4: natural-language rules
        self.match_natural_language(message).await
    }

    async fn is_blocked(&self, message: &MailMessage) -> bool {
        let patterns = match self.store.get_all_blocked_senders().await {
            Ok(p) => p,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Failed to load blocked senders");
                return false;
            }
        };
        let blocklist = self.blocklist_for(patterns).await;
        match blocklist.find(message) {
            Some(hit) => {
                info!(
                    message_id = %message.id,
                    pattern = %hit.pattern,
                    kind = hit.kind.as_str(),
                    "Blocked sender"
                );
                true
            }
            None => false,
        }
    }

    /// Compiled blocklist for this store snapshot, recompiled only when it changed.
    async fn blocklist_for(&self, patterns: Vec<BlockedPattern>) -> Arc<Blocklist> {
        {
            let current = self.blocklist.read().await;
            if current.is_compiled_from(&patterns) {
                return current.clone();
            }
        }
        let compiled = Arc::new(Blocklist::compile(patterns));
        *self.blocklist.write().await = compiled.clone();
        compiled
    }

    /// Oracle archive verdict; failures become a confidence-0 "keep".
    pub async fn archive_decision(&self, ctx: &EmailContext) -> ArchiveDecision {
        match self.oracle.archive_decision(ctx).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, from = %ctx.from, "Archive decision failed, keeping message");
                ArchiveDecision::keep("Error analyzing email")
            }
        }
    }

    async fn match_natural_language(&self, message: &MailMessage) -> Evaluation {
        let rules = match self.store.get_all_nl_rules().await {
            Ok(r) => r,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Failed to load natural-language rules");
                return Evaluation::no_match();
            }
        };
        if rules.is_empty() {
            return Evaluation::no_match();
        }

        let ids = match self.oracle.match_nl_rules(&rules, message).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Natural-language match failed");
                return Evaluation::no_match();
            }
        };

        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        let mut actions = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            match rules.iter().find(|r| r.id == id) {
                Some(rule) => {
                    matched.push(id);
                    actions.extend(rule.actions.iter().cloned());
                }
                None => warn!(message_id = %message.id, rule_id = id, "Oracle returned unknown rule id"),
            }
        }

        if matched.is_empty() {
            return Evaluation::no_match();
        }
        debug!(message_id = %message.id, rules = ?matched, "Natural-language rules matched");
        Evaluation {
            stage: Stage::NaturalLanguage { rule_ids: matched },
            actions,
        }
    }
}

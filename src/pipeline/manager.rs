//! Rule management: the write side of the rule pipeline.
//!
//! Every operation validates its input before touching storage and returns a
//! typed `ManageError`. Static rules go through `StaticRuleSet::add`, so the
//! rules file is rewritten before the new rule becomes visible.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;

use crate::error::{DatabaseError, ManageError, ValidationError};
use crate::mailbox::{Label, MailboxService};
use crate::oracle::{DecisionOracle, ProposedFilter};
use crate::pipeline::labels::sanitize_label;
use crate::pipeline::rules::{StaticRule, StaticRuleSet, compile_condition};
use crate::pipeline::types::{ActionSpec, BlockKind, NL_RULE_MAX_CHARS};
use crate::store::RuleStore;

/// Dotted host name ending in an alphabetic TLD of two or more letters.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .expect("valid domain regex")
});

/// Adds blocked senders, natural-language rules, labels and static rules.
///
/// Only the store and rule set are held; operations that reach the mail
/// provider or the oracle take them as arguments.
pub struct RuleManager {
    store: Arc<dyn RuleStore>,
    rules: Arc<StaticRuleSet>,
}

impl RuleManager {
    pub fn new(store: Arc<dyn RuleStore>, rules: Arc<StaticRuleSet>) -> Self {
        Self { store, rules }
    }

    // ── Blocked senders ─────────────────────────────────────────────

    /// Block one sender address.
    pub async fn block_sender(&self, email: &str) -> Result<i64, ManageError> {
        let email = email.trim();
        if email.parse::<lettre::Address>().is_err() {
            return Err(ValidationError::InvalidEmail(email.to_string()).into());
        }
        let id = self
            .store
            .create_blocked_sender(email, BlockKind::ExactSender)
            .await?;
        info!(id, email, "Blocked sender");
        Ok(id)
    }

    /// Block every address at a domain.
    pub async fn block_domain(&self, domain: &str) -> Result<i64, ManageError> {
        let domain = domain.trim();
        if !is_valid_domain(domain) {
            return Err(ValidationError::InvalidDomain(domain.to_string()).into());
        }
        let pattern = format!(".*@{}$", regex::escape(domain));
        let id = self
            .store
            .create_blocked_sender(&pattern, BlockKind::SenderRegex)
            .await?;
        info!(id, domain, "Blocked domain");
        Ok(id)
    }

    /// Block messages whose body matches a regex.
    pub async fn block_body_pattern(&self, pattern: &str) -> Result<i64, ManageError> {
        compile_condition(pattern)?;
        let id = self
            .store
            .create_blocked_sender(pattern, BlockKind::BodyRegex)
            .await?;
        info!(id, pattern, "Blocked body pattern");
        Ok(id)
    }

    // ── Natural-language rules ──────────────────────────────────────

    pub async fn add_natural_language_rule(
        &self,
        text: &str,
        actions: &[ActionSpec],
    ) -> Result<i64, ManageError> {
        let text = text.trim();
        let len = text.chars().count();
        if len == 0 {
            return Err(ValidationError::EmptyRule(String::new(), "text").into());
        }
        if len > NL_RULE_MAX_CHARS {
            return Err(ValidationError::RuleTooLong {
                len,
                max: NL_RULE_MAX_CHARS,
            }
            .into());
        }
        if actions.is_empty() {
            return Err(ValidationError::EmptyRule(text.to_string(), "actions").into());
        }
        validate_actions(actions)?;

        let id = self.store.create_nl_rule(text, actions).await?;
        info!(id, rule = text, "Added natural-language rule");
        Ok(id)
    }

    // ── Labels ──────────────────────────────────────────────────────

    /// Ensure a label exists on the provider and is recorded locally.
    ///
    /// An existing provider label is matched case-insensitively and reused.
    pub async fn create_synced_label(
        &self,
        mailbox: &dyn MailboxService,
        name: &str,
    ) -> Result<Label, ManageError> {
        let clean = sanitize_label(name);
        if clean.is_empty() {
            return Err(ValidationError::EmptyLabel(name.to_string()).into());
        }

        let existing = mailbox
            .list_labels()
            .await?
            .into_iter()
            .find(|l| l.name.eq_ignore_ascii_case(&clean));
        let label = match existing {
            Some(label) => label,
            None => mailbox.create_label(&clean).await?,
        };

        match self.store.create_label_with_uri(&label.name, &label.id).await {
            Ok(_) | Err(DatabaseError::Constraint(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(label = %label.name, provider_id = %label.id, "Label synced");
        Ok(label)
    }

    // ── Static rules ────────────────────────────────────────────────

    pub async fn add_static_rule(&self, rule: StaticRule) -> Result<(), ManageError> {
        validate_actions(&rule.actions)?;
        self.rules.add(rule).await?;
        Ok(())
    }

    /// Ask the oracle to turn a request into a filter and store it as a rule.
    pub async fn create_rule_from_prompt(
        &self,
        oracle: &dyn DecisionOracle,
        prompt: &str,
    ) -> Result<StaticRule, ManageError> {
        let proposal = oracle.propose_rule(prompt).await?;
        let rule = proposal_to_rule(&proposal, Utc::now())?;
        self.add_static_rule(rule.clone()).await?;
        Ok(rule)
    }
}

/// Convert an oracle filter proposal into a named static rule.
pub fn proposal_to_rule(
    proposal: &ProposedFilter,
    at: DateTime<Utc>,
) -> Result<StaticRule, ValidationError> {
    let name = format!("AI Generated Rule - {}", at.format("%Y%m%d_%H%M%S"));

    let conditions: std::collections::BTreeMap<String, String> = [
        ("from", &proposal.from),
        ("to", &proposal.to),
        ("subject", &proposal.subject),
    ]
    .into_iter()
    .filter(|(_, value)| !value.trim().is_empty())
    .map(|(key, value)| (key.to_string(), value.trim().to_string()))
    .collect();
    if conditions.is_empty() {
        return Err(ValidationError::EmptyRule(name, "conditions"));
    }

    let action = &proposal.action;
    let mut actions = Vec::new();
    if action.delete {
        actions.push(ActionSpec::Delete);
    }
    if action.archive {
        actions.push(ActionSpec::Archive);
    }
    if action.mark_as_read {
        actions.push(ActionSpec::MarkRead);
    }
    if action.star {
        actions.push(ActionSpec::Star);
    }
    if !action.label.trim().is_empty() {
        let label = sanitize_label(&action.label);
        if label.is_empty() {
            return Err(ValidationError::EmptyLabel(action.label.clone()));
        }
        actions.push(ActionSpec::label(label));
    }
    if !action.forward_to.trim().is_empty() {
        actions.push(ActionSpec::forward(action.forward_to.trim()));
    }
    if actions.is_empty() {
        return Err(ValidationError::EmptyRule(name, "actions"));
    }

    Ok(StaticRule {
        name,
        conditions,
        actions,
    })
}

fn validate_actions(actions: &[ActionSpec]) -> Result<(), ValidationError> {
    for action in actions {
        match action {
            ActionSpec::Label { value } if value.trim().is_empty() => {
                return Err(ValidationError::EmptyLabel(value.clone()));
            }
            ActionSpec::Forward { to } if to.trim().is_empty() => {
                return Err(ValidationError::MissingForwardTarget);
            }
            ActionSpec::Forward { to } if to.trim().parse::<lettre::Address>().is_err() => {
                return Err(ValidationError::InvalidEmail(to.clone()));
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_valid_domain(domain: &str) -> bool {
    DOMAIN_RE.is_match(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::FilterAction;
    use crate::testing::{FakeMailbox, FakeOracle, MailOp, MemoryRuleStore};

    struct Fixture {
        store: Arc<MemoryRuleStore>,
        mailbox: Arc<FakeMailbox>,
        oracle: Arc<FakeOracle>,
        rules: Arc<StaticRuleSet>,
        manager: RuleManager,
    }

    fn fixture() -> Fixture {
        let store = MemoryRuleStore::new();
        let mailbox = FakeMailbox::new();
        let oracle = FakeOracle::quiet();
        let rules = Arc::new(StaticRuleSet::in_memory(vec![]).unwrap());
        let manager = RuleManager::new(store.clone(), rules.clone());
        Fixture {
            store,
            mailbox,
            oracle,
            rules,
            manager,
        }
    }

    #[tokio::test]
    async fn block_sender_validates_address() {
        let f = fixture();
        let err = f.manager.block_sender("not-an-email").await.unwrap_err();
        assert!(matches!(
            err,
            ManageError::Validation(ValidationError::InvalidEmail(_))
        ));

        f.manager.block_sender("spam@evil.com").await.unwrap();
        let blocked = f.store.get_all_blocked_senders().await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].kind, BlockKind::ExactSender);
    }

    #[tokio::test]
    async fn block_domain_stores_anchored_regex() {
        let f = fixture();
        f.manager.block_domain("evil.com").await.unwrap();
        let blocked = f.store.get_all_blocked_senders().await.unwrap();
        assert_eq!(blocked[0].pattern, r".*@evil\.com$");
        assert_eq!(blocked[0].kind, BlockKind::SenderRegex);

        for bad in ["evil", "-evil.com", "evil.c0m", "evil..com", ""] {
            assert!(f.manager.block_domain(bad).await.is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn domain_labels_are_bounded() {
        assert!(is_valid_domain("mail.sub-domain.example.co"));
        assert!(is_valid_domain(&format!("{}.com", "a".repeat(63))));
        assert!(!is_valid_domain(&format!("{}.com", "a".repeat(64))));
        assert!(!is_valid_domain("evil-.com"));
        assert!(!is_valid_domain("evil.com."));
    }

    #[tokio::test]
    async fn block_body_pattern_requires_valid_regex() {
        let f = fixture();
        let err = f.manager.block_body_pattern("([").await.unwrap_err();
        assert!(matches!(
            err,
            ManageError::Validation(ValidationError::InvalidRegex { .. })
        ));
        f.manager.block_body_pattern(r"crypto\s+giveaway").await.unwrap();
    }

    #[tokio::test]
    async fn nl_rule_length_limit() {
        let f = fixture();
        let fifty = "a".repeat(50);
        f.manager
            .add_natural_language_rule(&fifty, &[ActionSpec::Star])
            .await
            .unwrap();

        let err = f
            .manager
            .add_natural_language_rule(&"a".repeat(51), &[ActionSpec::Star])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManageError::Validation(ValidationError::RuleTooLong { len: 51, max: 50 })
        ));
    }

    #[tokio::test]
    async fn nl_rule_rejects_forward_without_target() {
        let f = fixture();
        let err = f
            .manager
            .add_natural_language_rule("from my bank", &[ActionSpec::forward("")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManageError::Validation(ValidationError::MissingForwardTarget)
        ));
        assert!(f.store.get_all_nl_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn synced_label_reuses_provider_label_case_insensitively() {
        let f = fixture();
        f.mailbox.add_label("Label_7", "Receipts");

        let label = f
            .manager
            .create_synced_label(f.mailbox.as_ref(), "receipts!")
            .await
            .unwrap();
        assert_eq!(label.id, "Label_7");
        assert!(!f.mailbox.ops().iter().any(|op| matches!(op, MailOp::CreateLabel(_))));

        // Recording twice is tolerated.
        f.manager
            .create_synced_label(f.mailbox.as_ref(), "Receipts")
            .await
            .unwrap();
        assert_eq!(f.store.get_all_labels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn synced_label_creates_sanitized_label() {
        let f = fixture();
        let label = f
            .manager
            .create_synced_label(f.mailbox.as_ref(), "Work/Projects 2026")
            .await
            .unwrap();
        assert_eq!(label.name, "Work Projects");
        assert!(
            f.mailbox
                .ops()
                .contains(&MailOp::CreateLabel("Work Projects".into()))
        );

        let err = f
            .manager
            .create_synced_label(f.mailbox.as_ref(), "123")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManageError::Validation(ValidationError::EmptyLabel(_))
        ));
    }

    #[tokio::test]
    async fn rule_from_prompt_is_appended() {
        let f = fixture();
        *f.oracle.proposal.lock().unwrap() = Some(ProposedFilter {
            from: r"newsletter@shop\.com".into(),
            action: FilterAction {
                archive: true,
                mark_as_read: true,
                label: "Shopping #1".into(),
                ..FilterAction::default()
            },
            ..ProposedFilter::default()
        });

        let rule = f
            .manager
            .create_rule_from_prompt(f.oracle.as_ref(), "archive shop newsletters")
            .await
            .unwrap();
        assert!(rule.name.starts_with("AI Generated Rule - "));
        assert_eq!(
            rule.actions,
            vec![
                ActionSpec::Archive,
                ActionSpec::MarkRead,
                ActionSpec::label("Shopping")
            ]
        );
        assert_eq!(f.rules.len().await, 1);
    }

    #[test]
    fn proposal_without_conditions_or_actions_is_rejected() {
        let at = Utc::now();
        let no_conditions = ProposedFilter {
            action: FilterAction {
                star: true,
                ..FilterAction::default()
            },
            ..ProposedFilter::default()
        };
        assert!(matches!(
            proposal_to_rule(&no_conditions, at),
            Err(ValidationError::EmptyRule(_, "conditions"))
        ));

        let no_actions = ProposedFilter {
            subject: "invoice".into(),
            ..ProposedFilter::default()
        };
        assert!(matches!(
            proposal_to_rule(&no_actions, at),
            Err(ValidationError::EmptyRule(_, "actions"))
        ));
    }

    #[test]
    fn proposal_action_order() {
        let proposal = ProposedFilter {
            subject: "alert".into(),
            action: FilterAction {
                delete: true,
                archive: true,
                mark_as_read: true,
                star: true,
                label: "Alerts".into(),
                forward_to: "ops@corp.com".into(),
            },
            ..ProposedFilter::default()
        };
        let rule = proposal_to_rule(&proposal, Utc::now()).unwrap();
        assert_eq!(
            rule.actions,
            vec![
                ActionSpec::Delete,
                ActionSpec::Archive,
                ActionSpec::MarkRead,
                ActionSpec::Star,
                ActionSpec::label("Alerts"),
                ActionSpec::forward("ops@corp.com"),
            ]
        );
    }

    #[tokio::test]
    async fn static_rule_with_invalid_regex_not_added() {
        let f = fixture();
        let err = f
            .manager
            .add_static_rule(StaticRule {
                name: "bad".into(),
                conditions: [("from".to_string(), "([".to_string())].into(),
                actions: vec![ActionSpec::Star],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ManageError::RuleFile(_)));
        assert!(f.rules.is_empty().await);
    }
}

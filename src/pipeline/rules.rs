//! Static condition/action rules.
//!
//! Rules are loaded once from a JSON file and evaluated in file order; the
//! first rule whose conditions all match wins. Each condition maps a header
//! name to a regex searched case-insensitively in that header's value; a
//! missing header fails the condition.
//!
//! Appends are persist-then-mutate: the new rule set is written to a temp
//! file and renamed over the original before readers see it. Readers take a
//! cheap `Arc` snapshot, so an append is atomic with respect to evaluation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{RuleFileError, ValidationError};
use crate::mailbox::MailMessage;
use crate::pipeline::types::ActionSpec;

/// A persisted condition/action rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRule {
    pub name: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, String>,
    pub actions: Vec<ActionSpec>,
}

impl StaticRule {
    /// Check the rule is usable and compile its conditions.
    pub fn compile(&self) -> Result<CompiledRule, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyRule(self.name.clone(), "name"));
        }
        if self.actions.is_empty() {
            return Err(ValidationError::EmptyRule(self.name.clone(), "actions"));
        }
        for action in &self.actions {
            if let ActionSpec::Label { value } = action
                && value.trim().is_empty()
            {
                return Err(ValidationError::EmptyLabel(value.clone()));
            }
        }

        let conditions = self
            .conditions
            .iter()
            .map(|(header, pattern)| Ok((header.clone(), compile_condition(pattern)?)))
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(CompiledRule {
            rule: self.clone(),
            conditions,
        })
    }
}

/// Compile a header condition (case-insensitive search).
pub fn compile_condition(pattern: &str) -> Result<Regex, ValidationError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ValidationError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// A rule with its conditions compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: StaticRule,
    conditions: Vec<(String, Regex)>,
}

impl CompiledRule {
    /// Whether every condition's header exists and matches.
    pub fn matches(&self, message: &MailMessage) -> bool {
        self.conditions.iter().all(|(header, regex)| {
            message
                .header(header)
                .is_some_and(|value| regex.is_match(value))
        })
    }
}

/// Ordered, file-backed static rule set.
pub struct StaticRuleSet {
    path: Option<PathBuf>,
    rules: RwLock<Arc<Vec<CompiledRule>>>,
    writer: Mutex<()>,
}

impl StaticRuleSet {
    /// A rule set that is never persisted (for tests).
    pub fn in_memory(rules: Vec<StaticRule>) -> Result<Self, RuleFileError> {
        Ok(Self {
            path: None,
            rules: RwLock::new(Arc::new(compile_all(rules)?)),
            writer: Mutex::new(()),
        })
    }

    /// Load rules from `path`. A missing file is an empty set.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RuleFileError> {
        let path = path.as_ref().to_path_buf();
        let rules = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str::<Vec<StaticRule>>(&text).map_err(|e| {
                RuleFileError::Parse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No rules file, starting with an empty rule set");
                Vec::new()
            }
            Err(source) => {
                return Err(RuleFileError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let compiled = compile_all(rules)?;
        info!(path = %path.display(), count = compiled.len(), "Loaded static rules");
        Ok(Self {
            path: Some(path),
            rules: RwLock::new(Arc::new(compiled)),
            writer: Mutex::new(()),
        })
    }

    /// Current rules, in evaluation order.
    pub async fn snapshot(&self) -> Arc<Vec<CompiledRule>> {
        self.rules.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// First rule matching the message.
    pub async fn first_match(&self, message: &MailMessage) -> Option<StaticRule> {
        let rules = self.snapshot().await;
        let found = rules.iter().find(|r| r.matches(message)).map(|r| r.rule.clone());
        if let Some(rule) = &found {
            debug!(message_id = %message.id, rule = %rule.name, "Static rule matched");
        }
        found
    }

    /// Append a rule, persisting the full set before it becomes visible.
    pub async fn add(&self, rule: StaticRule) -> Result<(), RuleFileError> {
        let compiled = rule.compile().map_err(|source| RuleFileError::InvalidRule {
            name: rule.name.clone(),
            source,
        })?;

        let _guard = self.writer.lock().await;
        let current = self.snapshot().await;
        let mut next: Vec<CompiledRule> = current.as_ref().clone();
        next.push(compiled);

        if let Some(path) = &self.path {
            let plain: Vec<&StaticRule> = next.iter().map(|r| &r.rule).collect();
            write_atomically(path, &plain).await?;
        }

        *self.rules.write().await = Arc::new(next);
        info!(rule = %rule.name, "Added static rule");
        Ok(())
    }
}

fn compile_all(rules: Vec<StaticRule>) -> Result<Vec<CompiledRule>, RuleFileError> {
    rules
        .into_iter()
        .map(|rule| {
            rule.compile().map_err(|source| RuleFileError::InvalidRule {
                name: rule.name.clone(),
                source,
            })
        })
        .collect()
}

/// Write JSON to a sibling temp file, then rename it over `path`.
async fn write_atomically(path: &Path, rules: &[&StaticRule]) -> Result<(), RuleFileError> {
    let write_err = |source| RuleFileError::Write {
        path: path.display().to_string(),
        source,
    };

    let json = serde_json::to_string_pretty(rules).map_err(|e| {
        write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rules.json".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, json.as_bytes()).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, conditions: &[(&str, &str)], actions: Vec<ActionSpec>) -> StaticRule {
        StaticRule {
            name: name.into(),
            conditions: conditions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            actions,
        }
    }

    fn make_message(from: &str, subject: Option<&str>) -> MailMessage {
        let msg = MailMessage::new("m1").with_header("From", from);
        match subject {
            Some(s) => msg.with_header("Subject", s),
            None => msg,
        }
    }

    #[tokio::test]
    async fn lowercase_condition_key_matches_header() {
        let set = StaticRuleSet::in_memory(vec![rule(
            "boss",
            &[("from", r"boss@corp\.com")],
            vec![ActionSpec::Star],
        )])
        .unwrap();
        let matched = set
            .first_match(&make_message("boss@corp.com", None))
            .await
            .unwrap();
        assert_eq!(matched.actions, vec![ActionSpec::Star]);
    }

    #[tokio::test]
    async fn condition_regex_is_case_insensitive() {
        let set = StaticRuleSet::in_memory(vec![rule(
            "boss",
            &[("From", r"boss@corp\.com")],
            vec![ActionSpec::Star],
        )])
        .unwrap();
        assert!(set.first_match(&make_message("BOSS@CORP.COM", None)).await.is_some());
    }

    #[tokio::test]
    async fn missing_header_fails_condition() {
        let set = StaticRuleSet::in_memory(vec![rule(
            "invoices",
            &[("From", "billing@"), ("Subject", "invoice")],
            vec![ActionSpec::label("Bills")],
        )])
        .unwrap();
        assert!(set.first_match(&make_message("billing@shop.com", None)).await.is_none());
        assert!(
            set.first_match(&make_message("billing@shop.com", Some("Your Invoice")))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn first_match_wins() {
        let set = StaticRuleSet::in_memory(vec![
            rule("first", &[("From", "corp")], vec![ActionSpec::Star]),
            rule("second", &[("From", "boss")], vec![ActionSpec::Delete]),
        ])
        .unwrap();
        let matched = set
            .first_match(&make_message("boss@corp.com", None))
            .await
            .unwrap();
        assert_eq!(matched.name, "first");
    }

    #[tokio::test]
    async fn rule_without_conditions_matches_everything() {
        let set =
            StaticRuleSet::in_memory(vec![rule("all", &[], vec![ActionSpec::MarkRead])]).unwrap();
        assert!(set.first_match(&MailMessage::new("x")).await.is_some());
    }

    #[test]
    fn invalid_regex_rejected() {
        let err = rule("bad", &[("From", "([")], vec![ActionSpec::Star])
            .compile()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRegex { .. }));
    }

    #[test]
    fn empty_actions_rejected() {
        let err = rule("noop", &[("From", "x")], vec![]).compile().unwrap_err();
        assert_eq!(err, ValidationError::EmptyRule("noop".into(), "actions"));
    }

    #[tokio::test]
    async fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = StaticRuleSet::load(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn load_rejects_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"name": "x", "conditions": {"from": "a"}, "actions": [{"type": "explode"}]}]"#,
        )
        .unwrap();
        let err = StaticRuleSet::load(&path).await.err().unwrap();
        assert!(matches!(err, RuleFileError::Parse { .. }));
    }

    #[tokio::test]
    async fn add_persists_then_becomes_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"name": "existing", "conditions": {"from": "a@b\\.com"}, "actions": [{"type": "archive"}]}]"#,
        )
        .unwrap();

        let set = StaticRuleSet::load(&path).await.unwrap();
        assert_eq!(set.len().await, 1);

        set.add(rule("new", &[("subject", "hello")], vec![ActionSpec::label("Hi")]))
            .await
            .unwrap();
        assert_eq!(set.len().await, 2);

        let reloaded = StaticRuleSet::load(&path).await.unwrap();
        let names: Vec<String> = reloaded
            .snapshot()
            .await
            .iter()
            .map(|r| r.rule.name.clone())
            .collect();
        assert_eq!(names, vec!["existing", "new"]);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file should be renamed away");
    }

    #[tokio::test]
    async fn failed_write_leaves_set_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("rules.json");
        let set = StaticRuleSet::load(&path).await.unwrap();

        let err = set
            .add(rule("new", &[("from", "x")], vec![ActionSpec::Star]))
            .await
            .unwrap_err();
        assert!(matches!(err, RuleFileError::Write { .. }));
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_rule_not_added() {
        let set = StaticRuleSet::in_memory(vec![]).unwrap();
        let err = set
            .add(rule("bad", &[("from", "(")], vec![ActionSpec::Star]))
            .await
            .unwrap_err();
        assert!(matches!(err, RuleFileError::InvalidRule { .. }));
        assert!(set.is_empty().await);
    }
}

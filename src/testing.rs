//! In-crate fakes for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::error::{DatabaseError, LlmError, MailboxError, OracleError};
use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::mailbox::{Label, MailMessage, MailboxService, MessageFormat};
use crate::oracle::{DecisionOracle, ProposedFilter};
use crate::pipeline::types::{
    ActionSpec, ArchiveDecision, BlockKind, BlockedPattern, EmailContext, NlRule,
    UnsubscribeLink,
};
use crate::store::{CheckpointStore, RuleStore, SyncedLabel};

// ── LLM ─────────────────────────────────────────────────────────────

/// LLM that replays canned responses in order.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    fail: bool,
    calls: AtomicUsize,
    last: Mutex<Option<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            fail: false,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            fail: true,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request);
        if self.fail {
            return Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "scripted failure".into(),
            });
        }
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "script exhausted".into(),
            })?;
        Ok(CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 10,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// A mutation recorded by `FakeMailbox`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailOp {
    Modify {
        id: String,
        add: Vec<String>,
        remove: Vec<String>,
    },
    Trash(String),
    Send {
        raw: String,
        thread_id: Option<String>,
    },
    Draft {
        raw: String,
        thread_id: Option<String>,
    },
    CreateLabel(String),
    BatchAdd {
        ids: Vec<String>,
        label_id: String,
    },
}

/// Holds `get_message` until released.
#[derive(Clone, Default)]
pub struct FetchGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// In-memory mailbox recording every mutation.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<HashMap<String, MailMessage>>,
    listings: Mutex<Vec<(String, Vec<String>)>>,
    labels: Mutex<Vec<Label>>,
    failing: Mutex<HashSet<&'static str>>,
    fetch_gate: Mutex<Option<FetchGate>>,
    pub ops: Mutex<Vec<MailOp>>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_message(&self, message: MailMessage) {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }

    /// Ids returned for queries starting with `prefix`.
    pub fn set_listing(&self, prefix: &str, ids: &[&str]) {
        self.listings.lock().unwrap().push((
            prefix.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
        ));
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.labels.lock().unwrap().push(Label {
            id: id.into(),
            name: name.into(),
        });
    }

    pub fn labels(&self) -> Vec<Label> {
        self.labels.lock().unwrap().clone()
    }

    /// Block every `get_message` until the returned gate is released.
    pub fn gate_fetches(&self) -> FetchGate {
        let gate = FetchGate::default();
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make an operation fail with a transient error.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn ops(&self) -> Vec<MailOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MailOp::Send { raw, .. } => Some(raw),
                _ => None,
            })
            .collect()
    }

    fn check(&self, operation: &'static str) -> Result<(), MailboxError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(MailboxError::request(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxService for FakeMailbox {
    async fn list_messages(&self, query: &str, max: u32) -> Result<Vec<String>, MailboxError> {
        self.check("list_messages")?;
        self.queries.lock().unwrap().push(query.to_string());
        let listings = self.listings.lock().unwrap();
        let ids = listings
            .iter()
            .find(|(prefix, _)| query.starts_with(prefix.as_str()))
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default();
        Ok(ids.into_iter().take(max as usize).collect())
    }

    async fn get_message(
        &self,
        id: &str,
        _format: MessageFormat,
    ) -> Result<MailMessage, MailboxError> {
        self.check("get_message")?;
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.messages
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| MailboxError::Api {
                operation: "get_message".into(),
                status: 404,
                body: format!("no message {id}"),
            })
    }

    async fn modify_message(
        &self,
        id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<(), MailboxError> {
        self.check("modify_message")?;
        self.ops.lock().unwrap().push(MailOp::Modify {
            id: id.into(),
            add: add.to_vec(),
            remove: remove.to_vec(),
        });
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<(), MailboxError> {
        self.check("trash_message")?;
        self.ops.lock().unwrap().push(MailOp::Trash(id.into()));
        Ok(())
    }

    async fn send_message(
        &self,
        raw_encoded: &str,
        thread_id: Option<&str>,
    ) -> Result<(), MailboxError> {
        self.check("send_message")?;
        self.ops.lock().unwrap().push(MailOp::Send {
            raw: raw_encoded.into(),
            thread_id: thread_id.map(String::from),
        });
        Ok(())
    }

    async fn create_draft(
        &self,
        raw_encoded: &str,
        thread_id: Option<&str>,
    ) -> Result<String, MailboxError> {
        self.check("create_draft")?;
        let mut ops = self.ops.lock().unwrap();
        ops.push(MailOp::Draft {
            raw: raw_encoded.into(),
            thread_id: thread_id.map(String::from),
        });
        Ok(format!("draft_{}", ops.len()))
    }

    async fn list_labels(&self) -> Result<Vec<Label>, MailboxError> {
        self.check("list_labels")?;
        Ok(self.labels())
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailboxError> {
        self.check("create_label")?;
        let mut labels = self.labels.lock().unwrap();
        let label = Label {
            id: format!("Label_{}", labels.len() + 1),
            name: name.into(),
        };
        labels.push(label.clone());
        self.ops
            .lock()
            .unwrap()
            .push(MailOp::CreateLabel(name.into()));
        Ok(label)
    }

    async fn batch_add_label(&self, ids: &[String], label_id: &str) -> Result<(), MailboxError> {
        self.check("batch_add_label")?;
        self.ops.lock().unwrap().push(MailOp::BatchAdd {
            ids: ids.to_vec(),
            label_id: label_id.into(),
        });
        Ok(())
    }
}

// ── Oracle ──────────────────────────────────────────────────────────

/// Oracle with fixed answers and call counters.
#[derive(Default)]
pub struct FakeOracle {
    /// Default verdict; `None` makes the call fail.
    pub archive: Mutex<Option<ArchiveDecision>>,
    /// Per-subject overrides of the archive verdict.
    pub archive_by_subject: Mutex<HashMap<String, ArchiveDecision>>,
    /// Matched ids; `None` makes the call fail.
    pub nl_ids: Mutex<Option<Vec<i64>>>,
    pub unsubscribe: Mutex<Option<UnsubscribeLink>>,
    pub proposal: Mutex<Option<ProposedFilter>>,
    /// Summary text; `None` makes the call fail.
    pub summary: Mutex<Option<String>>,
    /// Reply body; `None` makes the call fail.
    pub reply: Mutex<Option<String>>,
    /// Context passed to the last `draft_reply`.
    pub reply_context: Mutex<Option<String>>,
    pub archive_calls: AtomicUsize,
    pub nl_calls: AtomicUsize,
}

impl FakeOracle {
    /// Never archives, never matches.
    pub fn quiet() -> Arc<Self> {
        let oracle = Self::default();
        *oracle.archive.lock().unwrap() = Some(ArchiveDecision::keep("quiet"));
        *oracle.nl_ids.lock().unwrap() = Some(Vec::new());
        Arc::new(oracle)
    }

    pub fn set_archive(&self, can_archive: bool, confidence: f64) {
        *self.archive.lock().unwrap() = Some(decision(can_archive, confidence));
    }

    pub fn set_archive_for(&self, subject: &str, can_archive: bool, confidence: f64) {
        self.archive_by_subject
            .lock()
            .unwrap()
            .insert(subject.to_string(), decision(can_archive, confidence));
    }

    pub fn set_nl_ids(&self, ids: Option<Vec<i64>>) {
        *self.nl_ids.lock().unwrap() = ids;
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }

    pub fn nl_calls(&self) -> usize {
        self.nl_calls.load(Ordering::SeqCst)
    }
}

pub fn decision(can_archive: bool, confidence: f64) -> ArchiveDecision {
    ArchiveDecision {
        can_archive,
        confidence,
        reason: "scripted".into(),
        importance_score: 0.2,
        summary: None,
    }
}

fn invalid(reason: &str) -> OracleError {
    OracleError::InvalidResponse {
        reason: reason.into(),
        raw: String::new(),
    }
}

#[async_trait]
impl DecisionOracle for FakeOracle {
    async fn archive_decision(&self, ctx: &EmailContext) -> Result<ArchiveDecision, OracleError> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.archive_by_subject.lock().unwrap().get(&ctx.subject) {
            return Ok(d.clone());
        }
        self.archive
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| invalid("archive unavailable"))
    }

    async fn match_nl_rules(
        &self,
        _rules: &[NlRule],
        _message: &MailMessage,
    ) -> Result<Vec<i64>, OracleError> {
        self.nl_calls.fetch_add(1, Ordering::SeqCst);
        self.nl_ids
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| invalid("nl match unavailable"))
    }

    async fn find_unsubscribe_link(
        &self,
        _message: &MailMessage,
    ) -> Result<UnsubscribeLink, OracleError> {
        self.unsubscribe
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| invalid("no unsubscribe verdict"))
    }

    async fn propose_rule(&self, _request: &str) -> Result<ProposedFilter, OracleError> {
        self.proposal
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| invalid("no proposal"))
    }

    async fn summarize(&self, _message: &MailMessage) -> Result<String, OracleError> {
        self.summary
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| invalid("no summary"))
    }

    async fn draft_reply(
        &self,
        _message: &MailMessage,
        context: &str,
    ) -> Result<String, OracleError> {
        *self.reply_context.lock().unwrap() = Some(context.to_string());
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| invalid("no reply"))
    }
}

// ── Rule store ──────────────────────────────────────────────────────

/// In-memory rule and checkpoint store.
#[derive(Default)]
pub struct MemoryRuleStore {
    blocked: Mutex<Vec<BlockedPattern>>,
    nl_rules: Mutex<Vec<NlRule>>,
    labels: Mutex<Vec<SyncedLabel>>,
    watermark: Mutex<Option<DateTime<Utc>>>,
    next_id: AtomicUsize,
    pub fail_reads: std::sync::atomic::AtomicBool,
    pub fail_checkpoint: std::sync::atomic::AtomicBool,
}

impl MemoryRuleStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1
    }

    fn read_guard(&self) -> Result<(), DatabaseError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("injected read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn get_all_blocked_senders(&self) -> Result<Vec<BlockedPattern>, DatabaseError> {
        self.read_guard()?;
        Ok(self.blocked.lock().unwrap().clone())
    }

    async fn create_blocked_sender(
        &self,
        pattern: &str,
        kind: BlockKind,
    ) -> Result<i64, DatabaseError> {
        let id = self.next();
        self.blocked.lock().unwrap().push(BlockedPattern {
            id,
            pattern: pattern.into(),
            kind,
        });
        Ok(id)
    }

    async fn delete_blocked_sender(&self, id: i64) -> Result<bool, DatabaseError> {
        let mut blocked = self.blocked.lock().unwrap();
        let before = blocked.len();
        blocked.retain(|b| b.id != id);
        Ok(blocked.len() != before)
    }

    async fn get_all_nl_rules(&self) -> Result<Vec<NlRule>, DatabaseError> {
        self.read_guard()?;
        Ok(self.nl_rules.lock().unwrap().clone())
    }

    async fn create_nl_rule(
        &self,
        text: &str,
        actions: &[ActionSpec],
    ) -> Result<i64, DatabaseError> {
        let id = self.next();
        self.nl_rules.lock().unwrap().push(NlRule {
            id,
            text: text.into(),
            actions: actions.to_vec(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_nl_rule(&self, id: i64) -> Result<Option<NlRule>, DatabaseError> {
        Ok(self
            .nl_rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn delete_nl_rule(&self, id: i64) -> Result<bool, DatabaseError> {
        let mut rules = self.nl_rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        Ok(rules.len() != before)
    }

    async fn create_label_with_uri(
        &self,
        name: &str,
        provider_id: &str,
    ) -> Result<i64, DatabaseError> {
        let mut labels = self.labels.lock().unwrap();
        if labels.iter().any(|l| l.name == name) {
            return Err(DatabaseError::Constraint(format!("label {name} exists")));
        }
        let id = self.next();
        labels.push(SyncedLabel {
            id,
            name: name.into(),
            provider_id: provider_id.into(),
        });
        Ok(id)
    }

    async fn get_all_labels(&self) -> Result<Vec<SyncedLabel>, DatabaseError> {
        Ok(self.labels.lock().unwrap().clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryRuleStore {
    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(*self.watermark.lock().unwrap())
    }

    async fn set_watermark(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        if self.fail_checkpoint.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("injected checkpoint failure".into()));
        }
        *self.watermark.lock().unwrap() = Some(at);
        Ok(())
    }
}

//! Rule pipeline.
//!
//! Every new message flows through:
//! 1. `RuleEngine::evaluate()`: blocked senders, AI auto-archive, static
//!    rules, then natural-language rules
//! 2. `ActionDispatcher::apply()`: each action applied in isolation
//!
//! `Poller` drives both on a timer and interleaves the `ArchiveSweeper`.
//! `RuleManager` and `Unsubscriber` are the write side. `MessageAssistant`
//! summarizes and replies to single messages on request.

pub mod assist;
pub mod blocklist;
pub mod dispatcher;
pub mod engine;
pub mod labels;
pub mod manager;
pub mod poller;
pub mod rules;
pub mod sweep;
pub mod types;
pub mod unsubscribe;

pub use assist::{MessageAssistant, ReplyMode, ReplyOutcome};
pub use dispatcher::{ActionDispatcher, DispatchReport, Outcome};
pub use engine::RuleEngine;
pub use manager::RuleManager;
pub use poller::{CycleReport, Poller, spawn_poller};
pub use rules::{StaticRule, StaticRuleSet};
pub use sweep::{ArchiveSweeper, SweepReport};
pub use types::{ActionSpec, Evaluation, Stage};
pub use unsubscribe::{HttpLinkVisitor, LinkVisitor, UnsubscribeReport, Unsubscriber};

//! Blocked-sender matching.
//!
//! A message is blocked when any stored pattern matches:
//! - `ExactSender`: case-insensitive substring of the From header
//! - `SenderRegex`: case-insensitive regex search over the From header
//! - `BodyRegex`: case-insensitive regex search over the plain-text body
//!
//! Patterns are compiled once per snapshot of the store. Patterns that fail
//! to compile are skipped with a warning.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::mailbox::MailMessage;
use crate::pipeline::types::{BlockKind, BlockedPattern};

/// Compiled regexes are bounded so a hostile stored pattern can't blow up memory.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

enum Matcher {
    Substring(String),
    Sender(Regex),
    Body(Regex),
    Never,
}

/// A snapshot of stored patterns, compiled once.
pub struct Blocklist {
    source: Vec<BlockedPattern>,
    matchers: Vec<Matcher>,
}

impl Blocklist {
    pub fn empty() -> Self {
        Self::compile(Vec::new())
    }

    pub fn compile(patterns: Vec<BlockedPattern>) -> Self {
        let matchers = patterns.iter().map(compile_one).collect();
        Self {
            source: patterns,
            matchers,
        }
    }

    /// Whether this was compiled from exactly `patterns`.
    pub fn is_compiled_from(&self, patterns: &[BlockedPattern]) -> bool {
        self.source == patterns
    }

    /// First pattern that blocks the message, if any.
    pub fn find(&self, message: &MailMessage) -> Option<&BlockedPattern> {
        let from = message.from().to_lowercase();
        self.matchers
            .iter()
            .position(|m| match m {
                Matcher::Substring(needle) => from.contains(needle.as_str()),
                Matcher::Sender(re) => re.is_match(&from),
                Matcher::Body(re) => re.is_match(message.plain_text()),
                Matcher::Never => false,
            })
            .map(|i| &self.source[i])
    }
}

fn compile_one(pattern: &BlockedPattern) -> Matcher {
    match pattern.kind {
        BlockKind::ExactSender if pattern.pattern.is_empty() => Matcher::Never,
        BlockKind::ExactSender => Matcher::Substring(pattern.pattern.to_lowercase()),
        BlockKind::SenderRegex => build(pattern).map_or(Matcher::Never, Matcher::Sender),
        BlockKind::BodyRegex => build(pattern).map_or(Matcher::Never, Matcher::Body),
    }
}

fn build(pattern: &BlockedPattern) -> Option<Regex> {
    match RegexBuilder::new(&pattern.pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(
                id = pattern.id,
                pattern = %pattern.pattern,
                error = %e,
                "Skipping blocked pattern with invalid regex"
            );
            None
        }
    }
}

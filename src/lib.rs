//! inbox-rules: a rule-driven Gmail daemon.

pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod oracle;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod testing;

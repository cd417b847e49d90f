use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_rules::config::{self, DaemonConfig};
use inbox_rules::error::ValidationError;
use inbox_rules::llm::create_provider;
use inbox_rules::mailbox::GmailMailbox;
use inbox_rules::oracle::LlmOracle;
use inbox_rules::pipeline::{
    ActionSpec, HttpLinkVisitor, MessageAssistant, Poller, ReplyMode, RuleEngine, RuleManager,
    StaticRuleSet, Unsubscriber, spawn_poller,
};
use inbox_rules::store::LibSqlStore;

#[derive(Parser, Debug)]
#[command(name = "inbox-rules", version, about = "Rule-driven Gmail daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the mailbox and apply rules until interrupted.
    Run,
    /// Block a single sender address.
    BlockSender { email: String },
    /// Block every sender at a domain.
    BlockDomain { domain: String },
    /// Block messages whose body matches a regex.
    BlockBody { pattern: String },
    /// Add a natural-language rule (50 characters max).
    AddNlRule {
        text: String,
        /// Action as `kind[:value]`, e.g. `label:Receipts`, `archive`,
        /// `forward:me@example.com`. Repeat for several.
        #[arg(long = "action", value_parser = parse_action, required = true)]
        actions: Vec<ActionSpec>,
    },
    /// Ask the model to write a static rule from a description.
    AddRuleFromPrompt { prompt: String },
    /// Create a label on the provider and record it locally.
    CreateLabel { name: String },
    /// Follow unsubscribe links for messages in a folder.
    Unsubscribe {
        folder: String,
        #[arg(long, default_value_t = 100)]
        max: u32,
    },
    /// Print an AI summary of a message.
    Summarize { id: String },
    /// Generate a reply to a message and save it as a draft.
    Reply {
        id: String,
        /// Extra instructions for the reply.
        #[arg(long, default_value = "")]
        context: String,
        /// Send the reply instead of drafting it.
        #[arg(long)]
        send: bool,
    },
}

/// Everything the subcommands share. Gmail and LLM credentials are only
/// read by the commands that talk to those services.
struct App {
    config: DaemonConfig,
    store: Arc<LibSqlStore>,
    rules: Arc<StaticRuleSet>,
    http: reqwest::Client,
}

impl App {
    async fn build(config: DaemonConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            LibSqlStore::new_local(&config.db_path)
                .await
                .with_context(|| format!("opening database {}", config.db_path.display()))?,
        );
        let rules = Arc::new(StaticRuleSet::load(&config.rules_file).await?);

        Ok(Self {
            config,
            store,
            rules,
            http: reqwest::Client::new(),
        })
    }

    fn mailbox(&self) -> anyhow::Result<Arc<GmailMailbox>> {
        let token = config::gmail_token()?;
        Ok(Arc::new(GmailMailbox::new(self.http.clone(), token)))
    }

    fn oracle(&self) -> anyhow::Result<Arc<LlmOracle>> {
        let llm = create_provider(&config::llm_config()?)?;
        Ok(Arc::new(LlmOracle::new(llm)))
    }

    fn manager(&self) -> RuleManager {
        RuleManager::new(self.store.clone(), self.rules.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = DaemonConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let app = App::build(config).await?;

    match cli.command {
        Command::Run => run(app).await?,
        Command::BlockSender { email } => {
            let id = app.manager().block_sender(&email).await?;
            println!("Blocked sender {email} (id {id})");
        }
        Command::BlockDomain { domain } => {
            let id = app.manager().block_domain(&domain).await?;
            println!("Blocked domain {domain} (id {id})");
        }
        Command::BlockBody { pattern } => {
            let id = app.manager().block_body_pattern(&pattern).await?;
            println!("Blocked body pattern {pattern} (id {id})");
        }
        Command::AddNlRule { text, actions } => {
            let id = app
                .manager()
                .add_natural_language_rule(&text, &actions)
                .await?;
            println!("Added natural-language rule {id}");
        }
        Command::AddRuleFromPrompt { prompt } => {
            let oracle = app.oracle()?;
            let rule = app
                .manager()
                .create_rule_from_prompt(oracle.as_ref(), &prompt)
                .await?;
            println!("{}", serde_json::to_string_pretty(&rule)?);
        }
        Command::CreateLabel { name } => {
            let mailbox = app.mailbox()?;
            let label = app
                .manager()
                .create_synced_label(mailbox.as_ref(), &name)
                .await?;
            println!("Label {} ({})", label.name, label.id);
        }
        Command::Unsubscribe { folder, max } => {
            let unsubscriber = Unsubscriber::new(
                app.mailbox()?,
                app.oracle()?,
                app.rules.clone(),
                Arc::new(HttpLinkVisitor::new(app.http.clone())),
            );
            let report = unsubscriber.process_unsubscribes(&folder, max).await?;
            println!(
                "Examined {}, unsubscribed from {}, flagged {}, no link {}, failed {}",
                report.examined,
                report.unsubscribed.len(),
                report.flagged,
                report.no_link,
                report.failed
            );
        }
        Command::Summarize { id } => {
            let assistant = MessageAssistant::new(app.mailbox()?, app.oracle()?);
            let summary = assistant.summarize(&id).await?;
            if summary.is_empty() {
                println!("Message {id} has no body to summarize");
            } else {
                println!("{summary}");
            }
        }
        Command::Reply { id, context, send } => {
            let assistant = MessageAssistant::new(app.mailbox()?, app.oracle()?);
            let mode = if send { ReplyMode::Send } else { ReplyMode::Draft };
            let outcome = assistant.reply(&id, &context, mode).await?;
            match &outcome.draft_id {
                Some(draft) => println!(
                    "Drafted \"{}\" to {} (draft {draft})",
                    outcome.subject, outcome.to
                ),
                None => println!("Sent \"{}\" to {}", outcome.subject, outcome.to),
            }
            println!("\n{}", outcome.body);
        }
    }
    Ok(())
}

async fn run(app: App) -> anyhow::Result<()> {
    let mailbox = app.mailbox()?;
    let oracle = app.oracle()?;
    let profile = mailbox
        .verify()
        .await
        .context("Gmail authentication failed")?;
    info!(account = %profile, "Authenticated with Gmail");

    let engine = Arc::new(RuleEngine::new(app.store.clone(), oracle, app.rules.clone()));
    let poller = Arc::new(
        Poller::new(
            mailbox,
            engine,
            app.store.clone(),
            &app.config,
            Utc::now(),
        )
        .await,
    );

    info!(
        poll_secs = app.config.poll_interval.as_secs(),
        archive_secs = app.config.archive_interval.as_secs(),
        static_rules = app.rules.len().await,
        "Daemon started"
    );
    let (handle, shutdown) = spawn_poller(poller, app.config.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown requested, finishing current cycle");
    let _ = shutdown.send(true);

    if let Err(e) = handle.await {
        error!(error = %e, "Poller task ended abnormally");
    }
    info!("Daemon stopped");
    Ok(())
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-rules.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}

/// Parse `kind[:value]` into an action.
fn parse_action(arg: &str) -> Result<ActionSpec, ValidationError> {
    let (kind, value) = match arg.split_once(':') {
        Some((kind, value)) => (kind, Some(value.trim())),
        None => (arg, None),
    };
    match (kind.trim().to_ascii_lowercase().as_str(), value) {
        ("label", Some(v)) if !v.is_empty() => Ok(ActionSpec::label(v)),
        ("label", _) => Err(ValidationError::EmptyLabel(String::new())),
        ("archive", _) => Ok(ActionSpec::Archive),
        ("delete", _) => Ok(ActionSpec::Delete),
        ("markread" | "mark_read" | "mark-read", _) => Ok(ActionSpec::MarkRead),
        ("star", _) => Ok(ActionSpec::Star),
        ("forward", Some(v)) if !v.is_empty() => Ok(ActionSpec::forward(v)),
        ("forward", _) => Err(ValidationError::MissingForwardTarget),
        (other, _) => Err(ValidationError::UnknownAction(other.to_string())),
    }
}

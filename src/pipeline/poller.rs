//! Mailbox poller: one driver task with two schedules.
//!
//! Each cycle:
//! 1. Run the auto-archive sweep if `archive_interval` has elapsed
//! 2. List messages received after the watermark
//! 3. Fetch → evaluate → dispatch each one, in listing order
//! 4. Advance the watermark to the cycle start and persist it
//!
//! Per-message failures are logged and counted; they never hold back the
//! watermark.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::mailbox::{MailboxService, MessageFormat};
use crate::pipeline::dispatcher::ActionDispatcher;
use crate::pipeline::engine::RuleEngine;
use crate::pipeline::sweep::ArchiveSweeper;
use crate::store::CheckpointStore;

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether the auto-archive sweep ran this cycle.
    pub swept: bool,
    pub listed: usize,
    pub processed: usize,
    pub failed: usize,
}

struct PollState {
    watermark: DateTime<Utc>,
    last_sweep: DateTime<Utc>,
}

/// Drives poll cycles against the mailbox.
pub struct Poller {
    mailbox: Arc<dyn MailboxService>,
    engine: Arc<RuleEngine>,
    dispatcher: Arc<ActionDispatcher>,
    sweeper: ArchiveSweeper,
    checkpoints: Arc<dyn CheckpointStore>,
    archive_interval: chrono::Duration,
    poll_max: u32,
    state: Mutex<PollState>,
}

impl Poller {
    /// Build a poller, resuming from the persisted watermark if there is one.
    ///
    /// Without a stored watermark polling starts at `now`, so the existing
    /// backlog is left to the sweep. The first sweep is due one
    /// `archive_interval` after startup.
    pub async fn new(
        mailbox: Arc<dyn MailboxService>,
        engine: Arc<RuleEngine>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: &DaemonConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let watermark = match checkpoints.get_watermark().await {
            Ok(Some(w)) => {
                info!(watermark = %w, "Resuming from stored watermark");
                w
            }
            Ok(None) => now,
            Err(e) => {
                warn!(error = %e, "Failed to load watermark, starting from now");
                now
            }
        };

        let dispatcher = Arc::new(ActionDispatcher::new(mailbox.clone()));
        let sweeper = ArchiveSweeper::new(
            mailbox.clone(),
            engine.clone(),
            dispatcher.clone(),
            config.sweep_max,
        );
        let archive_interval = chrono::Duration::from_std(config.archive_interval)
            .unwrap_or_else(|_| chrono::Duration::hours(4));

        Self {
            mailbox,
            engine,
            dispatcher,
            sweeper,
            checkpoints,
            archive_interval,
            poll_max: config.poll_max,
            state: Mutex::new(PollState {
                watermark,
                last_sweep: now,
            }),
        }
    }

    pub async fn watermark(&self) -> DateTime<Utc> {
        self.state.lock().await.watermark
    }

    /// Run one poll cycle starting at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut state = self.state.lock().await;
        let mut report = CycleReport::default();

        if now - state.last_sweep >= self.archive_interval {
            self.sweeper.run(now).await;
            state.last_sweep = now;
            report.swept = true;
        }

        let query = format!("after:{}", state.watermark.timestamp());
        match self.mailbox.list_messages(&query, self.poll_max).await {
            Ok(ids) => {
                report.listed = ids.len();
                if !ids.is_empty() {
                    info!(count = ids.len(), "Found new messages");
                }
                for id in ids {
                    if self.process_one(&id).await {
                        report.processed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
            Err(e) => error!(error = %e, query = %query, "Failed to list new messages"),
        }

        if now > state.watermark {
            state.watermark = now;
        }
        if let Err(e) = self.checkpoints.set_watermark(state.watermark).await {
            warn!(error = %e, "Failed to persist watermark");
        }

        report
    }

    /// Returns false when the message could not be handled.
    async fn process_one(&self, id: &str) -> bool {
        let message = match self.mailbox.get_message(id, MessageFormat::Full).await {
            Ok(m) => m,
            Err(e) => {
                warn!(message_id = %id, error = %e, "Failed to fetch message");
                return false;
            }
        };

        let evaluation = self.engine.evaluate(&message).await;
        if evaluation.actions.is_empty() {
            debug!(message_id = %id, "No rule matched");
            return true;
        }

        info!(
            message_id = %id,
            stage = evaluation.stage.label(),
            actions = evaluation.actions.len(),
            "Applying actions"
        );
        let dispatch = self.dispatcher.apply(id, &evaluation.actions).await;
        dispatch.failed() == 0
    }
}

/// Spawn the poll loop.
///
/// The first cycle runs immediately. Send `true` on the returned channel to
/// stop; a cycle already in progress finishes first.
pub fn spawn_poller(
    poller: Arc<Poller>,
    poll_interval: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = poll_interval.as_secs(), "Poller started");
        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        info!("Shutdown handle dropped, poller exiting");
                        return;
                    }
                }
            }
            if *shutdown_rx.borrow() {
                info!("Poller shutting down");
                return;
            }

            let report = poller.run_cycle(Utc::now()).await;
            if report.listed > 0 || report.swept {
                info!(
                    swept = report.swept,
                    listed = report.listed,
                    processed = report.processed,
                    failed = report.failed,
                    "Poll cycle complete"
                );
            }
        }
    });

    (handle, shutdown_tx)
}

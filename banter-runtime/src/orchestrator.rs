//! The chat orchestrator: entry point the game server calls for every chat
//! message.
//!
//! ```text
//!  ChatMessage ──▶ enabled? ──▶ sender known? ──▶ bot sender allowed?
//!                                                        │
//!                 ┌──────────────────────────────────────┘
//!                 ▼
//!            admission ──▶ probability roll ──▶ selection ──▶ queue.push
//!                                                                │
//!                              DispatchWorker ◀──────────────────┘
//!                                     │
//!                                     ▼
//!                             DeliveryScheduler
//! ```
//!
//! `on_chat` never fails: every way a message can fall out of the pipeline is
//! a [`ChatDisposition`] variant, and the player simply sees no reply.

use std::sync::Arc;
use std::time::Duration;

use banter_core::datastore::Datastore;
use banter_core::error::Result;
use banter_core::types::ChatMessage;
use banter_core::world::{Presentation, World};
use banter_core::{
    AdmissionController, BanterConfig, ConversationMemory, PersonalitySelector, Rejection,
    ResponderSelector,
};
use banter_llm::TextGenerator;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delivery::DeliveryScheduler;
use crate::dispatch::{
    DispatchQueue, DispatchWorker, JobHandle, NewJob, QueueError, QueueStats, WorkerDeps, now,
};
use crate::metrics::{MetricsSnapshot, PipelineMetrics, bump};

/// What happened to one chat message.
#[derive(Debug)]
pub enum ChatDisposition {
    /// The pipeline is switched off.
    Disabled,
    /// The sender is a bot and bot-to-bot replies are off.
    IgnoredBot,
    /// The sender is not in the world.
    SenderUnknown,
    /// Admission control refused the message.
    Rejected(Rejection),
    /// The response-probability roll failed.
    NotChosen,
    /// No bot is eligible to answer.
    NoResponders,
    /// The dispatch queue is at capacity.
    QueueFull,
    /// The pipeline is shutting down.
    Stopping,
    /// A job was queued.
    Queued(JobHandle),
}

impl ChatDisposition {
    /// Whether a job was queued.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    /// The job handle, if a job was queued.
    #[must_use]
    pub fn into_handle(self) -> Option<JobHandle> {
        match self {
            Self::Queued(handle) => Some(handle),
            _ => None,
        }
    }
}

/// What [`ChatOrchestrator::shutdown`] managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued jobs resolved with `Stopping`.
    pub jobs_stopped: usize,
    /// The worker exited within the grace period.
    pub worker_joined: bool,
    /// Every delivery task finished within the grace period.
    pub deliveries_drained: bool,
}

/// Owns every pipeline component and the background tasks.
pub struct ChatOrchestrator {
    config: BanterConfig,
    world: Arc<dyn World>,
    admission: Arc<AdmissionController>,
    selector: ResponderSelector,
    memory: Arc<ConversationMemory>,
    personalities: Arc<PersonalitySelector>,
    queue: Arc<DispatchQueue>,
    delivery: Arc<DeliveryScheduler>,
    metrics: Arc<PipelineMetrics>,
    rng: Mutex<StdRng>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("enabled", &self.config.general.enabled)
            .field("queue", &self.queue.stats())
            .field("memory_pairs", &self.memory.pair_count())
            .finish_non_exhaustive()
    }
}

impl ChatOrchestrator {
    /// Build the pipeline and spawn its worker and sweep tasks.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        config: BanterConfig,
        world: Arc<dyn World>,
        presentation: Arc<dyn Presentation>,
        datastore: Arc<dyn Datastore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self::start_with_rng(config, world, presentation, datastore, generator, StdRng::from_entropy())
    }

    /// Like [`start`](Self::start), with every random draw derived from
    /// `seed`.
    #[must_use]
    pub fn start_seeded(
        config: BanterConfig,
        world: Arc<dyn World>,
        presentation: Arc<dyn Presentation>,
        datastore: Arc<dyn Datastore>,
        generator: Arc<dyn TextGenerator>,
        seed: u64,
    ) -> Self {
        Self::start_with_rng(config, world, presentation, datastore, generator, StdRng::seed_from_u64(seed))
    }

    fn start_with_rng(
        config: BanterConfig,
        world: Arc<dyn World>,
        presentation: Arc<dyn Presentation>,
        datastore: Arc<dyn Datastore>,
        generator: Arc<dyn TextGenerator>,
        mut root: StdRng,
    ) -> Self {
        let token = CancellationToken::new();
        let metrics = Arc::new(PipelineMetrics::new());
        let admission = Arc::new(AdmissionController::starting_at(config.rate_limit.clone(), now()));
        let memory = Arc::new(ConversationMemory::new(config.memory.clone()));
        let personalities = Arc::new(PersonalitySelector::from_path(config.personality.file.as_deref()));
        let queue = Arc::new(DispatchQueue::with_metrics(
            config.queue.max_size,
            config.queue.job_timeout(),
            Arc::clone(&metrics),
        ));
        let delivery = Arc::new(DeliveryScheduler::new(
            Arc::clone(&world),
            presentation,
            config.delivery.clone(),
            StdRng::seed_from_u64(root.r#gen()),
            token.child_token(),
            Arc::clone(&metrics),
        ));

        let worker = DispatchWorker::new(
            Arc::clone(&queue),
            WorkerDeps {
                world: Arc::clone(&world),
                admission: Arc::clone(&admission),
                memory: Arc::clone(&memory),
                personalities: Arc::clone(&personalities),
                datastore,
                generator,
                delivery: Arc::clone(&delivery),
                metrics: Arc::clone(&metrics),
            },
            StdRng::seed_from_u64(root.r#gen()),
        );
        let worker = tokio::spawn(worker.run(token.clone()));
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&memory),
            Arc::clone(&admission),
            config.memory.sweep_interval(),
            token.clone(),
        ));

        info!(
            enabled = config.general.enabled,
            queue_size = config.queue.max_size,
            memory = config.memory.enabled,
            "Chat orchestrator started"
        );

        Self {
            selector: ResponderSelector::new(config.chat.clone()),
            config,
            world,
            admission,
            memory,
            personalities,
            queue,
            delivery,
            metrics,
            rng: Mutex::new(root),
            token,
            worker: Mutex::new(Some(worker)),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Run one chat message through admission, selection and enqueueing.
    pub fn on_chat(&self, message: &ChatMessage) -> ChatDisposition {
        bump(&self.metrics.messages_seen);

        if !self.config.general.enabled {
            bump(&self.metrics.messages_ignored);
            return ChatDisposition::Disabled;
        }
        let Some(sender) = self.world.participant(message.sender) else {
            bump(&self.metrics.messages_ignored);
            debug!(sender = %message.sender, "Chat from unknown participant ignored");
            return ChatDisposition::SenderUnknown;
        };
        if sender.is_bot && !self.config.chat.reply_to_bots {
            bump(&self.metrics.messages_ignored);
            return ChatDisposition::IgnoredBot;
        }

        let at = now();
        if let Err(rejection) = self.admission.admit(sender.id, at) {
            bump(&self.metrics.messages_rejected);
            debug!(sender = %sender.id, reason = %rejection, "Message not admitted");
            return ChatDisposition::Rejected(rejection);
        }
        bump(&self.metrics.messages_admitted);

        let candidates = {
            let mut rng = self.rng.lock();
            let p = self.config.chat.response_probability;
            let probability = if p.is_nan() { 1.0 } else { p.clamp(0.0, 1.0) };
            if !rng.gen_bool(probability) {
                bump(&self.metrics.messages_not_chosen);
                debug!(sender = %sender.id, probability, "Response roll failed");
                return ChatDisposition::NotChosen;
            }
            self.selector
                .select(&sender, &message.scope, self.world.as_ref(), &mut *rng)
        };
        if candidates.is_empty() {
            bump(&self.metrics.selections_empty);
            debug!(sender = %sender.id, scope = message.scope.label(), "No eligible responders");
            return ChatDisposition::NoResponders;
        }

        let max_replies = self.selector.max_replies(&candidates);
        let job = NewJob {
            sender: sender.id,
            candidates,
            text: message.text.clone(),
            scope: message.scope.clone(),
            team: sender.team,
            max_replies,
        };
        match self.queue.push(job, at) {
            Ok(handle) => {
                bump(&self.metrics.jobs_queued);
                debug!(job = handle.id(), sender = %sender.id, max_replies, "Job queued");
                ChatDisposition::Queued(handle)
            }
            Err(QueueError::Full { capacity }) => {
                bump(&self.metrics.jobs_dropped);
                warn!(sender = %sender.id, capacity, "Dispatch queue full, message dropped");
                ChatDisposition::QueueFull
            }
            Err(QueueError::Stopping) => ChatDisposition::Stopping,
        }
    }

    /// Re-read the configured personality file, replacing the pool
    /// atomically. Without a configured file this is a no-op.
    ///
    /// # Errors
    /// Returns the load error; the previous pool stays active.
    pub fn reload_personalities(&self) -> Result<()> {
        match self.config.personality.file.as_deref() {
            Some(path) => self.personalities.reload(path),
            None => Ok(()),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Queue counters.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Conversation memory, for inspection.
    #[must_use]
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Replies scheduled but not yet finished.
    #[must_use]
    pub fn pending_deliveries(&self) -> usize {
        self.delivery.pending()
    }

    /// Stop the pipeline.
    ///
    /// Queued jobs resolve with `Stopping` right away. The worker and the
    /// delivery tasks each get the configured grace period; anything still
    /// running after that is logged and abandoned.
    pub async fn shutdown(&self) -> ShutdownReport {
        let grace = self.config.delivery.shutdown_grace();
        self.token.cancel();
        let jobs_stopped = self.queue.drain_stopping();

        let worker = self.worker.lock().take();
        let worker_joined = match worker {
            Some(handle) => join_within(handle, grace, "dispatch worker").await,
            None => true,
        };
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            join_within(handle, grace, "memory sweeper").await;
        }

        let deliveries_drained = self.delivery.shutdown(grace).await;
        let report = ShutdownReport {
            jobs_stopped,
            worker_joined,
            deliveries_drained,
        };
        info!(
            jobs_stopped,
            worker_joined,
            deliveries_drained,
            "Chat orchestrator stopped"
        );
        report
    }
}

async fn join_within(mut handle: JoinHandle<()>, grace: Duration, name: &'static str) -> bool {
    if let Ok(joined) = tokio::time::timeout(grace, &mut handle).await {
        if let Err(e) = joined {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
        true
    } else {
        warn!(
            task = name,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "Task still running after grace period, aborting"
        );
        handle.abort();
        false
    }
}

async fn sweep_loop(
    memory: Arc<ConversationMemory>,
    admission: Arc<AdmissionController>,
    every: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let at = now();
        let report = memory.sweep(at);
        let pruned = admission.prune(at);
        if report.expired_entries > 0 || report.removed_pairs > 0 || pruned > 0 {
            debug!(
                expired_entries = report.expired_entries,
                removed_pairs = report.removed_pairs,
                pruned_stamps = pruned,
                "Sweep finished"
            );
        }
    }
}

//! Response dispatch: one FIFO of jobs, one worker draining it.
//!
//! ```text
//! on_chat ─push─▶ ┌──────────────────────────────┐
//!                 │ job₀ │ job₁ │ job₂ │ …        │  (≤ max_size)
//!                 └──┬───────────────────────────┘
//!                    │ next_turn(now)
//!                    ▼
//!     expired? ─▶ pop, Expired        exhausted? ─▶ pop, Completed
//!                    │ else
//!                    ▼
//!     service candidates[replies_generated] ─▶ finish_turn ─▶ counter += 1
//! ```
//!
//! The head job stays at the head until it is exhausted or expired, so jobs
//! are serviced strictly in arrival order and candidates strictly in
//! selection order. Every pushed job resolves its [`JobHandle`] exactly once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use banter_core::datastore::{Datastore, RecordKind};
use banter_core::types::{ChatScope, Participant, ParticipantId, Team};
use banter_core::world::World;
use banter_core::{AdmissionController, ConversationMemory, PersonalitySelector};
use banter_llm::prompt::{self, PromptInputs};
use banter_llm::TextGenerator;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::delivery::DeliveryScheduler;
use crate::metrics::{PipelineMetrics, bump};

/// Lines of conversation log kept per bot in the datastore.
pub const CONVERSATION_LOG_LINES: usize = 20;

/// Current time on the runtime clock.
///
/// Follows Tokio's clock, so paused-time tests see a consistent `now`.
#[must_use]
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// ---------------------------------------------------------------------------
// Jobs and handles
// ---------------------------------------------------------------------------

/// How a job left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every turn was taken.
    Completed {
        /// Candidates serviced (including skipped and failed turns).
        attempted: usize,
        /// Turns that produced a reply handed to delivery.
        delivered: usize,
    },
    /// The job aged out before all its turns were taken.
    Expired,
    /// The pipeline shut down first.
    Stopping,
}

/// Caller-side handle to a queued job.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Queue-assigned job id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the job to leave the queue.
    pub async fn outcome(self) -> JobOutcome {
        self.rx.await.unwrap_or(JobOutcome::Stopping)
    }

    /// The outcome, if the job has already left the queue.
    pub fn try_outcome(&mut self) -> Option<JobOutcome> {
        self.rx.try_recv().ok()
    }
}

/// A job as submitted by the orchestrator.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Who spoke.
    pub sender: ParticipantId,
    /// Bots that may answer, in selection order.
    pub candidates: Vec<ParticipantId>,
    /// The message.
    pub text: String,
    /// Where it was said.
    pub scope: ChatScope,
    /// Sender's team at the time of the message.
    pub team: Team,
    /// Cap on turns for this job.
    pub max_replies: usize,
}

#[derive(Debug)]
struct Job {
    id: u64,
    created_at: Instant,
    sender: ParticipantId,
    candidates: Vec<ParticipantId>,
    text: String,
    scope: ChatScope,
    team: Team,
    replies_generated: usize,
    max_replies: usize,
    delivered: usize,
    done: Option<oneshot::Sender<JobOutcome>>,
}

impl Job {
    fn exhausted(&self) -> bool {
        self.replies_generated >= self.max_replies || self.replies_generated >= self.candidates.len()
    }

    fn resolve(&mut self, outcome: JobOutcome) {
        if let Some(tx) = self.done.take() {
            // The caller may have dropped its handle.
            let _ = tx.send(outcome);
        }
    }
}

/// One candidate's turn, handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Job the turn belongs to.
    pub job_id: u64,
    /// Position of the responder in the candidate list.
    pub index: usize,
    /// Who spoke.
    pub sender: ParticipantId,
    /// Bot whose turn it is.
    pub responder: ParticipantId,
    /// The message.
    pub text: String,
    /// Where it was said.
    pub scope: ChatScope,
    /// Sender's team when the message was said.
    pub team: Team,
}

/// Why a job was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue already holds `capacity` jobs.
    #[error("dispatch queue full ({capacity} jobs)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
    /// The queue no longer accepts work.
    #[error("dispatch queue is stopping")]
    Stopping,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// Jobs currently queued.
    pub depth: usize,
    /// Jobs accepted.
    pub enqueued: u64,
    /// Jobs refused because the queue was full.
    pub dropped: u64,
    /// Jobs that aged out.
    pub expired: u64,
    /// Jobs that took all their turns.
    pub completed: u64,
    /// Jobs resolved by shutdown.
    pub stopped: u64,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct QueueInner {
    jobs: VecDeque<Job>,
    next_id: u64,
    stopping: bool,
    stats: QueueStats,
}

/// Bounded FIFO of response jobs.
#[derive(Debug)]
pub struct DispatchQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    job_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl DispatchQueue {
    /// A queue holding at most `capacity` jobs, each living at most
    /// `job_timeout`.
    #[must_use]
    pub fn new(capacity: usize, job_timeout: Duration) -> Self {
        Self::with_metrics(capacity, job_timeout, Arc::new(PipelineMetrics::new()))
    }

    /// Like [`new`](Self::new), counting expired jobs into `metrics`.
    #[must_use]
    pub fn with_metrics(capacity: usize, job_timeout: Duration, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            capacity,
            job_timeout,
            metrics,
        }
    }

    /// Enqueue a job created at `now` and wake the worker.
    ///
    /// # Errors
    /// [`QueueError::Full`] at capacity, [`QueueError::Stopping`] after
    /// [`drain_stopping`](Self::drain_stopping).
    pub fn push(&self, job: NewJob, now: Instant) -> Result<JobHandle, QueueError> {
        let mut inner = self.inner.lock();
        if inner.stopping {
            return Err(QueueError::Stopping);
        }
        if inner.jobs.len() >= self.capacity {
            inner.stats.dropped += 1;
            return Err(QueueError::Full { capacity: self.capacity });
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let (tx, rx) = oneshot::channel();
        inner.jobs.push_back(Job {
            id,
            created_at: now,
            sender: job.sender,
            candidates: job.candidates,
            text: job.text,
            scope: job.scope,
            team: job.team,
            replies_generated: 0,
            max_replies: job.max_replies,
            delivered: 0,
            done: Some(tx),
        });
        inner.stats.enqueued += 1;
        inner.stats.depth = inner.jobs.len();
        drop(inner);

        self.notify.notify_one();
        Ok(JobHandle { id, rx })
    }

    /// Retire expired and exhausted jobs from the head, then hand out the
    /// head job's next turn. The job itself stays queued.
    pub fn next_turn(&self, now: Instant) -> Option<Turn> {
        let mut inner = self.inner.lock();
        let turn = loop {
            let Some(head) = inner.jobs.front_mut() else {
                break None;
            };
            if now.saturating_duration_since(head.created_at) > self.job_timeout {
                debug!(job = head.id, taken = head.replies_generated, "Job expired");
                head.resolve(JobOutcome::Expired);
                inner.jobs.pop_front();
                inner.stats.expired += 1;
                bump(&self.metrics.jobs_expired);
                continue;
            }
            if head.exhausted() {
                let outcome = JobOutcome::Completed {
                    attempted: head.replies_generated,
                    delivered: head.delivered,
                };
                head.resolve(outcome);
                inner.jobs.pop_front();
                inner.stats.completed += 1;
                continue;
            }
            break Some(Turn {
                job_id: head.id,
                index: head.replies_generated,
                sender: head.sender,
                responder: head.candidates[head.replies_generated],
                text: head.text.clone(),
                scope: head.scope.clone(),
                team: head.team,
            });
        };
        inner.stats.depth = inner.jobs.len();
        turn
    }

    /// Count the turn handed out for `job_id` and pop the job once it is
    /// exhausted. Unknown ids are ignored.
    pub fn finish_turn(&self, job_id: u64, delivered: bool) {
        let mut inner = self.inner.lock();
        let Some(head) = inner.jobs.front_mut().filter(|j| j.id == job_id) else {
            return;
        };
        head.replies_generated += 1;
        if delivered {
            head.delivered += 1;
        }
        if head.exhausted() {
            let outcome = JobOutcome::Completed {
                attempted: head.replies_generated,
                delivered: head.delivered,
            };
            head.resolve(outcome);
            inner.jobs.pop_front();
            inner.stats.completed += 1;
            inner.stats.depth = inner.jobs.len();
        }
    }

    /// Stop accepting jobs and resolve every queued one with
    /// [`JobOutcome::Stopping`]. Returns how many were resolved.
    pub fn drain_stopping(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.stopping = true;
        let mut drained = 0;
        while let Some(mut job) = inner.jobs.pop_front() {
            job.resolve(JobOutcome::Stopping);
            drained += 1;
        }
        inner.stats.stopped += u64::try_from(drained).unwrap_or(u64::MAX);
        inner.stats.depth = 0;
        drop(inner);
        self.notify.notify_waiters();
        drained
    }

    /// Whether [`drain_stopping`](Self::drain_stopping) has run.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.inner.lock().stopping
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }

    /// Resolves after the next [`push`](Self::push) (or immediately if one
    /// happened since the last wait).
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Shared components the worker reads and writes while servicing a turn.
#[derive(Clone)]
pub struct WorkerDeps {
    /// Live world lookups.
    pub world: Arc<dyn World>,
    /// Bot and global reply cooldowns.
    pub admission: Arc<AdmissionController>,
    /// Pair history.
    pub memory: Arc<ConversationMemory>,
    /// Emotion and profile selection.
    pub personalities: Arc<PersonalitySelector>,
    /// Persisted character records.
    pub datastore: Arc<dyn Datastore>,
    /// Text generation.
    pub generator: Arc<dyn TextGenerator>,
    /// Reply emission.
    pub delivery: Arc<DeliveryScheduler>,
    /// Counters.
    pub metrics: Arc<PipelineMetrics>,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnResult {
    Delivered,
    Forfeited,
    Cancelled,
}

/// The single consumer of a [`DispatchQueue`].
pub struct DispatchWorker {
    queue: Arc<DispatchQueue>,
    deps: WorkerDeps,
    rng: StdRng,
}

impl std::fmt::Debug for DispatchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("queue", &self.queue.stats())
            .finish_non_exhaustive()
    }
}

impl DispatchWorker {
    /// A worker for `queue`. `rng` drives personality selection.
    #[must_use]
    pub fn new(queue: Arc<DispatchQueue>, deps: WorkerDeps, rng: StdRng) -> Self {
        Self { queue, deps, rng }
    }

    /// Drain the queue until `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        info!("Dispatch worker started");
        loop {
            if token.is_cancelled() {
                break;
            }
            if let Some(turn) = self.queue.next_turn(now()) {
                let job_id = turn.job_id;
                match self.service(&turn, &token).await {
                    TurnResult::Delivered => self.queue.finish_turn(job_id, true),
                    TurnResult::Forfeited => self.queue.finish_turn(job_id, false),
                    TurnResult::Cancelled => break,
                }
                continue;
            }
            tokio::select! {
                () = token.cancelled() => break,
                () = self.queue.wait_for_work() => {}
            }
        }
        info!("Dispatch worker stopped");
    }

    async fn service(&mut self, turn: &Turn, token: &CancellationToken) -> TurnResult {
        let deps = &self.deps;

        if !deps.admission.responder_ready(turn.responder, now()) {
            bump(&deps.metrics.turns_skipped);
            debug!(job = turn.job_id, responder = %turn.responder, "Responder on cooldown, turn skipped");
            return TurnResult::Forfeited;
        }

        let wait = deps.admission.global_wait(now());
        if !wait.is_zero() {
            tokio::select! {
                () = token.cancelled() => return TurnResult::Cancelled,
                () = tokio::time::sleep(wait) => {}
            }
        }

        // Snapshots are taken here and not reused across the network call.
        let (Some(responder), Some(sender)) = (
            deps.world.participant(turn.responder),
            deps.world.participant(turn.sender),
        ) else {
            bump(&deps.metrics.turns_skipped);
            debug!(job = turn.job_id, responder = %turn.responder, "Participant left, turn skipped");
            return TurnResult::Forfeited;
        };

        let emotion = deps.personalities.detect_emotion(&turn.text);
        let profile = deps.personalities.select_personality(&emotion, &mut self.rng);
        let style = deps.personalities.response_style(&emotion);
        let history = deps.memory.context_at(sender.id, responder.id, now());
        let backstory = deps
            .datastore
            .get(responder.id, RecordKind::Backstory)
            .unwrap_or_else(|e| {
                warn!(responder = %responder.id, error = %e, "Backstory lookup failed");
                None
            });
        let standing = deps.datastore.standing(responder.id, sender.id).unwrap_or_else(|e| {
            warn!(responder = %responder.id, error = %e, "Standing lookup failed");
            0
        });

        let request = prompt::compose(&PromptInputs {
            profile: &profile,
            responder: &responder,
            sender: &sender,
            scope: &turn.scope,
            response_style: style.as_deref(),
            history: &history,
            backstory: backstory.as_deref(),
            standing,
            message: &turn.text,
        });

        let result = tokio::select! {
            () = token.cancelled() => return TurnResult::Cancelled,
            result = deps.generator.generate(&request) => result,
        };

        match result {
            Ok(reply) => {
                bump(&deps.metrics.generation_ok);
                self.record_exchange(&sender, &responder, &turn.text, &reply, &emotion, &profile.id);
                let delay = self
                    .deps
                    .delivery
                    .deliver(responder.id, sender.id, reply, &turn.scope);
                info!(
                    job = turn.job_id,
                    turn = turn.index,
                    team = turn.team.0,
                    responder = %responder.name,
                    sender = %sender.name,
                    emotion = %emotion,
                    personality = %profile.id,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reply generated"
                );
                TurnResult::Delivered
            }
            Err(e) => {
                deps.metrics.record_generation_failure(&e);
                error!(
                    job = turn.job_id,
                    turn = turn.index,
                    responder = %responder.id,
                    sender = %sender.id,
                    class = e.class(),
                    error = %e,
                    "Generation failed, turn forfeited"
                );
                TurnResult::Forfeited
            }
        }
    }

    fn record_exchange(
        &self,
        sender: &Participant,
        responder: &Participant,
        message: &str,
        reply: &str,
        emotion: &str,
        personality: &str,
    ) {
        let deps = &self.deps;
        let at = now();
        deps.memory.append_at(sender, responder, message, reply, at);
        deps.admission.record_response(responder.id, at);

        let line = format!("{}: {message} | {}: {reply}", sender.name, responder.name);
        let writes = [
            deps.datastore
                .append(responder.id, RecordKind::ConversationLog, &line, CONVERSATION_LOG_LINES),
            deps.datastore.put(responder.id, RecordKind::EmotionalState, emotion),
            deps.datastore.put(responder.id, RecordKind::LastPersonality, personality),
            deps.datastore.adjust_standing(responder.id, sender.id, 1).map(|_| ()),
        ];
        for err in writes.into_iter().filter_map(Result::err) {
            warn!(responder = %responder.id, error = %err, "Datastore write failed");
        }
    }
}

//! End-to-end scenarios: a chat message goes in, replies come out.
//!
//! Everything runs on a paused Tokio clock with a scripted generator, so
//! delays, cooldowns and timeouts are exact and the tests are instant.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use banter_core::admission::Rejection;
use banter_core::config::{BanterConfig, DeliveryConfig};
use banter_core::datastore::{Datastore, RecordKind, SqliteDatastore};
use banter_core::types::{ChatMessage, ChatScope, GuildId, Participant, ParticipantId, Position, RegionId};
use banter_core::world::{InMemoryWorld, Presentation, ReplyChannel};
use banter_llm::{GenerationError, GenerationRequest, TextGenerator};
use banter_runtime::{ChatDisposition, ChatOrchestrator, JobOutcome};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

enum Step {
    Reply(&'static str),
    Fail500,
    Slow(Duration, &'static str),
    Hang,
}

/// Plays back a script of results; replies "Well met!" once it runs out.
#[derive(Default)]
struct ScriptedGenerator {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn with(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::default(),
        })
    }

    fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.lock().push(request.clone());
        let step = self.script.lock().pop_front().unwrap_or(Step::Reply("Well met!"));
        match step {
            Step::Reply(text) => Ok(text.to_string()),
            Step::Fail500 => Err(GenerationError::Service {
                status: Some(500),
                message: "internal error".into(),
            }),
            Step::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text.to_string())
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Interrupt(ParticipantId),
    Emit(ParticipantId, ReplyChannel, String),
    Pacified(ParticipantId, bool),
}

#[derive(Default)]
struct RecordingPresentation(Mutex<Vec<Event>>);

impl RecordingPresentation {
    fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    fn emits(&self) -> Vec<(ParticipantId, ReplyChannel, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Emit(id, channel, text) => Some((id, channel, text)),
                _ => None,
            })
            .collect()
    }
}

impl Presentation for RecordingPresentation {
    fn emit(&self, speaker: ParticipantId, channel: &ReplyChannel, text: &str) {
        self.0.lock().push(Event::Emit(speaker, channel.clone(), text.to_string()));
    }
    fn interrupt(&self, participant: ParticipantId) {
        self.0.lock().push(Event::Interrupt(participant));
    }
    fn set_pacified(&self, participant: ParticipantId, pacified: bool) {
        self.0.lock().push(Event::Pacified(participant, pacified));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const ALICE: ParticipantId = ParticipantId(1);
const GORAN: ParticipantId = ParticipantId(2);
const MIRA: ParticipantId = ParticipantId(3);

fn character(id: u64, name: &str, is_bot: bool, x: f32) -> Participant {
    let mut p = Participant::new(ParticipantId(id), name, is_bot);
    p.position = Position::new(x, 0.0, 0.0);
    p.region = RegionId(7);
    p.region_name = "Goldshire".into();
    p.guild = Some(GuildId(1));
    p
}

fn config() -> BanterConfig {
    let mut config = BanterConfig::default();
    config.rate_limit.bot_cooldown_ms = 0;
    config.rate_limit.global_cooldown_ms = 0;
    config.delivery = DeliveryConfig {
        min_delay_ms: 1000,
        max_delay_ms: 2000,
        pacify_ms: 500,
        shutdown_grace_ms: 1000,
    };
    config
}

struct Harness {
    world: Arc<InMemoryWorld>,
    presentation: Arc<RecordingPresentation>,
    datastore: Arc<SqliteDatastore>,
    generator: Arc<ScriptedGenerator>,
    orchestrator: ChatOrchestrator,
}

impl Harness {
    fn start(config: BanterConfig, world: InMemoryWorld, generator: Arc<ScriptedGenerator>) -> Self {
        let world = Arc::new(world);
        let presentation = Arc::new(RecordingPresentation::default());
        let datastore = Arc::new(SqliteDatastore::open_in_memory().expect("in-memory datastore"));
        let orchestrator = ChatOrchestrator::start_seeded(
            config,
            world.clone(),
            presentation.clone(),
            datastore.clone(),
            generator.clone(),
            42,
        );
        Self {
            world,
            presentation,
            datastore,
            generator,
            orchestrator,
        }
    }

    fn say(&self, sender: ParticipantId, scope: ChatScope, text: &str) -> ChatDisposition {
        self.orchestrator.on_chat(&ChatMessage::new(sender, scope, text))
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}

fn queued(disposition: ChatDisposition) -> banter_runtime::JobHandle {
    match disposition {
        ChatDisposition::Queued(handle) => handle,
        other => panic!("expected a queued job, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_bot_in_say_range_answers_once() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    world.insert(character(3, "Mira", true, 200.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([Step::Reply("Well met, Alice!")]));

    let handle = queued(h.say(ALICE, ChatScope::Say, "hello there"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 1 });

    let calls = h.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].speaker, "Goran");
    assert!(calls[0].user.contains("\"hello there\""));

    assert_eq!(h.orchestrator.memory().history_len(ALICE, GORAN), 1);
    assert_eq!(
        h.orchestrator.memory().context(ALICE, GORAN),
        "Alice: hello there\nGoran: Well met, Alice!\n"
    );

    // Not emitted before the delay band starts.
    assert!(h.presentation.events().is_empty());
    h.settle().await;
    assert_eq!(
        h.presentation.events(),
        vec![
            Event::Interrupt(GORAN),
            Event::Emit(GORAN, ReplyChannel::Say, "Well met, Alice!".into()),
            Event::Pacified(GORAN, true),
            Event::Pacified(GORAN, false),
        ]
    );

    let metrics = h.orchestrator.metrics();
    assert_eq!(metrics.jobs_queued, 1);
    assert_eq!(metrics.generation_ok, 1);
    assert_eq!(metrics.deliveries_scheduled, 1);
    assert_eq!(metrics.deliveries_emitted, 1);

    let log = h
        .datastore
        .get(GORAN, RecordKind::ConversationLog)
        .expect("read log")
        .expect("log written");
    assert_eq!(log, "Alice: hello there | Goran: Well met, Alice!");
    assert_eq!(h.datastore.standing(GORAN, ALICE).expect("standing"), 1);
}

#[tokio::test(start_paused = true)]
async fn reply_keeps_host_traits_and_records_profile_separately() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([Step::Reply("Aye.")]));
    h.datastore
        .put(GORAN, RecordKind::PersonalityTraits, "gruff, loyal, hates elves")
        .expect("seed traits");

    let handle = queued(h.say(ALICE, ChatScope::Say, "hello there"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 1 });

    assert_eq!(
        h.datastore.get(GORAN, RecordKind::PersonalityTraits).expect("read").as_deref(),
        Some("gruff, loyal, hates elves")
    );
    let profile = h
        .datastore
        .get(GORAN, RecordKind::LastPersonality)
        .expect("read")
        .expect("profile recorded");
    assert!(["cheerful", "veteran", "scholar"].contains(&profile.as_str()), "{profile}");
    assert_eq!(
        h.datastore.get(GORAN, RecordKind::EmotionalState).expect("read").as_deref(),
        Some("neutral")
    );
}

#[tokio::test(start_paused = true)]
async fn channel_with_fifteen_bots_fans_out_to_three() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    for i in 0..15 {
        world.insert(character(100 + i, &format!("Bot{i}"), true, 1000.0 + i as f32));
    }
    let h = Harness::start(config(), world, ScriptedGenerator::with([]));

    let handle = queued(h.say(ALICE, ChatScope::Channel { name: "General".into() }, "lfg deadmines"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 3, delivered: 3 });

    let speakers: Vec<String> = h.generator.calls().into_iter().map(|c| c.speaker).collect();
    assert_eq!(speakers.len(), 3);
    let mut unique = speakers.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    h.settle().await;
    let emits = h.presentation.emits();
    assert_eq!(emits.len(), 3);
    assert!(emits.iter().all(|(_, channel, _)| *channel == ReplyChannel::Channel { name: "General".into() }));
}

#[tokio::test(start_paused = true)]
async fn second_message_inside_player_cooldown_is_rejected() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([]));

    assert!(h.say(ALICE, ChatScope::Say, "hello").is_queued());
    tokio::time::advance(Duration::from_millis(500)).await;
    match h.say(ALICE, ChatScope::Say, "hello again") {
        ChatDisposition::Rejected(Rejection::PlayerCooldown { remaining }) => {
            assert_eq!(remaining, Duration::from_millis(2500));
        }
        other => panic!("expected player cooldown, got {other:?}"),
    }

    h.settle().await;
    assert_eq!(h.orchestrator.queue_stats().enqueued, 1);
    assert_eq!(h.generator.calls().len(), 1);
    assert_eq!(h.orchestrator.metrics().messages_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn service_error_forfeits_turn_without_delivery_or_memory() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([Step::Fail500]));

    let handle = queued(h.say(ALICE, ChatScope::Say, "hello there"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 0 });

    h.settle().await;
    assert!(h.presentation.events().is_empty());
    assert_eq!(h.orchestrator.memory().history_len(ALICE, GORAN), 0);
    let metrics = h.orchestrator.metrics();
    assert_eq!(metrics.generation_service, 1);
    assert_eq!(metrics.deliveries_scheduled, 0);
    assert_eq!(h.datastore.get(GORAN, RecordKind::ConversationLog).expect("read"), None);
}

#[tokio::test(start_paused = true)]
async fn shutdown_resolves_queued_jobs_and_joins_worker() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(4, "Bob", false, 1.0));
    world.insert(character(2, "Goran", true, 5.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([Step::Hang]));

    let first = queued(h.say(ALICE, ChatScope::Say, "anyone?"));
    let second = queued(h.say(ParticipantId(4), ChatScope::Say, "hello?"));
    // Let the worker pick up the first job and block inside generation.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.generator.calls().len(), 1);
    assert_eq!(h.orchestrator.queue_stats().depth, 2);

    let started = tokio::time::Instant::now();
    let report = h.orchestrator.shutdown().await;
    assert!(started.elapsed() <= Duration::from_secs(1));
    assert_eq!(report.jobs_stopped, 2);
    assert!(report.worker_joined);
    assert!(report.deliveries_drained);

    assert_eq!(first.outcome().await, JobOutcome::Stopping);
    assert_eq!(second.outcome().await, JobOutcome::Stopping);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(matches!(h.say(ALICE, ChatScope::Say, "late"), ChatDisposition::Stopping));
}

// ---------------------------------------------------------------------------
// Pipeline behavior
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_candidate_does_not_block_the_next() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    world.insert(character(3, "Mira", true, 30.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([Step::Fail500, Step::Reply("Over here!")]));

    let handle = queued(h.say(ALICE, ChatScope::Yell, "help!"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 2, delivered: 1 });

    h.settle().await;
    assert_eq!(h.presentation.emits(), vec![(MIRA, ReplyChannel::Yell, "Over here!".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn bot_on_cooldown_forfeits_its_turn() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(4, "Bob", false, 1.0));
    world.insert(character(2, "Goran", true, 5.0));
    let mut config = config();
    config.rate_limit.bot_cooldown_ms = 5000;
    let h = Harness::start(config, world, ScriptedGenerator::with([]));

    let first = queued(h.say(ALICE, ChatScope::Say, "hi"));
    let second = queued(h.say(ParticipantId(4), ChatScope::Say, "hi too"));
    assert_eq!(first.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 1 });
    assert_eq!(second.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 0 });
    assert_eq!(h.generator.calls().len(), 1);
    assert_eq!(h.orchestrator.metrics().turns_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_generation_lets_the_job_expire() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    world.insert(character(3, "Mira", true, 30.0));
    let mut config = config();
    config.queue.job_timeout_ms = 5000;
    let h = Harness::start(
        config,
        world,
        ScriptedGenerator::with([Step::Slow(Duration::from_secs(8), "sorry, lag")]),
    );

    let handle = queued(h.say(ALICE, ChatScope::Yell, "anyone?"));
    assert_eq!(handle.outcome().await, JobOutcome::Expired);
    assert_eq!(h.generator.calls().len(), 1);
    assert_eq!(h.orchestrator.queue_stats().expired, 1);
    assert_eq!(h.orchestrator.metrics().jobs_expired, 1);
}

#[tokio::test(start_paused = true)]
async fn whisper_is_answered_by_whisper_to_sender() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 500.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([Step::Reply("psst, over here")]));

    let handle = queued(h.say(ALICE, ChatScope::Whisper { target: GORAN }, "got a minute?"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 1 });
    h.settle().await;
    assert_eq!(
        h.presentation.emits(),
        vec![(GORAN, ReplyChannel::Whisper { to: ALICE }, "psst, over here".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn responder_leaving_before_delivery_skips_emission() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([]));

    let handle = queued(h.say(ALICE, ChatScope::Say, "hello"));
    assert_eq!(handle.outcome().await, JobOutcome::Completed { attempted: 1, delivered: 1 });
    h.world.remove(GORAN);
    h.settle().await;

    assert!(h.presentation.events().is_empty());
    assert_eq!(h.orchestrator.metrics().deliveries_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn early_exits_are_reported_not_raised() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    world.insert(character(3, "Mira", true, 6.0));

    let mut disabled = config();
    disabled.general.enabled = false;
    let h = Harness::start(disabled, world, ScriptedGenerator::with([]));
    assert!(matches!(h.say(ALICE, ChatScope::Say, "hi"), ChatDisposition::Disabled));

    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(2, "Goran", true, 5.0));
    world.insert(character(3, "Mira", true, 6.0));
    let mut never = config();
    never.chat.response_probability = 0.0;
    let h = Harness::start(never, world, ScriptedGenerator::with([]));
    assert!(matches!(h.say(ParticipantId(99), ChatScope::Say, "hi"), ChatDisposition::SenderUnknown));
    assert!(matches!(h.say(GORAN, ChatScope::Say, "beep"), ChatDisposition::IgnoredBot));
    assert!(matches!(h.say(ALICE, ChatScope::Say, "hi"), ChatDisposition::NotChosen));

    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    let h = Harness::start(config(), world, ScriptedGenerator::with([]));
    assert!(matches!(h.say(ALICE, ChatScope::Say, "anyone?"), ChatDisposition::NoResponders));
    assert_eq!(h.orchestrator.metrics().selections_empty, 1);
}

#[tokio::test(start_paused = true)]
async fn full_queue_drops_new_jobs() {
    let world = InMemoryWorld::new();
    world.insert(character(1, "Alice", false, 0.0));
    world.insert(character(4, "Bob", false, 1.0));
    world.insert(character(5, "Cara", false, 2.0));
    world.insert(character(2, "Goran", true, 5.0));
    let mut config = config();
    config.queue.max_size = 2;
    let h = Harness::start(config, world, ScriptedGenerator::with([Step::Hang]));

    assert!(h.say(ALICE, ChatScope::Say, "one").is_queued());
    assert!(h.say(ParticipantId(4), ChatScope::Say, "two").is_queued());
    assert!(matches!(h.say(ParticipantId(5), ChatScope::Say, "three"), ChatDisposition::QueueFull));
    assert_eq!(h.orchestrator.queue_stats().dropped, 1);
    assert_eq!(h.orchestrator.metrics().jobs_dropped, 1);
}

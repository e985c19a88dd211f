//! `banter-sim`: drive the chat pipeline from a terminal.
//!
//! Builds a small in-memory world (one human, a handful of bots), reads chat
//! lines from stdin and prints replies as the bots deliver them.
//!
//! ```text
//! hello there          say
//! /y anyone around?    yell
//! /g need a healer     guild
//! /p pull in 3         party
//! /c Trade wts ore     channel "Trade"
//! /w Goran psst        whisper to Goran
//! ```
//!
//! Usage: `banter-sim [config.toml] [world.db]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use banter_core::config::BanterConfig;
use banter_core::datastore::{Datastore, RecordKind, SqliteDatastore};
use banter_core::types::{
    ChatMessage, ChatScope, GroupId, GuildId, Participant, ParticipantId, Position, RegionId,
};
use banter_core::world::{InMemoryWorld, Presentation, ReplyChannel, World};
use banter_llm::GenerationClient;
use banter_runtime::{ChatDisposition, ChatOrchestrator, init_tracing};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const PLAYER: ParticipantId = ParticipantId(1);

/// Prints emitted replies to stdout.
struct TerminalPresentation {
    world: Arc<InMemoryWorld>,
}

impl Presentation for TerminalPresentation {
    fn emit(&self, speaker: ParticipantId, channel: &ReplyChannel, text: &str) {
        let name = self
            .world
            .participant(speaker)
            .map_or_else(|| speaker.to_string(), |p| p.name);
        let tag = match channel {
            ReplyChannel::Say => "say".to_string(),
            ReplyChannel::Yell => "yell".to_string(),
            ReplyChannel::Whisper { .. } => "whisper".to_string(),
            ReplyChannel::Party => "party".to_string(),
            ReplyChannel::Raid => "raid".to_string(),
            ReplyChannel::Guild => "guild".to_string(),
            ReplyChannel::Channel { name } => name.clone(),
        };
        println!("[{tag}] {name}: {text}");
    }

    fn interrupt(&self, _participant: ParticipantId) {}

    fn set_pacified(&self, participant: ParticipantId, pacified: bool) {
        tracing::trace!(%participant, pacified, "Pacify toggled");
    }
}

fn bot(id: u64, name: &str, race: &str, class: &str, x: f32) -> Participant {
    let mut p = Participant::new(ParticipantId(id), name, true);
    p.level = 30;
    p.race = race.into();
    p.class = class.into();
    p.position = Position::new(x, 0.0, 0.0);
    p.region = RegionId(1);
    p.region_name = "Ironforge".into();
    p.guild = Some(GuildId(1));
    p.group = Some(GroupId(1));
    p
}

fn demo_world() -> InMemoryWorld {
    let world = InMemoryWorld::new();
    let mut player = Participant::new(PLAYER, "You", false);
    player.level = 20;
    player.race = "Human".into();
    player.class = "Mage".into();
    player.region = RegionId(1);
    player.region_name = "Ironforge".into();
    player.guild = Some(GuildId(1));
    player.group = Some(GroupId(1));
    world.insert(player);

    world.insert(bot(2, "Goran", "Dwarf", "Warrior", 4.0));
    world.insert(bot(3, "Mira", "Night Elf", "Druid", 15.0));
    world.insert(bot(4, "Thrain", "Dwarf", "Paladin", 70.0));
    world.insert(bot(5, "Sella", "Gnome", "Mage", 300.0));
    world
}

fn parse_line(line: &str, world: &InMemoryWorld) -> Option<ChatMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (scope, text) = if let Some(rest) = line.strip_prefix("/y ") {
        (ChatScope::Yell, rest)
    } else if let Some(rest) = line.strip_prefix("/g ") {
        (ChatScope::Guild, rest)
    } else if let Some(rest) = line.strip_prefix("/p ") {
        (ChatScope::Party, rest)
    } else if let Some(rest) = line.strip_prefix("/c ") {
        let (name, text) = rest.split_once(' ')?;
        (ChatScope::Channel { name: name.to_string() }, text)
    } else if let Some(rest) = line.strip_prefix("/w ") {
        let (name, text) = rest.split_once(' ')?;
        let target = world
            .within_radius(Position::default(), f32::MAX)
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))?;
        (ChatScope::Whisper { target: target.id }, text)
    } else {
        (ChatScope::Say, line)
    };
    Some(ChatMessage::new(PLAYER, scope, text))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = args
        .next()
        .map(PathBuf::from)
        .map_or_else(BanterConfig::default, |path| BanterConfig::load_or_default(&path));
    init_tracing(&config.general).map_err(|e| anyhow::anyhow!(e))?;

    let datastore: Arc<dyn Datastore> = match args.next() {
        Some(path) => Arc::new(
            SqliteDatastore::open(&path).with_context(|| format!("opening datastore {path}"))?,
        ),
        None => Arc::new(SqliteDatastore::open_in_memory().context("opening in-memory datastore")?),
    };
    datastore
        .put(ParticipantId(2), RecordKind::Backstory, "Fought at the gates of Grim Batol.")
        .context("seeding backstory")?;

    let world = Arc::new(demo_world());
    let presentation = Arc::new(TerminalPresentation { world: Arc::clone(&world) });
    let generator = Arc::new(GenerationClient::from_config(&config.endpoint, &config.generation));
    info!(endpoint = %generator.endpoint().url(), "Generation endpoint");

    let settle = config.queue.job_timeout() + config.delivery.delay_band().1;
    let orchestrator = ChatOrchestrator::start(config, world.clone(), presentation, datastore, generator);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let Some(message) = parse_line(&line, &world) else {
                    continue;
                };
                match orchestrator.on_chat(&message) {
                    ChatDisposition::Queued(handle) => info!(job = handle.id(), "Queued"),
                    other => warn!(disposition = ?other, "No reply"),
                }
            }
        }
    }

    // Let queued replies land before stopping when input ends.
    let idle = async {
        while orchestrator.queue_stats().depth > 0 || orchestrator.pending_deliveries() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::timeout(settle, idle) => {}
    }

    let report = orchestrator.shutdown().await;
    let metrics = serde_json::to_string_pretty(&orchestrator.metrics()).context("encoding metrics")?;
    println!("{metrics}");
    info!(?report, "Bye");
    Ok(())
}

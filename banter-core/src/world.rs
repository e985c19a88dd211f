//! Seams to the live world.
//!
//! BANTER never owns game state. It reads participant snapshots through
//! [`World`] and acts on the world through [`Presentation`]. Both are
//! synchronous: a host game implements them on top of its own entity store
//! and chat system.
//!
//! [`InMemoryWorld`] is a small ordered implementation for tools, demos and
//! tests.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{ChatScope, GroupId, GuildId, Participant, ParticipantId, Position, RegionId};

/// Read access to the live world.
pub trait World: Send + Sync {
    /// Snapshot of a participant currently in the world.
    fn participant(&self, id: ParticipantId) -> Option<Participant>;

    /// Participants whose distance to `origin` is at most `radius`.
    /// May include the participant standing at `origin`.
    fn within_radius(&self, origin: Position, radius: f32) -> Vec<Participant>;

    /// Members of a party / raid group, in a stable order.
    fn group_members(&self, group: GroupId) -> Vec<Participant>;

    /// Members of a guild who are online, in a stable order.
    fn guild_members(&self, guild: GuildId) -> Vec<Participant>;

    /// Participants currently in a region.
    fn region_members(&self, region: RegionId) -> Vec<Participant>;

    /// Whether the participant is still present.
    fn is_in_world(&self, id: ParticipantId) -> bool {
        self.participant(id).is_some()
    }
}

/// Where a reply is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyChannel {
    /// Local say.
    Say,
    /// Yell.
    Yell,
    /// Direct message.
    Whisper {
        /// Recipient.
        to: ParticipantId,
    },
    /// Party broadcast.
    Party,
    /// Raid broadcast.
    Raid,
    /// Guild broadcast.
    Guild,
    /// Named channel broadcast.
    Channel {
        /// Channel name.
        name: String,
    },
}

impl ReplyChannel {
    /// Channel a reply to a message in `scope` from `sender` goes out on.
    ///
    /// Whispers are answered with a whisper back to the original sender.
    #[must_use]
    pub fn for_reply(scope: &ChatScope, sender: ParticipantId) -> Self {
        match scope {
            ChatScope::Say => Self::Say,
            ChatScope::Yell => Self::Yell,
            ChatScope::Whisper { .. } => Self::Whisper { to: sender },
            ChatScope::Party => Self::Party,
            ChatScope::Raid => Self::Raid,
            ChatScope::Guild => Self::Guild,
            ChatScope::Channel { name } => Self::Channel { name: name.clone() },
        }
    }
}

/// Side effects on the live world.
pub trait Presentation: Send + Sync {
    /// Make `speaker` say `text` on `channel`.
    fn emit(&self, speaker: ParticipantId, channel: &ReplyChannel, text: &str);

    /// Halt movement and cancel non-instant actions.
    fn interrupt(&self, participant: ParticipantId);

    /// Apply or clear the "typing" pacified condition.
    fn set_pacified(&self, participant: ParticipantId, pacified: bool);
}

// ---------------------------------------------------------------------------
// In-memory world
// ---------------------------------------------------------------------------

/// A [`World`] backed by an ordered map. Iteration order is participant id.
#[derive(Debug, Default)]
pub struct InMemoryWorld {
    participants: RwLock<BTreeMap<ParticipantId, Participant>>,
}

impl InMemoryWorld {
    /// Empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a participant.
    pub fn insert(&self, participant: Participant) {
        self.participants.write().insert(participant.id, participant);
    }

    /// Remove a participant (logout / despawn).
    pub fn remove(&self, id: ParticipantId) -> Option<Participant> {
        self.participants.write().remove(&id)
    }

    /// Move a participant. Returns `false` if it is not in the world.
    pub fn move_to(&self, id: ParticipantId, position: Position) -> bool {
        match self.participants.write().get_mut(&id) {
            Some(p) => {
                p.position = position;
                true
            }
            None => false,
        }
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    /// Whether the world is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }

    fn collect(&self, keep: impl Fn(&Participant) -> bool) -> Vec<Participant> {
        self.participants
            .read()
            .values()
            .filter(|p| keep(p))
            .cloned()
            .collect()
    }
}

impl World for InMemoryWorld {
    fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.participants.read().get(&id).cloned()
    }

    fn within_radius(&self, origin: Position, radius: f32) -> Vec<Participant> {
        self.collect(|p| p.position.distance(&origin) <= radius)
    }

    fn group_members(&self, group: GroupId) -> Vec<Participant> {
        self.collect(|p| p.group == Some(group))
    }

    fn guild_members(&self, guild: GuildId) -> Vec<Participant> {
        self.collect(|p| p.guild == Some(guild))
    }

    fn region_members(&self, region: RegionId) -> Vec<Participant> {
        self.collect(|p| p.region == region)
    }

    fn is_in_world(&self, id: ParticipantId) -> bool {
        self.participants.read().contains_key(&id)
    }
}

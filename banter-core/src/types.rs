//! Core type definitions shared by every BANTER component.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Identifier of a participant (human-controlled or bot) in the live world.
///
/// Games hand out 64-bit GUIDs for characters; BANTER never mints its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a world region (zone / map area).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u32);

/// Identifier of a party or raid group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

/// Identifier of a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuildId(pub u64);

/// Faction / team tag. Participants of different teams cannot understand
/// each other's proximity chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Team(pub u8);

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A 3D position in the game world.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Position {
    /// Create a position from coordinates.
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Delivery scope of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatScope {
    /// Local proximity chat.
    Say,
    /// Shouted proximity chat (twice the say radius).
    Yell,
    /// Direct message to a single participant.
    Whisper {
        /// The addressed participant.
        target: ParticipantId,
    },
    /// Party chat.
    Party,
    /// Raid chat.
    Raid,
    /// Guild chat.
    Guild,
    /// A named broadcast channel covering the sender's region.
    Channel {
        /// Channel name ("General", "Trade", ...).
        name: String,
    },
}

impl ChatScope {
    /// Short label used in logs and prompts.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Say => "say",
            Self::Yell => "yell",
            Self::Whisper { .. } => "whisper",
            Self::Party => "party",
            Self::Raid => "raid",
            Self::Guild => "guild",
            Self::Channel { name } => name,
        }
    }

    /// Whether the scope is resolved by distance from the sender.
    #[must_use]
    pub fn is_proximity(&self) -> bool {
        matches!(self, Self::Say | Self::Yell)
    }
}

impl fmt::Display for ChatScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One inbound chat utterance as reported by the live world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub sender: ParticipantId,
    /// Where it was said.
    pub scope: ChatScope,
    /// What was said.
    pub text: String,
}

impl ChatMessage {
    /// Create a new chat message.
    #[must_use]
    pub fn new(sender: ParticipantId, scope: ChatScope, text: impl Into<String>) -> Self {
        Self {
            sender,
            scope,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Participant snapshot
// ---------------------------------------------------------------------------

/// Read-only snapshot of a participant taken from the live world.
///
/// Snapshots are never cached across an asynchronous boundary: take a fresh
/// one whenever world state matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Identity.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Whether this participant is autonomous.
    pub is_bot: bool,
    /// Faction / team.
    pub team: Team,
    /// Current position.
    pub position: Position,
    /// Current region.
    pub region: RegionId,
    /// Human-readable region name.
    pub region_name: String,
    /// Party / raid membership.
    pub group: Option<GroupId>,
    /// Guild membership.
    pub guild: Option<GuildId>,
    /// Character level.
    pub level: u8,
    /// Race name.
    pub race: String,
    /// Class name.
    pub class: String,
    /// Whether the participant is currently fighting.
    pub in_combat: bool,
}

impl Participant {
    /// Create a participant with the given identity and name; all other
    /// fields take neutral defaults.
    #[must_use]
    pub fn new(id: ParticipantId, name: impl Into<String>, is_bot: bool) -> Self {
        Self {
            id,
            name: name.into(),
            is_bot,
            team: Team::default(),
            position: Position::default(),
            region: RegionId(0),
            region_name: String::new(),
            group: None,
            guild: None,
            level: 1,
            race: String::new(),
            class: String::new(),
            in_combat: false,
        }
    }

    /// One-line description used in generation prompts.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!("{}, a level {}", self.name, self.level);
        if !self.race.is_empty() {
            out.push(' ');
            out.push_str(&self.race);
        }
        if !self.class.is_empty() {
            out.push(' ');
            out.push_str(&self.class);
        }
        if !self.region_name.is_empty() {
            out.push_str(" in ");
            out.push_str(&self.region_name);
        }
        if self.in_combat {
            out.push_str(" (currently in combat)");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn describe_skips_empty_fields() {
        let mut p = Participant::new(ParticipantId(7), "Goran", true);
        assert_eq!(p.describe(), "Goran, a level 1");

        p.level = 42;
        p.race = "Dwarf".into();
        p.class = "Warrior".into();
        p.region_name = "Ironforge".into();
        p.in_combat = true;
        assert_eq!(
            p.describe(),
            "Goran, a level 42 Dwarf Warrior in Ironforge (currently in combat)"
        );
    }

    #[test]
    fn channel_scope_label_is_channel_name() {
        let scope = ChatScope::Channel { name: "Trade".into() };
        assert_eq!(scope.label(), "Trade");
        assert!(!scope.is_proximity());
        assert!(ChatScope::Yell.is_proximity());
    }
}

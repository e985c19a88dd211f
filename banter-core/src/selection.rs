//! Responder selection: which bots hear a message, in what order.
//!
//! | Scope          | Candidates                                  | Cap |
//! |----------------|---------------------------------------------|-----|
//! | Say            | bots within say radius, nearest first       | 1   |
//! | Yell           | bots within 2× say radius, nearest first    | 2   |
//! | Party / Raid   | bots in the sender's group                  | any |
//! | Guild          | bots in the sender's guild                  | any |
//! | Channel        | bots in the sender's region, random 3       | 3   |
//! | Whisper        | the addressed participant, if it is a bot   | 1   |
//!
//! The sender is never a candidate. Proximity and channel scopes only reach
//! bots of the sender's team unless cross-team replies are enabled.

use ordered_float::OrderedFloat;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::config::ChatConfig;
use crate::types::{ChatScope, Participant, ParticipantId};
use crate::world::World;

/// Candidates kept from a yell.
pub const YELL_CAP: usize = 2;
/// Candidates kept from a say.
pub const SAY_CAP: usize = 1;
/// Candidates kept from a channel broadcast.
pub const CHANNEL_FANOUT: usize = 3;

/// Stateless selector parameterised by the chat settings.
#[derive(Debug, Clone)]
pub struct ResponderSelector {
    config: ChatConfig,
}

impl ResponderSelector {
    /// Create a selector.
    #[must_use]
    pub fn new(config: ChatConfig) -> Self {
        Self { config }
    }

    /// Ordered candidate responders for a message from `sender` in `scope`.
    pub fn select<R: Rng + ?Sized>(
        &self,
        sender: &Participant,
        scope: &ChatScope,
        world: &dyn World,
        rng: &mut R,
    ) -> Vec<ParticipantId> {
        let eligible = |p: &Participant| p.is_bot && p.id != sender.id;
        let same_team =
            |p: &Participant| self.config.cross_team_replies || p.team == sender.team;

        let candidates: Vec<ParticipantId> = match scope {
            ChatScope::Say | ChatScope::Yell => {
                let (radius, cap) = if *scope == ChatScope::Yell {
                    (self.config.yell_radius(), YELL_CAP)
                } else {
                    (self.config.say_radius, SAY_CAP)
                };
                let mut nearby: Vec<(OrderedFloat<f32>, ParticipantId)> = world
                    .within_radius(sender.position, radius)
                    .into_iter()
                    .filter(|p| eligible(p) && same_team(p))
                    .map(|p| (OrderedFloat(p.position.distance(&sender.position)), p.id))
                    .filter(|(d, _)| d.0 <= radius)
                    .collect();
                nearby.sort();
                nearby.into_iter().take(cap).map(|(_, id)| id).collect()
            }
            ChatScope::Party | ChatScope::Raid => sender.group.map_or_else(Vec::new, |group| {
                world
                    .group_members(group)
                    .into_iter()
                    .filter(|p| eligible(p))
                    .map(|p| p.id)
                    .collect()
            }),
            ChatScope::Guild => sender.guild.map_or_else(Vec::new, |guild| {
                world
                    .guild_members(guild)
                    .into_iter()
                    .filter(|p| eligible(p))
                    .map(|p| p.id)
                    .collect()
            }),
            ChatScope::Channel { .. } => {
                let mut members: Vec<ParticipantId> = world
                    .region_members(sender.region)
                    .into_iter()
                    .filter(|p| eligible(p) && same_team(p))
                    .map(|p| p.id)
                    .collect();
                if members.len() > CHANNEL_FANOUT {
                    members.shuffle(rng);
                    members.truncate(CHANNEL_FANOUT);
                }
                members
            }
            ChatScope::Whisper { target } => world
                .participant(*target)
                .filter(|p| eligible(p))
                .map(|p| vec![p.id])
                .unwrap_or_default(),
        };

        debug!(
            sender = %sender.id,
            scope = %scope,
            candidates = candidates.len(),
            "Responders selected"
        );
        candidates
    }

    /// Replies a job may generate for `candidates`.
    #[must_use]
    pub fn max_replies(&self, candidates: &[ParticipantId]) -> usize {
        self.config.max_replies_per_message.min(candidates.len())
    }
}

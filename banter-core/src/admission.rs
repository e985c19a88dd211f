//! Admission control: the rate/cooldown gate in front of the pipeline.
//!
//! Three independent clocks live behind one mutex:
//!
//! ```text
//! Global window   ── at most `max_messages` admitted per `window`
//! Player cooldown ── per sender, between two admitted messages
//! Bot cooldown    ── per bot, between two generated replies
//! Global cooldown ── between any two generated replies
//! ```
//!
//! `admit` consults only the window and the player cooldown; the bot and
//! global cooldowns are consulted by the dispatch worker when it paces
//! responders. A rejection is backpressure, not an error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::types::ParticipantId;

/// Why a message was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The global window already holds its message cap.
    WindowFull {
        /// Messages counted in the current window.
        count: u32,
        /// Configured cap.
        limit: u32,
    },
    /// The sender spoke too recently.
    PlayerCooldown {
        /// Time left before the sender is admitted again.
        remaining: Duration,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindowFull { count, limit } => {
                write!(f, "global window full ({count}/{limit})")
            }
            Self::PlayerCooldown { remaining } => {
                write!(f, "sender on cooldown for {}ms", remaining.as_millis())
            }
        }
    }
}

/// Read-only view of the admission state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    /// Messages admitted in the current window.
    pub window_count: u32,
    /// Senders with a recorded timestamp.
    pub tracked_senders: usize,
    /// Bots with a recorded timestamp.
    pub tracked_bots: usize,
}

#[derive(Debug)]
struct RateLimitState {
    window_start: Instant,
    window_count: u32,
    sender_last: HashMap<ParticipantId, Instant>,
    bot_last: HashMap<ParticipantId, Instant>,
    last_response: Option<Instant>,
}

/// Process-wide admission controller. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct AdmissionController {
    config: RateLimitConfig,
    state: Mutex<RateLimitState>,
}

impl AdmissionController {
    /// Create a controller whose first window starts now.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Create a controller whose first window starts at `now`.
    #[must_use]
    pub fn starting_at(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            config,
            state: Mutex::new(RateLimitState {
                window_start: now,
                window_count: 0,
                sender_last: HashMap::new(),
                bot_last: HashMap::new(),
                last_response: None,
            }),
        }
    }

    /// Decide whether a message from `sender` may enter the pipeline.
    ///
    /// On acceptance the window counter is incremented and the sender's
    /// timestamp recorded. On rejection nothing changes.
    ///
    /// # Errors
    /// Returns the [`Rejection`] reason when the window is full or the
    /// sender is on cooldown.
    pub fn admit(&self, sender: ParticipantId, now: Instant) -> Result<(), Rejection> {
        let mut state = self.state.lock();

        if now.saturating_duration_since(state.window_start) > self.config.window() {
            state.window_start = now;
            state.window_count = 0;
        }

        if state.window_count >= self.config.max_messages {
            return Err(Rejection::WindowFull {
                count: state.window_count,
                limit: self.config.max_messages,
            });
        }

        if let Some(last) = state.sender_last.get(&sender) {
            let elapsed = now.saturating_duration_since(*last);
            let cooldown = self.config.player_cooldown();
            if elapsed < cooldown {
                return Err(Rejection::PlayerCooldown {
                    remaining: cooldown - elapsed,
                });
            }
        }

        state.window_count += 1;
        state.sender_last.insert(sender, now);
        Ok(())
    }

    /// Whether `bot` is past its reply cooldown.
    #[must_use]
    pub fn responder_ready(&self, bot: ParticipantId, now: Instant) -> bool {
        let state = self.state.lock();
        state
            .bot_last
            .get(&bot)
            .is_none_or(|last| now.saturating_duration_since(*last) >= self.config.bot_cooldown())
    }

    /// Time left before the global reply cooldown elapses (zero when ready).
    #[must_use]
    pub fn global_wait(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        state.last_response.map_or(Duration::ZERO, |last| {
            self.config
                .global_cooldown()
                .saturating_sub(now.saturating_duration_since(last))
        })
    }

    /// Stamp a generated reply from `bot` against the bot and global cooldowns.
    pub fn record_response(&self, bot: ParticipantId, now: Instant) {
        let mut state = self.state.lock();
        state.bot_last.insert(bot, now);
        state.last_response = Some(now);
    }

    /// Forget per-participant stamps whose cooldown has long elapsed.
    ///
    /// Returns how many stamps were dropped.
    pub fn prune(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let player = self.config.player_cooldown();
        let bot = self.config.bot_cooldown();
        let before = state.sender_last.len() + state.bot_last.len();
        state
            .sender_last
            .retain(|_, last| now.saturating_duration_since(*last) < player);
        state
            .bot_last
            .retain(|_, last| now.saturating_duration_since(*last) < bot);
        before - (state.sender_last.len() + state.bot_last.len())
    }

    /// Diagnostic snapshot.
    #[must_use]
    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.state.lock();
        AdmissionSnapshot {
            window_count: state.window_count,
            tracked_senders: state.sender_last.len(),
            tracked_bots: state.bot_last.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_messages: u32) -> RateLimitConfig {
        RateLimitConfig {
            window_secs: 10,
            max_messages,
            player_cooldown_ms: 1000,
            bot_cooldown_ms: 2000,
            global_cooldown_ms: 300,
        }
    }

    #[test]
    fn window_cap_rejects_until_rollover() {
        let t0 = Instant::now();
        let ctl = AdmissionController::starting_at(config(2), t0);

        assert!(ctl.admit(ParticipantId(1), t0).is_ok());
        assert!(ctl.admit(ParticipantId(2), t0).is_ok());
        assert_eq!(
            ctl.admit(ParticipantId(3), t0 + Duration::from_secs(5)),
            Err(Rejection::WindowFull { count: 2, limit: 2 })
        );

        // Exactly at the window boundary the window has not rolled yet.
        assert!(ctl.admit(ParticipantId(3), t0 + Duration::from_secs(10)).is_err());
        assert!(ctl.admit(ParticipantId(3), t0 + Duration::from_millis(10_001)).is_ok());
    }

    #[test]
    fn sender_cooldown_is_per_sender() {
        let t0 = Instant::now();
        let ctl = AdmissionController::starting_at(config(100), t0);

        assert!(ctl.admit(ParticipantId(1), t0).is_ok());
        let second = ctl.admit(ParticipantId(1), t0 + Duration::from_millis(400));
        assert_eq!(
            second,
            Err(Rejection::PlayerCooldown { remaining: Duration::from_millis(600) })
        );
        assert!(ctl.admit(ParticipantId(2), t0 + Duration::from_millis(400)).is_ok());
        assert!(ctl.admit(ParticipantId(1), t0 + Duration::from_millis(1000)).is_ok());
    }

    #[test]
    fn rejected_message_does_not_consume_window() {
        let t0 = Instant::now();
        let ctl = AdmissionController::starting_at(config(2), t0);

        assert!(ctl.admit(ParticipantId(1), t0).is_ok());
        assert!(ctl.admit(ParticipantId(1), t0).is_err());
        assert_eq!(ctl.snapshot().window_count, 1);
    }

    #[test]
    fn bot_and_global_cooldowns() {
        let t0 = Instant::now();
        let ctl = AdmissionController::starting_at(config(100), t0);
        let bot = ParticipantId(9);

        assert!(ctl.responder_ready(bot, t0));
        assert_eq!(ctl.global_wait(t0), Duration::ZERO);

        ctl.record_response(bot, t0);
        assert!(!ctl.responder_ready(bot, t0 + Duration::from_millis(1999)));
        assert!(ctl.responder_ready(bot, t0 + Duration::from_millis(2000)));
        assert_eq!(ctl.global_wait(t0 + Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(ctl.global_wait(t0 + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn prune_drops_elapsed_stamps() {
        let t0 = Instant::now();
        let ctl = AdmissionController::starting_at(config(100), t0);
        ctl.admit(ParticipantId(1), t0).expect("admitted");
        ctl.record_response(ParticipantId(9), t0);

        assert_eq!(ctl.prune(t0 + Duration::from_millis(1500)), 1);
        assert_eq!(ctl.snapshot().tracked_bots, 1);
        assert_eq!(ctl.prune(t0 + Duration::from_secs(3)), 1);
        assert_eq!(ctl.snapshot().tracked_senders, 0);
    }

    #[test]
    fn concurrent_admits_never_exceed_cap() {
        use std::sync::Arc;

        let t0 = Instant::now();
        let ctl = Arc::new(AdmissionController::starting_at(config(50), t0));
        let handles: Vec<_> = (0..8u64)
            .map(|thread| {
                let ctl = Arc::clone(&ctl);
                std::thread::spawn(move || {
                    (0..20u64)
                        .filter(|i| ctl.admit(ParticipantId(thread * 100 + i), t0).is_ok())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread joins"))
            .sum();
        assert_eq!(admitted, 50);
    }
}

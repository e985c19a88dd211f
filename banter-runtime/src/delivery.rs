//! Delivery scheduling: makes a generated reply appear in the world after
//! a human-looking delay.
//!
//! ```text
//! deliver ─▶ sleep(delay ∈ [min, max]) ─▶ responder still here? ──no──▶ skip
//!                                                │yes
//!                                                ▼
//!                                interrupt ─▶ emit ─▶ bot? ─▶ pacify … un-pacify
//! ```
//!
//! Every delivery is a task on one [`TaskTracker`], so shutdown can cancel
//! and await all of them. A bot pacified when shutdown hits is un-pacified
//! before its task ends.

use std::sync::Arc;
use std::time::Duration;

use banter_core::config::DeliveryConfig;
use banter_core::types::{ChatScope, ParticipantId};
use banter_core::world::{Presentation, ReplyChannel, World};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::metrics::{PipelineMetrics, bump};

/// One reply waiting to be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Bot that speaks.
    pub responder: ParticipantId,
    /// Who it answers.
    pub sender: ParticipantId,
    /// Reply text.
    pub text: String,
    /// Channel the reply goes out on.
    pub channel: ReplyChannel,
}

/// Schedules reply emission and the pacify window around it.
pub struct DeliveryScheduler {
    world: Arc<dyn World>,
    presentation: Arc<dyn Presentation>,
    config: DeliveryConfig,
    rng: Mutex<StdRng>,
    tracker: TaskTracker,
    token: CancellationToken,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for DeliveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryScheduler")
            .field("config", &self.config)
            .field("pending", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl DeliveryScheduler {
    /// Create a scheduler. Cancelling `token` aborts pending deliveries.
    #[must_use]
    pub fn new(
        world: Arc<dyn World>,
        presentation: Arc<dyn Presentation>,
        config: DeliveryConfig,
        rng: StdRng,
        token: CancellationToken,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            world,
            presentation,
            config,
            rng: Mutex::new(rng),
            tracker: TaskTracker::new(),
            token,
            metrics,
        }
    }

    /// Draw a delay uniformly from the configured band.
    pub fn pick_delay(&self) -> Duration {
        let (min, max) = self.config.delay_band();
        if min == max {
            return min;
        }
        let millis = self
            .rng
            .lock()
            .gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Schedule `text` from `responder` as a reply to `sender`'s message in
    /// `scope`. Returns the chosen delay.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn deliver(
        &self,
        responder: ParticipantId,
        sender: ParticipantId,
        text: String,
        scope: &ChatScope,
    ) -> Duration {
        let delay = self.pick_delay();
        self.deliver_after(
            Delivery {
                responder,
                sender,
                text,
                channel: ReplyChannel::for_reply(scope, sender),
            },
            delay,
        );
        delay
    }

    /// Schedule `delivery` after exactly `delay`.
    pub fn deliver_after(&self, delivery: Delivery, delay: Duration) {
        bump(&self.metrics.deliveries_scheduled);
        debug!(
            responder = %delivery.responder,
            sender = %delivery.sender,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Delivery scheduled"
        );

        let world = Arc::clone(&self.world);
        let presentation = Arc::clone(&self.presentation);
        let metrics = Arc::clone(&self.metrics);
        let token = self.token.clone();
        let pacify = self.config.pacify();

        self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    bump(&metrics.deliveries_skipped);
                    debug!(responder = %delivery.responder, "Delivery cancelled by shutdown");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            let Some(speaker) = world.participant(delivery.responder) else {
                bump(&metrics.deliveries_skipped);
                debug!(responder = %delivery.responder, "Responder left before delivery");
                return;
            };

            presentation.interrupt(delivery.responder);
            presentation.emit(delivery.responder, &delivery.channel, &delivery.text);
            bump(&metrics.deliveries_emitted);

            if speaker.is_bot && !pacify.is_zero() {
                presentation.set_pacified(delivery.responder, true);
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(pacify) => {}
                }
                if world.is_in_world(delivery.responder) {
                    presentation.set_pacified(delivery.responder, false);
                }
            }
        });
    }

    /// Deliveries not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel pending deliveries and wait up to `grace` for their tasks.
    ///
    /// Returns `false` if some task was still running when the grace period
    /// ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            info!("Delivery scheduler drained");
        } else {
            warn!(pending = self.tracker.len(), "Deliveries still running after grace period");
        }
        drained
    }
}

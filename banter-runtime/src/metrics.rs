//! Pipeline counters.
//!
//! Lock-free `AtomicU64` counters incremented on the hot path and read by
//! [`PipelineMetrics::snapshot`] for diagnostics or export.

use std::sync::atomic::{AtomicU64, Ordering};

use banter_llm::GenerationError;
use serde::Serialize;

/// Counters for every stage of the pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Chat messages reported by the world.
    pub messages_seen: AtomicU64,
    /// Messages past admission control.
    pub messages_admitted: AtomicU64,
    /// Messages refused by admission control.
    pub messages_rejected: AtomicU64,
    /// Messages dropped before admission (disabled, bot sender, unknown sender).
    pub messages_ignored: AtomicU64,
    /// Admitted messages that lost the response-probability roll.
    pub messages_not_chosen: AtomicU64,
    /// Admitted messages with no eligible responder.
    pub selections_empty: AtomicU64,
    /// Jobs accepted by the dispatch queue.
    pub jobs_queued: AtomicU64,
    /// Jobs refused because the queue was full.
    pub jobs_dropped: AtomicU64,
    /// Jobs that aged out before all their turns were taken.
    pub jobs_expired: AtomicU64,
    /// Responder turns skipped (cooldown, left the world).
    pub turns_skipped: AtomicU64,
    /// Successful generation calls.
    pub generation_ok: AtomicU64,
    /// Connection failures.
    pub generation_connection: AtomicU64,
    /// Timed-out calls.
    pub generation_timeout: AtomicU64,
    /// Non-200 answers and gate refusals.
    pub generation_service: AtomicU64,
    /// Unusable response bodies.
    pub generation_malformed: AtomicU64,
    /// Deliveries handed to the scheduler.
    pub deliveries_scheduled: AtomicU64,
    /// Replies actually emitted into the world.
    pub deliveries_emitted: AtomicU64,
    /// Deliveries skipped (responder left) or cancelled by shutdown.
    pub deliveries_skipped: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub messages_seen: u64,
    pub messages_admitted: u64,
    pub messages_rejected: u64,
    pub messages_ignored: u64,
    pub messages_not_chosen: u64,
    pub selections_empty: u64,
    pub jobs_queued: u64,
    pub jobs_dropped: u64,
    pub jobs_expired: u64,
    pub turns_skipped: u64,
    pub generation_ok: u64,
    pub generation_connection: u64,
    pub generation_timeout: u64,
    pub generation_service: u64,
    pub generation_malformed: u64,
    pub deliveries_scheduled: u64,
    pub deliveries_emitted: u64,
    pub deliveries_skipped: u64,
}

impl MetricsSnapshot {
    /// All failed generation calls.
    #[must_use]
    pub fn generation_failures(&self) -> u64 {
        self.generation_connection
            + self.generation_timeout
            + self.generation_service
            + self.generation_malformed
    }
}

/// Increment a counter by one.
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineMetrics {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failed generation call under its class.
    pub fn record_generation_failure(&self, error: &GenerationError) {
        bump(match error {
            GenerationError::Connection(_) | GenerationError::InvalidEndpoint(_) => {
                &self.generation_connection
            }
            GenerationError::Timeout(_) => &self.generation_timeout,
            GenerationError::Service { .. } => &self.generation_service,
            GenerationError::MalformedResponse(_) => &self.generation_malformed,
        });
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_seen: load(&self.messages_seen),
            messages_admitted: load(&self.messages_admitted),
            messages_rejected: load(&self.messages_rejected),
            messages_ignored: load(&self.messages_ignored),
            messages_not_chosen: load(&self.messages_not_chosen),
            selections_empty: load(&self.selections_empty),
            jobs_queued: load(&self.jobs_queued),
            jobs_dropped: load(&self.jobs_dropped),
            jobs_expired: load(&self.jobs_expired),
            turns_skipped: load(&self.turns_skipped),
            generation_ok: load(&self.generation_ok),
            generation_connection: load(&self.generation_connection),
            generation_timeout: load(&self.generation_timeout),
            generation_service: load(&self.generation_service),
            generation_malformed: load(&self.generation_malformed),
            deliveries_scheduled: load(&self.deliveries_scheduled),
            deliveries_emitted: load(&self.deliveries_emitted),
            deliveries_skipped: load(&self.deliveries_skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_counted_per_class() {
        let metrics = PipelineMetrics::new();
        metrics.record_generation_failure(&GenerationError::Timeout(100));
        metrics.record_generation_failure(&GenerationError::Service {
            status: Some(500),
            message: String::new(),
        });
        metrics.record_generation_failure(&GenerationError::Service {
            status: None,
            message: String::new(),
        });
        bump(&metrics.generation_ok);

        let snap = metrics.snapshot();
        assert_eq!(snap.generation_timeout, 1);
        assert_eq!(snap.generation_service, 2);
        assert_eq!(snap.generation_failures(), 3);
        assert_eq!(snap.generation_ok, 1);
    }
}

//! # BANTER Runtime
//!
//! The live half of the pipeline: everything that runs on the async runtime
//! next to a game server.
//!
//! - [`orchestrator`]: `on_chat` entry point, task ownership, shutdown
//! - [`dispatch`]: the bounded FIFO of jobs and its single worker
//! - [`delivery`]: delayed reply emission and the pacify window
//! - [`metrics`]: lock-free pipeline counters
//! - [`telemetry`]: `tracing` subscriber setup
//!
//! ## Shutdown order
//!
//! ```text
//! cancel token ─▶ queue drained (Stopping) ─▶ worker joined ─▶ deliveries drained
//!                                                  (each bounded by the grace period)
//! ```

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod delivery;
pub mod dispatch;
pub mod metrics;
pub mod orchestrator;
pub mod telemetry;

pub use delivery::DeliveryScheduler;
pub use dispatch::{DispatchQueue, JobHandle, JobOutcome, QueueError, QueueStats};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use orchestrator::{ChatDisposition, ChatOrchestrator, ShutdownReport};
pub use telemetry::init_tracing;

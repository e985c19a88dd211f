//! # banter-llm: Generation Client for BANTER
//!
//! Turns a composed prompt into one short in-character chat line by calling
//! an external text-generation service over HTTP.
//!
//! Two wire flavors are supported:
//!   - **Flat** (`model`, `prompt`, `stream`, sampling under `options`),
//!     answered with `{ "response": "..." }`
//!   - **Chat** (`model`, `messages`, sampling fields),
//!     answered with `{ "choices": [ { "message": { "content": "..." } } ] }`
//!
//! Either envelope is accepted regardless of the configured flavor.
//!
//! # Call budget
//!
//! ```text
//! try_acquire(gate) ──full──▶ Service (fail fast)
//!        │
//!        ▼
//! timeout(call) ──elapsed──▶ Timeout (request future dropped, slot freed)
//!        │
//!        ▼
//! status == 200 ──no──▶ Service { status, body }
//!        │
//!        ▼
//! extract + sanitize ──empty──▶ MalformedResponse
//! ```

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{GenerationClient, TextGenerator};
pub use error::GenerationError;
pub use types::{Endpoint, GenerationRequest, Sampling};

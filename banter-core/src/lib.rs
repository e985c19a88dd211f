//! # BANTER Core Library
//!
//! Game-agnostic state for chat-response orchestration in worlds where
//! human players and autonomous characters ("bots") share the same chat.
//!
//! Every component here owns exactly one piece of shared state and exposes
//! it through a narrow operation set, each behind its own lock:
//!
//! - **Admission**: global sliding window plus per-class cooldowns
//! - **Selection**: which bots hear a message and how many may answer
//! - **Memory**: bounded, TTL-expiring history per (sender, responder) pair
//! - **Personality**: keyword emotion scoring and profile selection
//! - **Datastore**: persisted per-character records (SQLite)
//!
//! The live world itself is reached only through the [`world::World`] and
//! [`world::Presentation`] traits.
//!
//! ## Performance Contract
//!
//! All operations in this crate are synchronous and meant to run on a game
//! or worker thread:
//! - Admission check: < 1μs
//! - Emotion scoring (200-char message): < 20μs
//! - Context rendering (10 entries): < 10μs

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod config;
pub mod datastore;
pub mod error;
pub mod memory;
pub mod personality;
pub mod selection;
pub mod types;
pub mod world;

pub use admission::{AdmissionController, Rejection};
pub use config::BanterConfig;
pub use error::BanterError;
pub use memory::ConversationMemory;
pub use personality::{PersonalityProfile, PersonalitySelector};
pub use selection::ResponderSelector;
pub use types::*;

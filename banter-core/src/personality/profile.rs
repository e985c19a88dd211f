//! Personality profiles and the JSON document they are loaded from.
//!
//! ```json
//! {
//!   "personalities": [
//!     { "id": "veteran", "name": "Grizzled Veteran", "prompt": "...",
//!       "emotions": ["angry", "neutral"], "traits": { "patience": "low" },
//!       "interests": ["war stories"], "chat_style": ["Back in my day..."] }
//!   ],
//!   "emotion_types": {
//!     "angry": { "typical_phrases": ["hate", "wtf"], "response_style": "blunt" }
//!   }
//! }
//! ```
//!
//! Entries that fail to deserialize are skipped with a warning; the rest of
//! the document still loads.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::emotion::{self, EmotionTable, EmotionType};
use crate::error::{BanterError, Result};

/// A reusable prompt template with the emotions it suits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Base prompt text.
    pub prompt: String,
    /// Emotion tags this profile is suited for.
    #[serde(default)]
    pub emotions: Vec<String>,
    /// Free-form traits, rendered into the prompt in key order.
    #[serde(default)]
    pub traits: BTreeMap<String, serde_json::Value>,
    /// Topics the character likes to talk about.
    #[serde(default)]
    pub interests: Vec<String>,
    /// Exemplar phrases showing how the character writes.
    #[serde(default, deserialize_with = "one_or_many")]
    pub chat_style: Vec<String>,
}

impl PersonalityProfile {
    /// Whether the profile declares support for `tag`.
    #[must_use]
    pub fn suits(&self, tag: &str) -> bool {
        self.emotions.iter().any(|e| e.eq_ignore_ascii_case(tag))
    }

    /// Render traits as `key: value` pairs joined by commas.
    #[must_use]
    pub fn traits_summary(&self) -> String {
        self.traits
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{k}: {s}"),
                other => format!("{k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The profile used when no other is available.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            id: "default".into(),
            name: "Adventurer".into(),
            prompt: "You are a friendly adventurer who enjoys chatting with fellow travelers. \
                     You answer briefly and casually, like a real player typing in chat."
                .into(),
            emotions: Vec::new(),
            traits: BTreeMap::new(),
            interests: Vec::new(),
            chat_style: Vec::new(),
        }
    }
}

/// `chat_style` shows up both as a single string and as a list of phrases.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A complete, immutable set of profiles plus the emotion table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonalityBook {
    /// Loaded profiles, in document order.
    pub profiles: Vec<PersonalityProfile>,
    /// Emotion definitions.
    pub emotions: EmotionTable,
}

impl PersonalityBook {
    /// The compiled-in book: a handful of profiles and the built-in emotions.
    #[must_use]
    pub fn builtin() -> Self {
        let profile = |id: &str, name: &str, prompt: &str, emotions: &[&str], style: &[&str]| {
            PersonalityProfile {
                id: id.into(),
                name: name.into(),
                prompt: prompt.into(),
                emotions: emotions.iter().map(|e| (*e).to_string()).collect(),
                traits: BTreeMap::new(),
                interests: Vec::new(),
                chat_style: style.iter().map(|s| (*s).to_string()).collect(),
            }
        };

        Self {
            profiles: vec![
                profile(
                    "cheerful",
                    "Cheerful Companion",
                    "You are an upbeat adventurer who loves meeting people and celebrating small victories.",
                    &["happy", "excited", "neutral"],
                    &["haha nice!", "grats!!"],
                ),
                profile(
                    "veteran",
                    "Grizzled Veteran",
                    "You are a seasoned fighter who has seen too many battles and has little patience for nonsense.",
                    &["angry", "sad", "neutral"],
                    &["seen worse", "keep your blade sharp"],
                ),
                profile(
                    "scholar",
                    "Curious Scholar",
                    "You are a well-read traveler who enjoys explaining how the world works.",
                    &["curious", "neutral"],
                    &["actually, I read that...", "good question"],
                ),
            ],
            emotions: emotion::builtin_table(),
        }
    }

    /// Parse a personality document.
    ///
    /// Malformed profiles and emotion entries are skipped with a warning.
    /// A document without any `emotion_types` gets the built-in table.
    ///
    /// # Errors
    /// Returns `BanterError::PersonalityFile` if the text is not a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| BanterError::PersonalityFile(e.to_string()))?;
        let Some(doc) = doc.as_object() else {
            return Err(BanterError::PersonalityFile(
                "top-level value must be an object".into(),
            ));
        };

        let mut profiles = Vec::new();
        if let Some(entries) = doc.get("personalities").and_then(|v| v.as_array()) {
            for (index, entry) in entries.iter().enumerate() {
                match PersonalityProfile::deserialize(entry) {
                    Ok(profile) => profiles.push(profile),
                    Err(e) => warn!(index, error = %e, "Skipping malformed personality entry"),
                }
            }
        } else {
            warn!("Personality document has no `personalities` array");
        }

        let mut emotions = EmotionTable::new();
        if let Some(entries) = doc.get("emotion_types").and_then(|v| v.as_object()) {
            for (name, entry) in entries {
                match EmotionType::deserialize(entry) {
                    Ok(emotion) => {
                        emotions.insert(name.to_lowercase(), emotion);
                    }
                    Err(e) => warn!(emotion = %name, error = %e, "Skipping malformed emotion type"),
                }
            }
        }
        if emotions.is_empty() {
            emotions = emotion::builtin_table();
        }

        Ok(Self { profiles, emotions })
    }

    /// Read and parse a personality document from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let book = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            profiles = book.profiles.len(),
            emotions = book.emotions.len(),
            "Personality book loaded"
        );
        Ok(book)
    }

    /// Load from `path`, or fall back to [`PersonalityBook::builtin`].
    #[must_use]
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Using built-in personalities");
            Self::builtin()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "personalities": [
            { "id": "veteran", "name": "Veteran", "prompt": "You are old.",
              "emotions": ["angry"], "traits": { "patience": "low", "age": 61 },
              "interests": ["war"], "chat_style": "Back in my day..." },
            { "name": "missing id and prompt" },
            { "id": "bard", "name": "Bard", "prompt": "You sing.",
              "chat_style": ["la la", "tra la"] }
        ],
        "emotion_types": {
            "Angry": { "typical_phrases": ["grr"], "response_style": "blunt" },
            "broken": 42
        }
    }"#;

    #[test]
    fn malformed_entries_are_skipped() {
        let book = PersonalityBook::from_json_str(DOC).expect("document parses");
        assert_eq!(book.profiles.len(), 2);
        assert_eq!(book.profiles[0].chat_style, vec!["Back in my day...".to_string()]);
        assert_eq!(book.profiles[1].chat_style.len(), 2);
        assert_eq!(book.emotions.len(), 1);
        assert!(book.emotions.contains_key("angry"));
    }

    #[test]
    fn traits_render_in_key_order() {
        let book = PersonalityBook::from_json_str(DOC).expect("document parses");
        assert_eq!(book.profiles[0].traits_summary(), "age: 61, patience: low");
    }

    #[test]
    fn missing_emotions_use_builtin_table() {
        let book = PersonalityBook::from_json_str(r#"{ "personalities": [] }"#).expect("parses");
        assert!(book.profiles.is_empty());
        assert!(book.emotions.contains_key("happy"));
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert!(PersonalityBook::from_json_str("[1, 2]").is_err());
        assert!(PersonalityBook::from_json_str("{ nope").is_err());
    }

    #[test]
    fn unreadable_file_falls_back_to_builtin() {
        let book = PersonalityBook::load_or_builtin(Some(Path::new("/nonexistent/p.json")));
        assert_eq!(book, PersonalityBook::builtin());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("personalities.json");
        std::fs::write(&path, DOC).expect("write");
        let book = PersonalityBook::load(&path).expect("loads");
        assert_eq!(book.profiles[1].id, "bard");
    }

    #[test]
    fn suits_is_case_insensitive() {
        let book = PersonalityBook::builtin();
        assert!(book.profiles[0].suits("HAPPY"));
        assert!(!book.profiles[0].suits("angry"));
    }
}

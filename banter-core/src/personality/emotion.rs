//! Keyword emotion scoring.
//!
//! Each emotion owns a list of trigger phrases. A message scores one point
//! per (case-insensitive, possibly overlapping) occurrence of each phrase;
//! the best-scoring emotion wins. Ties go to the emotion whose name sorts
//! first, and a message with no hits at all is [`NEUTRAL`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tag returned when no trigger phrase matches.
pub const NEUTRAL: &str = "neutral";

/// Definition of one emotion, as found under `emotion_types` in the
/// personality document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionType {
    /// Phrases whose presence suggests this emotion.
    #[serde(default)]
    pub typical_phrases: Vec<String>,
    /// How a reply to such a message should sound.
    #[serde(default)]
    pub response_style: String,
}

/// Emotion name → definition, iterated in name order.
pub type EmotionTable = BTreeMap<String, EmotionType>;

/// Count occurrences of `needle` in `haystack`, overlaps included.
///
/// Both arguments are expected to be lowercased already.
#[must_use]
pub fn count_overlapping(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack
        .char_indices()
        .filter(|(i, _)| haystack[*i..].starts_with(needle))
        .count()
}

/// Score every emotion in `table` against `text`.
#[must_use]
pub fn score_emotions(text: &str, table: &EmotionTable) -> BTreeMap<String, usize> {
    let lowered = text.to_lowercase();
    table
        .iter()
        .map(|(name, emotion)| {
            let score = emotion
                .typical_phrases
                .iter()
                .map(|phrase| count_overlapping(&lowered, &phrase.to_lowercase()))
                .sum();
            (name.clone(), score)
        })
        .collect()
}

/// Pick the dominant emotion of `text`, or [`NEUTRAL`] when nothing matches.
#[must_use]
pub fn detect_emotion(text: &str, table: &EmotionTable) -> String {
    let mut best: Option<(String, usize)> = None;
    for (name, score) in score_emotions(text, table) {
        if score > best.as_ref().map_or(0, |(_, s)| *s) {
            best = Some((name, score));
        }
    }
    best.map_or_else(|| NEUTRAL.to_string(), |(name, _)| name)
}

/// Emotion table used when the personality document defines none.
#[must_use]
pub fn builtin_table() -> EmotionTable {
    let entry = |phrases: &[&str], style: &str| EmotionType {
        typical_phrases: phrases.iter().map(|p| (*p).to_string()).collect(),
        response_style: style.to_string(),
    };

    let mut table = EmotionTable::new();
    table.insert(
        "happy".into(),
        entry(
            &["haha", "lol", "great", "awesome", "nice", "thanks", ":)", "love"],
            "cheerful and warm",
        ),
    );
    table.insert(
        "sad".into(),
        entry(
            &["sad", "died", "lost", "miss", "sorry", ":(", "unfortunately"],
            "gentle and sympathetic",
        ),
    );
    table.insert(
        "angry".into(),
        entry(
            &["angry", "hate", "stupid", "wtf", "annoying", "ninja", "!!"],
            "short and blunt, but not hostile",
        ),
    );
    table.insert(
        "curious".into(),
        entry(
            &["?", "how", "why", "where", "what", "anyone know"],
            "helpful and informative",
        ),
    );
    table.insert(
        "excited".into(),
        entry(
            &["wow", "omg", "epic", "finally", "ding", "legendary"],
            "enthusiastic and energetic",
        ),
    );
    table
}

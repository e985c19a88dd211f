//! Personality & emotion selection.
//!
//! ```text
//! message text ──► detect_emotion ──► tag ──► select_personality ──► profile
//!                       ▲                            ▲
//!                       └──── emotion table ─────────┴── profile pool
//!                              (PersonalityBook, swapped whole on reload)
//! ```
//!
//! The book behind a selector is immutable; `reload` builds a new one and
//! swaps the `Arc`, so readers never observe a half-loaded pool.

pub mod emotion;
pub mod profile;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

pub use emotion::{EmotionTable, EmotionType, NEUTRAL};
pub use profile::{PersonalityBook, PersonalityProfile};

use crate::error::Result;

/// Thread-safe front for the loaded [`PersonalityBook`].
#[derive(Debug)]
pub struct PersonalitySelector {
    book: RwLock<Arc<PersonalityBook>>,
}

impl Default for PersonalitySelector {
    fn default() -> Self {
        Self::new(PersonalityBook::builtin())
    }
}

impl PersonalitySelector {
    /// Wrap an already-loaded book.
    #[must_use]
    pub fn new(book: PersonalityBook) -> Self {
        Self {
            book: RwLock::new(Arc::new(book)),
        }
    }

    /// Load from `path`, falling back to the built-in book.
    #[must_use]
    pub fn from_path(path: Option<&Path>) -> Self {
        Self::new(PersonalityBook::load_or_builtin(path))
    }

    /// Current book.
    #[must_use]
    pub fn book(&self) -> Arc<PersonalityBook> {
        Arc::clone(&self.book.read())
    }

    /// Dominant emotion of `text`, or [`NEUTRAL`].
    #[must_use]
    pub fn detect_emotion(&self, text: &str) -> String {
        emotion::detect_emotion(text, &self.book().emotions)
    }

    /// Style hint for replies to a message carrying `tag`, if defined.
    #[must_use]
    pub fn response_style(&self, tag: &str) -> Option<String> {
        self.book()
            .emotions
            .get(tag)
            .map(|e| e.response_style.clone())
            .filter(|s| !s.is_empty())
    }

    /// Choose a profile suited for `tag`.
    ///
    /// Profiles declaring `tag` are preferred; when none do, the whole pool is
    /// eligible. The choice is uniform. An empty pool yields
    /// [`PersonalityProfile::fallback`].
    pub fn select_personality<R: Rng + ?Sized>(&self, tag: &str, rng: &mut R) -> PersonalityProfile {
        let book = self.book();
        let suited: Vec<&PersonalityProfile> =
            book.profiles.iter().filter(|p| p.suits(tag)).collect();
        let pool: Vec<&PersonalityProfile> = if suited.is_empty() {
            book.profiles.iter().collect()
        } else {
            suited
        };

        match pool.choose(rng) {
            Some(profile) => {
                debug!(tag, profile = %profile.id, candidates = pool.len(), "Personality selected");
                (*profile).clone()
            }
            None => PersonalityProfile::fallback(),
        }
    }

    /// Re-read the personality document and replace the pool in one step.
    ///
    /// On error the current pool stays in place.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let book = PersonalityBook::load(path)?;
        let profiles = book.profiles.len();
        *self.book.write() = Arc::new(book);
        info!(path = %path.display(), profiles, "Personality pool replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn prefers_profiles_declaring_the_tag() {
        let selector = PersonalitySelector::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let p = selector.select_personality("curious", &mut rng);
            assert_eq!(p.id, "scholar");
        }
    }

    #[test]
    fn unknown_tag_draws_from_whole_pool() {
        let selector = PersonalitySelector::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            seen.insert(selector.select_personality("bored", &mut rng).id);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn empty_pool_yields_fallback() {
        let selector = PersonalitySelector::new(PersonalityBook::default());
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.select_personality("happy", &mut rng).id, "default");
    }

    #[test]
    fn response_style_comes_from_table() {
        let selector = PersonalitySelector::default();
        assert_eq!(selector.response_style("sad").as_deref(), Some("gentle and sympathetic"));
        assert_eq!(selector.response_style(NEUTRAL), None);
    }

    #[test]
    fn reload_swaps_pool_and_keeps_old_on_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p.json");
        std::fs::write(
            &path,
            r#"{ "personalities": [ { "id": "solo", "name": "Solo", "prompt": "x" } ] }"#,
        )
        .expect("write");

        let selector = PersonalitySelector::default();
        let before = selector.book();
        selector.reload(&path).expect("reloads");
        assert_eq!(selector.book().profiles.len(), 1);
        assert_eq!(before.profiles.len(), 3);

        std::fs::write(&path, "not json").expect("write");
        assert!(selector.reload(&path).is_err());
        assert_eq!(selector.book().profiles[0].id, "solo");
    }
}

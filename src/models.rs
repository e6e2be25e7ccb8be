//! Data model: cards, examples, settings and sessions.

use crate::error::{AppError, Result};
use crate::i18n::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// An example sentence in a source language with its translation into the
/// target language. The pair is never split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub sentence: String,
    pub translation: String,
}

/// A persisted flashcard.
///
/// `id` and `created_at` are assigned by the backend when the card is
/// created and never by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub front_text: String,
    pub target_language: Language,
    pub source_languages: Vec<Language>,
    #[serde(default)]
    pub translations: BTreeMap<Language, String>,
    #[serde(default)]
    pub examples: BTreeMap<Language, Vec<Example>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Card fields supplied by the client; the backend adds `id`/`created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub front_text: String,
    pub target_language: Language,
    pub source_languages: Vec<Language>,
    pub translations: BTreeMap<Language, String>,
    pub examples: BTreeMap<Language, Vec<Example>>,
    pub notes: Option<String>,
}

impl NewCard {
    /// Combine the user's request with what the generation adapter produced.
    pub fn from_generation(
        front_text: &str,
        target_language: Language,
        source_languages: &[Language],
        generated: CardGenerationResult,
    ) -> Self {
        Self {
            front_text: front_text.trim().to_string(),
            target_language,
            source_languages: source_languages.to_vec(),
            translations: generated.translations,
            examples: generated.examples,
            notes: generated.notes,
        }
    }

    /// Check the card invariants before anything is sent to the backend.
    pub fn validate(&self) -> Result<()> {
        if self.front_text.trim().is_empty() {
            return Err(AppError::InvalidInput("front text must not be empty".into()));
        }
        validate_source_languages(&self.source_languages)?;

        let allowed: HashSet<_> = self.source_languages.iter().collect();
        let foreign = self
            .translations
            .keys()
            .chain(self.examples.keys())
            .find(|lang| !allowed.contains(lang));
        if let Some(lang) = foreign {
            return Err(AppError::InvalidInput(format!(
                "'{}' is not one of the card's source languages",
                lang
            )));
        }
        Ok(())
    }
}

/// Structured output of the generation adapter, already reduced to maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardGenerationResult {
    pub translations: BTreeMap<Language, String>,
    pub examples: BTreeMap<Language, Vec<Example>>,
    pub notes: Option<String>,
}

/// Per-user language preferences. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub target_language: Language,
    pub source_languages: Vec<Language>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        validate_source_languages(&self.source_languages)
    }
}

impl Default for Settings {
    /// Used in memory until the user saves settings for the first time
    fn default() -> Self {
        Self {
            target_language: Language::SPANISH,
            source_languages: vec![Language::ENGLISH],
        }
    }
}

fn validate_source_languages(languages: &[Language]) -> Result<()> {
    if languages.is_empty() {
        return Err(AppError::InvalidInput(
            "at least one source language is required".into(),
        ));
    }
    let mut seen = HashSet::new();
    for lang in languages {
        if !seen.insert(lang) {
            return Err(AppError::InvalidInput(format!(
                "source language '{}' is listed twice",
                lang
            )));
        }
    }
    Ok(())
}

/// Identity of the signed-in user; every gateway call is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of authenticated identity issued by the auth service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: UserId,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    // Tokens stay out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

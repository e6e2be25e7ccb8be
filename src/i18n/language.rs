//! Language type: a language code validated against the catalog.

use crate::error::{AppError, Result};
use crate::i18n::{LanguageConfig, LanguageRegistry};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

/// A validated language.
///
/// Only codes present in the catalog can be turned into a `Language`, so any
/// `Language` held by a card or a settings value is known reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "&'static str")]
pub struct Language {
    /// ISO 639-1 language code (e.g., "en", "es")
    code: &'static str,
}

impl Language {
    pub const ENGLISH: Language = Language { code: "en" };
    pub const SPANISH: Language = Language { code: "es" };

    /// Create a Language from a language code string.
    ///
    /// # Returns
    /// * `Ok(Language)` if the code is in the catalog
    /// * `Err(AppError::InvalidInput)` otherwise
    pub fn from_code(code: &str) -> Result<Language> {
        match LanguageRegistry::get().get_by_code(code) {
            Some(config) => Ok(Language { code: config.code }),
            None => Err(AppError::InvalidInput(format!(
                "Unknown language code: '{}'",
                code
            ))),
        }
    }

    /// Get the ISO 639-1 language code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the catalog entry for this language.
    ///
    /// # Panics
    /// Panics if the code is not in the catalog, which cannot happen for a
    /// `Language` built through `from_code` or the constants.
    pub fn config(&self) -> &'static LanguageConfig {
        LanguageRegistry::get()
            .get_by_code(self.code)
            .expect("Language code should always be valid")
    }

    /// English name of the language (e.g., "Spanish").
    pub fn name(&self) -> &'static str {
        self.config().name
    }

    /// Native name of the language (e.g., "Español").
    pub fn native_name(&self) -> &'static str {
        self.config().native_name
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Language::from_code(&code).map_err(de::Error::custom)
    }
}

impl From<Language> for &'static str {
    fn from(language: Language) -> Self {
        language.code
    }
}

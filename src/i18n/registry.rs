//! Language catalog: the static set of languages a card can be written in
//! or translated into.
//!
//! The catalog is reference data. It is built once on first access and never
//! changes for the lifetime of the process.

use serde::Serialize;
use std::sync::OnceLock;

/// One entry of the catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageConfig {
    /// ISO 639-1 language code (e.g., "en", "es", "fr")
    pub code: &'static str,

    /// English display name (e.g., "Spanish")
    pub name: &'static str,

    /// Name of the language in the language itself (e.g., "Español")
    pub native_name: &'static str,
}

/// Global catalog singleton.
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Get the global catalog, initializing it on first call.
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    /// Look up a language by its code.
    ///
    /// # Returns
    /// * `Some(&LanguageConfig)` if the code is in the catalog
    /// * `None` otherwise
    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages.iter().find(|lang| lang.code == code)
    }

    /// All catalog entries, in display order.
    pub fn list_all(&self) -> &[LanguageConfig] {
        &self.languages
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    const CATALOG: &[(&str, &str, &str)] = &[
        ("en", "English", "English"),
        ("es", "Spanish", "Español"),
        ("fr", "French", "Français"),
        ("de", "German", "Deutsch"),
        ("it", "Italian", "Italiano"),
        ("pt", "Portuguese", "Português"),
        ("nl", "Dutch", "Nederlands"),
        ("sv", "Swedish", "Svenska"),
        ("pl", "Polish", "Polski"),
        ("ru", "Russian", "Русский"),
        ("uk", "Ukrainian", "Українська"),
        ("tr", "Turkish", "Türkçe"),
        ("ar", "Arabic", "العربية"),
        ("hi", "Hindi", "हिन्दी"),
        ("ja", "Japanese", "日本語"),
        ("ko", "Korean", "한국어"),
        ("zh", "Chinese", "中文"),
    ];

    CATALOG
        .iter()
        .map(|&(code, name, native_name)| LanguageConfig {
            code,
            name,
            native_name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_get_returns_singleton() {
        let registry1 = LanguageRegistry::get();
        let registry2 = LanguageRegistry::get();

        assert!(std::ptr::eq(registry1, registry2));
    }

    #[test]
    fn test_get_by_code_spanish() {
        let config = LanguageRegistry::get()
            .get_by_code("es")
            .expect("Spanish should be in the catalog");

        assert_eq!(config.code, "es");
        assert_eq!(config.name, "Spanish");
        assert_eq!(config.native_name, "Español");
    }

    #[test]
    fn test_get_by_code_nonexistent() {
        let registry = LanguageRegistry::get();
        assert!(registry.get_by_code("xx").is_none());
        assert!(registry.get_by_code("").is_none());
        assert!(registry.get_by_code("EN").is_none());
    }

    #[test]
    fn test_codes_are_unique() {
        let all = LanguageRegistry::get().list_all();
        let codes: HashSet<_> = all.iter().map(|lang| lang.code).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_catalog_starts_with_english() {
        let all = LanguageRegistry::get().list_all();
        assert_eq!(all[0].code, "en");
        assert!(all.len() >= 10);
    }

    #[test]
    fn test_language_config_serializes_camel_case() {
        let config = LanguageRegistry::get().get_by_code("fr").unwrap();
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["code"], "fr");
        assert_eq!(json["nativeName"], "Français");
    }
}

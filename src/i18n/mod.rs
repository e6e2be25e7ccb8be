//! Language catalog.
//!
//! - `registry`: the static list of supported languages and their names
//! - `language`: the validated `Language` handle used by cards and settings
//!
//! # Example
//!
//! ```rust,ignore
//! use memo_cards::i18n::{Language, LanguageRegistry};
//!
//! let spanish = Language::from_code("es")?;
//! let all = LanguageRegistry::get().list_all();
//! ```

mod language;
mod registry;

pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry};

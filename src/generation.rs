//! AI generation adapter: turns a phrase plus language choices into
//! translations, example sentences and usage notes.
//!
//! One chat-completion call per request with a strict JSON schema as the
//! response format. There is no cache and no retry; the caller decides
//! whether to resubmit.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::i18n::Language;
use crate::models::{CardGenerationResult, Example};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

const SERVICE: &str = "AI service";

/// Produces card content for a phrase.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        front_text: &str,
        target_language: Language,
        source_languages: &[Language],
    ) -> Result<CardGenerationResult>;
}

/// OpenAI Chat Completion request with a structured output schema
#[derive(Debug, Serialize)]
struct GenerationRequest {
    model: String,
    messages: Vec<Message>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

fn build_system_prompt() -> &'static str {
    r#"You are a language tutor who writes flashcards for learners.

For the phrase you are given:
- Translate it into every requested source language. Give the most common meaning first; add a second meaning after a semicolon only if it is frequent.
- Write 2 to 4 short, natural example sentences per source language. Each example has a "sentence" in the source language and its "translation" into the language being learned, using the phrase.
- Add brief usage notes (register, irregular forms, false friends) only when they help; otherwise return null for notes.

Use the exact language codes you are given. Answer only with JSON matching the schema."#
}

fn build_user_prompt(
    front_text: &str,
    target_language: Language,
    source_languages: &[Language],
) -> String {
    let sources = source_languages
        .iter()
        .map(|lang| format!("{} ({})", lang.name(), lang.code()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Phrase: \"{}\"\nLanguage being learned: {} ({})\nSource languages: {}",
        front_text,
        target_language.name(),
        target_language.code(),
        sources
    )
}

/// JSON schema the model must follow
fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "translations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "languageCode": { "type": "string" },
                        "translation": { "type": "string" }
                    },
                    "required": ["languageCode", "translation"],
                    "additionalProperties": false
                }
            },
            "examples": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "languageCode": { "type": "string" },
                        "sentences": {
                            "type": "array",
                            "minItems": 2,
                            "maxItems": 4,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "sentence": { "type": "string" },
                                    "translation": { "type": "string" }
                                },
                                "required": ["sentence", "translation"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["languageCode", "sentences"],
                    "additionalProperties": false
                }
            },
            "notes": { "type": ["string", "null"] }
        },
        "required": ["translations", "examples", "notes"],
        "additionalProperties": false
    })
}

/// Generator backed by an OpenAI-compatible chat completions endpoint
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_key: config.openai_api_key.clone(),
            api_url: config.openai_api_url.clone(),
            model: config.openai_model.clone(),
            max_tokens: config.generation_max_tokens,
        }
    }

    fn build_request(
        &self,
        front_text: &str,
        target_language: Language,
        source_languages: &[Language],
    ) -> GenerationRequest {
        // Reasoning models need higher token limits and don't support temperature
        let is_reasoning = is_reasoning_model(&self.model);

        GenerationRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: Some(build_system_prompt().to_string()),
                },
                Message {
                    role: "user".to_string(),
                    content: Some(build_user_prompt(
                        front_text,
                        target_language,
                        source_languages,
                    )),
                },
            ],
            max_completion_tokens: if is_reasoning { 16000 } else { self.max_tokens },
            temperature: if is_reasoning { None } else { Some(0.7) },
            reasoning_effort: if is_reasoning {
                Some("low".to_string())
            } else {
                None
            },
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "memo_card",
                    strict: true,
                    schema: response_schema(),
                },
            },
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        front_text: &str,
        target_language: Language,
        source_languages: &[Language],
    ) -> Result<CardGenerationResult> {
        // Checked before any network call
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Configuration("OPENAI_API_KEY is not set".into()))?;

        if front_text.trim().is_empty() {
            return Err(AppError::InvalidInput("front text must not be empty".into()));
        }
        if source_languages.is_empty() {
            return Err(AppError::InvalidInput(
                "at least one source language is required".into(),
            ));
        }

        info!(
            "Generating card for {} phrase in {} source language(s)",
            target_language.name(),
            source_languages.len()
        );

        let request = self.build_request(front_text.trim(), target_language, source_languages);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::from_transport(SERVICE, &e, |msg| {
                    AppError::Generation(format!("Failed to send request to OpenAI API: {}", msg))
                })
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(AppError::Generation(format!(
                "OpenAI API error ({}): {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::Generation(format!("Failed to parse OpenAI response: {}", e))
        })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                AppError::MalformedResponse("response contained no message content".into())
            })?;

        let result = parse_generation(&content, source_languages)?;
        info!(
            "Generated {} translation(s) and examples for {} language(s)",
            result.translations.len(),
            result.examples.len()
        );
        Ok(result)
    }
}

/// Parse the model's JSON text and reduce its lists into per-language maps.
///
/// `translations` and `examples` must be present and be arrays. Entries that
/// lack a field, or name a language that was not requested, are skipped.
pub fn parse_generation(content: &str, requested: &[Language]) -> Result<CardGenerationResult> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| AppError::MalformedResponse(format!("response is not JSON: {}", e)))?;

    let translations = value
        .get("translations")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::MalformedResponse("missing 'translations' list".into()))?;
    let examples = value
        .get("examples")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::MalformedResponse("missing 'examples' list".into()))?;

    let notes = value
        .get("notes")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    Ok(CardGenerationResult {
        translations: reduce_translations(translations, requested),
        examples: reduce_examples(examples, requested),
        notes,
    })
}

fn requested_language(entry: &Value, requested: &[Language]) -> Option<Language> {
    let code = entry.get("languageCode").and_then(Value::as_str)?;
    let language = Language::from_code(code.trim()).ok()?;
    if requested.contains(&language) {
        Some(language)
    } else {
        warn!("Skipping generated entry for unrequested language '{}'", code);
        None
    }
}

fn reduce_translations(entries: &[Value], requested: &[Language]) -> BTreeMap<Language, String> {
    let mut map = BTreeMap::new();
    for entry in entries {
        let Some(language) = requested_language(entry, requested) else {
            continue;
        };
        let Some(translation) = entry.get("translation").and_then(Value::as_str) else {
            continue;
        };
        map.entry(language).or_insert_with(|| translation.to_string());
    }
    map
}

fn reduce_examples(
    entries: &[Value],
    requested: &[Language],
) -> BTreeMap<Language, Vec<Example>> {
    let mut map: BTreeMap<Language, Vec<Example>> = BTreeMap::new();
    for entry in entries {
        let Some(language) = requested_language(entry, requested) else {
            continue;
        };
        let Some(sentences) = entry.get("sentences").and_then(Value::as_array) else {
            continue;
        };
        let pairs: Vec<Example> = sentences
            .iter()
            .filter_map(|s| {
                Some(Example {
                    sentence: s.get("sentence")?.as_str()?.to_string(),
                    translation: s.get("translation")?.as_str()?.to_string(),
                })
            })
            .collect();
        if !pairs.is_empty() {
            map.entry(language).or_default().extend(pairs);
        }
    }
    map
}

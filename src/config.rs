use crate::error::{AppError, Result as AppResult};
use anyhow::{Context, Result};

pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct Config {
    // Backend (auth + card storage)
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,

    // OpenAI
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_url: String,
    pub generation_max_tokens: u32,

    // Local API server
    pub port: u16,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// Missing credentials are not an error here; the feature that needs
    /// them reports a configuration error when it is used.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            supabase_url: non_empty_var("SUPABASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            supabase_anon_key: non_empty_var("SUPABASE_ANON_KEY"),

            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_API_URL.to_string()),
            generation_max_tokens: std::env::var("GENERATION_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1500),

            port: match std::env::var("PORT") {
                Ok(v) => v.parse().context(format!("PORT is not a valid port: {}", v))?,
                Err(_) => 8080,
            },
        })
    }

    /// Backend endpoint and anon key, or a configuration error naming what is missing
    pub fn backend_credentials(&self) -> AppResult<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(key)) => Ok((url, key)),
            (None, _) => Err(AppError::Configuration("SUPABASE_URL is not set".into())),
            (_, None) => Err(AppError::Configuration(
                "SUPABASE_ANON_KEY is not set".into(),
            )),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

//! Generate card content for one phrase and print it, without storing anything
//!
//! Usage:
//!   cargo run --bin generate -- <phrase> [target] [sources]
//!   cargo run --bin generate -- aprender es en,de
//!
//! Required environment variables:
//! - OPENAI_API_KEY
//!
//! Optional:
//! - OPENAI_MODEL (defaults to gpt-4o-mini)
//! - OPENAI_API_URL
//! - GENERATION_MAX_TOKENS (defaults to 1500)

use anyhow::{bail, Context, Result};
use memo_cards::config::Config;
use memo_cards::generation::{Generator, OpenAiGenerator};
use memo_cards::i18n::Language;
use memo_cards::models::Settings;
use tracing::info;

fn parse_languages(arg: &str) -> Result<Vec<Language>> {
    arg.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| Language::from_code(code).context(format!("Invalid source language: {}", code)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("memo_cards=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(phrase) = args.first() else {
        bail!("Usage: generate <phrase> [target-language] [source-languages]");
    };

    let defaults = Settings::default();
    let target = match args.get(1) {
        Some(code) => Language::from_code(code).context("Invalid target language")?,
        None => defaults.target_language,
    };
    let sources = match args.get(2) {
        Some(list) => parse_languages(list)?,
        None => defaults.source_languages,
    };
    if sources.is_empty() {
        bail!("At least one source language is required");
    }

    let config = Config::from_env()?;
    let generator = OpenAiGenerator::new(reqwest::Client::new(), &config);

    info!(
        "Generating \"{}\" ({} -> {})",
        phrase,
        target.name(),
        sources.iter().map(|l| l.code()).collect::<Vec<_>>().join(",")
    );
    let result = generator
        .generate(phrase, target, &sources)
        .await
        .context("Generation failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

use anyhow::{Context, Result};
use memo_cards::auth::AuthClient;
use memo_cards::config::Config;
use memo_cards::controller::Controller;
use memo_cards::db::SupabaseGateway;
use memo_cards::generation::OpenAiGenerator;
use memo_cards::server::{self, AppState};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("memo_cards=info".parse()?),
        )
        .init();

    info!("Starting memo cards");

    let config = Config::from_env()?;

    // Missing credentials only disable the affected feature
    if let Err(e) = config.backend_credentials() {
        warn!("Sign-in and card storage unavailable: {}", e);
    }
    if config.openai_api_key.is_none() {
        warn!("Card generation unavailable: OPENAI_API_KEY is not set");
    }

    let client = reqwest::Client::new();
    let auth = Arc::new(AuthClient::new(client.clone(), &config));
    let gateway = Arc::new(SupabaseGateway::new(client.clone(), &config));
    let generator = Arc::new(OpenAiGenerator::new(client, &config));
    let controller = Arc::new(Controller::new(gateway, generator));

    let observer = controller.observe(auth.subscribe());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port))
        .await
        .context(format!("Failed to bind port {}", config.port))?;

    let state = AppState {
        controller: Arc::clone(&controller),
        auth,
    };
    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
    .context("Server error")?;

    observer.unsubscribe();
    Ok(())
}

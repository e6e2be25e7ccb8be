//! Local JSON API over one controller and one auth client.

use crate::auth::{AuthClient, OtpKind};
use crate::controller::{AddCardRequest, Controller, Phase};
use crate::error::AppError;
use crate::i18n::{Language, LanguageConfig, LanguageRegistry};
use crate::models::{Card, Settings};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub auth: Arc<AuthClient>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Connectivity { .. }
            | AppError::MalformedResponse(_)
            | AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Busy => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    phase: Phase,
    error: Option<String>,
    signed_in: bool,
    email: Option<String>,
    settings_saved: bool,
    card_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCardBody {
    front_text: String,
    target_language: Option<Language>,
    source_languages: Option<Vec<Language>>,
}

#[derive(Debug, Deserialize)]
struct SignInBody {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct MagicLinkBody {
    email: String,
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    email: String,
    token: String,
    #[serde(default)]
    kind: Option<OtpKind>,
}

#[derive(Debug, Deserialize)]
struct NextQuery {
    exclude: Option<String>,
}

fn to_cards(cards: &[Arc<Card>]) -> Vec<Card> {
    cards.iter().map(|card| Card::clone(card)).collect()
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.controller.snapshot().await;
    Json(StatusResponse {
        phase: snapshot.phase,
        error: snapshot.error,
        signed_in: snapshot.session.is_some(),
        email: snapshot.session.and_then(|s| s.email),
        settings_saved: snapshot.settings_saved,
        card_count: snapshot.cards.len(),
    })
}

async fn languages() -> Json<&'static [LanguageConfig]> {
    Json(LanguageRegistry::get().list_all())
}

async fn sign_in(State(state): State<AppState>, Json(body): Json<SignInBody>) -> ApiResult<serde_json::Value> {
    let session = state
        .auth
        .sign_in_with_password(&body.email, &body.password)
        .await?;
    Ok(Json(json!({ "userId": session.user_id, "email": session.email })))
}

async fn magic_link(
    State(state): State<AppState>,
    Json(body): Json<MagicLinkBody>,
) -> Result<StatusCode, AppError> {
    state.auth.send_magic_link(&body.email).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn verify(State(state): State<AppState>, Json(body): Json<VerifyBody>) -> ApiResult<serde_json::Value> {
    let session = state
        .auth
        .verify_otp(&body.email, &body.token, body.kind.unwrap_or(OtpKind::Email))
        .await?;
    Ok(Json(json!({ "userId": session.user_id, "email": session.email })))
}

async fn sign_out(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.auth.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_cards(State(state): State<AppState>) -> Json<Vec<Card>> {
    Json(to_cards(&state.controller.snapshot().await.cards))
}

async fn add_card(
    State(state): State<AppState>,
    Json(body): Json<AddCardBody>,
) -> Result<(StatusCode, Json<Card>), AppError> {
    let card = state
        .controller
        .add_card(AddCardRequest {
            front_text: body.front_text,
            target_language: body.target_language,
            source_languages: body.source_languages,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(Card::clone(&card))))
}

async fn delete_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.controller.delete_card(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn study(State(state): State<AppState>) -> Json<Vec<Card>> {
    Json(to_cards(&state.controller.study_cards().await))
}

async fn next_card(State(state): State<AppState>, Query(query): Query<NextQuery>) -> ApiResult<Card> {
    state
        .controller
        .next_study_card(query.exclude.as_deref())
        .await
        .map(|card| Json(Card::clone(&card)))
        .ok_or_else(|| AppError::NotFound("no cards to study in the current target language".into()))
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.controller.snapshot().await.settings)
}

async fn put_settings(State(state): State<AppState>, Json(settings): Json<Settings>) -> ApiResult<Settings> {
    Ok(Json(state.controller.save_settings(settings).await?))
}

async fn reload(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.controller.reload().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/languages", get(languages))
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/magic-link", post(magic_link))
        .route("/api/auth/verify", post(verify))
        .route("/api/auth/sign-out", post(sign_out))
        .route("/api/cards", get(list_cards).post(add_card))
        .route("/api/cards/:id", delete(delete_card))
        .route("/api/study", get(study))
        .route("/api/study/next", get(next_card))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

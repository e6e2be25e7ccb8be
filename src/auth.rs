//! Client for the backend's auth service and the session subscription the
//! controller observes.
//!
//! The current session lives in a `watch` channel. Sign-in, OTP verification,
//! refresh and sign-out publish a new value; subscribers see every change.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Session, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

const SERVICE: &str = "sign-in service";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(ts), _) => DateTime::<Utc>::from_timestamp(ts, 0),
            (None, Some(secs)) => Some(Utc::now() + Duration::seconds(secs)),
            (None, None) => None,
        };

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: UserId(self.user.id),
            email: self.user.email,
            expires_at,
        }
    }
}

/// Kind of one-time code being verified
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtpKind {
    Email,
    Magiclink,
    Signup,
}

/// Handle on the stream of session changes.
///
/// Dropping the subscription releases it.
pub struct SessionSubscription {
    receiver: watch::Receiver<Option<Session>>,
}

impl SessionSubscription {
    /// Session at the time of the call
    pub fn current(&self) -> Option<Session> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the auth client is gone.
    pub async fn next(&mut self) -> Option<Option<Session>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

pub struct AuthClient {
    client: reqwest::Client,
    backend: Result<(String, String)>,
    sessions: watch::Sender<Option<Session>>,
}

impl AuthClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        let (sessions, _) = watch::channel(None);
        Self {
            client,
            backend: config
                .backend_credentials()
                .map(|(url, key)| (url.to_string(), key.to_string())),
            sessions,
        }
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            receiver: self.sessions.subscribe(),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.sessions.borrow().clone()
    }

    /// Install a session obtained elsewhere (e.g. a completed OAuth redirect)
    pub fn set_session(&self, session: Option<Session>) {
        match &session {
            Some(s) => info!("Session set for user {}", s.user_id),
            None => info!("Session cleared"),
        }
        self.sessions.send_replace(session);
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let (base_url, anon_key) = self.backend.as_ref().map_err(Clone::clone)?;

        Ok(self
            .client
            .post(format!("{}/auth/v1/{}", base_url, path))
            .header("apikey", anon_key)
            .header("Content-Type", "application/json"))
    }

    async fn send(builder: reqwest::RequestBuilder, action: &str) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            AppError::from_transport(SERVICE, &e, |msg| {
                AppError::Authentication(format!("Failed to {}: {}", action, msg))
            })
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(AppError::Authentication(format!(
                "Failed to {} ({}): {}",
                action, status, body
            )));
        }
        Ok(response)
    }

    async fn establish(&self, builder: reqwest::RequestBuilder, action: &str) -> Result<Session> {
        let response = Self::send(builder, action).await?;
        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::Authentication(format!("Failed to parse {} response: {}", action, e))
        })?;

        let session = token.into_session();
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .post("token")?
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        self.establish(request, "sign in").await
    }

    /// Email a magic link / one-time code. The session arrives via `verify_otp`.
    pub async fn send_magic_link(&self, email: &str) -> Result<()> {
        let request = self
            .post("otp")?
            .json(&json!({ "email": email, "create_user": true }));

        Self::send(request, "send magic link").await?;
        info!("Magic link requested");
        Ok(())
    }

    pub async fn verify_otp(&self, email: &str, token: &str, kind: OtpKind) -> Result<Session> {
        let request = self
            .post("verify")?
            .json(&json!({ "email": email, "token": token, "type": kind }));

        self.establish(request, "verify code").await
    }

    pub async fn refresh(&self) -> Result<Session> {
        let refresh_token = self
            .current_session()
            .and_then(|s| s.refresh_token)
            .ok_or_else(|| AppError::Authentication("no session to refresh".into()))?;

        let request = self
            .post("token")?
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));

        self.establish(request, "refresh session").await
    }

    /// End the session. The local session is cleared even if the remote call fails.
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.current_session() {
            match self.post("logout") {
                Ok(request) => {
                    let request =
                        request.header("Authorization", format!("Bearer {}", session.access_token));
                    if let Err(e) = Self::send(request, "sign out").await {
                        warn!("Remote sign-out failed, clearing local session anyway: {}", e);
                    }
                }
                Err(e) => warn!("Skipping remote sign-out: {}", e),
            }
        }

        self.set_session(None);
        Ok(())
    }
}

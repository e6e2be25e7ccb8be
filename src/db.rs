//! Persistence gateway: card and settings storage scoped to one user.
//!
//! The gateway is stateless. Every call takes the caller's `Session`, whose
//! user id filters rows and whose access token authorizes the request;
//! row-level ownership is enforced again by the backend.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::i18n::Language;
use crate::models::{Card, Example, NewCard, Session, Settings, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const SERVICE: &str = "card database";

#[async_trait]
pub trait Gateway: Send + Sync {
    /// All of the user's cards, newest first.
    async fn list_cards(&self, session: &Session) -> Result<Vec<Card>>;

    /// Insert a card; the backend assigns `id` and `created_at`.
    async fn create_card(&self, session: &Session, card: &NewCard) -> Result<Card>;

    /// Delete one of the user's cards. Unknown ids are not an error.
    async fn delete_card(&self, session: &Session, id: &str) -> Result<()>;

    /// `None` means the user has not saved settings yet.
    async fn get_settings(&self, session: &Session) -> Result<Option<Settings>>;

    /// Full replacement keyed by the user; returns the stored value.
    async fn save_settings(&self, session: &Session, settings: &Settings) -> Result<Settings>;
}

/// `cards` row as returned by the backend
#[derive(Debug, Deserialize)]
struct CardRow {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    created_at: DateTime<Utc>,
    front_text: String,
    target_language: Language,
    source_languages: Vec<Language>,
    #[serde(default)]
    translations: Option<BTreeMap<Language, String>>,
    #[serde(default)]
    examples: Option<BTreeMap<Language, Vec<Example>>>,
    #[serde(default)]
    notes: Option<String>,
}

impl From<CardRow> for Card {
    fn from(row: CardRow) -> Self {
        Card {
            id: row.id,
            created_at: row.created_at,
            front_text: row.front_text,
            target_language: row.target_language,
            source_languages: row.source_languages,
            translations: row.translations.unwrap_or_default(),
            examples: row.examples.unwrap_or_default(),
            notes: row.notes,
        }
    }
}

#[derive(Debug, Serialize)]
struct CardInsert<'a> {
    user_id: &'a UserId,
    front_text: &'a str,
    target_language: Language,
    source_languages: &'a [Language],
    translations: &'a BTreeMap<Language, String>,
    examples: &'a BTreeMap<Language, Vec<Example>>,
    notes: Option<&'a str>,
}

/// `user_settings` row
#[derive(Debug, Serialize, Deserialize)]
struct SettingsRow {
    user_id: UserId,
    target_language: Language,
    source_languages: Vec<Language>,
}

impl From<SettingsRow> for Settings {
    fn from(row: SettingsRow) -> Self {
        Settings {
            target_language: row.target_language,
            source_languages: row.source_languages,
        }
    }
}

/// Ids may be uuids or bigints depending on the table definition
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Gateway over the backend's PostgREST interface
pub struct SupabaseGateway {
    client: reqwest::Client,
    /// Endpoint and anon key, or why they are unavailable
    backend: Result<(String, String)>,
}

impl SupabaseGateway {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            backend: config
                .backend_credentials()
                .map(|(url, key)| (url.to_string(), key.to_string())),
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        table: &str,
        session: &Session,
    ) -> Result<reqwest::RequestBuilder> {
        let (base_url, anon_key) = self.backend.as_ref().map_err(Clone::clone)?;

        Ok(self
            .client
            .request(method, format!("{}/rest/v1/{}", base_url, table))
            .header("apikey", anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token)))
    }

    async fn send(builder: reqwest::RequestBuilder, action: &str) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            AppError::from_transport(SERVICE, &e, |msg| {
                AppError::Persistence(format!("Failed to {}: {}", action, msg))
            })
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(AppError::Authentication(format!(
                "backend rejected the session while trying to {} ({}): {}",
                action, status, body
            )))
        } else {
            Err(AppError::Persistence(format!(
                "Failed to {} ({}): {}",
                action, status, body
            )))
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
        action: &str,
    ) -> Result<T> {
        response.json().await.map_err(|e| {
            AppError::Persistence(format!("Failed to decode response to {}: {}", action, e))
        })
    }
}

fn owner_filter(session: &Session) -> String {
    format!("eq.{}", session.user_id)
}

#[async_trait]
impl Gateway for SupabaseGateway {
    async fn list_cards(&self, session: &Session) -> Result<Vec<Card>> {
        let request = self
            .request(reqwest::Method::GET, "cards", session)?
            .query(&[
                ("select", "*".to_string()),
                ("user_id", owner_filter(session)),
                ("order", "created_at.desc".to_string()),
            ]);

        let response = Self::send(request, "list cards").await?;
        let rows: Vec<serde_json::Value> = Self::decode(response, "list cards").await?;

        // A row the catalog can no longer describe is skipped, not fatal
        let mut cards: Vec<Card> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").map(|id| id.to_string()).unwrap_or_default();
                match serde_json::from_value::<CardRow>(row) {
                    Ok(row) => Some(Card::from(row)),
                    Err(e) => {
                        warn!("Skipping unreadable card {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        debug!("Loaded {} cards for user {}", cards.len(), session.user_id);
        Ok(cards)
    }

    async fn create_card(&self, session: &Session, card: &NewCard) -> Result<Card> {
        card.validate()?;

        let insert = CardInsert {
            user_id: &session.user_id,
            front_text: &card.front_text,
            target_language: card.target_language,
            source_languages: &card.source_languages,
            translations: &card.translations,
            examples: &card.examples,
            notes: card.notes.as_deref(),
        };

        let request = self
            .request(reqwest::Method::POST, "cards", session)?
            .header("Prefer", "return=representation")
            .json(&insert);

        let response = Self::send(request, "create card").await?;
        let rows: Vec<CardRow> = Self::decode(response, "create card").await?;

        let created = rows.into_iter().next().map(Card::from).ok_or_else(|| {
            AppError::Persistence("create card returned no record".into())
        })?;

        info!("Created card {} for user {}", created.id, session.user_id);
        Ok(created)
    }

    async fn delete_card(&self, session: &Session, id: &str) -> Result<()> {
        let request = self
            .request(reqwest::Method::DELETE, "cards", session)?
            .query(&[("id", format!("eq.{}", id)), ("user_id", owner_filter(session))]);

        Self::send(request, "delete card").await?;
        info!("Deleted card {} for user {}", id, session.user_id);
        Ok(())
    }

    async fn get_settings(&self, session: &Session) -> Result<Option<Settings>> {
        let request = self
            .request(reqwest::Method::GET, "user_settings", session)?
            .query(&[("select", "*".to_string()), ("user_id", owner_filter(session))]);

        let response = Self::send(request, "load settings").await?;
        let rows: Vec<SettingsRow> = Self::decode(response, "load settings").await?;

        Ok(rows.into_iter().next().map(Settings::from))
    }

    async fn save_settings(&self, session: &Session, settings: &Settings) -> Result<Settings> {
        settings.validate()?;

        let row = SettingsRow {
            user_id: session.user_id.clone(),
            target_language: settings.target_language,
            source_languages: settings.source_languages.clone(),
        };

        let request = self
            .request(reqwest::Method::POST, "user_settings", session)?
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);

        let response = Self::send(request, "save settings").await?;
        let rows: Vec<SettingsRow> = Self::decode(response, "save settings").await?;

        let stored = rows.into_iter().next().map(Settings::from).ok_or_else(|| {
            AppError::Persistence("save settings returned no record".into())
        })?;

        info!(
            "Saved settings for user {}: target={}, sources={}",
            session.user_id,
            stored.target_language,
            stored.source_languages.len()
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, headers, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    // ==================== Helper Functions ====================

    fn create_test_config(supabase_url: &str) -> Config {
        Config {
            supabase_url: Some(supabase_url.to_string()),
            supabase_anon_key: Some("test-anon-key".to_string()),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_api_url: "http://unused".to_string(),
            generation_max_tokens: 1500,
            port: 8080,
        }
    }

    fn create_session(user: &str) -> Session {
        Session {
            access_token: format!("token-{}", user),
            refresh_token: None,
            user_id: UserId(user.to_string()),
            email: None,
            expires_at: None,
        }
    }

    fn card_row(id: &str, created_at: &str, target: &str) -> serde_json::Value {
        json!({
            "id": id,
            "created_at": created_at,
            "user_id": "user-1",
            "front_text": format!("phrase {}", id),
            "target_language": target,
            "source_languages": ["en"],
            "translations": { "en": "translation" },
            "examples": { "en": [{ "sentence": "s", "translation": "t" }] },
            "notes": null
        })
    }

    fn aprender() -> NewCard {
        NewCard {
            front_text: "aprender".to_string(),
            target_language: Language::SPANISH,
            source_languages: vec![Language::ENGLISH],
            translations: BTreeMap::from([(Language::ENGLISH, "to learn".to_string())]),
            examples: BTreeMap::from([(
                Language::ENGLISH,
                vec![Example {
                    sentence: "Quiero aprender español.".to_string(),
                    translation: "I want to learn Spanish.".to_string(),
                }],
            )]),
            notes: None,
        }
    }

    // ==================== list_cards Tests ====================

    #[tokio::test]
    async fn test_list_cards_scoped_and_newest_first() {
        let mock_server = MockServer::start().await;

        // Deliberately out of order to check the client-side sort
        Mock::given(method("GET"))
            .and(path("/rest/v1/cards"))
            .and(query_param("user_id", "eq.user-1"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "test-anon-key"))
            .and(header("Authorization", "Bearer token-user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                card_row("a", "2024-05-01T10:00:00+00:00", "es"),
                card_row("c", "2024-05-03T10:00:00.123456+00:00", "es"),
                card_row("b", "2024-05-02T10:00:00+00:00", "fr"),
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let cards = gateway.list_cards(&create_session("user-1")).await.unwrap();

        let ids: Vec<_> = cards.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(cards[0].translations[&Language::ENGLISH], "translation");
    }

    #[tokio::test]
    async fn test_list_cards_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let cards = gateway.list_cards(&create_session("user-1")).await.unwrap();
        assert!(cards.is_empty());
    }

    #[tokio::test]
    async fn test_list_cards_numeric_ids_and_null_maps() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 42,
                "created_at": "2024-05-01T10:00:00Z",
                "front_text": "hola",
                "target_language": "es",
                "source_languages": ["en"],
                "translations": null,
                "examples": null
            }])))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let cards = gateway.list_cards(&create_session("user-1")).await.unwrap();
        assert_eq!(cards[0].id, "42");
        assert!(cards[0].translations.is_empty());
        assert!(cards[0].notes.is_none());
    }

    #[tokio::test]
    async fn test_list_cards_skips_rows_with_unknown_language() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/cards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "good",
                    "created_at": "2024-05-02T10:00:00Z",
                    "front_text": "hola",
                    "target_language": "es",
                    "source_languages": ["en"],
                    "translations": { "en": "hello" },
                    "examples": {}
                },
                {
                    "id": "stale",
                    "created_at": "2024-05-01T10:00:00Z",
                    "front_text": "saluton",
                    "target_language": "es",
                    "source_languages": ["en"],
                    "translations": { "eo": "saluton" },
                    "examples": {}
                }
            ])))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let cards = gateway.list_cards(&create_session("user-1")).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, "good");
    }

    #[tokio::test]
    async fn test_list_cards_unauthorized() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("JWT expired"))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let err = gateway.list_cards(&create_session("user-1")).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_list_cards_server_error_is_persistence_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let err = gateway.list_cards(&create_session("user-1")).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_list_cards_garbage_body_is_persistence_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let err = gateway.list_cards(&create_session("user-1")).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connectivity_error() {
        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config("http://127.0.0.1:9"));
        let err = gateway.list_cards(&create_session("user-1")).await.unwrap_err();
        assert!(matches!(err, AppError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_configuration_error() {
        let mut config = create_test_config("http://127.0.0.1:9");
        config.supabase_anon_key = None;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &config);
        let err = gateway.get_settings(&create_session("user-1")).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(err.to_string().contains("SUPABASE_ANON_KEY"));
    }

    // ==================== create_card Tests ====================

    #[tokio::test]
    async fn test_create_card_returns_server_record() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/cards"))
            .and(header("Prefer", "return=representation"))
            .and(body_partial_json(json!({
                "user_id": "user-1",
                "front_text": "aprender",
                "target_language": "es",
                "source_languages": ["en"],
                "translations": { "en": "to learn" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
                "id": "0b8e3c1e-card",
                "created_at": "2024-06-01T12:00:00+00:00",
                "user_id": "user-1",
                "front_text": "aprender",
                "target_language": "es",
                "source_languages": ["en"],
                "translations": { "en": "to learn" },
                "examples": { "en": [{
                    "sentence": "Quiero aprender español.",
                    "translation": "I want to learn Spanish."
                }] },
                "notes": null
            }])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let input = aprender();
        let card = gateway
            .create_card(&create_session("user-1"), &input)
            .await
            .unwrap();

        assert_eq!(card.id, "0b8e3c1e-card");
        assert_eq!(card.front_text, input.front_text);
        assert_eq!(card.translations, input.translations);
        assert_eq!(card.examples, input.examples);
    }

    #[tokio::test]
    async fn test_create_card_empty_echo_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/cards"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let err = gateway
            .create_card(&create_session("user-1"), &aprender())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(err.to_string().contains("no record"));
    }

    #[tokio::test]
    async fn test_create_invalid_card_makes_no_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut input = aprender();
        input
            .translations
            .insert(Language::from_code("fr").unwrap(), "apprendre".to_string());

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let err = gateway
            .create_card(&create_session("user-1"), &input)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    // ==================== delete_card Tests ====================

    #[tokio::test]
    async fn test_delete_card_scoped_to_owner() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/cards"))
            .and(query_param("id", "eq.card-9"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        gateway
            .delete_card(&create_session("user-1"), "card-9")
            .await
            .expect("delete should succeed");
    }

    #[tokio::test]
    async fn test_delete_card_failure_is_reported() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let err = gateway
            .delete_card(&create_session("user-1"), "card-9")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    // ==================== Settings Tests ====================

    #[tokio::test]
    async fn test_get_settings_none_when_not_created() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/user_settings"))
            .and(query_param("user_id", "eq.user-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let settings = gateway.get_settings(&create_session("user-2")).await.unwrap();
        assert!(settings.is_none());
    }

    #[tokio::test]
    async fn test_save_settings_upserts_and_returns_stored_value() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/user_settings"))
            .and(query_param("on_conflict", "user_id"))
            .and(headers(
                "Prefer",
                vec!["resolution=merge-duplicates", "return=representation"],
            ))
            .and(body_partial_json(json!({
                "user_id": "user-1",
                "target_language": "fr",
                "source_languages": ["en", "de"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
                "user_id": "user-1",
                "target_language": "fr",
                "source_languages": ["en", "de"]
            }])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config(&mock_server.uri()));
        let settings = Settings {
            target_language: Language::from_code("fr").unwrap(),
            source_languages: vec![Language::ENGLISH, Language::from_code("de").unwrap()],
        };

        let stored = gateway
            .save_settings(&create_session("user-1"), &settings)
            .await
            .unwrap();
        assert_eq!(stored, settings);
    }

    #[tokio::test]
    async fn test_save_settings_rejects_empty_sources() {
        let gateway = SupabaseGateway::new(reqwest::Client::new(), &create_test_config("http://127.0.0.1:9"));
        let settings = Settings {
            target_language: Language::SPANISH,
            source_languages: vec![],
        };

        let err = gateway
            .save_settings(&create_session("user-1"), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}

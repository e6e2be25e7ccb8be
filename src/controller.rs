//! Application state controller.
//!
//! Owns the in-memory cards, settings and session, and keeps them consistent
//! with the generation adapter and the persistence gateway:
//!
//! - initial load fetches cards and settings together and commits both or neither
//! - a new card enters memory only after the backend has stored it
//! - delete is optimistic; on failure the pre-delete list is restored as-is
//! - settings are replaced by the value the backend returns
//!
//! One mutation runs at a time. Starting a second one while the first is
//! pending fails with `AppError::Busy`.

use crate::auth::SessionSubscription;
use crate::db::Gateway;
use crate::error::{AppError, Result};
use crate::generation::Generator;
use crate::i18n::Language;
use crate::models::{Card, NewCard, Session, Settings};
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Unauthenticated,
    Loading,
    Ready,
    Error,
}

/// Point-in-time copy of the controller state
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub error: Option<String>,
    pub session: Option<Session>,
    pub cards: Vec<Arc<Card>>,
    pub settings: Settings,
    pub settings_saved: bool,
}

/// What the user asked for when adding a card.
///
/// Languages default to the current settings when not given.
#[derive(Debug, Clone, Default)]
pub struct AddCardRequest {
    pub front_text: String,
    pub target_language: Option<Language>,
    pub source_languages: Option<Vec<Language>>,
}

struct State {
    phase: Phase,
    error: Option<String>,
    session: Option<Session>,
    cards: Vec<Arc<Card>>,
    settings: Settings,
    settings_saved: bool,
    /// Bumped whenever the signed-in user changes; late results from an
    /// older generation are dropped.
    generation: u64,
}

impl State {
    fn signed_out(generation: u64) -> Self {
        Self {
            phase: Phase::Unauthenticated,
            error: None,
            session: None,
            cards: Vec::new(),
            settings: Settings::default(),
            settings_saved: false,
            generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionChange {
    /// Same user, new token; nothing to reload
    TokenRefreshed,
    SignedOut,
    /// A new user; the load for this generation must follow
    Started(u64),
}

pub struct Controller {
    gateway: Arc<dyn Gateway>,
    generator: Arc<dyn Generator>,
    state: RwLock<State>,
    pending: Mutex<()>,
}

/// Keeps the session observer running. Dropping it unsubscribes.
pub struct ObserverHandle {
    task: JoinHandle<()>,
}

impl ObserverHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Controller {
    pub fn new(gateway: Arc<dyn Gateway>, generator: Arc<dyn Generator>) -> Self {
        Self {
            gateway,
            generator,
            state: RwLock::new(State::signed_out(0)),
            pending: Mutex::new(()),
        }
    }

    /// Follow session changes from the auth client until the handle is dropped.
    ///
    /// The current session is applied first, then every change triggers a
    /// full reload (new user) or a full reset (signed out). Loads run on their
    /// own task so a later change is applied while a load is still pending;
    /// the superseded load is cancelled.
    pub fn observe(self: &Arc<Self>, mut subscription: SessionSubscription) -> ObserverHandle {
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut loading: Option<JoinHandle<()>> = None;
            let mut session = subscription.current();
            loop {
                let change = controller.apply_session(session).await;
                if change != SessionChange::TokenRefreshed {
                    if let Some(previous) = loading.take() {
                        previous.abort();
                    }
                }
                if let SessionChange::Started(generation) = change {
                    let controller = Arc::clone(&controller);
                    loading = Some(tokio::spawn(async move {
                        // Failures are recorded in state
                        let _ = controller.load(generation).await;
                    }));
                }

                match subscription.next().await {
                    Some(next) => session = next,
                    None => break,
                }
            }
            debug!("Session subscription closed");
        });
        ObserverHandle { task }
    }

    /// Apply a session change and wait for the resulting load, if any.
    ///
    /// A different user (or a first sign-in) reloads everything; the same user
    /// with a refreshed token only swaps the token; `None` resets all state.
    pub async fn on_session_changed(&self, session: Option<Session>) {
        if let SessionChange::Started(generation) = self.apply_session(session).await {
            // Failures are recorded in state
            let _ = self.load(generation).await;
        }
    }

    async fn apply_session(&self, session: Option<Session>) -> SessionChange {
        let mut state = self.state.write().await;
        match session {
            None => {
                info!("Signed out, clearing cards and settings");
                *state = State::signed_out(state.generation + 1);
                SessionChange::SignedOut
            }
            Some(session) => {
                let same_user = state
                    .session
                    .as_ref()
                    .is_some_and(|current| current.user_id == session.user_id);
                if same_user && state.phase != Phase::Unauthenticated {
                    state.session = Some(session);
                    return SessionChange::TokenRefreshed;
                }

                info!("Session started for user {}, loading data", session.user_id);
                let generation = state.generation + 1;
                *state = State::signed_out(generation);
                state.session = Some(session);
                state.phase = Phase::Loading;
                SessionChange::Started(generation)
            }
        }
    }

    /// Fetch cards and settings together and commit both, or neither.
    async fn load(&self, generation: u64) -> Result<()> {
        let session = {
            let mut state = self.state.write().await;
            if state.generation != generation {
                return Ok(());
            }
            state.phase = Phase::Loading;
            state
                .session
                .clone()
                .ok_or_else(|| AppError::Authentication("no active session".into()))?
        };

        let fetched = futures::try_join!(
            self.gateway.list_cards(&session),
            self.gateway.get_settings(&session)
        );

        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Discarding load for a session that is no longer current");
            return Ok(());
        }

        match fetched {
            Ok((cards, settings)) => {
                info!("Loaded {} cards", cards.len());
                state.cards = cards.into_iter().map(Arc::new).collect();
                state.settings_saved = settings.is_some();
                state.settings = settings.unwrap_or_default();
                state.phase = Phase::Ready;
                state.error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Initial load failed: {}", e);
                state.phase = Phase::Error;
                state.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    /// Re-fetch everything for the current user.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.begin_mutation()?;
        let generation = {
            let state = self.state.read().await;
            if state.session.is_none() {
                return Err(AppError::Authentication("no active session".into()));
            }
            state.generation
        };
        self.load(generation).await
    }

    fn begin_mutation(&self) -> Result<MutexGuard<'_, ()>> {
        self.pending.try_lock().map_err(|_| AppError::Busy)
    }

    /// Session and generation for a mutation, refusing while signed out or loading
    async fn mutation_context(&self) -> Result<(Session, u64)> {
        let state = self.state.read().await;
        match (&state.session, state.phase) {
            (None, _) => Err(AppError::Authentication("no active session".into())),
            (Some(_), Phase::Loading) => Err(AppError::Busy),
            (Some(session), _) => Ok((session.clone(), state.generation)),
        }
    }

    /// Record the outcome of an action in the user-visible error flag.
    async fn finish<T>(&self, generation: u64, action: &str, result: Result<T>) -> Result<T> {
        let mut state = self.state.write().await;
        if state.generation == generation {
            match &result {
                Ok(_) => {
                    state.error = None;
                    if state.phase == Phase::Error {
                        state.phase = Phase::Ready;
                    }
                }
                Err(e) => {
                    warn!("{} failed: {}", action, e);
                    state.error = Some(e.user_message());
                }
            }
        }
        result
    }

    /// Generate content for a phrase, store it, and prepend the stored card.
    pub async fn add_card(&self, request: AddCardRequest) -> Result<Arc<Card>> {
        let _guard = self.begin_mutation()?;
        let (session, generation) = self.mutation_context().await?;

        let (target_language, source_languages) = {
            let state = self.state.read().await;
            (
                request
                    .target_language
                    .unwrap_or(state.settings.target_language),
                request
                    .source_languages
                    .unwrap_or_else(|| state.settings.source_languages.clone()),
            )
        };

        let result = self
            .create(&session, &request.front_text, target_language, &source_languages)
            .await;

        let card = match result {
            Ok(card) => {
                let card = Arc::new(card);
                let mut state = self.state.write().await;
                if state.generation == generation {
                    state.cards.insert(0, Arc::clone(&card));
                }
                Ok(card)
            }
            Err(e) => Err(e),
        };

        self.finish(generation, "Add card", card).await
    }

    async fn create(
        &self,
        session: &Session,
        front_text: &str,
        target_language: Language,
        source_languages: &[Language],
    ) -> Result<Card> {
        if front_text.trim().is_empty() {
            return Err(AppError::InvalidInput("front text must not be empty".into()));
        }
        Settings {
            target_language,
            source_languages: source_languages.to_vec(),
        }
        .validate()?;

        let generated = self
            .generator
            .generate(front_text, target_language, source_languages)
            .await?;

        let new_card =
            NewCard::from_generation(front_text, target_language, source_languages, generated);
        self.gateway.create_card(session, &new_card).await
    }

    /// Remove a card right away and delete it in the backend.
    ///
    /// If the backend call fails, the list from before the removal is put
    /// back unchanged. Ids that are not in memory are a no-op.
    pub async fn delete_card(&self, id: &str) -> Result<()> {
        let _guard = self.begin_mutation()?;
        let (session, generation) = self.mutation_context().await?;

        let snapshot = {
            let mut state = self.state.write().await;
            if !state.cards.iter().any(|card| card.id == id) {
                debug!("Card {} not in memory, nothing to delete", id);
                return Ok(());
            }
            let snapshot = state.cards.clone();
            state.cards.retain(|card| card.id != id);
            snapshot
        };

        let result = self.gateway.delete_card(&session, id).await;

        if result.is_err() {
            let mut state = self.state.write().await;
            if state.generation == generation {
                state.cards = snapshot;
            }
        }

        self.finish(generation, "Delete card", result).await
    }

    /// Store new settings and adopt whatever the backend returns.
    pub async fn save_settings(&self, settings: Settings) -> Result<Settings> {
        let _guard = self.begin_mutation()?;
        let (session, generation) = self.mutation_context().await?;

        let result = match settings.validate() {
            Ok(()) => self.gateway.save_settings(&session, &settings).await,
            Err(e) => Err(e),
        };

        if let Ok(stored) = &result {
            let mut state = self.state.write().await;
            if state.generation == generation {
                state.settings = stored.clone();
                state.settings_saved = true;
            }
        }

        self.finish(generation, "Save settings", result).await
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let state = self.state.read().await;
        StateSnapshot {
            phase: state.phase,
            error: state.error.clone(),
            session: state.session.clone(),
            cards: state.cards.clone(),
            settings: state.settings.clone(),
            settings_saved: state.settings_saved,
        }
    }

    /// Cards whose language is the current target language.
    pub async fn study_cards(&self) -> Vec<Arc<Card>> {
        let state = self.state.read().await;
        eligible_for_study(&state.cards, &state.settings)
    }

    /// A random card to study, avoiding `exclude` when another card exists.
    pub async fn next_study_card(&self, exclude: Option<&str>) -> Option<Arc<Card>> {
        let eligible = self.study_cards().await;
        pick_random(&eligible, exclude)
    }
}

pub fn eligible_for_study(cards: &[Arc<Card>], settings: &Settings) -> Vec<Arc<Card>> {
    cards
        .iter()
        .filter(|card| card.target_language == settings.target_language)
        .cloned()
        .collect()
}

fn pick_random(cards: &[Arc<Card>], exclude: Option<&str>) -> Option<Arc<Card>> {
    let others: Vec<&Arc<Card>> = cards
        .iter()
        .filter(|card| Some(card.id.as_str()) != exclude)
        .collect();

    let mut rng = rand::rng();
    match others.choose(&mut rng) {
        Some(card) => Some(Arc::clone(card)),
        None => cards.first().cloned(),
    }
}

//! Session controller: owns the transcript, the settings and the
//! connection status, and drives one completion request at a time.
//!
//! Front ends send [`Command`]s in and drain [`SessionEvent`]s out. The
//! network call itself can run anywhere: [`SessionController::begin_submit`]
//! hands back the request to send and [`SessionController::finish_submit`]
//! applies whatever came back.

use std::collections::VecDeque;
use std::sync::Arc;
use log::{debug, error, info, warn};

use crate::completion::{CompletionApi, CompletionRequest};
use crate::config::{Settings, SettingsStore};
use crate::error::{ChatError, ChatResult};
use crate::state::{format_elapsed, ConnectionStatus, SessionStats, Transcript, Turn};

pub const NEW_CHAT_PROMPT: &str = "Start a new chat? This will clear your conversation history.";

/// A discrete user gesture
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Submit(String),
    NewSession,
    SaveSettings(Settings),
    OpenSettings,
}

/// State changes for the presentation layer to render
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TurnAppended(Turn),
    StatusChanged(ConnectionStatus),
    TranscriptCleared,
    SettingsSaved,
    /// Settings need attention before anything can be sent.
    PromptSettings,
}

/// Everything needed to run one completion call off the controller.
#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub api_key: String,
    pub request: CompletionRequest,
}

pub struct SessionController {
    transcript: Transcript,
    settings: Settings,
    stats: SessionStats,
    status: ConnectionStatus,
    busy: bool,
    store: Arc<dyn SettingsStore>,
    events: VecDeque<SessionEvent>,
}

impl SessionController {
    /// Build a controller and populate settings from `store`.
    pub fn new(store: Arc<dyn SettingsStore>) -> ChatResult<Self> {
        let mut controller = Self {
            transcript: Transcript::new(),
            settings: Settings::default(),
            stats: SessionStats::new(),
            status: ConnectionStatus::Online,
            busy: false,
            store,
            events: VecDeque::new(),
        };
        controller.load_settings()?;
        Ok(controller)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn elapsed_time(&self) -> String {
        format_elapsed(self.stats.elapsed())
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Validate `text`, record the user turn and return the request to send.
    ///
    /// `Ok(None)` means nothing happened: blank input, or a request is
    /// already in flight.
    pub fn begin_submit(&mut self, text: &str) -> ChatResult<Option<PendingExchange>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if self.busy {
            debug!("submit ignored, a request is already in flight");
            return Ok(None);
        }
        if !self.settings.has_api_key() {
            self.events.push_back(SessionEvent::PromptSettings);
            return Err(ChatError::missing_api_key());
        }

        self.append(Turn::user(text));
        self.set_status(ConnectionStatus::Connecting);
        self.busy = true;

        let request = CompletionRequest::from_turns(
            self.transcript.turns(),
            self.settings.temperature,
            self.settings.max_tokens,
        );
        Ok(Some(PendingExchange {
            api_key: self.settings.api_key.clone(),
            request,
        }))
    }

    /// Apply the outcome of the call started by `begin_submit`.
    pub fn finish_submit(&mut self, outcome: ChatResult<String>) {
        if !self.busy {
            warn!("completion outcome arrived with no request in flight; dropping it");
            return;
        }
        self.busy = false;

        match outcome {
            Ok(reply) => {
                self.append(Turn::assistant(reply));
                self.set_status(ConnectionStatus::Online);
            }
            Err(err) => {
                if err.is_exchange_failure() {
                    warn!("exchange failed: {}", err);
                } else {
                    error!("exchange aborted: {}", err);
                }
                self.append(Turn::assistant(format!(
                    "I apologize, but I encountered an error: {}",
                    err
                )));
                self.set_status(ConnectionStatus::Offline);
            }
        }
    }

    /// One full exchange against `api`. Returns `true` when a request was sent.
    pub async fn submit(&mut self, api: &dyn CompletionApi, text: &str) -> ChatResult<bool> {
        let Some(pending) = self.begin_submit(text)? else {
            return Ok(false);
        };
        let outcome = api.complete(&pending.api_key, &pending.request).await;
        self.finish_submit(outcome);
        Ok(true)
    }

    /// Clear the conversation. A non-empty transcript asks `confirm` first;
    /// returns whether the session was reset. Refused while a request is in
    /// flight, since its reply belongs to the current transcript.
    pub fn new_session<F>(&mut self, confirm: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if self.busy {
            debug!("new session refused, a request is in flight");
            return false;
        }
        if !self.transcript.is_empty() && !confirm() {
            return false;
        }

        self.transcript.clear();
        self.stats.reset();
        self.events.push_back(SessionEvent::TranscriptCleared);
        self.set_status(ConnectionStatus::Online);
        info!("new session started");
        true
    }

    /// Re-read settings from the store, defaults for anything missing.
    pub fn load_settings(&mut self) -> ChatResult<&Settings> {
        let entries = self.store.load()?;
        self.settings = Settings::from_entries(&entries);
        Ok(&self.settings)
    }

    /// Persist all three fields, then adopt them. Nothing changes on error.
    pub fn save_settings(&mut self, candidate: Settings) -> ChatResult<()> {
        // Keep in memory exactly what a later load would produce
        let candidate = Settings {
            api_key: candidate.api_key.trim().to_string(),
            ..candidate
        }
        .normalized();
        if candidate.api_key.is_empty() {
            return Err(ChatError::empty_api_key());
        }

        self.store.save(&candidate.to_entries())?;
        self.settings = candidate;
        self.events.push_back(SessionEvent::SettingsSaved);
        info!("settings saved");
        Ok(())
    }

    fn append(&mut self, turn: Turn) {
        self.transcript.push(turn.clone());
        self.stats.message_count += 1;
        self.events.push_back(SessionEvent::TurnAppended(turn));
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("status {:?} -> {:?}", self.status, status);
        }
        self.status = status;
        self.events.push_back(SessionEvent::StatusChanged(status));
    }
}

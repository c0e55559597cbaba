use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{error, info};
use tokio::task::JoinHandle;

use crate::completion::CompletionApi;
use crate::config::{Settings, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::error::{ChatError, ChatResult};
use crate::session::{Command, SessionController, SessionEvent};

const NOTICE_DURATION: Duration = Duration::from_secs(3);

pub const CHAR_WARN_THRESHOLD: usize = 1500;
pub const CHAR_DANGER_THRESHOLD: usize = 1800;

/// Starter prompts offered on the welcome screen (F1-F4)
pub const SUGGESTED_PROMPTS: [&str; 4] = [
    "Explain quantum computing in simple terms",
    "Write a Python function to reverse a linked list",
    "What are the pros and cons of remote work?",
    "Help me plan a healthy weekly meal schedule",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    None,
    Settings,
    ConfirmNewChat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// Transient message shown in the corner; disappears on its own
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingsField {
    #[default]
    ApiKey,
    Temperature,
    MaxTokens,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::ApiKey => SettingsField::Temperature,
            SettingsField::Temperature => SettingsField::MaxTokens,
            SettingsField::MaxTokens => SettingsField::ApiKey,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::ApiKey => SettingsField::MaxTokens,
            SettingsField::Temperature => SettingsField::ApiKey,
            SettingsField::MaxTokens => SettingsField::Temperature,
        }
    }
}

/// Editable copy of the settings while the modal is open
#[derive(Debug, Clone, Default)]
pub struct SettingsForm {
    pub api_key: String,
    pub temperature: String,
    pub max_tokens: String,
    pub field: SettingsField,
}

impl SettingsForm {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            temperature: settings.temperature.to_string(),
            max_tokens: settings.max_tokens.to_string(),
            field: SettingsField::ApiKey,
        }
    }

    pub fn active_mut(&mut self) -> &mut String {
        match self.field {
            SettingsField::ApiKey => &mut self.api_key,
            SettingsField::Temperature => &mut self.temperature,
            SettingsField::MaxTokens => &mut self.max_tokens,
        }
    }

    /// Numbers that don't parse fall back to the defaults, like a blank field would.
    pub fn to_settings(&self) -> Settings {
        Settings {
            api_key: self.api_key.trim().to_string(),
            temperature: self
                .temperature
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|t| t.is_finite() && *t != 0.0)
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self
                .max_tokens
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub session: SessionController,
    client: Arc<dyn CompletionApi>,

    // Message input
    pub input: String,
    pub cursor: usize,

    // Transcript view
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub follow_bottom: bool,

    // Overlays
    pub modal: Modal,
    pub form: SettingsForm,
    pub notice: Option<Notice>,

    // In-flight completion call
    pending: Option<JoinHandle<ChatResult<String>>>,
    pub animation_frame: u8,
}

impl App {
    pub fn new(session: SessionController, client: Arc<dyn CompletionApi>) -> Self {
        let mut app = Self {
            should_quit: false,
            session,
            client,
            input: String::new(),
            cursor: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_bottom: true,
            modal: Modal::None,
            form: SettingsForm::default(),
            notice: None,
            pending: None,
            animation_frame: 0,
        };

        if !app.session.settings().has_api_key() {
            app.notify(NoticeKind::Info, "Press Ctrl+S to set your OpenRouter API key.");
        }
        app
    }

    /// Route one user gesture to the controller.
    pub fn dispatch(&mut self, command: Command) {
        match command {
            Command::Submit(text) => self.submit(&text),
            Command::NewSession => {
                // Only a non-empty transcript needs the confirmation modal
                if self.is_busy() {
                    self.notify(NoticeKind::Info, "Wait for the current reply before starting a new chat.");
                } else if self.session.new_session(|| false) {
                    self.after_clear();
                } else {
                    self.modal = Modal::ConfirmNewChat;
                }
            }
            Command::SaveSettings(candidate) => match self.session.save_settings(candidate) {
                Ok(()) => {
                    self.modal = Modal::None;
                    self.notify(NoticeKind::Success, "Settings saved successfully!");
                }
                Err(e) => self.show_error(&e),
            },
            Command::OpenSettings => {
                self.form = SettingsForm::from_settings(self.session.settings());
                self.modal = Modal::Settings;
            }
        }
        self.process_events();
    }

    /// Answer to the "start a new chat?" modal.
    pub fn confirm_new_chat(&mut self, accepted: bool) {
        self.modal = Modal::None;
        if self.session.new_session(|| accepted) {
            self.after_clear();
        }
        self.process_events();
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    fn submit(&mut self, text: &str) {
        match self.session.begin_submit(text) {
            Ok(Some(exchange)) => {
                self.input.clear();
                self.cursor = 0;
                self.follow_bottom = true;

                let client = Arc::clone(&self.client);
                self.pending = Some(tokio::spawn(async move {
                    client.complete(&exchange.api_key, &exchange.request).await
                }));
            }
            Ok(None) => {}
            Err(e) => self.show_error(&e),
        }
    }

    /// Hand a finished request back to the controller. Called on every tick.
    pub async fn poll_pending(&mut self) {
        let finished = self.pending.as_ref().map(|h| h.is_finished()).unwrap_or(false);
        if !finished {
            return;
        }

        if let Some(handle) = self.pending.take() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("completion task failed: {}", e);
                    Err(ChatError::Network(format!("request task failed: {}", e)))
                }
            };
            self.session.finish_submit(outcome);
            self.process_events();
        }
    }

    pub fn tick(&mut self) {
        if self.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        if self.notice.as_ref().is_some_and(|n| Instant::now() >= n.expires_at) {
            self.notice = None;
        }
    }

    pub fn notify(&mut self, kind: NoticeKind, message: impl Into<String>) {
        self.notice = Some(Notice {
            kind,
            message: message.into(),
            expires_at: Instant::now() + NOTICE_DURATION,
        });
    }

    fn show_error(&mut self, err: &ChatError) {
        self.notify(NoticeKind::Error, err.to_string());
    }

    fn after_clear(&mut self) {
        self.chat_scroll = 0;
        self.follow_bottom = true;
        info!("transcript cleared");
    }

    fn process_events(&mut self) {
        for event in self.session.drain_events() {
            match event {
                SessionEvent::TurnAppended(_) => self.follow_bottom = true,
                SessionEvent::PromptSettings => {
                    self.form = SettingsForm::from_settings(self.session.settings());
                    self.modal = Modal::Settings;
                }
                SessionEvent::TranscriptCleared => self.chat_scroll = 0,
                SessionEvent::StatusChanged(_) | SessionEvent::SettingsSaved => {}
            }
        }
    }

    pub fn char_count(&self) -> usize {
        self.input.chars().count()
    }

    pub fn insert_prompt(&mut self, index: usize) {
        if let Some(prompt) = SUGGESTED_PROMPTS.get(index) {
            self.input = prompt.to_string();
            self.cursor = self.input.chars().count();
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    /// Estimate of rendered transcript lines at the current chat width,
    /// used to pin the view to the newest message.
    pub fn transcript_line_count(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 { self.chat_width as usize } else { 50 };

        let mut total: usize = 0;
        for turn in self.session.transcript().turns() {
            total += 1; // role line
            for line in turn.content.lines() {
                let chars = line.chars().count();
                total += if chars == 0 { 1 } else { chars.div_ceil(wrap_width) };
            }
            total += 1; // blank separator
        }
        if self.is_busy() {
            total += 2;
        }
        total.min(u16::MAX as usize) as u16
    }

    /// Clamp scroll and keep following the bottom when requested.
    pub fn sync_scroll(&mut self) {
        let max_scroll = self.transcript_line_count().saturating_sub(self.chat_height);
        if self.follow_bottom || self.chat_scroll > max_scroll {
            self.chat_scroll = max_scroll;
        }
        if self.chat_scroll == max_scroll {
            self.follow_bottom = true;
        }
    }
}

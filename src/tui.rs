//! Terminal lifecycle and the event feed for the chat screen.

use std::io::{self, Stderr};
use std::time::Duration;
use anyhow::Result;
use crossterm::{
    event::{
        DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event, EventStream, KeyEvent, KeyEventKind, MouseEvent,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use log::{debug, error};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::app::App;
use crate::ui;

/// Drives the session timer, notice expiry, the thinking animation and
/// polling of the in-flight request.
const TICK_RATE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Paste(String),
    Resize(u16, u16),
    Tick,
}

/// Map a raw terminal event to the ones the chat screen reacts to.
/// Key releases and focus changes are dropped.
fn translate(event: Event) -> Option<AppEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(AppEvent::Key(key)),
        Event::Mouse(mouse) => Some(AppEvent::Mouse(mouse)),
        Event::Paste(text) => Some(AppEvent::Paste(text)),
        Event::Resize(w, h) => Some(AppEvent::Resize(w, h)),
        _ => None,
    }
}

async fn pump_terminal(tx: UnboundedSender<AppEvent>) {
    let mut stream = EventStream::new();
    while let Some(next) = stream.next().await {
        let event = match next {
            Ok(raw) => raw,
            Err(e) => {
                error!("terminal event stream failed: {}", e);
                return;
            }
        };
        if let Some(event) = translate(event) {
            if tx.send(event).is_err() {
                return;
            }
        }
    }
    debug!("terminal event stream ended");
}

async fn pump_ticks(tx: UnboundedSender<AppEvent>) {
    let mut interval = tokio::time::interval(TICK_RATE);
    loop {
        interval.tick().await;
        if tx.send(AppEvent::Tick).is_err() {
            return;
        }
    }
}

/// Merged stream of terminal input and ticks.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_terminal(tx.clone()));
        tokio::spawn(pump_ticks(tx));
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn leave_screen() -> io::Result<()> {
    execute!(io::stderr(), DisableBracketedPaste, DisableMouseCapture, LeaveAlternateScreen)?;
    disable_raw_mode()
}

/// The alternate screen in raw mode. Dropping it, or a panic anywhere,
/// puts the terminal back.
pub struct ChatTerminal {
    terminal: Terminal<CrosstermBackend<Stderr>>,
    active: bool,
}

impl ChatTerminal {
    pub fn enter() -> Result<Self> {
        let previous_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = leave_screen();
            previous_hook(info);
        }));

        enable_raw_mode()?;
        execute!(io::stderr(), EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
        let terminal = Terminal::new(CrosstermBackend::new(io::stderr()))?;

        Ok(Self { terminal, active: true })
    }

    pub fn draw(&mut self, app: &mut App) -> Result<()> {
        self.terminal.draw(|frame| ui::render(app, frame))?;
        Ok(())
    }

    /// Restore the terminal, reporting any failure.
    pub fn leave(mut self) -> Result<()> {
        self.active = false;
        leave_screen()?;
        Ok(())
    }
}

impl Drop for ChatTerminal {
    fn drop(&mut self) {
        if self.active {
            let _ = leave_screen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEventState, KeyModifiers};

    fn key_event(kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code: KeyCode::Char('a'),
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn test_translate_keeps_presses_only() {
        let press = key_event(KeyEventKind::Press);
        assert_eq!(translate(Event::Key(press)), Some(AppEvent::Key(press)));
        assert_eq!(translate(Event::Key(key_event(KeyEventKind::Release))), None);
        assert_eq!(translate(Event::FocusGained), None);
    }

    #[test]
    fn test_translate_paste_and_resize() {
        assert_eq!(
            translate(Event::Paste("two\nlines".to_string())),
            Some(AppEvent::Paste("two\nlines".to_string()))
        );
        assert_eq!(translate(Event::Resize(80, 24)), Some(AppEvent::Resize(80, 24)));
    }
}

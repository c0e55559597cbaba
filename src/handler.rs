use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use crate::app::{App, Modal};
use crate::session::Command;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Insert `text` at a character cursor, advancing the cursor past it.
fn insert_at_cursor(buffer: &mut String, cursor: &mut usize, text: &str) {
    let byte_pos = char_to_byte_index(buffer, *cursor);
    buffer.insert_str(byte_pos, text);
    *cursor += text.chars().count();
}

fn delete_before_cursor(buffer: &mut String, cursor: &mut usize) {
    if *cursor > 0 {
        *cursor -= 1;
        let byte_pos = char_to_byte_index(buffer, *cursor);
        buffer.remove(byte_pos);
    }
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.poll_pending().await;
            app.tick();
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.modal {
        Modal::Settings => handle_settings_key(app, key),
        Modal::ConfirmNewChat => handle_confirm_key(app, key),
        Modal::None => handle_chat_key(app, key),
    }
}

fn handle_chat_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Esc => app.should_quit = true,
        KeyCode::Char('n') if ctrl => app.dispatch(Command::NewSession),
        KeyCode::Char('s') if ctrl => app.dispatch(Command::OpenSettings),

        // Transcript scrolling works even while a request is running
        KeyCode::PageUp => app.scroll_up(app.chat_height.max(1) / 2),
        KeyCode::PageDown => app.scroll_down(app.chat_height.max(1) / 2),
        KeyCode::Up if ctrl => app.scroll_up(1),
        KeyCode::Down if ctrl => app.scroll_down(1),

        // Input is locked while a request is in flight
        _ if app.is_busy() => {}

        KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
            insert_at_cursor(&mut app.input, &mut app.cursor, "\n");
        }
        KeyCode::Enter => {
            let text = app.input.clone();
            app.dispatch(Command::Submit(text));
        }
        KeyCode::F(n @ 1..=4) => {
            if app.session.transcript().is_empty() {
                app.insert_prompt((n - 1) as usize);
            }
        }
        KeyCode::Backspace => delete_before_cursor(&mut app.input, &mut app.cursor),
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Char(c) if !ctrl => {
            let mut buf = [0u8; 4];
            insert_at_cursor(&mut app.input, &mut app.cursor, c.encode_utf8(&mut buf));
        }
        _ => {}
    }
}

fn handle_settings_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.modal = Modal::None;
        }
        KeyCode::Enter => {
            let candidate = app.form.to_settings();
            app.dispatch(Command::SaveSettings(candidate));
        }
        KeyCode::Tab | KeyCode::Down => {
            app.form.field = app.form.field.next();
        }
        KeyCode::BackTab | KeyCode::Up => {
            app.form.field = app.form.field.prev();
        }
        KeyCode::Backspace => {
            app.form.active_mut().pop();
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.form.active_mut().push(c);
        }
        _ => {}
    }
}

fn handle_confirm_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => app.confirm_new_chat(true),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.confirm_new_chat(false),
        _ => {}
    }
}

fn handle_paste(app: &mut App, text: &str) {
    match app.modal {
        Modal::Settings => app.form.active_mut().push_str(text.trim()),
        Modal::None if !app.is_busy() => insert_at_cursor(&mut app.input, &mut app.cursor, text),
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollUp => app.scroll_up(3),
        MouseEventKind::ScrollDown => app.scroll_down(3),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionApi, CompletionRequest};
    use crate::config::MemorySettingsStore;
    use crate::error::ChatResult;
    use crate::session::SessionController;
    use async_trait::async_trait;
    use crossterm::event::KeyEventKind;
    use std::sync::Arc;

    struct NeverCalled;

    #[async_trait]
    impl CompletionApi for NeverCalled {
        async fn complete(&self, _api_key: &str, _request: &CompletionRequest) -> ChatResult<String> {
            Ok(String::new())
        }
    }

    fn app() -> App {
        let session = SessionController::new(Arc::new(MemorySettingsStore::new())).unwrap();
        App::new(session, Arc::new(NeverCalled))
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    fn type_str(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_key(app, key(KeyCode::Char(c), KeyModifiers::NONE));
        }
    }

    #[test]
    fn test_char_to_byte_index_multibyte() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[test]
    fn test_editing_keys() {
        let mut app = app();
        type_str(&mut app, "héllo");
        handle_key(&mut app, key(KeyCode::Left, KeyModifiers::NONE));
        handle_key(&mut app, key(KeyCode::Backspace, KeyModifiers::NONE));
        assert_eq!(app.input, "hélo");
        handle_key(&mut app, key(KeyCode::Home, KeyModifiers::NONE));
        handle_key(&mut app, key(KeyCode::Delete, KeyModifiers::NONE));
        assert_eq!(app.input, "élo");
        handle_key(&mut app, key(KeyCode::End, KeyModifiers::NONE));
        handle_key(&mut app, key(KeyCode::Enter, KeyModifiers::SHIFT));
        assert_eq!(app.input, "élo\n");
    }

    #[test]
    fn test_ctrl_shortcuts() {
        let mut app = app();
        handle_key(&mut app, key(KeyCode::Char('s'), KeyModifiers::CONTROL));
        assert_eq!(app.modal, Modal::Settings);
        assert!(app.input.is_empty());

        handle_key(&mut app, key(KeyCode::Esc, KeyModifiers::NONE));
        assert_eq!(app.modal, Modal::None);
        assert!(!app.should_quit);

        handle_key(&mut app, key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit);
    }

    #[test]
    fn test_settings_modal_fields() {
        let mut app = app();
        handle_key(&mut app, key(KeyCode::Char('s'), KeyModifiers::CONTROL));
        type_str(&mut app, "sk-abc");
        handle_key(&mut app, key(KeyCode::Tab, KeyModifiers::NONE));
        handle_key(&mut app, key(KeyCode::Backspace, KeyModifiers::NONE));
        handle_key(&mut app, key(KeyCode::Backspace, KeyModifiers::NONE));
        handle_key(&mut app, key(KeyCode::Backspace, KeyModifiers::NONE));
        type_str(&mut app, "1.1");
        handle_key(&mut app, key(KeyCode::Enter, KeyModifiers::NONE));

        assert_eq!(app.modal, Modal::None);
        assert_eq!(app.session.settings().api_key, "sk-abc");
        assert_eq!(app.session.settings().temperature, 1.1);
    }

    #[test]
    fn test_ctrl_keys_do_not_type_into_settings() {
        let mut app = app();
        handle_key(&mut app, key(KeyCode::Char('s'), KeyModifiers::CONTROL));
        handle_key(&mut app, key(KeyCode::Char('n'), KeyModifiers::CONTROL));
        handle_key(&mut app, key(KeyCode::Char('s'), KeyModifiers::CONTROL));
        assert_eq!(app.form.api_key, "");
        assert_eq!(app.modal, Modal::Settings);
    }

    #[tokio::test]
    async fn test_ctrl_n_while_waiting_keeps_transcript() {
        let mut app = app();
        app.dispatch(Command::SaveSettings(crate::config::Settings {
            api_key: "sk-test".into(),
            ..Default::default()
        }));
        type_str(&mut app, "hello");
        handle_key(&mut app, key(KeyCode::Enter, KeyModifiers::NONE));
        assert!(app.is_busy());

        handle_key(&mut app, key(KeyCode::Char('n'), KeyModifiers::CONTROL));
        assert_eq!(app.modal, Modal::None);
        assert_eq!(app.session.transcript().len(), 1);
    }

    #[test]
    fn test_suggested_prompt_on_welcome_screen() {
        let mut app = app();
        handle_key(&mut app, key(KeyCode::F(2), KeyModifiers::NONE));
        assert_eq!(app.input, crate::app::SUGGESTED_PROMPTS[1]);
    }

    #[test]
    fn test_paste_into_input() {
        let mut app = app();
        type_str(&mut app, "ab");
        handle_key(&mut app, key(KeyCode::Left, KeyModifiers::NONE));
        handle_paste(&mut app, "XY");
        assert_eq!(app.input, "aXYb");
        assert_eq!(app.cursor, 3);
    }
}

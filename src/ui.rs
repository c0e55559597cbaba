use std::sync::OnceLock;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use regex::Regex;
use crate::app::{
    App, Modal, NoticeKind, SettingsField, CHAR_DANGER_THRESHOLD, CHAR_WARN_THRESHOLD,
    SUGGESTED_PROMPTS,
};
use crate::session::NEW_CHAT_PROMPT;
use crate::state::{ConnectionStatus, Role};

fn inline_markup() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| {
        Regex::new(r"\*\*(?P<bold>.+?)\*\*|\*(?P<italic>.+?)\*|`(?P<code>.+?)`")
            .expect("inline markup pattern is valid")
    })
}

/// Turn one line of reply text into styled spans: `**bold**`, `*italic*`
/// and `` `code` ``. Anything unmatched stays literal.
pub fn format_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut last = 0;

    for caps in inline_markup().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            spans.push(Span::raw(text[last..whole.start()].to_string()));
        }

        if let Some(bold) = caps.name("bold") {
            spans.push(Span::styled(
                bold.as_str().to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ));
        } else if let Some(italic) = caps.name("italic") {
            spans.push(Span::styled(
                italic.as_str().to_string(),
                Style::default().add_modifier(Modifier::ITALIC),
            ));
        } else if let Some(code) = caps.name("code") {
            spans.push(Span::styled(
                code.as_str().to_string(),
                Style::default().fg(Color::Green).bg(Color::Black),
            ));
        }
        last = whole.end();
    }

    if last < text.len() {
        spans.push(Span::raw(text[last..].to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn format_message(content: &str) -> Vec<Line<'static>> {
    content.lines().map(format_line).collect()
}

fn status_color(status: ConnectionStatus) -> Color {
    match status {
        ConnectionStatus::Online => Color::Green,
        ConnectionStatus::Connecting => Color::Yellow,
        ConnectionStatus::Offline => Color::Red,
    }
}

pub fn char_count_color(count: usize) -> Color {
    if count > CHAR_DANGER_THRESHOLD {
        Color::Red
    } else if count > CHAR_WARN_THRESHOLD {
        Color::Yellow
    } else {
        Color::DarkGray
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, transcript, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_transcript(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    match app.modal {
        Modal::Settings => render_settings(app, frame, area),
        Modal::ConfirmNewChat => render_confirm(frame, area),
        Modal::None => {}
    }

    if app.notice.is_some() {
        render_notice(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let status = app.session.status();
    let stats = app.session.stats();

    let left = Line::from(vec![
        Span::styled(" DeepSeek AI Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(" ● ", Style::default().fg(status_color(status))),
        Span::styled(status.label(), Style::default().fg(Color::White)),
    ]);

    let right = Line::from(vec![
        Span::styled(stats.exchanges_label(), Style::default().fg(Color::White)),
        Span::styled("  ", Style::default()),
        Span::styled(
            format!("Session: {} ", app.session.elapsed_time()),
            Style::default().fg(Color::White),
        ),
    ]);

    let [left_area, right_area] = Layout::horizontal([
        Constraint::Min(0),
        Constraint::Length(right.width() as u16),
    ])
    .areas(area);

    let bg = Style::default().bg(Color::DarkGray);
    frame.render_widget(Paragraph::new(left).style(bg), left_area);
    frame.render_widget(
        Paragraph::new(right).style(bg).alignment(Alignment::Right),
        right_area,
    );
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    // Inner size minus borders, for scroll math
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let busy = app.is_busy();
    if app.session.transcript().is_empty() && !busy {
        frame.render_widget(Paragraph::new(welcome_text()).block(block).wrap(Wrap { trim: false }), area);
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    for turn in app.session.transcript().turns() {
        let (label_color, avatar) = match turn.role {
            Role::User => (Color::Cyan, "👤"),
            Role::Assistant => (Color::Yellow, "🤖"),
        };
        lines.push(Line::from(vec![
            Span::raw(format!("{} ", avatar)),
            Span::styled(
                turn.role.display_name(),
                Style::default().fg(label_color).add_modifier(Modifier::BOLD),
            ),
        ]));
        match turn.role {
            Role::User => lines.extend(turn.content.lines().map(|l| Line::from(l.to_string()))),
            Role::Assistant => lines.extend(format_message(&turn.content)),
        }
        lines.push(Line::default());
    }

    if busy {
        lines.push(Line::from(Span::styled(
            "🤖 AI Assistant",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    app.sync_scroll();

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn welcome_text() -> Text<'static> {
    let mut lines = vec![
        Line::from(Span::styled(
            "Welcome to DeepSeek AI Assistant",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::default(),
        Line::from(Span::styled(
            "Ask anything to get started, or pick a suggestion:",
            Style::default().fg(Color::DarkGray),
        )),
        Line::default(),
    ];

    for (i, prompt) in SUGGESTED_PROMPTS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!(" F{} ", i + 1), Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(format!(" {}", prompt)),
        ]));
    }

    Text::from(lines)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let busy = app.is_busy();
    let count = app.char_count();

    let border_color = if busy || app.modal != Modal::None { Color::DarkGray } else { Color::Yellow };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(if busy { " Sending... " } else { " Message " })
        .title_top(
            Line::from(Span::styled(format!(" {} ", count), Style::default().fg(char_count_color(count))))
                .alignment(Alignment::Right),
        );

    if busy {
        let waiting = Paragraph::new("Waiting for response...")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(waiting, area);
        return;
    }

    // Newlines show as a return glyph so the input stays on one row
    let flat: Vec<char> = app.input.chars().map(|c| if c == '\n' { '⏎' } else { c }).collect();

    // Horizontal scroll keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 || app.cursor < inner_width {
        0
    } else {
        app.cursor - inner_width + 1
    };

    let visible_text: String = flat.iter().skip(scroll_offset).take(inner_width).collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);

    frame.render_widget(input, area);

    if app.modal == Modal::None {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match app.modal {
        Modal::Settings => vec![
            Span::styled(" Tab ", key_style),
            Span::styled(" next field ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" save ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" cancel ", label_style),
        ],
        Modal::ConfirmNewChat => vec![
            Span::styled(" y ", key_style),
            Span::styled(" clear ", label_style),
            Span::styled(" n ", key_style),
            Span::styled(" keep ", label_style),
        ],
        Modal::None => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Shift+Enter ", key_style),
            Span::styled(" newline ", label_style),
            Span::styled(" PgUp/PgDn ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" ^N ", key_style),
            Span::styled(" new chat ", label_style),
            Span::styled(" ^S ", key_style),
            Span::styled(" settings ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" quit ", label_style),
        ],
    };

    let footer = Paragraph::new(Line::from(hints)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

/// Centered popup of the given size, clipped to `area`.
fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

/// Mask the key with asterisks, keeping the last 4 chars visible
fn mask_api_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        "*".repeat(len)
    } else {
        let last_four: String = key.chars().skip(len - 4).collect();
        format!("{}{}", "*".repeat((len - 4).min(20)), last_four)
    }
}

fn render_settings(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = popup_rect(area, 60, 11);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Settings ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let form = &app.form;
    let fields = [
        (SettingsField::ApiKey, "OpenRouter API key", mask_api_key(&form.api_key)),
        (SettingsField::Temperature, "Temperature", form.temperature.clone()),
        (SettingsField::MaxTokens, "Max tokens", form.max_tokens.clone()),
    ];

    for (row, (field, label, value)) in fields.iter().enumerate() {
        let y = inner.y + (row as u16) * 3;
        if y + 1 >= inner.y + inner.height {
            break;
        }
        let active = *field == form.field;
        let label_style = if active {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        frame.render_widget(
            Paragraph::new(*label).style(label_style),
            Rect::new(inner.x, y, inner.width, 1),
        );
        let value_area = Rect::new(inner.x, y + 1, inner.width, 1);
        frame.render_widget(
            Paragraph::new(format!("{}{}", if active { "> " } else { "  " }, value))
                .style(Style::default().fg(Color::Cyan)),
            value_area,
        );

        if active {
            let cursor_x = (value.chars().count() as u16 + 2).min(inner.width.saturating_sub(1));
            frame.set_cursor_position((value_area.x + cursor_x, value_area.y));
        }
    }
}

fn render_confirm(frame: &mut Frame, area: Rect) {
    let popup_area = popup_rect(area, 50, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" New chat ");

    let body = Paragraph::new(vec![
        Line::from(NEW_CHAT_PROMPT),
        Line::from(Span::styled("y / n", Style::default().fg(Color::DarkGray))),
    ])
    .wrap(Wrap { trim: true })
    .block(block);

    frame.render_widget(body, popup_area);
}

fn render_notice(app: &App, frame: &mut Frame, area: Rect) {
    let Some(notice) = app.notice.as_ref() else { return };

    let bg = match notice.kind {
        NoticeKind::Error => Color::Red,
        NoticeKind::Success => Color::Green,
        NoticeKind::Info => Color::Blue,
    };

    let width = (notice.message.chars().count() as u16 + 4).min(area.width);
    let notice_area = Rect::new(area.x + area.width.saturating_sub(width + 1), area.y + 1, width, 1);

    frame.render_widget(Clear, notice_area);
    frame.render_widget(
        Paragraph::new(format!("  {}  ", notice.message))
            .style(Style::default().bg(bg).fg(Color::White).add_modifier(Modifier::BOLD)),
        notice_area,
    );
}

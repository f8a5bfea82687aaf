use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};
use unicode_width::UnicodeWidthChar;
use teamchat_core::{
    AgentIdentity, ChatRole, LineKind, Markup, MarkupLine, SpanStyle, TurnContent,
};

use crate::app::{App, InputMode};

/// Terminal colour for an agent's style class
fn identity_color(identity: &AgentIdentity) -> Color {
    match identity.style_class.as_str() {
        "agent-memory" => Color::Magenta,
        "agent-tech" => Color::Green,
        "agent-data" => Color::Blue,
        "agent-docs" => Color::Yellow,
        _ => Color::Cyan,
    }
}

fn identity_badge(identity: &AgentIdentity) -> Line<'static> {
    Line::from(vec![
        Span::raw(format!("{} ", identity.icon_token)),
        Span::styled(
            format!("{}:", identity.display_name),
            Style::default()
                .fg(identity_color(identity))
                .add_modifier(Modifier::BOLD),
        ),
    ])
}

fn span_style(style: &SpanStyle) -> Style {
    let mut out = Style::default();
    if style.bold {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.italic {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.strikethrough {
        out = out.add_modifier(Modifier::CROSSED_OUT);
    }
    if style.link {
        out = out.fg(Color::Blue).add_modifier(Modifier::UNDERLINED);
    }
    if style.code && style.fg.is_none() {
        out = out.fg(Color::LightRed);
    }
    if let Some(rgb) = style.fg {
        out = out.fg(Color::Rgb(rgb.0, rgb.1, rgb.2));
    }
    out
}

fn markup_line(line: &MarkupLine) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let indent = line.indent as usize;

    match &line.kind {
        LineKind::Blank => return Line::default(),
        LineKind::Rule => {
            return Line::from(Span::styled(
                format!("{}{}", " ".repeat(indent), "─".repeat(24)),
                Style::default().fg(Color::DarkGray),
            ));
        }
        LineKind::Quote => {
            spans.push(Span::raw(" ".repeat(indent.saturating_sub(2))));
            spans.push(Span::styled("│ ", Style::default().fg(Color::DarkGray)));
        }
        LineKind::Code { .. } => {
            spans.push(Span::raw(" ".repeat(indent)));
            spans.push(Span::styled("▏ ", Style::default().fg(Color::DarkGray)));
        }
        _ => {
            if indent > 0 {
                spans.push(Span::raw(" ".repeat(indent)));
            }
        }
    }

    let base = match &line.kind {
        LineKind::Heading(1) => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        LineKind::Heading(_) => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        LineKind::Quote => Style::default().add_modifier(Modifier::ITALIC),
        _ => Style::default(),
    };

    for span in &line.spans {
        spans.push(Span::styled(span.text.clone(), base.patch(span_style(&span.style))));
    }

    Line::from(spans)
}

fn markup_lines(markup: &Markup) -> Vec<Line<'static>> {
    markup.lines.iter().map(markup_line).collect()
}

/// Rows a line occupies once wrapped to `width`
fn wrapped_height(line: &Line, width: usize) -> u16 {
    let chars = line.width();
    if chars == 0 || width == 0 {
        1
    } else {
        chars.div_ceil(width) as u16
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat_screen(app, frame, body_area);
    render_footer(app, frame, footer_area);

    if app.show_attach_input {
        render_attach_input(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let session = app
        .controller
        .session()
        .map(|id| format!(" [session {}]", &id.as_str()[..8.min(id.as_str().len())]))
        .unwrap_or_default();

    let title = Line::from(vec![
        Span::styled(" Team Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(session, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    // Exactly one of send/stop is offered at a time
    let mut hints = if app.controller.can_stop() {
        vec![
            Span::styled(" Esc ", key_style),
            Span::styled(" stop ", label_style),
        ]
    } else {
        match app.input_mode {
            InputMode::Editing => vec![
                Span::styled(" Enter ", key_style),
                Span::styled(" send ", label_style),
                Span::styled(" Esc ", key_style),
                Span::styled(" normal mode ", label_style),
            ],
            InputMode::Normal => vec![
                Span::styled(" i ", key_style),
                Span::styled(" type ", label_style),
            ],
        }
    };

    match app.input_mode {
        InputMode::Editing => hints.extend(vec![
            Span::styled(" ^O ", key_style),
            Span::styled(" attach ", label_style),
            Span::styled(" ^N ", key_style),
            Span::styled(" new chat ", label_style),
        ]),
        InputMode::Normal => hints.extend(vec![
            Span::styled(" j/k ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" a ", key_style),
            Span::styled(" attach ", label_style),
            Span::styled(" n ", key_style),
            Span::styled(" new chat ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ]),
    }

    if let Some(notice) = &app.notice {
        hints.push(Span::styled(
            format!("  {}", notice),
            Style::default().bg(Color::Black).fg(Color::DarkGray),
        ));
    }

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

/// Conversation lines: the log, then the live reply or the waiting indicator
fn chat_lines(app: &App) -> Vec<Line<'static>> {
    let controller = &app.controller;
    let mut lines: Vec<Line<'static>> = Vec::new();

    for turn in controller.log().turns() {
        match (turn.role(), turn.identity()) {
            (ChatRole::User, _) => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
            }
            (ChatRole::Assistant, Some(identity)) => lines.push(identity_badge(identity)),
            (ChatRole::Assistant, None) => {
                lines.push(Line::from(Span::styled(
                    "⚠ System:",
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                )));
            }
        }

        match turn.content() {
            TurnContent::Plain(text) => {
                let style = if turn.role() == ChatRole::Assistant {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                for line in text.lines() {
                    lines.push(Line::from(Span::styled(line.to_string(), style)));
                }
            }
            TurnContent::Markup(markup) => lines.extend(markup_lines(markup)),
        }
        lines.push(Line::default());
    }

    if let Some(live) = controller.live() {
        lines.push(identity_badge(&live.identity));
        lines.extend(markup_lines(&live.markup));
        lines.push(Line::default());
    } else if controller.is_waiting() {
        lines.push(identity_badge(&AgentIdentity::orchestrator()));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let input_height = if app.pending_attachment.is_some() { 4 } else { 3 };
    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(input_height),
    ])
    .areas(area);

    // Store area for mouse hit-testing
    app.chat_area = Some(chat_area);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" {} ", app.endpoint));

    let inner_height = chat_area.height.saturating_sub(2);
    let inner_width = chat_area.width.saturating_sub(2);

    let chat_text = if app.controller.log().is_empty() && !app.controller.can_stop() {
        app.update_chat_metrics(1, inner_height, inner_width);
        Text::from(Span::styled(
            "Ask the team anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let lines = chat_lines(app);
        let total: u16 = lines
            .iter()
            .map(|line| wrapped_height(line, inner_width as usize))
            .fold(0u16, |acc, h| acc.saturating_add(h));
        app.update_chat_metrics(total, inner_height, inner_width);
        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    if app.chat_height > 0 && app.chat_lines > app.chat_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight);
        let mut scrollbar_state = ScrollbarState::new(app.chat_lines.saturating_sub(app.chat_height) as usize)
            .position(app.chat_scroll as usize);
        frame.render_stateful_widget(scrollbar, chat_area, &mut scrollbar_state);
    }

    render_input(app, frame, input_area);
}

/// One-row strip `offset` rows into `area`, if it fits
fn row(area: Rect, offset: u16) -> Option<Rect> {
    (offset < area.height).then(|| Rect::new(area.x, area.y + offset, area.width, 1))
}

/// Slice of `text` to show in a field `width` cells wide so the cursor (a
/// char index) stays visible, and the cursor's column within that slice.
fn visible_input(text: &str, cursor: usize, width: usize) -> (String, u16) {
    if width == 0 {
        return (String::new(), 0);
    }
    let widths: Vec<usize> = text.chars().map(|c| c.width().unwrap_or(0)).collect();
    let cursor = cursor.min(widths.len());

    // Leave one cell for the cursor itself
    let mut start = cursor;
    let mut before = 0;
    while start > 0 && before + widths[start - 1] < width {
        start -= 1;
        before += widths[start];
    }

    let mut used = 0;
    let visible: String = text
        .chars()
        .skip(start)
        .zip(&widths[start..])
        .take_while(|(_, w)| {
            used += **w;
            used <= width
        })
        .map(|(c, _)| c)
        .collect();

    (visible, before as u16)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let border_color = if app.input_mode == InputMode::Editing && !app.show_attach_input {
        Color::Yellow
    } else {
        Color::DarkGray
    };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message ");

    let inner = input_block.inner(area);
    frame.render_widget(input_block, area);

    let Some(input_line) = row(inner, 0) else {
        return;
    };
    let (visible_text, cursor_x) = visible_input(&app.input, app.cursor, inner.width as usize);
    frame.render_widget(
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan)),
        input_line,
    );

    if let (Some(attachment), Some(chip_area)) = (&app.pending_attachment, row(inner, 1)) {
        let chip = Line::from(vec![
            Span::styled(
                format!("📎 {} ({} bytes)", attachment.name(), attachment.size()),
                Style::default().fg(Color::Magenta),
            ),
            Span::styled("  ^D remove", Style::default().fg(Color::DarkGray)),
        ]);
        frame.render_widget(Paragraph::new(chip), chip_area);
    }

    // Show cursor when editing
    if app.input_mode == InputMode::Editing && !app.show_attach_input {
        frame.set_cursor_position((input_line.x + cursor_x, input_line.y));
    }
}

fn render_attach_input(app: &App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered), clipped to the screen
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 7;

    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height).intersection(area);
    if popup_area.is_empty() {
        return;
    }

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Attach File ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    if let Some(line) = row(inner, 0) {
        let instructions = Paragraph::new("Path to a text file. Enter to attach, Esc to cancel.")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(instructions, line);
    }

    // On a cramped screen the path field moves up to the first row
    let input_offset = if inner.height > 2 { 2 } else { 0 };
    if let Some(input_area) = row(inner, input_offset) {
        let (visible, cursor_x) =
            visible_input(&app.attach_input, app.attach_cursor, input_area.width as usize);
        frame.render_widget(
            Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
            input_area,
        );
        frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
    }

    if let Some(line) = row(inner, 4) {
        let limit = format!("Limit {} KB", app.max_attachment_bytes / 1024);
        let status = Paragraph::new(limit).style(Style::default().fg(Color::DarkGray));
        frame.render_widget(status, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamchat_core::{classify, render_markdown};

    #[test]
    fn test_identity_colors() {
        let (tech, _) = classify("[[TECH]] x");
        assert_eq!(identity_color(&tech), Color::Green);
        let (memory, _) = classify("[[MEMORY]] x");
        assert_eq!(identity_color(&memory), Color::Magenta);
        assert_eq!(identity_color(&AgentIdentity::orchestrator()), Color::Cyan);
    }

    #[test]
    fn test_badge_shows_icon_and_name() {
        let (docs, _) = classify("[[DOCS]] x");
        let badge = identity_badge(&docs);
        let text: String = badge.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "📝 Docs Agent:");
    }

    #[test]
    fn test_bold_becomes_modifier() {
        let markup = render_markdown("some **bold** text");
        let lines = markup_lines(&markup);
        let bold = lines
            .iter()
            .flat_map(|line| line.spans.iter())
            .find(|s| s.content == "bold")
            .unwrap();
        assert!(bold.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_quote_prefix() {
        let markup = render_markdown("> quoted");
        let line = markup
            .lines
            .iter()
            .find(|l| l.kind == LineKind::Quote)
            .unwrap();
        let rendered = markup_line(line);
        let text: String = rendered.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "│ quoted");
    }

    #[test]
    fn test_wrapped_height() {
        assert_eq!(wrapped_height(&Line::from(""), 10), 1);
        assert_eq!(wrapped_height(&Line::from("abcdefghij"), 10), 1);
        assert_eq!(wrapped_height(&Line::from("abcdefghijk"), 10), 2);
    }

    #[test]
    fn test_visible_input_counts_display_width() {
        assert_eq!(visible_input("abc", 3, 10), ("abc".to_string(), 3));
        // Wide characters take two cells each
        assert_eq!(visible_input("日本語", 3, 10), ("日本語".to_string(), 6));
        assert_eq!(visible_input("a📎b", 2, 10), ("a📎b".to_string(), 3));
    }

    #[test]
    fn test_visible_input_scrolls_to_cursor() {
        let (visible, col) = visible_input("abcdefghij", 10, 4);
        assert_eq!(visible, "hij");
        assert_eq!(col, 3);

        let (visible, col) = visible_input("日本語日本語", 6, 5);
        assert_eq!(visible, "本語");
        assert_eq!(col, 4);

        assert_eq!(visible_input("abc", 1, 0), (String::new(), 0));
    }

    #[test]
    fn test_small_terminals_render_without_panic() {
        use ratatui::{backend::TestBackend, Terminal};
        use teamchat_core::{Attachment, Config};

        let mut config = Config::new();
        config.endpoint = "http://127.0.0.1:9/api/chat".to_string();
        let (mut app, _rx) = crate::app::App::new(&config).unwrap();
        app.input = "a longer message with 日本語".to_string();
        app.cursor = app.input.chars().count();

        for attach_open in [false, true] {
            for width in [1u16, 5, 20, 40, 80] {
                for height in 1u16..=10 {
                    app.pending_attachment = Some(Attachment::from_text("notes.md", "x"));
                    app.show_attach_input = attach_open;
                    app.attach_input = "~/some/long/path/to/notes.md".to_string();
                    app.attach_cursor = app.attach_input.chars().count();

                    let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
                    terminal.draw(|frame| render(&mut app, frame)).unwrap();
                }
            }
        }
    }
}

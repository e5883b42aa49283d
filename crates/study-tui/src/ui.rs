use chrono::{Local, NaiveDate};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use study_shared::calendar::MonthGrid;
use study_shared::{Attachment, TopicStatus, TopicWithSchedules};

use crate::api::DashboardMode;
use crate::app::{App, InputField, PendingDelete, Prompt, TopicDetail, View, VimMode};
use crate::calendar::{render_calendar, topic_counts};
use crate::markdown::render_markdown;

/// Returns (symbol, color) for a topic's status indicator
fn status_indicator(status: TopicStatus) -> (&'static str, Color) {
    match status {
        TopicStatus::NotStarted => ("○", Color::DarkGray),
        TopicStatus::InProgress => ("◐", Color::Yellow),
        TopicStatus::Done => ("●", Color::Green),
    }
}

fn schedule_summary(topic: &TopicWithSchedules) -> String {
    topic
        .topic_schedules
        .iter()
        .map(|s| {
            let start = s.start_date.with_timezone(&Local).date_naive();
            let end = s.end_date.with_timezone(&Local).date_naive();
            if start == end {
                start.format("%b %d").to_string()
            } else {
                format!("{} – {}", start.format("%b %d"), end.format("%b %d"))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn draw(f: &mut Frame, app: &App) {
    // Draw based on current view
    match app.view {
        View::Login => draw_login(f, app),
        View::VerifyingAuth => draw_loading(f, "Verifying authentication..."),
        View::Dashboard => draw_dashboard(f, app),
        View::TopicDetail => draw_topic_detail(f, app),
    }

    if let Some(ref prompt) = app.prompt {
        draw_prompt_popup(f, prompt);
    }

    if let Some(ref pending) = app.confirm_delete {
        draw_delete_confirm_popup(f, pending);
    }

    // Draw error overlay if present
    if let Some(ref error) = app.error_message {
        draw_error_popup(f, error);
    }

    // Draw loading overlay if loading
    if app.loading {
        draw_loading_overlay(f, &app.loading_message);
    }
}

fn draw_login(f: &mut Frame, app: &App) {
    let area = f.area();

    // Center the login form
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Length(12),
            Constraint::Percentage(25),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(50),
            Constraint::Percentage(25),
        ])
        .split(vertical[1]);

    let form_area = horizontal[1];

    let form_block = Block::default()
        .title(" Study Group Login ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = form_block.inner(form_area);
    f.render_widget(form_block, form_area);

    let form_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Email
            Constraint::Length(3), // Password
            Constraint::Length(2), // Submit hint
            Constraint::Min(0),    // Spacer
        ])
        .split(inner);

    let field_style = |field: InputField| {
        if app.login_field == field {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        }
    };

    let email_text = Paragraph::new(app.login_email.as_str()).block(
        Block::default()
            .title(" Email ")
            .borders(Borders::ALL)
            .border_style(field_style(InputField::Email)),
    );
    f.render_widget(email_text, form_chunks[0]);

    let password_display = "*".repeat(app.login_password.chars().count());
    let password_text = Paragraph::new(password_display).block(
        Block::default()
            .title(" Password ")
            .borders(Borders::ALL)
            .border_style(field_style(InputField::Password)),
    );
    f.render_widget(password_text, form_chunks[1]);

    let mode_text = match app.vim_mode {
        VimMode::Normal => "'i' edit | j/k field | Enter submit | 'q' quit",
        VimMode::Insert => "Type to enter | Tab next field | Esc normal | Enter submit",
    };
    let hint = Paragraph::new(mode_text)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(hint, form_chunks[2]);

    // Set cursor position in insert mode
    if app.vim_mode == VimMode::Insert {
        let (chunk, len) = match app.login_field {
            InputField::Email => (form_chunks[0], app.login_email.chars().count()),
            InputField::Password => (form_chunks[1], app.login_password.chars().count()),
        };
        f.set_cursor_position((chunk.x + 1 + len as u16, chunk.y + 1));
    }
}

fn draw_dashboard(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(1), // Filter bar
            Constraint::Min(0),    // Main content
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app, None);
    draw_filter_bar(f, chunks[1], app);
    match app.mode {
        DashboardMode::List => draw_topic_list(f, chunks[2], app),
        DashboardMode::Calendar => draw_calendar_view(f, chunks[2], app),
    }
    draw_status_bar(f, chunks[3], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App, topic: Option<&str>) {
    let username = app
        .user
        .as_ref()
        .map(|u| u.display_name())
        .unwrap_or("unknown");

    let mut spans = vec![
        Span::styled(
            "STUDY GROUP",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(username.to_string(), Style::default().fg(Color::Yellow)),
    ];
    if let Some(title) = topic {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(title.to_string(), Style::default().fg(Color::White)));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::BOTTOM));
    f.render_widget(header, area);
}

fn draw_filter_bar(f: &mut Frame, area: Rect, app: &App) {
    let label = Style::default().fg(Color::DarkGray);
    let value = Style::default().fg(Color::Cyan);

    let mut spans = vec![
        Span::styled(" Category: ", label),
        Span::styled(app.query.category.label(), value),
        Span::styled("  Sort: ", label),
        Span::styled(app.query.sort.label(), value),
    ];
    if !app.query.search.is_empty() {
        spans.push(Span::styled("  Search: ", label));
        spans.push(Span::styled(
            format!("\"{}\"", app.query.search),
            Style::default().fg(Color::Yellow),
        ));
    }
    spans.push(Span::styled(
        format!("  ({} of {})", app.visible_topics().len(), app.topics.len()),
        label,
    ));

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn topic_item<'a>(topic: &'a TopicWithSchedules, show_dates: bool) -> ListItem<'a> {
    let (symbol, color) = status_indicator(topic.topic.status);

    let mut first = vec![
        Span::styled(format!(" {} ", symbol), Style::default().fg(color)),
        Span::styled(topic.topic.title.as_str(), Style::default().fg(Color::White)),
        Span::styled(
            format!("  [{}]", topic.topic.category.label()),
            Style::default().fg(Color::Magenta),
        ),
    ];
    if !topic.topic.tags.is_empty() {
        first.push(Span::styled(
            format!("  #{}", topic.topic.tags.join(" #")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let mut lines = vec![Line::from(first)];
    if show_dates && !topic.topic_schedules.is_empty() {
        lines.push(Line::from(Span::styled(
            format!("   📅 {}", schedule_summary(topic)),
            Style::default().fg(Color::DarkGray),
        )));
    }

    ListItem::new(lines)
}

fn draw_topic_list(f: &mut Frame, area: Rect, app: &App) {
    let visible = app.visible_topics();

    if visible.is_empty() {
        let message = if app.topics.is_empty() {
            "No topics yet. Press 'n' to create one."
        } else {
            "No topics match the current filters."
        };
        let empty = Paragraph::new(message)
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL).title(" Topics "));
        f.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = visible.iter().map(|t| topic_item(t, true)).collect();
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Topics "),
        )
        .highlight_style(Style::default().bg(Color::DarkGray));

    let mut state = ListState::default().with_selected(Some(app.selected_topic));
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_calendar_view(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(39), Constraint::Min(0)])
        .split(area);

    let month = app.month();
    let days = app.calendar_days();
    let counts = topic_counts(&days);
    let grid = MonthGrid::new(month);
    let today: NaiveDate = Local::now().date_naive();

    let calendar = Paragraph::new(render_calendar(&grid, &counts, today, app.selected_day)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(" {} ", month.name())),
    );
    f.render_widget(calendar, chunks[0]);

    let day_topics = app.day_topics();
    let title = format!(" {} ", app.selected_day.format("%A, %B %-d"));
    if day_topics.is_empty() {
        let empty = Paragraph::new("Nothing scheduled.")
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(empty, chunks[1]);
        return;
    }

    let items: Vec<ListItem> = day_topics.iter().map(|t| topic_item(t, false)).collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray));
    let mut state = ListState::default().with_selected(Some(app.selected_day_topic));
    f.render_stateful_widget(list, chunks[1], &mut state);
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (mode, mode_color) = if app.prompt.is_some() {
        ("INPUT", Color::Green)
    } else if app.confirm_delete.is_some() {
        ("DELETE", Color::Red)
    } else {
        match app.mode {
            DashboardMode::List => ("LIST", Color::Blue),
            DashboardMode::Calendar => ("CALENDAR", Color::Magenta),
        }
    };

    let hints = if app.prompt.is_some() {
        "Enter: submit | Esc: cancel"
    } else if app.confirm_delete.is_some() {
        "y: confirm | n/Esc: cancel"
    } else {
        match app.mode {
            DashboardMode::List => {
                "j/k: move | Enter: open | /: search | f: category | o: sort | v: calendar | n: new | p: profile | q: quit"
            }
            DashboardMode::Calendar => {
                "h/j/k/l: day | [/]: month | t: today | Tab: next topic | Enter: open | v: list | q: quit"
            }
        }
    };

    render_status_line(f, area, mode, mode_color, hints, app.status_message.as_deref());
}

fn render_status_line(
    f: &mut Frame,
    area: Rect,
    mode: &str,
    mode_color: Color,
    hints: &str,
    message: Option<&str>,
) {
    let mut spans = vec![
        Span::styled(
            format!(" {} ", mode),
            Style::default().bg(mode_color).fg(Color::White),
        ),
        Span::raw(" "),
    ];
    match message {
        Some(message) => spans.push(Span::styled(message.to_string(), Style::default().fg(Color::Green))),
        None => spans.push(Span::styled(hints.to_string(), Style::default().fg(Color::DarkGray))),
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_topic_detail(f: &mut Frame, app: &App) {
    let Some(detail) = app.detail.as_ref() else {
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Main content
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app, Some(&detail.topic.topic.title));

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);

    draw_topic_info(f, main[0], app, detail);
    draw_comments(f, main[1], app, detail);
    draw_detail_status_bar(f, chunks[2], app, detail);
}

fn draw_topic_info(f: &mut Frame, area: Rect, app: &App, detail: &TopicDetail) {
    let topic = &detail.topic;
    let (symbol, color) = status_indicator(topic.topic.status);
    let label = Style::default().fg(Color::DarkGray);

    let mut lines = vec![
        Line::from(Span::styled(
            topic.topic.title.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("Status:    ", label),
            Span::styled(format!("{} {}", symbol, topic.topic.status.as_str()), Style::default().fg(color)),
        ]),
        Line::from(vec![
            Span::styled("Category:  ", label),
            Span::styled(topic.topic.category.label(), Style::default().fg(Color::Magenta)),
        ]),
        Line::from(vec![
            Span::styled("Tags:      ", label),
            Span::raw(if topic.topic.tags.is_empty() {
                "-".to_string()
            } else {
                topic.topic.tags.join(", ")
            }),
        ]),
        Line::from(vec![
            Span::styled("Schedule:  ", label),
            Span::raw(if topic.topic_schedules.is_empty() {
                "-".to_string()
            } else {
                schedule_summary(topic)
            }),
        ]),
        Line::from(vec![
            Span::styled("Created:   ", label),
            Span::raw(
                topic
                    .topic
                    .created_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string(),
            ),
            Span::styled(
                if app.is_owner(topic) { "  (yours)" } else { "" },
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(""),
    ];

    let width = area.width.saturating_sub(2) as usize;
    match topic.topic.description.as_deref() {
        Some(description) => lines.extend(render_markdown(description, width)),
        None => lines.push(Line::from(Span::styled("No description.", label))),
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("Attachments ({})", detail.attachments.len()),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )));
    lines.extend(detail.attachments.iter().map(attachment_line));

    let info = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Topic "),
        );
    f.render_widget(info, area);
}

fn attachment_line(attachment: &Attachment) -> Line<'static> {
    let icon = if attachment.is_image() { "🖼 " } else { "📎 " };
    let scope = if attachment.comment_id.is_some() {
        " (comment)"
    } else {
        ""
    };
    Line::from(vec![
        Span::raw(format!(" {}", icon)),
        Span::styled(attachment.file_name().to_string(), Style::default().fg(Color::White)),
        Span::styled(scope, Style::default().fg(Color::DarkGray)),
    ])
}

fn draw_comments(f: &mut Frame, area: Rect, app: &App, detail: &TopicDetail) {
    let rows = detail.comment_rows();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" Discussion ({}) ", rows.len()));

    if rows.is_empty() {
        let empty = Paragraph::new("No comments yet. Press 'c' to start the discussion.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let inner_width = area.width.saturating_sub(2) as usize;
    let items: Vec<ListItem> = rows
        .iter()
        .map(|(depth, comment)| {
            let indent = "  ".repeat(*depth);
            let marker = if *depth > 0 { "↳ " } else { "" };
            let author_style = if app.owns_comment(comment) {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            };

            let mut header = vec![
                Span::raw(format!("{}{}", indent, marker)),
                Span::styled(comment.author_name().to_string(), author_style),
                Span::styled(
                    format!(
                        "  {}",
                        comment.created_at.with_timezone(&Local).format("%b %d %H:%M")
                    ),
                    Style::default().fg(Color::DarkGray),
                ),
            ];
            if comment.is_edited() {
                header.push(Span::styled(" (edited)", Style::default().fg(Color::DarkGray)));
            }

            let mut lines = vec![Line::from(header)];
            let body_indent = "  ".repeat(depth + 1);
            let body_width = inner_width.saturating_sub(body_indent.len());
            for line in render_markdown(&comment.content, body_width) {
                let mut spans = vec![Span::raw(body_indent.clone())];
                spans.extend(line.spans);
                lines.push(Line::from(spans));
            }
            lines.push(Line::from(""));

            ListItem::new(lines)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Rgb(40, 40, 40)));
    let mut state = ListState::default().with_selected(Some(detail.selected_comment));
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_detail_status_bar(f: &mut Frame, area: Rect, app: &App, detail: &TopicDetail) {
    let (mode, mode_color) = if app.prompt.is_some() {
        ("INPUT", Color::Green)
    } else if app.confirm_delete.is_some() {
        ("DELETE", Color::Red)
    } else {
        ("TOPIC", Color::Blue)
    };

    let hints = if app.prompt.is_some() {
        "Enter: submit | Esc: cancel"
    } else if app.confirm_delete.is_some() {
        "y: confirm | n/Esc: cancel"
    } else if app.is_owner(&detail.topic) {
        "c: comment | r: reply | E: edit | x: delete | s: status | T: title | d: description | t: tags | g: category | a/A: schedule | u: upload | D: delete topic | q: back"
    } else {
        "j/k: move | c: comment | r: reply | E: edit | x: delete | s: status | u/U: upload | q: back"
    };

    render_status_line(f, area, mode, mode_color, hints, app.status_message.as_deref());
}

fn draw_prompt_popup(f: &mut Frame, prompt: &Prompt) {
    let area = centered_rect(60, 20, f.area());
    let area = Rect { height: 3, ..area };

    f.render_widget(Clear, area);

    let block = Block::default()
        .title(prompt.kind.title())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);

    let text = Paragraph::new(prompt.input.as_str()).block(block);
    f.render_widget(text, area);

    let cursor = prompt.input.chars().count() as u16;
    f.set_cursor_position((
        (inner.x + cursor).min(inner.right().saturating_sub(1)),
        inner.y,
    ));
}

fn draw_delete_confirm_popup(f: &mut Frame, pending: &PendingDelete) {
    let area = centered_rect(50, 20, f.area());

    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Confirm Delete ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(2), // Message
            Constraint::Length(2), // Hint
            Constraint::Min(0),    // Spacer
        ])
        .split(inner);

    let message = match pending {
        PendingDelete::Topic { title, .. } => vec![
            Line::from(Span::raw("Delete topic and its schedules:")),
            Line::from(Span::styled(
                format!("\"{}\"", title),
                Style::default().fg(Color::Yellow),
            )),
        ],
        PendingDelete::Comment { .. } => vec![
            Line::from(Span::raw("Delete this comment?")),
            Line::from(Span::styled(
                "Replies stay in the discussion.",
                Style::default().fg(Color::DarkGray),
            )),
        ],
    };
    f.render_widget(Paragraph::new(message).alignment(Alignment::Center), chunks[0]);

    let hint = Paragraph::new("y: yes, delete | n: no, cancel")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(hint, chunks[1]);
}

fn draw_loading(f: &mut Frame, message: &str) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    f.render_widget(block, area);

    let text = Paragraph::new(message)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);

    let center = centered_rect(50, 20, area);
    f.render_widget(text, center);
}

fn draw_loading_overlay(f: &mut Frame, message: &str) {
    let area = centered_rect(40, 10, f.area());

    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Loading ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let text = Paragraph::new(message)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center)
        .block(block);

    f.render_widget(text, area);
}

fn draw_error_popup(f: &mut Frame, error: &str) {
    let area = centered_rect(60, 20, f.area());

    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Error ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let text = Paragraph::new(error)
        .style(Style::default().fg(Color::Red))
        .wrap(Wrap { trim: true })
        .block(block);

    f.render_widget(text, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, UserPreferences};
    use ratatui::{backend::TestBackend, Terminal};

    fn render(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn login_form_renders() {
        let app = App::new(ApiClient::new("http://localhost:3000"), false, UserPreferences::default());
        let screen = render(&app);
        assert!(screen.contains("Study Group Login"));
        assert!(screen.contains("Password"));
    }

    #[test]
    fn empty_dashboard_explains_itself() {
        let mut app = App::new(ApiClient::new("http://localhost:3000"), false, UserPreferences::default());
        app.view = View::Dashboard;
        let screen = render(&app);
        assert!(screen.contains("No topics yet"));
        assert!(screen.contains("Category: All"));
    }
}

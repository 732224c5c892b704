use chrono::{DateTime, Utc};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, Wrap,
};

use crate::app::{App, Focus, Form, Mode};
use crate::models::Client;
use crate::storage::ThemePreference;
use crate::totals::{self, ClientSummary};
use crate::tracker::View;

pub fn draw(frame: &mut Frame, app: &mut App) {
    let size = frame.area();
    let theme = theme_from(app.theme);
    draw_background(frame, size, &theme);

    if app.mode == Mode::ConfigRequired {
        draw_config_required(frame, app, size, &theme);
        return;
    }

    let signed_in = app.user_label().is_some();
    if signed_in {
        draw_dashboard(frame, app, size, &theme);
    }

    match app.mode.clone() {
        Mode::Loading => {
            let message = if app.checking_session() {
                "Checking your session..."
            } else {
                "Loading your clients..."
            };
            draw_overlay(frame, size, message, &theme);
        }
        Mode::Form => draw_form(frame, &app.form, app.status.as_deref(), size, &theme),
        Mode::Confirm(action) => draw_confirm(frame, size, &action.message(), &theme),
        Mode::Dashboard | Mode::ConfigRequired => {}
    }

    if app.mode == Mode::Dashboard
        && !app.show_help
        && let Some(toast) = app.active_toast()
    {
        draw_toast(frame, size, &toast.message, toast.is_error, &theme);
    }

    if app.show_help {
        draw_help(frame, size, &theme);
    }
}

fn draw_config_required(frame: &mut Frame, app: &App, area: Rect, theme: &Theme) {
    let block = centered_rect(70, 40, area);
    frame.render_widget(Clear, block);
    let detail = app
        .config_error
        .clone()
        .unwrap_or_else(|| "Backend configuration is missing".to_string());
    let lines = vec![
        Line::from(Span::styled(
            "Configuration Required",
            Style::default().fg(theme.error).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(detail),
        Line::from(""),
        Line::from("Set CLIENTTIME_SUPABASE_URL and CLIENTTIME_SUPABASE_ANON_KEY,"),
        Line::from("or add supabase_url and supabase_anon_key to ~/.clienttime.json."),
        Line::from(""),
        Line::from(Span::styled("Press q to quit", theme.muted_style())),
    ];
    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block("clienttime", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn draw_dashboard(frame: &mut Frame, app: &mut App, area: Rect, theme: &Theme) {
    let content = area.inner(Margin {
        vertical: 1,
        horizontal: 2,
    });

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(2)])
        .split(content);

    let header = Paragraph::new(header_line(app, theme))
        .alignment(Alignment::Left)
        .block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_style(theme.border_style())
                .style(theme.panel_style()),
        );
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(chunks[1]);

    let active_highlight = Style::default()
        .bg(theme.accent)
        .fg(theme.accent_contrast())
        .add_modifier(Modifier::BOLD);
    let inactive_highlight = Style::default()
        .fg(theme.highlight)
        .add_modifier(Modifier::BOLD);
    let (client_highlight, client_symbol, session_highlight, session_symbol) = match app.focus {
        Focus::Clients => (active_highlight, "▍ ", inactive_highlight, "▏ "),
        Focus::Sessions => (inactive_highlight, "▏ ", active_highlight, "▍ "),
    };

    let now_utc = app.now.with_timezone(&Utc);
    let client_items: Vec<ListItem> = {
        let clients = app.visible_clients();
        if clients.is_empty() {
            let empty = match app.tracker().map(|tracker| tracker.view()) {
                Some(View::Archived) => "No archived clients",
                _ => "No clients yet. Press a to add one.",
            };
            vec![ListItem::new(Line::from(Span::styled(empty, theme.muted_style())))]
        } else {
            clients
                .iter()
                .map(|client| client_item(client, now_utc, theme))
                .collect()
        }
    };

    let list_title = sidebar_title(app);
    let client_list = List::new(client_items)
        .block(panel_block(&list_title, theme))
        .highlight_style(client_highlight)
        .highlight_symbol(client_symbol);
    frame.render_stateful_widget(client_list, body[0], &mut app.client_state);

    let selected = app
        .tracker()
        .and_then(|tracker| tracker.selected_client())
        .cloned();
    match selected {
        Some(client) => {
            let right = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(6),
                    Constraint::Length(6),
                    Constraint::Min(0),
                ])
                .split(body[1]);
            draw_timer_card(frame, app, &client, right[0], theme);
            draw_summary_cards(frame, app, &client, right[1], theme);

            let sessions = app.today_sessions();
            let session_items: Vec<ListItem> = if sessions.is_empty() {
                vec![ListItem::new(Line::from(Span::styled(
                    "No sessions recorded today",
                    theme.muted_style(),
                )))]
            } else {
                sessions
                    .iter()
                    .map(|session| {
                        let mut spans = vec![
                            Span::raw(format!("{} - {}", session.start, session.end)),
                            Span::raw("  "),
                            Span::styled(
                                session.duration.clone(),
                                Style::default().add_modifier(Modifier::BOLD),
                            ),
                        ];
                        if client.hourly_rate > 0.0 {
                            spans.push(Span::styled(
                                format!("  {}", totals::format_currency(session.earnings)),
                                Style::default().fg(theme.success),
                            ));
                        }
                        if let Some(notes) = &session.notes {
                            spans.push(Span::styled(format!("  {notes}"), theme.muted_style()));
                        }
                        ListItem::new(Line::from(spans)).style(theme.panel_style())
                    })
                    .collect()
            };
            let session_list = List::new(session_items)
                .block(panel_block("Today's Sessions", theme))
                .highlight_style(session_highlight)
                .highlight_symbol(session_symbol);
            frame.render_stateful_widget(session_list, right[2], &mut app.session_state);
        }
        None => {
            let placeholder = Paragraph::new(vec![
                Line::from(""),
                Line::from("Select a client to start tracking time."),
            ])
            .alignment(Alignment::Center)
            .block(panel_block("Timer", theme));
            frame.render_widget(placeholder, body[1]);
        }
    }

    let footer = Paragraph::new(footer_line(app, theme))
        .alignment(Alignment::Left)
        .block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(theme.border_style())
                .style(theme.panel_style()),
        );
    frame.render_widget(footer, chunks[2]);
}

fn client_item(client: &Client, now: DateTime<Utc>, theme: &Theme) -> ListItem<'static> {
    let total_ms = totals::total_time(&client.time_entries, now);
    let mut spans = Vec::new();
    if client.has_active_timer() {
        spans.push(Span::styled("● ", Style::default().fg(theme.success)));
    }
    spans.push(Span::styled(
        client.name.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled(
        format!("  {}", totals::format_time(total_ms)),
        theme.muted_style(),
    ));
    if client.hourly_rate > 0.0 {
        let earned = totals::earnings(total_ms, client.hourly_rate);
        spans.push(Span::styled(
            format!("  {}", totals::format_currency(earned)),
            theme.muted_style(),
        ));
    }
    ListItem::new(Line::from(spans)).style(theme.panel_style())
}

fn sidebar_title(app: &App) -> String {
    let Some(tracker) = app.tracker() else {
        return "Clients".to_string();
    };
    let (active, archived) = tracker.counts();
    let mut title = match tracker.view() {
        View::Active => format!("Active ({active}) · archived {archived}"),
        View::Archived => format!("Archived ({archived}) · active {active}"),
    };
    if !tracker.search().is_empty() {
        title.push_str(&format!(" · \"{}\"", tracker.search()));
    }
    title
}

fn draw_timer_card(frame: &mut Frame, app: &App, client: &Client, area: Rect, theme: &Theme) {
    let now_utc = app.now.with_timezone(&Utc);
    let (clock, state, state_style) = match client.active_entry() {
        Some(entry) => (
            totals::format_time(totals::elapsed(entry, now_utc)),
            "Running · Space to stop",
            Style::default().fg(theme.success).add_modifier(Modifier::BOLD),
        ),
        None => (
            "00:00:00".to_string(),
            "Stopped · Space to start",
            theme.muted_style(),
        ),
    };
    let rate = if client.hourly_rate > 0.0 {
        format!("{}/h", totals::format_currency(client.hourly_rate))
    } else {
        "No hourly rate".to_string()
    };
    let mut name_line = vec![Span::styled(
        client.name.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if client.archived {
        name_line.push(Span::styled("  (archived)", theme.muted_style()));
    }
    let completed = totals::format_time(totals::completed_time(&client.time_entries));
    let lines = vec![
        Line::from(name_line),
        Line::from(vec![
            Span::styled(clock, theme.title_style()),
            Span::raw("  "),
            Span::styled(state, state_style),
        ]),
        Line::from(Span::styled(
            format!("{rate} · {completed} in finished sessions"),
            theme.muted_style(),
        )),
    ];
    let card = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block("Timer", theme));
    frame.render_widget(card, area);
}

fn draw_summary_cards(frame: &mut Frame, app: &App, client: &Client, area: Rect, theme: &Theme) {
    let summary = ClientSummary::build(client, app.now);
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);

    let entries = [
        ("Total", "All time".to_string(), summary.total_ms, summary.total_earnings),
        ("This Week", summary.week_label.clone(), summary.week_ms, summary.week_earnings),
        ("This Month", summary.month_label.clone(), summary.month_ms, summary.month_earnings),
    ];
    for ((title, label, ms, earned), rect) in entries.into_iter().zip(cards.iter()) {
        let mut lines = vec![
            Line::from(Span::styled(
                totals::format_time(ms),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(label, theme.muted_style())),
        ];
        if client.hourly_rate > 0.0 {
            lines.push(Line::from(Span::styled(
                totals::format_currency(earned),
                Style::default().fg(theme.success),
            )));
        }
        let card = Paragraph::new(lines).block(panel_block(title, theme));
        frame.render_widget(card, *rect);
    }
}

fn header_line(app: &App, theme: &Theme) -> Line<'static> {
    let user = app.user_label().unwrap_or_else(|| "Signed out".to_string());
    let last_refresh = app
        .last_refresh
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "Never".to_string());
    Line::from(vec![
        Span::styled("clienttime", theme.title_style()),
        Span::raw("  "),
        Span::styled("User", theme.muted_style()),
        Span::raw(": "),
        Span::styled(user, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled("Today", theme.muted_style()),
        Span::raw(": "),
        Span::raw(app.now.format("%a %b %-d").to_string()),
        Span::raw("  "),
        Span::styled("Last refresh", theme.muted_style()),
        Span::raw(": "),
        Span::raw(last_refresh),
    ])
}

fn footer_line(app: &App, theme: &Theme) -> Line<'static> {
    let running = app
        .tracker()
        .map(|tracker| {
            tracker
                .clients()
                .iter()
                .filter(|client| client.has_active_timer())
                .count()
        })
        .unwrap_or_default();
    let running_span = if running > 0 {
        Span::styled(
            format!("● {running} running"),
            Style::default().fg(theme.success).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("No timers running", theme.muted_style())
    };

    let hints = ["space timer", "a add", "v view", "/ search", "h help", "q quit"];
    let mut spans = vec![running_span, Span::raw("   ")];
    for (index, hint) in hints.iter().enumerate() {
        if index > 0 {
            spans.push(Span::raw(" · "));
        }
        spans.push(Span::styled(*hint, theme.muted_style()));
    }
    Line::from(spans)
}

fn draw_overlay(frame: &mut Frame, area: Rect, message: &str, theme: &Theme) {
    let block = centered_rect(60, 20, area);
    frame.render_widget(Clear, block);
    let paragraph = Paragraph::new(message)
        .alignment(Alignment::Center)
        .block(panel_block("Status", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn draw_form(frame: &mut Frame, form: &Form, status: Option<&str>, area: Rect, theme: &Theme) {
    let height = if form.kind.is_auth() { 45 } else { 35 };
    let block = centered_rect(64, height, area);
    frame.render_widget(Clear, block);

    let mut lines = Vec::new();
    if form.kind.is_auth() {
        lines.push(Line::from(Span::styled(
            "Track time across all of your clients",
            theme.muted_style(),
        )));
        lines.push(Line::from(""));
    }
    for (index, field) in form.fields.iter().enumerate() {
        let focused = index == form.focus;
        let label_style = if focused {
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        let cursor = if focused { "▏" } else { "" };
        lines.push(Line::from(vec![
            Span::styled(format!("{:<14}", format!("{}:", field.label)), label_style),
            Span::raw(field.display()),
            Span::styled(cursor, Style::default().fg(theme.accent)),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(form.kind.hint(), theme.muted_style())));

    if let Some(status) = status {
        let style = if is_notice(status) {
            Style::default().fg(theme.success)
        } else {
            Style::default().fg(theme.error)
        };
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(status.to_string(), style)));
    }

    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block(form.kind.title(), theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn is_notice(status: &str) -> bool {
    ["Account created", "Reset email", "Choose"]
        .iter()
        .any(|prefix| status.starts_with(prefix))
}

fn draw_confirm(frame: &mut Frame, area: Rect, message: &str, theme: &Theme) {
    let block = centered_rect(56, 25, area);
    frame.render_widget(Clear, block);
    let lines = vec![
        Line::from(""),
        Line::from(message.to_string()),
        Line::from(""),
        Line::from(vec![
            Span::styled("y", Style::default().fg(theme.error).add_modifier(Modifier::BOLD)),
            Span::raw(" confirm   "),
            Span::styled("n", Style::default().fg(theme.highlight).add_modifier(Modifier::BOLD)),
            Span::raw(" cancel"),
        ]),
    ];
    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(panel_block("Are you sure?", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let rows = Layout::default()
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
        .split(rows[1])[1]
}

fn draw_toast(frame: &mut Frame, area: Rect, message: &str, is_error: bool, theme: &Theme) {
    let width = (message.chars().count() as u16 + 6).clamp(20, area.width.saturating_sub(2));
    let height = 3;
    let x = area.x + area.width.saturating_sub(width + 1);
    let y = area.y + area.height.saturating_sub(height + 4);
    let rect = Rect::new(x, y, width, height);

    frame.render_widget(Clear, rect);
    let (title, color) = if is_error {
        ("Error", theme.error)
    } else {
        ("Done", theme.success)
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(
        message.to_string(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )))
    .alignment(Alignment::Center)
    .block(panel_block(title, theme));
    frame.render_widget(paragraph, rect);
}

const HELP: &[(&str, &[(&str, &str)])] = &[
    (
        "Navigation",
        &[
            ("Up/Down", "Select client or session"),
            ("Tab", "Switch between clients and sessions"),
            ("v", "Toggle active / archived clients"),
            ("/", "Search clients by name"),
        ],
    ),
    (
        "Tracking",
        &[
            ("Space / Enter", "Start or stop the timer"),
            ("a", "Add client"),
            ("e / p", "Rename client / set hourly rate"),
            ("z", "Archive or restore client"),
            ("d / Del", "Delete client or selected session"),
            ("t", "Reset the client's time"),
        ],
    ),
    (
        "Data",
        &[
            ("J / C / M", "Export JSON backup / CSV / monthly report"),
            ("i", "Import clients from a file or the clipboard"),
            ("X", "Reset all data"),
            ("r", "Refresh"),
        ],
    ),
    (
        "Account",
        &[
            ("m", "Cycle theme"),
            ("P", "Change password"),
            ("L", "Log out"),
            ("q / Ctrl+C", "Quit"),
        ],
    ),
];

fn draw_help(frame: &mut Frame, area: Rect, theme: &Theme) {
    let block = centered_rect(70, 75, area);
    frame.render_widget(Clear, block);

    let header_style = Style::default().add_modifier(Modifier::BOLD).fg(theme.accent);
    let key_style = Style::default().fg(theme.highlight);

    let mut rows = Vec::new();
    for (section_index, (section, keys)) in HELP.iter().enumerate() {
        if section_index > 0 {
            rows.push(Row::new(vec![Cell::from(""), Cell::from("")]));
        }
        rows.push(Row::new(vec![
            Cell::from(Span::styled(*section, header_style)),
            Cell::from(""),
        ]));
        for (key, action) in keys.iter() {
            rows.push(Row::new(vec![
                Cell::from(Span::styled(*key, key_style)),
                Cell::from(*action),
            ]));
        }
    }

    let table = Table::new(rows, [Constraint::Length(16), Constraint::Min(10)])
        .block(panel_block("Help · h or Esc to close", theme))
        .column_spacing(2);
    frame.render_widget(table, block);
}

fn draw_background(frame: &mut Frame, area: Rect, theme: &Theme) {
    let block = Block::default().style(Style::default().bg(theme.bg).fg(theme.text));
    frame.render_widget(block, area);
}

fn panel_block(title: &str, theme: &Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(theme.border_style())
        .style(theme.panel_style())
        .title(Line::from(Span::styled(
            format!(" {title} "),
            theme.title_style(),
        )))
}

#[derive(Clone, Copy)]
struct Theme {
    bg: Color,
    panel: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    highlight: Color,
    success: Color,
    error: Color,
    on_accent: Color,
}

impl Theme {
    fn panel_style(&self) -> Style {
        Style::default().bg(self.panel).fg(self.text)
    }

    fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }

    fn title_style(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    fn muted_style(&self) -> Style {
        Style::default().fg(self.muted)
    }

    fn accent_contrast(&self) -> Color {
        self.on_accent
    }
}

fn theme_from(pref: ThemePreference) -> Theme {
    match pref {
        ThemePreference::Terminal => Theme {
            bg: Color::Reset,
            panel: Color::Reset,
            border: Color::DarkGray,
            text: Color::Reset,
            muted: Color::DarkGray,
            accent: Color::Cyan,
            highlight: Color::Yellow,
            success: Color::Green,
            error: Color::Red,
            on_accent: Color::Black,
        },
        ThemePreference::Dark => Theme {
            bg: Color::Rgb(15, 20, 28),
            panel: Color::Rgb(22, 30, 42),
            border: Color::Rgb(52, 70, 92),
            text: Color::Rgb(226, 232, 240),
            muted: Color::Rgb(148, 163, 184),
            accent: Color::Rgb(56, 189, 248),
            highlight: Color::Rgb(251, 191, 36),
            success: Color::Rgb(74, 222, 128),
            error: Color::Rgb(248, 113, 113),
            on_accent: Color::Black,
        },
        ThemePreference::Light => Theme {
            bg: Color::Rgb(241, 245, 249),
            panel: Color::Rgb(255, 255, 255),
            border: Color::Rgb(203, 213, 225),
            text: Color::Rgb(15, 23, 42),
            muted: Color::Rgb(100, 116, 139),
            accent: Color::Rgb(37, 99, 235),
            highlight: Color::Rgb(234, 88, 12),
            success: Color::Rgb(22, 163, 74),
            error: Color::Rgb(220, 38, 38),
            on_accent: Color::Rgb(255, 255, 255),
        },
    }
}

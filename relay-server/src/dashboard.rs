//! Terminal dashboard for the relay server

use crate::metrics::{short_id, LogLevel, Metrics, ServerStatus};
use crate::network::{self, NetworkEvent};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::RwLock;
use ratatui::{
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, List, ListItem, Paragraph, Row, Scrollbar, ScrollbarOrientation, ScrollbarState,
        Table,
    },
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const REFRESH: Duration = Duration::from_millis(100);
const PAGE: usize = 10;

/// Scroll position of the activity log, counted back from the newest line
struct LogView {
    offset: usize,
    follow: bool,
}

impl LogView {
    fn new() -> Self {
        Self { offset: 0, follow: true }
    }

    fn older(&mut self, lines: usize, total: usize) {
        if total == 0 {
            return;
        }
        self.offset = (self.offset + lines).min(total - 1);
        self.follow = false;
    }

    fn newer(&mut self, lines: usize) {
        self.offset = self.offset.saturating_sub(lines);
        if self.offset == 0 {
            self.follow = true;
        }
    }

    fn oldest(&mut self, total: usize) {
        self.older(total, total);
    }

    fn newest(&mut self) {
        self.offset = 0;
        self.follow = true;
    }

    fn toggle_follow(&mut self) {
        if self.follow {
            self.follow = false;
        } else {
            self.newest();
        }
    }

    /// Returns `false` when the key asks to quit
    fn handle_key(&mut self, key: KeyEvent, total: usize) -> bool {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Up | KeyCode::Char('k') => self.older(1, total),
            KeyCode::Down | KeyCode::Char('j') => self.newer(1),
            KeyCode::PageUp => self.older(PAGE, total),
            KeyCode::PageDown => self.newer(PAGE),
            KeyCode::Home => self.oldest(total),
            KeyCode::End => self.newest(),
            KeyCode::Char('a') => self.toggle_follow(),
            _ => {}
        }
        true
    }
}

/// Run the dashboard
pub async fn run(metrics: Arc<RwLock<Metrics>>) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(ratatui::backend::CrosstermBackend::new(out))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<NetworkEvent>();
    let network_metrics = Arc::clone(&metrics);
    tokio::spawn(async move {
        if let Err(e) = network::run_with_dashboard(Arc::clone(&network_metrics), event_tx).await {
            let mut m = network_metrics.write();
            m.status = ServerStatus::Error;
            m.log(LogLevel::Error, format!("Relay stopped: {}", e));
        }
    });

    let mut view = LogView::new();
    let mut title = " Dashboard ".to_string();

    loop {
        while let Ok(NetworkEvent::Ready { addr }) = event_rx.try_recv() {
            title = format!(" Dashboard - {} ", addr);
        }
        if view.follow {
            view.offset = 0;
        }

        terminal.draw(|f| draw(f, &metrics.read(), &view, &title))?;

        if !event::poll(REFRESH)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let total = metrics.read().logs.len();
            if !view.handle_key(key, total) {
                break;
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn draw(f: &mut Frame, m: &Metrics, view: &LogView, title: &str) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(10),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, rows[0], m, title);
    draw_stats(f, rows[1], m);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[2]);
    draw_clients(f, body[0], m);
    draw_logs(f, body[1], m, view);

    draw_footer(f, rows[3], view);
}

fn draw_header(f: &mut Frame, area: Rect, m: &Metrics, title: &str) {
    let (label, color) = match m.status {
        ServerStatus::Starting => ("STARTING", Color::Yellow),
        ServerStatus::Running => ("RUNNING", Color::Green),
        ServerStatus::Error => ("ERROR", Color::Red),
    };

    let line = Line::from(vec![
        Span::styled("Watch Party Relay", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  │  Status: "),
        Span::styled(label, Style::default().fg(color)),
        Span::raw("  │  Uptime: "),
        Span::styled(m.uptime(), Style::default().fg(Color::Cyan)),
        Span::raw("  │  Rooms: "),
        Span::styled(m.live_rooms.to_string(), Style::default().fg(Color::Yellow)),
    ]);
    f.render_widget(Paragraph::new(line).block(panel(title)), area);
}

fn draw_stats(f: &mut Frame, area: Rect, m: &Metrics) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 3), Constraint::Ratio(1, 3), Constraint::Ratio(1, 3)])
        .split(area);

    let listening = m
        .bind_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "...".to_string());

    let connections = vec![
        stat("Open", m.connected_clients.to_string(), Color::Green),
        stat("Total / peak", format!("{} / {}", m.total_connections, m.peak_connections), Color::Magenta),
        stat("Listening", listening, Color::Cyan),
    ];
    let frames = vec![
        stat("In", m.frames_in.to_string(), Color::Yellow),
        stat("Out", m.frames_out.to_string(), Color::Yellow),
        stat("Events", m.events_relayed.to_string(), Color::Cyan),
    ];
    let bytes = vec![
        stat("In", format_bytes(m.bytes_in), Color::Green),
        stat("Out", format_bytes(m.bytes_out), Color::Green),
    ];

    f.render_widget(Paragraph::new(connections).block(panel(" Connections ")), columns[0]);
    f.render_widget(Paragraph::new(frames).block(panel(" Frames ")), columns[1]);
    f.render_widget(Paragraph::new(bytes).block(panel(" Bytes ")), columns[2]);
}

fn draw_clients(f: &mut Frame, area: Rect, m: &Metrics) {
    let rows = m.clients.iter().map(|client| {
        let who = match &client.user_id {
            Some(user) => Cell::from(short_id(user)).style(Style::default().fg(Color::Green)),
            None => Cell::from(client.addr.to_string()).style(Style::default().fg(Color::DarkGray)),
        };
        Row::new(vec![
            who,
            Cell::from(client.room_id.clone().unwrap_or_else(|| "-".to_string())),
            Cell::from(client.connected_at.format("%H:%M").to_string()),
        ])
    });

    let table = Table::new(
        rows,
        [Constraint::Percentage(45), Constraint::Percentage(35), Constraint::Percentage(20)],
    )
    .header(Row::new(vec!["User", "Room", "Since"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .block(panel(" Clients "));
    f.render_widget(table, area);
}

fn draw_logs(f: &mut Frame, area: Rect, m: &Metrics, view: &LogView) {
    let height = area.height.saturating_sub(2) as usize;
    let total = m.logs.len();

    let items: Vec<ListItem> = m
        .logs
        .iter()
        .rev()
        .skip(view.offset)
        .take(height)
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    entry.timestamp.format("%H:%M:%S ").to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(
                    format!("[{}] ", entry.level.as_str()),
                    Style::default().fg(level_color(entry.level)),
                ),
                Span::raw(entry.message.as_str()),
            ]))
        })
        .collect();

    let position = match (view.follow, total) {
        (true, _) => " [AUTO]".to_string(),
        (false, 0) => String::new(),
        (false, _) => format!(" [{}/{}]", total - view.offset, total),
    };
    f.render_widget(List::new(items).block(panel(format!(" Activity{} ", position))), area);

    if total > height {
        let mut state = ScrollbarState::new(total).position(total.saturating_sub(view.offset + height));
        f.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area.inner(Margin { vertical: 1, horizontal: 0 }),
            &mut state,
        );
    }
}

fn draw_footer(f: &mut Frame, area: Rect, view: &LogView) {
    let key = Style::default().fg(Color::Black).bg(Color::White);
    let (follow, color) = if view.follow { ("ON ", Color::Green) } else { ("OFF", Color::Yellow) };

    let mut spans = Vec::new();
    for (keys, action) in [(" Q ", " Quit  "), (" ↑↓ ", " Scroll  "), (" PgUp/Dn ", " Page  "), (" A ", " Follow: ")] {
        spans.push(Span::styled(keys, key));
        spans.push(Span::raw(action));
    }
    spans.push(Span::styled(follow, Style::default().fg(color)));

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn panel<'a>(title: impl Into<Line<'a>>) -> Block<'a> {
    Block::default().borders(Borders::ALL).title(title)
}

fn stat(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::raw(format!("{}: ", label)),
        Span::styled(value, Style::default().fg(color).add_modifier(Modifier::BOLD)),
    ])
}

fn level_color(level: LogLevel) -> Color {
    match level {
        LogLevel::Info => Color::Blue,
        LogLevel::Warning => Color::Yellow,
        LogLevel::Error => Color::Red,
        LogLevel::Connection => Color::Green,
        LogLevel::Room => Color::Magenta,
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

mod app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};

use app::{
    format_amount, format_week_range, format_win_percentage, humanize_week_label, truncate, won_ids,
    AppState, ConnectionStatus,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(30);
    let mut last_tick = std::time::Instant::now();
    let mut table_state = TableState::default();

    loop {
        table_state.select(Some(app.selected));
        terminal.draw(|f| render(f, app, &mut table_state))?;

        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let week_changed = match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => true,
                        KeyCode::Left | KeyCode::Char('h') => {
                            app.older_week();
                            true
                        }
                        KeyCode::Right | KeyCode::Char('l') => {
                            app.newer_week();
                            true
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            app.select_next();
                            false
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            app.select_prev();
                            false
                        }
                        _ => false,
                    };
                    if week_changed {
                        app.refresh(client).await;
                        last_tick = std::time::Instant::now();
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, table_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | weekly table | deals | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Length(6), // borders + header + one row per pipeline
            Constraint::Min(0),    // deals
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_weekly_table(f, app, table_state, chunks[1]);
    render_deals_table(f, app, chunks[2]);
    render_footer(f, app, chunks[3]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected if app.health.sync_in_progress => ("⟳ syncing".to_string(), Color::Yellow),
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let range = app
        .weekly
        .first()
        .map_or("—".to_string(), |m| format_week_range(&m.week_start, &m.week_end));

    let mut title_spans = vec![
        Span::styled(
            " Pipeline Pulse  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(humanize_week_label(app.week_label()), Style::default().fg(Color::White)),
        Span::raw("  "),
        Span::styled(range, Style::default().fg(Color::DarkGray)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} deals", app.health.deals_in_store),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("{} overdue", app.due.total_overdue),
            Style::default().fg(if app.due.total_overdue > 0 { Color::Red } else { Color::White }),
        ),
        Span::raw(", "),
        Span::styled(
            format!("{} due today", app.due.total_due_today),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!(" of {}", app.due.total_deals),
            Style::default().fg(Color::DarkGray),
        ),
    ];
    if let Some(err) = &app.health.last_error {
        title_spans.push(Span::raw("  │  "));
        title_spans.push(Span::styled(
            format!("last sync failed: {}", truncate(err, 30)),
            Style::default().fg(Color::Red),
        ));
    }

    let paragraph = Paragraph::new(Line::from(title_spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)));

    f.render_widget(paragraph, area);
}

fn render_weekly_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["Pipeline", "New", "Closed", "Won", "Moves", "Win %"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .weekly
        .iter()
        .map(|m| {
            let win_color = if m.closed_deals_count == 0 {
                Color::DarkGray
            } else if m.win_percentage >= 50.0 {
                Color::Green
            } else if m.win_percentage >= 25.0 {
                Color::Yellow
            } else {
                Color::Red
            };

            Row::new(vec![
                Cell::from(m.pipeline.clone()),
                Cell::from(m.new_deals_count.to_string()).style(Style::default().fg(Color::Cyan)),
                Cell::from(m.closed_deals_count.to_string()),
                Cell::from(m.won_deals_count.to_string()).style(Style::default().fg(Color::Green)),
                Cell::from(m.total_movements_count.to_string()),
                Cell::from(format_win_percentage(m.win_percentage)).style(Style::default().fg(win_color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(10),
            Constraint::Length(6),
            Constraint::Length(7),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(7),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " WEEKLY METRICS ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, state);
}

fn render_deals_table(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = ["Deal", "Contact", "Stage", "Amount", ""]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let (title, rows): (String, Vec<Row>) = match app.selected_metrics() {
        Some(m) => {
            let won = won_ids(m);
            let rows = m
                .closed_deals_list
                .iter()
                .map(|d| {
                    let is_won = won.contains(d.id.as_str());
                    let (marker, color) = if is_won { ("won", Color::Green) } else { ("lost", Color::Red) };
                    Row::new(vec![
                        Cell::from(truncate(d.deal_name.as_deref().unwrap_or(&d.id), 32)),
                        Cell::from(truncate(d.contact_name.as_deref().unwrap_or("—"), 20))
                            .style(Style::default().fg(Color::DarkGray)),
                        Cell::from(d.stage.clone().unwrap_or_default()),
                        Cell::from(format_amount(d.amount)),
                        Cell::from(marker).style(Style::default().fg(color)),
                    ])
                })
                .collect();
            (format!(" CLOSED THIS WEEK: {} ", m.pipeline.to_uppercase()), rows)
        }
        None => (" CLOSED THIS WEEK ".to_string(), Vec::new()),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Min(12),
            Constraint::Length(20),
            Constraint::Length(16),
            Constraint::Length(8),
            Constraint::Length(5),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))),
    );

    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[← → / h l] ", Style::default().fg(Color::Yellow)),
        Span::raw(format!("week (-{})  ", app.weeks_back)),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("pipeline  "),
        Span::styled(
            format!("updated {}s ago, auto-refresh: 30s", app.last_refresh.elapsed().as_secs()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}

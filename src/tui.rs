//! Full-screen chat interface.
//!
//! A single cooperative loop owns the [`App`] state. It waits on terminal
//! events and on the delivery queue at once, applies whatever arrives, and
//! redraws.

use crate::app::{App, Command};
use crate::clipboard::{copy_to_clipboard, ClipboardError};
use crate::config::Config;
use crate::llm::CompletionClient;
use crate::message::{Entry, EntryState, StreamEvent};
use crate::pipeline::ResponsePipeline;
use anyhow::{Context, Result};
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::{Stream, StreamExt};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use unicode_width::UnicodeWidthChar;

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Run the chat UI until the user quits. Returns the unsent input.
pub async fn run(config: Arc<Config>, client: Arc<dyn CompletionClient>) -> Result<String> {
    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(e).context("Failed to enter alternate screen");
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, config, client).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn event_loop(
    terminal: &mut Tui,
    config: Arc<Config>,
    client: Arc<dyn CompletionClient>,
) -> Result<String> {
    let (mut pipeline, mut deliveries) = ResponsePipeline::new(client, Arc::clone(&config));
    let mut app = App::new();

    run_session(
        terminal,
        &config,
        &mut app,
        &mut pipeline,
        &mut deliveries,
        EventStream::new(),
    )
    .await?;
    Ok(app.input.value().to_string())
}

/// Drive the UI until the user quits or the terminal goes away.
///
/// Every worker still in the registry is cancelled on the way out, whether
/// the session ended normally or with an error.
async fn run_session<B, E>(
    terminal: &mut Terminal<B>,
    config: &Config,
    app: &mut App,
    pipeline: &mut ResponsePipeline,
    deliveries: &mut mpsc::Receiver<StreamEvent>,
    terminal_events: E,
) -> Result<()>
where
    B: Backend,
    E: Stream<Item = io::Result<Event>>,
{
    let mut terminal_events = std::pin::pin!(terminal_events);

    let outcome = loop {
        if app.should_quit {
            break Ok(());
        }
        if let Err(e) = terminal.draw(|frame| draw_ui(frame, app, config)) {
            break Err(anyhow::Error::new(e).context("Failed to draw the terminal"));
        }

        tokio::select! {
            maybe_event = terminal_events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => {
                    if let Some(command) = app.handle_key(key) {
                        run_command(command, app, pipeline, copy_to_clipboard);
                    }
                }
                // Resize and everything else just trigger a redraw.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break Err(anyhow::Error::new(e).context("Failed to read terminal event"));
                }
                None => break Ok(()),
            },
            Some(event) = deliveries.recv() => {
                apply_delivery(app, pipeline, event);
                // Drain whatever else is queued so a burst costs one redraw.
                while let Ok(event) = deliveries.try_recv() {
                    apply_delivery(app, pipeline, event);
                }
            }
        }
    };

    pipeline.cancel_all();
    info!("Chat session ended");
    outcome
}

fn apply_delivery(app: &mut App, pipeline: &mut ResponsePipeline, event: StreamEvent) {
    if app.apply_stream_event(&event) {
        pipeline.retire(event.index);
    }
}

fn run_command(
    command: Command,
    app: &mut App,
    pipeline: &mut ResponsePipeline,
    copy: impl FnOnce(&str) -> Result<(), ClipboardError>,
) {
    match command {
        Command::Submit(submission) => {
            pipeline.submit(submission.snapshot, submission.text, submission.index);
        }
        Command::Copy(text) => match copy(&text) {
            Ok(()) => app.status = Some("Copied to clipboard".to_string()),
            Err(e) => {
                warn!("Clipboard write failed: {}", e);
                app.status = Some(format!("Copy failed: {}", e));
            }
        },
        Command::CancelLatest => match pipeline.cancel_latest() {
            Some(index) => info!(index, "Cancelling reply"),
            None => app.status = Some("No reply in progress".to_string()),
        },
    }
}

/// Draw the TUI.
fn draw_ui(frame: &mut Frame, app: &App, config: &Config) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_transcript(frame, app, config, chunks[0]);
    draw_input(frame, app, chunks[1]);
    draw_status(frame, app, chunks[2]);
}

fn draw_transcript(frame: &mut Frame, app: &App, config: &Config, area: ratatui::layout::Rect) {
    let block = Block::default()
        .title(format!(" Model: {} ({}) ", config.model, config.mode_label()))
        .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    // Leave room for the borders and the glyph column.
    let width = area.width.saturating_sub(2 + 4) as usize;
    let items: Vec<ListItem> = app
        .transcript
        .entries()
        .iter()
        .map(|entry| ListItem::new(entry_text(entry, width)))
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::DarkGray));
    let mut state = ListState::default().with_selected(app.selected);
    frame.render_stateful_widget(list, area, &mut state);
}

/// Render one transcript entry: glyph, wrapped content, then a state marker.
fn entry_text(entry: &Entry, width: usize) -> Text<'static> {
    let glyph = entry.message.role.glyph();
    let mut lines: Vec<Line> = Vec::new();

    for (i, line) in wrap_text(&entry.message.content, width).into_iter().enumerate() {
        let prefix = if i == 0 { glyph.to_string() } else { "    ".to_string() };
        lines.push(Line::from(vec![
            Span::styled(prefix, Style::default().fg(Color::Magenta)),
            Span::raw(line),
        ]));
    }

    let marker = match &entry.state {
        EntryState::Complete => None,
        EntryState::Pending => Some(Span::styled("…", Style::default().fg(Color::DarkGray))),
        EntryState::Streaming => Some(Span::styled("▌", Style::default().fg(Color::DarkGray))),
        EntryState::Failed(reason) => Some(Span::styled(
            format!("[failed: {}]", reason),
            Style::default().fg(Color::Red),
        )),
        EntryState::Cancelled => Some(Span::styled(
            "[cancelled]",
            Style::default().fg(Color::Yellow),
        )),
    };
    if let Some(marker) = marker {
        match lines.last_mut() {
            Some(last) if entry.message.content.is_empty() => last.spans.push(marker),
            _ => lines.push(Line::from(vec![Span::raw("    "), marker])),
        }
    }

    Text::from(lines)
}

/// Hard-wrap text to `width` terminal columns, keeping explicit line breaks.
/// Always returns at least one line.
///
/// A double-width character never straddles the edge; it moves to the next line.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for raw in text.split('\n') {
        let mut line = String::new();
        let mut line_width = 0;
        for c in raw.chars() {
            let char_width = c.width().unwrap_or(0);
            if line_width + char_width > width && !line.is_empty() {
                out.push(std::mem::take(&mut line));
                line_width = 0;
            }
            line.push(c);
            line_width += char_width;
        }
        out.push(line);
    }
    out
}

/// Slice of the input that fits in `width` columns with the cursor visible.
///
/// `cursor` is in display columns, as reported by `Input::visual_cursor`.
/// Returns the visible text and the cursor column relative to it.
fn visible_input(value: &str, cursor: usize, width: usize) -> (String, usize) {
    let width = width.max(1);
    let scroll = (cursor + 1).saturating_sub(width);

    let mut chars = value.chars();
    let mut skipped = 0;
    while skipped < scroll {
        match chars.next() {
            Some(c) => skipped += c.width().unwrap_or(0),
            None => break,
        }
    }

    let mut visible = String::new();
    let mut used = 0;
    for c in chars {
        let char_width = c.width().unwrap_or(0);
        if used + char_width > width {
            break;
        }
        visible.push(c);
        used += char_width;
    }
    (visible, cursor.saturating_sub(skipped))
}

fn draw_input(frame: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let block = Block::default()
        .title(" Send a message ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner_area = block.inner(area);
    frame.render_widget(block, area);

    // Scroll the input if cursor is beyond visible area
    let (visible_value, cursor_column) = visible_input(
        app.input.value(),
        app.input.visual_cursor(),
        inner_area.width as usize,
    );
    let input_paragraph = Paragraph::new(Line::from(vec![Span::styled(
        visible_value,
        Style::default().fg(Color::White),
    )]));
    frame.render_widget(input_paragraph, inner_area);

    let cursor_x = inner_area.x + cursor_column as u16;
    frame.set_cursor_position((cursor_x, inner_area.y));
}

fn draw_status(frame: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let in_flight = app.in_flight();
    let text = match &app.status {
        Some(status) => status.clone(),
        None => "Enter send · ↑/↓ select · Ctrl-Y copy · Ctrl-X cancel · Esc quit".to_string(),
    };
    let mut spans = vec![Span::styled(text, Style::default().fg(Color::DarkGray))];
    if in_flight > 0 {
        spans.push(Span::styled(
            format!("  ({} in flight)", in_flight),
            Style::default().fg(Color::Cyan),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

//! UI state and key handling.
//!
//! [`App`] owns the transcript and the input line. It turns key presses into
//! state changes plus optional follow-up [`Command`]s that the event loop
//! carries out (starting a worker, copying to the clipboard, cancelling).

use crate::message::{EntryState, Message, StreamEvent, StreamEventKind, Transcript};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tui_input::backend::crossterm::EventHandler;
use tui_input::Input;

/// Number of entries PageUp/PageDown move the selection by.
const PAGE_STEP: usize = 5;

/// A new turn ready to hand to the response pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Transcript before this turn.
    pub snapshot: Vec<Message>,
    pub text: String,
    /// Placeholder slot that receives the reply.
    pub index: usize,
}

/// Follow-up work requested by a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(Submission),
    Copy(String),
    CancelLatest,
}

#[derive(Debug, Default)]
pub struct App {
    pub transcript: Transcript,
    pub input: Input,
    pub selected: Option<usize>,
    /// One-line message shown under the input, e.g. the last UI-local error.
    pub status: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one key press.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        // Only handle key press events (not release)
        if key.kind != KeyEventKind::Press {
            return None;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Enter => return self.submit().map(Command::Submit),
            KeyCode::Char('y') if ctrl => match self.selected_text() {
                Some(text) => return Some(Command::Copy(text.to_string())),
                None => self.status = Some("Nothing selected to copy".to_string()),
            },
            KeyCode::Char('x') if ctrl => return Some(Command::CancelLatest),
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-(PAGE_STEP as isize)),
            KeyCode::PageDown => self.move_selection(PAGE_STEP as isize),
            _ => {
                self.input.handle_event(&Event::Key(key));
            }
        }
        None
    }

    /// Turn the input line into a new turn.
    ///
    /// Appends the user message and an empty assistant placeholder, then
    /// clears the input. Blank input is ignored.
    pub fn submit(&mut self) -> Option<Submission> {
        let text = self.input.value().to_string();
        if text.trim().is_empty() {
            return None;
        }

        let user_index = self.transcript.push_user(text.clone());
        let index = self.transcript.push_placeholder();
        let snapshot = self.transcript.snapshot(user_index);
        self.input.reset();
        self.selected = Some(index);

        Some(Submission {
            snapshot,
            text,
            index,
        })
    }

    /// Apply a worker update. Returns true if it was the slot's last event.
    pub fn apply_stream_event(&mut self, event: &StreamEvent) -> bool {
        if !self.transcript.apply(event) {
            return event.is_terminal();
        }
        match &event.kind {
            StreamEventKind::Failed(reason) => {
                self.status = Some(format!("Reply #{} failed: {}", event.index, reason));
            }
            StreamEventKind::Cancelled => {
                self.status = Some(format!("Reply #{} cancelled", event.index));
            }
            StreamEventKind::Delta(_) | StreamEventKind::Finished => {}
        }
        event.is_terminal()
    }

    pub fn selected_text(&self) -> Option<&str> {
        self.selected
            .and_then(|index| self.transcript.get(index))
            .map(|entry| entry.message.content.as_str())
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.transcript.len();
        if len == 0 {
            return;
        }
        let current = self.selected.unwrap_or(len - 1) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.selected = Some(next as usize);
    }

    /// Replies still waiting for their final event.
    pub fn in_flight(&self) -> usize {
        self.transcript
            .entries()
            .iter()
            .filter(|entry| matches!(entry.state, EntryState::Pending | EntryState::Streaming))
            .count()
    }
}

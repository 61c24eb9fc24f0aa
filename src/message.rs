//! Conversation data model: roles, messages, the transcript and the events
//! that update it.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Glyph drawn in front of a transcript entry.
    pub fn glyph(self) -> &'static str {
        match self {
            Role::System => "⚙ ",
            Role::User => "👤: ",
            Role::Assistant => "🤖: ",
        }
    }
}

/// A single role-tagged chat message, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Lifecycle of a transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Placeholder waiting for its first delta.
    Pending,
    /// Some text has arrived and more may follow.
    Streaming,
    Complete,
    /// The request failed; the content holds whatever arrived before the failure.
    Failed(String),
    Cancelled,
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        match self {
            EntryState::Pending | EntryState::Streaming => false,
            EntryState::Complete | EntryState::Failed(_) | EntryState::Cancelled => true,
        }
    }
}

/// One slot of the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub message: Message,
    pub state: EntryState,
}

/// An update for a single transcript slot, produced by a response worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Index of the placeholder this update belongs to.
    pub index: usize,
    pub kind: StreamEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventKind {
    /// Full accumulated reply text so far, not just the newest fragment.
    Delta(String),
    Finished,
    Failed(String),
    Cancelled,
}

impl StreamEvent {
    pub fn delta(index: usize, accumulated: impl Into<String>) -> Self {
        Self {
            index,
            kind: StreamEventKind::Delta(accumulated.into()),
        }
    }

    pub fn finished(index: usize) -> Self {
        Self {
            index,
            kind: StreamEventKind::Finished,
        }
    }

    pub fn failed(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            kind: StreamEventKind::Failed(reason.into()),
        }
    }

    pub fn cancelled(index: usize) -> Self {
        Self {
            index,
            kind: StreamEventKind::Cancelled,
        }
    }

    /// Whether this is the last event a worker sends for its slot.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, StreamEventKind::Delta(_))
    }
}

/// Ordered, append-only log of the conversation.
///
/// Only the UI loop mutates the transcript. Workers receive owned snapshots
/// and report back through [`StreamEvent`]s.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Append a completed user message and return its index.
    pub fn push_user(&mut self, content: impl Into<String>) -> usize {
        self.entries.push(Entry {
            message: Message::user(content),
            state: EntryState::Complete,
        });
        self.entries.len() - 1
    }

    /// Append an empty assistant placeholder and return its index.
    pub fn push_placeholder(&mut self) -> usize {
        self.entries.push(Entry {
            message: Message::assistant(""),
            state: EntryState::Pending,
        });
        self.entries.len() - 1
    }

    /// Owned copy of the messages before `end`.
    pub fn snapshot(&self, end: usize) -> Vec<Message> {
        self.entries[..end.min(self.entries.len())]
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Apply a worker update to its slot. Returns whether anything changed.
    ///
    /// Deltas replace the slot content wholesale, so a repeated or superseded
    /// event is harmless. Updates for slots that are not assistant entries, or
    /// that already reached a terminal state, are ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        let Some(entry) = self.entries.get_mut(event.index) else {
            warn!(index = event.index, "Stream event for unknown transcript slot");
            return false;
        };
        match entry.message.role {
            Role::Assistant => {}
            Role::System | Role::User => {
                warn!(index = event.index, "Stream event for non-assistant slot");
                return false;
            }
        }
        if entry.state.is_terminal() {
            return false;
        }

        match &event.kind {
            StreamEventKind::Delta(text) => {
                entry.message.content.clone_from(text);
                entry.state = EntryState::Streaming;
            }
            StreamEventKind::Finished => entry.state = EntryState::Complete,
            StreamEventKind::Failed(reason) => entry.state = EntryState::Failed(reason.clone()),
            StreamEventKind::Cancelled => entry.state = EntryState::Cancelled,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
        let parsed: Message = serde_json::from_str(r#"{"role":"system","content":"x"}"#).unwrap();
        assert_eq!(parsed.role, Role::System);
    }

    #[test]
    fn test_placeholder_fills_in() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.push_user("Hello"), 0);
        let index = transcript.push_placeholder();
        assert_eq!(index, 1);
        assert_eq!(transcript.get(1).unwrap().state, EntryState::Pending);

        for text in ["Hi", "Hi there", "Hi there!"] {
            assert!(transcript.apply(&StreamEvent::delta(index, text)));
        }
        assert!(transcript.apply(&StreamEvent::finished(index)));

        let entry = transcript.get(index).unwrap();
        assert_eq!(entry.message.content, "Hi there!");
        assert_eq!(entry.state, EntryState::Complete);
    }

    #[test]
    fn test_failure_keeps_partial_content() {
        let mut transcript = Transcript::new();
        transcript.push_user("Hello");
        let index = transcript.push_placeholder();

        transcript.apply(&StreamEvent::delta(index, "Par"));
        transcript.apply(&StreamEvent::failed(index, "connection reset"));

        let entry = transcript.get(index).unwrap();
        assert_eq!(entry.message.content, "Par");
        assert_eq!(entry.state, EntryState::Failed("connection reset".to_string()));

        // Nothing reopens a finished slot.
        assert!(!transcript.apply(&StreamEvent::delta(index, "Partial")));
        assert_eq!(transcript.get(index).unwrap().message.content, "Par");
    }

    #[test]
    fn test_events_for_user_or_missing_slots_ignored() {
        let mut transcript = Transcript::new();
        transcript.push_user("Hello");
        assert!(!transcript.apply(&StreamEvent::delta(0, "oops")));
        assert!(!transcript.apply(&StreamEvent::delta(7, "oops")));
        assert_eq!(transcript.get(0).unwrap().message.content, "Hello");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut transcript = Transcript::new();
        transcript.push_user("one");
        let index = transcript.push_placeholder();
        let snapshot = transcript.snapshot(index);
        transcript.apply(&StreamEvent::delta(index, "reply"));

        assert_eq!(snapshot, vec![Message::user("one")]);
        assert_eq!(transcript.snapshot(99).len(), 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!EntryState::Pending.is_terminal());
        assert!(!EntryState::Streaming.is_terminal());
        assert!(EntryState::Complete.is_terminal());
        assert!(EntryState::Failed(String::new()).is_terminal());
        assert!(StreamEvent::cancelled(0).is_terminal());
        assert!(!StreamEvent::delta(0, "x").is_terminal());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One conversational turn as it arrives from a session transcript.
///
/// `speaker` is free-form (user name, "assistant", a channel handle); the
/// engine treats it as an opaque label that also feeds entity scanning.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationTurn {
  pub speaker: String,
  pub content: String,
  pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationTurn {
  pub fn new(speaker: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      speaker: speaker.into(),
      content: content.into(),
      timestamp: None,
    }
  }

  pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = Some(timestamp);
    self
  }
}

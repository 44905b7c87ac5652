use chrono::{DateTime, Utc};
use atomem_entities::conversation_window;
use atomem_shared::{ConversationTurn, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A contiguous slice of a session transcript. Windows are created once by
/// ingestion and never mutated after the entropy filter has scored them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationWindow {
  pub id: Uuid,
  pub turns: Vec<ConversationTurn>,
  /// First transcript position covered (inclusive).
  pub start_index: usize,
  /// Last transcript position covered (inclusive).
  pub end_index: usize,
  pub entropy: Option<f64>,
  pub should_process: bool,
  pub source_session_file: Option<String>,
}

impl ConversationWindow {
  pub fn from_model(model: conversation_window::Model) -> Result<Self, StoreError> {
    Ok(Self {
      id: model.id,
      turns: serde_json::from_value(model.turns)
        .map_err(|err| StoreError::Corruption(err.to_string()))?,
      start_index: model.start_index as usize,
      end_index: model.end_index as usize,
      entropy: model.entropy,
      should_process: model.should_process,
      source_session_file: model.source_session_file,
    })
  }

  pub fn to_model(
    &self,
    processed_at: DateTime<Utc>,
  ) -> Result<conversation_window::Model, StoreError> {
    Ok(conversation_window::Model {
      id: self.id,
      turns: serde_json::to_value(&self.turns)
        .map_err(|err| StoreError::Corruption(err.to_string()))?,
      start_index: self.start_index as i32,
      end_index: self.end_index as i32,
      entropy: self.entropy,
      should_process: self.should_process,
      processed_at: Some(processed_at.into()),
      source_session_file: self.source_session_file.clone(),
    })
  }

  /// Total character count across turn contents. The entropy filter's
  /// novelty denominator.
  #[must_use]
  pub fn content_len(&self) -> usize {
    self.turns.iter().map(|t| t.content.chars().count()).sum()
  }

  /// Turns rendered one per line, `speaker: content`, with the timestamp
  /// prefixed when present. Used by the extraction prompt.
  #[must_use]
  pub fn render_turns(&self) -> String {
    let mut out = String::new();
    for turn in &self.turns {
      match turn.timestamp {
        Some(ts) => {
          out.push_str(&format!("[{}] {}: {}\n", ts.to_rfc3339(), turn.speaker, turn.content));
        }
        None => {
          out.push_str(&format!("{}: {}\n", turn.speaker, turn.content));
        }
      }
    }
    out
  }
}

/// Deterministic window id from the session file and slice bounds, so
/// re-ingesting the same slice upserts rather than duplicates.
fn window_id(session_file: Option<&str>, start_index: usize, end_index: usize) -> Uuid {
  let name = format!("{}:{start_index}:{end_index}", session_file.unwrap_or(""));
  Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Slice `turns` into windows of up to `window_size` turns starting at
/// positions `0, stride, 2*stride, …` strictly below `turns.len()`. The last
/// window may be shorter. Empty input yields no windows.
#[must_use]
pub fn create_windows(
  turns: &[ConversationTurn],
  window_size: usize,
  stride: usize,
  session_file: Option<&str>,
) -> Vec<ConversationWindow> {
  if turns.is_empty() || window_size == 0 || stride == 0 {
    return Vec::new();
  }

  let mut windows = Vec::new();
  let mut start = 0;
  while start < turns.len() {
    let end = (start + window_size).min(turns.len());
    windows.push(ConversationWindow {
      id: window_id(session_file, start, end - 1),
      turns: turns[start..end].to_vec(),
      start_index: start,
      end_index: end - 1,
      entropy: None,
      should_process: false,
      source_session_file: session_file.map(ToOwned::to_owned),
    });
    start += stride;
  }
  windows
}

#[cfg(test)]
mod tests {
  use super::*;

  fn turns(n: usize) -> Vec<ConversationTurn> {
    (0..n)
      .map(|i| ConversationTurn::new("user", format!("turn {i}")))
      .collect()
  }

  #[test]
  fn empty_input_yields_no_windows() {
    assert!(create_windows(&[], 10, 5, None).is_empty());
  }

  #[test]
  fn non_overlapping_windows_partition_the_transcript() {
    let turns = turns(5);
    let windows = create_windows(&turns, 2, 2, Some("session-a"));
    assert_eq!(windows.len(), 3);
    assert_eq!((windows[0].start_index, windows[0].end_index), (0, 1));
    assert_eq!((windows[1].start_index, windows[1].end_index), (2, 3));
    assert_eq!((windows[2].start_index, windows[2].end_index), (4, 4));
    assert_eq!(windows[0].turns.len(), 2);
    assert_eq!(windows[2].turns.len(), 1);
  }

  #[test]
  fn overlapping_windows_share_window_minus_stride_turns() {
    let turns = turns(5);
    let windows = create_windows(&turns, 3, 2, None);
    assert_eq!((windows[0].start_index, windows[0].end_index), (0, 2));
    assert_eq!((windows[1].start_index, windows[1].end_index), (2, 4));
    // overlap of exactly one turn
    assert_eq!(windows[0].turns[2], windows[1].turns[0]);
  }

  #[test]
  fn ids_are_deterministic_per_session_and_bounds() {
    let turns = turns(4);
    let first = create_windows(&turns, 2, 2, Some("session-a"));
    let second = create_windows(&turns, 2, 2, Some("session-a"));
    let other = create_windows(&turns, 2, 2, Some("session-b"));
    assert_eq!(first[0].id, second[0].id);
    assert_ne!(first[0].id, other[0].id);
  }

  #[test]
  fn coverage_is_exact_when_stride_at_most_window() {
    let turns = turns(13);
    let windows = create_windows(&turns, 4, 3, None);
    let mut covered: Vec<usize> = windows
      .iter()
      .flat_map(|w| w.start_index..=w.end_index)
      .collect();
    covered.sort_unstable();
    covered.dedup();
    assert_eq!(covered, (0..13).collect::<Vec<_>>());
  }

  #[test]
  fn render_includes_timestamps_when_present() {
    let ts = chrono::DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
      .unwrap()
      .with_timezone(&chrono::Utc);
    let turn = ConversationTurn::new("alice", "hello").at(ts);
    let windows = create_windows(&[turn], 1, 1, None);
    let rendered = windows[0].render_turns();
    assert!(rendered.contains("2026-03-01T10:00:00"));
    assert!(rendered.contains("alice: hello"));
  }
}

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::SemanticCompressionConfig;
use crate::window::ConversationWindow;
use atomem_ai::cosine_similarity;

/// Capitalised token runs: `Alice`, `Acme Corporation`, `New York City`.
static ENTITY_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[A-Z][a-z]+( [A-Z][a-z]+)*").expect("entity pattern"));

/// Divergence used when either embedding is unavailable.
const DEFAULT_DIVERGENCE: f64 = 0.5;

/// Per-window output of the entropy filter.
#[derive(Debug, Clone)]
pub struct WindowEntropy {
  pub entropy: f64,
  pub entity_novelty: f64,
  pub semantic_divergence: f64,
  /// Entities in the window absent from prior memory, original casing.
  pub new_entities: Vec<String>,
  pub should_keep: bool,
}

/// Scan capitalised entity runs out of free text.
#[must_use]
pub fn scan_entities(text: &str) -> Vec<String> {
  ENTITY_PATTERN
    .find_iter(text)
    .map(|m| m.as_str().to_owned())
    .collect()
}

fn window_entities(window: &ConversationWindow) -> Vec<String> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for turn in &window.turns {
    for entity in scan_entities(&turn.content) {
      if seen.insert(entity.to_lowercase()) {
        out.push(entity);
      }
    }
    if seen.insert(turn.speaker.to_lowercase()) {
      out.push(turn.speaker.clone());
    }
  }
  out
}

/// Score one window's information novelty against prior memory.
///
/// `known_identifiers` is the case-folded union of entities and persons over
/// the facts already stored. Embeddings are optional; without both sides the
/// divergence term falls back to a constant.
///
/// Pure: never suspends, never touches an LLM.
#[must_use]
pub fn score_window(
  window: &ConversationWindow,
  known_identifiers: &HashSet<String>,
  window_embedding: Option<&[f32]>,
  previous_embedding: Option<&[f32]>,
  config: &SemanticCompressionConfig,
) -> WindowEntropy {
  let entities = window_entities(window);
  let new_entities: Vec<String> = entities
    .into_iter()
    .filter(|e| !known_identifiers.contains(&e.to_lowercase()))
    .collect();

  let content_len = window.content_len();
  let entity_novelty = if content_len == 0 {
    0.0
  } else {
    new_entities.len() as f64 / (content_len as f64).sqrt()
  };

  let semantic_divergence = match (window_embedding, previous_embedding) {
    (Some(current), Some(previous)) => {
      1.0 - f64::from(cosine_similarity(current, previous))
    }
    _ => DEFAULT_DIVERGENCE,
  };

  let entropy =
    config.entity_weight * entity_novelty + config.divergence_weight * semantic_divergence;

  WindowEntropy {
    entropy,
    entity_novelty,
    semantic_divergence,
    new_entities,
    // Ties at the threshold keep the window.
    should_keep: entropy >= config.entropy_threshold,
  }
}

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, join_all};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::SemanticCompressionConfig;
use crate::fact::AtomicFact;
use crate::window::ConversationWindow;
use atomem_shared::{ExtractError, SharedClock};

/// Opaque LLM callable: prompt in, raw completion out.
pub type LlmFn = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Optional embedding provider: text in, fixed-dimension vector out.
pub type EmbedFn =
  Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<Vec<f32>>> + Send + Sync>;

/// Confidence assumed when the LLM omits the field.
const DEFAULT_CONFIDENCE: f64 = 0.8;

// ──────────────────────────────────────────────────
// Extraction prompt
// ──────────────────────────────────────────────────

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are extracting atomic facts from a conversation segment for long-term memory.

An atomic fact is a single, self-contained statement:
1. Resolve all coreferences — no pronouns (\"she\" becomes the person's name).
2. Normalise temporal expressions to absolute dates where the conversation allows it.
3. Each statement must be meaningful without the conversation it came from.
4. Skip transient states and small talk; keep preferences, events, decisions, \
   relationships and durable attributes.

Respond with JSON of exactly this shape:

{\"facts\": [{\"statement\": \"...\", \"keywords\": [\"...\"], \"persons\": [\"...\"], \
\"entities\": [\"...\"], \"topic\": \"...\", \"timestamp\": \"ISO-8601\", \
\"location\": \"...\", \"confidence\": 0.0}]}

`topic`, `timestamp` and `location` are optional. `confidence` is your own \
certainty in [0, 1]. Return an empty `facts` array when nothing is worth keeping.";

/// Build the full extractor prompt for one window: instructions, optional
/// previous-memory context, then the rendered turns.
#[must_use]
pub fn build_extraction_prompt(
  window: &ConversationWindow,
  previous_summary: Option<&str>,
) -> String {
  let mut prompt = String::from(EXTRACTION_SYSTEM_PROMPT);
  if let Some(summary) = previous_summary.filter(|s| !s.is_empty()) {
    let _ = write!(prompt, "\n\n== Known memory (context, do not re-extract) ==\n{summary}");
  }
  let _ = write!(prompt, "\n\n== Conversation ==\n{}", window.render_turns());
  prompt
}

// ──────────────────────────────────────────────────
// Response parsing
// ──────────────────────────────────────────────────

/// One fact as the LLM reported it, before gating and stamping.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFact {
  pub statement: String,
  #[serde(default)]
  pub keywords: Vec<String>,
  #[serde(default)]
  pub persons: Vec<String>,
  #[serde(default)]
  pub entities: Vec<String>,
  #[serde(default)]
  pub topic: Option<String>,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default = "default_confidence")]
  pub confidence: f64,
}

fn default_confidence() -> f64 {
  DEFAULT_CONFIDENCE
}

fn strip_code_fence(raw: &str) -> &str {
  let trimmed = raw.trim();
  let Some(rest) = trimmed.strip_prefix("```") else {
    return trimmed;
  };
  // Drop the info string ("json") up to the first newline, then the closing fence.
  let body = rest.split_once('\n').map_or("", |(_, body)| body);
  body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the extractor's completion. Accepts raw JSON or a fenced block; a
/// missing or non-array top-level `facts` is a structural violation.
/// Individual malformed entries are dropped, not fatal.
pub fn parse_extractor_response(raw: &str) -> Result<Vec<RawFact>, ExtractError> {
  let json_text = strip_code_fence(raw);
  let value: serde_json::Value = serde_json::from_str(json_text)
    .map_err(|err| ExtractError::BadResponse(format!("not JSON: {err}")))?;

  let facts = value
    .get("facts")
    .and_then(|v| v.as_array())
    .ok_or_else(|| ExtractError::BadResponse("top-level `facts` is not an array".to_owned()))?;

  let mut parsed = Vec::with_capacity(facts.len());
  for entry in facts {
    match serde_json::from_value::<RawFact>(entry.clone()) {
      Ok(fact) if !fact.statement.trim().is_empty() => parsed.push(fact),
      Ok(_) => tracing::warn!("Dropping extracted fact with empty statement"),
      Err(err) => tracing::warn!(error = %err, "Dropping malformed extracted fact"),
    }
  }
  Ok(parsed)
}

fn parse_fact_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
  raw
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc))
}

// ──────────────────────────────────────────────────
// Deduplication
// ──────────────────────────────────────────────────

fn normalize_statement(statement: &str) -> String {
  statement
    .to_lowercase()
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn dedup_key(fact: &AtomicFact) -> (String, Vec<String>, Vec<String>) {
  let mut entities: Vec<String> = fact.entities.iter().map(|s| s.to_lowercase()).collect();
  entities.sort();
  let mut persons: Vec<String> = fact.persons.iter().map(|s| s.to_lowercase()).collect();
  persons.sort();
  (normalize_statement(&fact.statement), entities, persons)
}

/// Drop facts whose `(normalised statement, entities, persons)` tuple was
/// already seen. First occurrence wins; running it twice is a no-op.
#[must_use]
pub fn dedup_facts(facts: Vec<AtomicFact>) -> Vec<AtomicFact> {
  let mut seen = std::collections::HashSet::new();
  facts
    .into_iter()
    .filter(|fact| seen.insert(dedup_key(fact)))
    .collect()
}

// ──────────────────────────────────────────────────
// Per-window extraction
// ──────────────────────────────────────────────────

/// Drive the extractor LLM over one kept window and return its gated,
/// stamped facts. Recoverable failures surface as [`ExtractError`]; the
/// caller decides whether siblings continue.
pub async fn extract_window_facts(
  window: &ConversationWindow,
  previous_summary: Option<&str>,
  extract_fn: &LlmFn,
  config: &SemanticCompressionConfig,
  timeout_ms: u64,
  clock: &SharedClock,
) -> Result<Vec<AtomicFact>, ExtractError> {
  let prompt = build_extraction_prompt(window, previous_summary);

  let response = tokio::time::timeout(Duration::from_millis(timeout_ms), (extract_fn)(prompt))
    .await
    .map_err(|_| ExtractError::Timeout(timeout_ms))?
    .map_err(|err| ExtractError::Provider(err.to_string()))?;

  let raw_facts = parse_extractor_response(&response)?;
  let now = (clock)();

  let mut facts = Vec::new();
  for raw in raw_facts {
    if raw.confidence < config.min_confidence {
      tracing::debug!(
        statement = %raw.statement,
        confidence = raw.confidence,
        "Dropping low-confidence fact"
      );
      continue;
    }
    if facts.len() >= config.max_facts_per_window {
      tracing::debug!(
        window_id = %window.id,
        cap = config.max_facts_per_window,
        "Window fact cap reached, ignoring remainder"
      );
      break;
    }
    facts.push(AtomicFact {
      id: Uuid::now_v7(),
      statement: raw.statement,
      keywords: raw.keywords,
      persons: raw.persons,
      entities: raw.entities,
      topic: raw.topic,
      timestamp: parse_fact_timestamp(raw.timestamp.as_deref()),
      location: raw.location,
      confidence: raw.confidence.clamp(0.0, 1.0),
      entropy: window.entropy,
      extracted_at: now,
      level: 0,
      parent_cluster_id: None,
      source_fact_ids: Vec::new(),
      source_window_id: Some(window.id),
      source_chunk_id: None,
      source_session_file: window.source_session_file.clone(),
    });
  }
  Ok(facts)
}

// ──────────────────────────────────────────────────
// Batch execution
// ──────────────────────────────────────────────────

/// Extract facts from every kept window with bounded parallelism: windows
/// are chunked by `max_parallel_workers` and each chunk is awaited before
/// the next starts. A failed window contributes zero facts and one error
/// string; siblings are unaffected. Results are deduplicated across the
/// whole batch.
pub async fn extract_facts(
  windows: &[ConversationWindow],
  previous_summary: Option<&str>,
  extract_fn: &LlmFn,
  config: &SemanticCompressionConfig,
  timeout_ms: u64,
  clock: &SharedClock,
) -> (Vec<AtomicFact>, Vec<String>) {
  let mut facts = Vec::new();
  let mut errors = Vec::new();

  for chunk in windows.chunks(config.max_parallel_workers.max(1)) {
    let results = join_all(chunk.iter().map(|window| {
      extract_window_facts(window, previous_summary, extract_fn, config, timeout_ms, clock)
    }))
    .await;

    for (window, result) in chunk.iter().zip(results) {
      match result {
        Ok(extracted) => facts.extend(extracted),
        Err(err) => {
          tracing::warn!(window_id = %window.id, error = %err, "Window extraction failed");
          errors.push(format!("window {}: {err}", window.id));
        }
      }
    }
  }

  (dedup_facts(facts), errors)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::window::create_windows;
  use atomem_shared::{ConversationTurn, system_clock};

  fn llm(response: &'static str) -> LlmFn {
    Arc::new(move |_prompt| Box::pin(async move { Ok(response.to_owned()) }))
  }

  fn test_window() -> ConversationWindow {
    let turns = vec![
      ConversationTurn::new("user", "I met John at Microsoft yesterday."),
      ConversationTurn::new("assistant", "What did you discuss with John?"),
    ];
    create_windows(&turns, 2, 2, Some("session-a")).remove(0)
  }

  #[test]
  fn parses_raw_json() {
    let parsed = parse_extractor_response(
      r#"{"facts":[{"statement":"Alice works at Acme.","confidence":0.9}]}"#,
    )
    .unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].keywords, Vec::<String>::new());
    assert_eq!(parsed[0].confidence, 0.9);
  }

  #[test]
  fn parses_fenced_json() {
    let raw = "```json\n{\"facts\":[{\"statement\":\"Alice works at Acme.\"}]}\n```";
    let parsed = parse_extractor_response(raw).unwrap();
    assert_eq!(parsed.len(), 1);
    // missing confidence coerces to the default
    assert_eq!(parsed[0].confidence, DEFAULT_CONFIDENCE);
  }

  #[test]
  fn rejects_non_array_facts() {
    let err = parse_extractor_response(r#"{"facts":"none"}"#).unwrap_err();
    assert!(matches!(err, ExtractError::BadResponse(_)));
  }

  #[test]
  fn rejects_non_json() {
    let err = parse_extractor_response("I could not extract anything.").unwrap_err();
    assert!(matches!(err, ExtractError::BadResponse(_)));
  }

  #[tokio::test]
  async fn confidence_gate_drops_weak_facts() {
    let window = test_window();
    let extract = llm(r#"{"facts":[{"statement":"Maybe something.","confidence":0.3}]}"#);
    let facts = extract_window_facts(
      &window,
      None,
      &extract,
      &SemanticCompressionConfig::default(),
      1_000,
      &system_clock(),
    )
    .await
    .unwrap();
    assert!(facts.is_empty());
  }

  #[tokio::test]
  async fn stamps_level_zero_and_provenance() {
    let window = test_window();
    let extract = llm(
      r#"{"facts":[{"statement":"John works at Microsoft.","persons":["John"],"entities":["Microsoft"],"confidence":0.9}]}"#,
    );
    let facts = extract_window_facts(
      &window,
      None,
      &extract,
      &SemanticCompressionConfig::default(),
      1_000,
      &system_clock(),
    )
    .await
    .unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].level, 0);
    assert_eq!(facts[0].source_window_id, Some(window.id));
    assert_eq!(facts[0].source_session_file.as_deref(), Some("session-a"));
  }

  #[tokio::test]
  async fn fact_cap_truncates_output() {
    let window = test_window();
    let mut config = SemanticCompressionConfig::default();
    config.max_facts_per_window = 2;
    let extract = llm(
      r#"{"facts":[
        {"statement":"Fact one.","confidence":0.9},
        {"statement":"Fact two.","confidence":0.9},
        {"statement":"Fact three.","confidence":0.9}
      ]}"#,
    );
    let facts =
      extract_window_facts(&window, None, &extract, &config, 1_000, &system_clock())
        .await
        .unwrap();
    assert_eq!(facts.len(), 2);
  }

  #[tokio::test]
  async fn timeout_maps_to_extract_timeout() {
    let window = test_window();
    let extract: LlmFn = Arc::new(|_prompt| {
      Box::pin(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(String::new())
      })
    });
    let err = extract_window_facts(
      &window,
      None,
      &extract,
      &SemanticCompressionConfig::default(),
      10,
      &system_clock(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExtractError::Timeout(10)));
  }

  #[tokio::test]
  async fn failed_window_does_not_cancel_siblings() {
    let turns: Vec<ConversationTurn> = (0..4)
      .map(|i| ConversationTurn::new("user", format!("turn {i} about Alice")))
      .collect();
    let windows = create_windows(&turns, 2, 2, None);

    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let calls_in = calls.clone();
    let extract: LlmFn = Arc::new(move |_prompt| {
      let n = calls_in.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      Box::pin(async move {
        if n == 0 {
          anyhow::bail!("provider exploded")
        }
        Ok(r#"{"facts":[{"statement":"Alice said hello.","confidence":0.9}]}"#.to_owned())
      })
    });

    let (facts, errors) = extract_facts(
      &windows,
      None,
      &extract,
      &SemanticCompressionConfig::default(),
      1_000,
      &system_clock(),
    )
    .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(facts.len(), 1);
  }

  fn bare_fact(statement: &str, entities: &[&str], persons: &[&str]) -> AtomicFact {
    AtomicFact {
      id: Uuid::now_v7(),
      statement: statement.to_owned(),
      keywords: vec![],
      persons: persons.iter().map(|s| (*s).to_owned()).collect(),
      entities: entities.iter().map(|s| (*s).to_owned()).collect(),
      topic: None,
      timestamp: None,
      location: None,
      confidence: 0.9,
      entropy: None,
      extracted_at: chrono::Utc::now(),
      level: 0,
      parent_cluster_id: None,
      source_fact_ids: vec![],
      source_window_id: None,
      source_chunk_id: None,
      source_session_file: None,
    }
  }

  #[test]
  fn dedup_collapses_case_and_whitespace_variants() {
    let facts = vec![
      bare_fact("Alice works at Acme.", &["Acme"], &["Alice"]),
      bare_fact("alice  works at acme.", &["acme"], &["alice"]),
    ];
    let deduped = dedup_facts(facts);
    assert_eq!(deduped.len(), 1);
    // first occurrence wins
    assert_eq!(deduped[0].statement, "Alice works at Acme.");
  }

  #[test]
  fn dedup_keeps_facts_with_different_entities() {
    let facts = vec![
      bare_fact("Alice works at Acme.", &["Acme"], &["Alice"]),
      bare_fact("Alice works at Acme.", &["Globex"], &["Alice"]),
    ];
    assert_eq!(dedup_facts(facts).len(), 2);
  }

  #[test]
  fn dedup_is_idempotent() {
    let facts = vec![
      bare_fact("Alice works at Acme.", &["Acme"], &["Alice"]),
      bare_fact("ALICE WORKS AT ACME.", &["ACME"], &["ALICE"]),
      bare_fact("Bob joined Globex.", &["Globex"], &["Bob"]),
    ];
    let once = dedup_facts(facts);
    let twice = dedup_facts(once.clone());
    assert_eq!(once, twice);
  }
}

use chrono::{DateTime, Duration, Utc};
use chrono_humanize::HumanTime;
use serde::Serialize;

use crate::config::AdaptiveRetrievalConfig;
use crate::entropy::scan_entities;
use crate::fact::AtomicFact;
use atomem_shared::EngineError;

/// Queries longer than this are rejected outright.
const MAX_QUERY_CHARS: usize = 1000;

const STOP_WORDS: &[&str] = &[
  "the", "and", "for", "with", "that", "this", "what", "where", "when", "who", "whom", "which",
  "how", "why", "did", "does", "was", "were", "are", "is", "a", "an", "of", "to", "in", "on",
  "at", "by", "it", "its", "be", "been", "do", "has", "have", "had", "will", "would", "can",
  "could", "should", "you", "your", "my", "me", "i", "we", "our", "us", "they", "their", "them",
  "he", "she", "his", "her", "about", "from", "into", "over", "under", "tell", "show",
];

const TEMPORAL_WORDS: &[&str] = &[
  "recent", "lately", "yesterday", "today", "last", "this", "next", "ago", "before", "after",
  "when",
];

const REASONING_WORDS: &[&str] = &[
  "why", "how", "explain", "compare", "difference", "relationship", "cause", "effect", "reason",
  "analysis",
];

// ──────────────────────────────────────────────────
// Query analysis
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
  Simple,
  Moderate,
  Complex,
}

/// Deterministic, LLM-free breakdown of a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
  pub keywords: Vec<String>,
  /// Capitalised runs in the original query.
  pub entities: Vec<String>,
  pub temporal: bool,
  /// Up to three words following `about | regarding | concerning | related to`.
  pub topics: Vec<String>,
  pub requires_reasoning: bool,
  pub word_count: usize,
  pub complexity: QueryComplexity,
}

fn clean_word(word: &str) -> &str {
  word.trim_matches(|c: char| !c.is_alphanumeric())
}

fn topics_after_markers(words: &[&str]) -> Vec<String> {
  let mut topics = Vec::new();
  let mut i = 0;
  while i < words.len() {
    let marker_len = match words[i] {
      "about" | "regarding" | "concerning" => Some(1),
      "related" if words.get(i + 1) == Some(&"to") => Some(2),
      _ => None,
    };
    let Some(len) = marker_len else {
      i += 1;
      continue;
    };
    for word in words.iter().skip(i + len).take(3) {
      if !word.is_empty() {
        topics.push((*word).to_owned());
      }
    }
    i += len;
  }
  topics
}

/// Analyse a query and pick its complexity bucket. Empty and oversized
/// queries are invalid.
pub fn analyze_query(query: &str) -> Result<QueryAnalysis, EngineError> {
  let trimmed = query.trim();
  if trimmed.is_empty() {
    return Err(EngineError::QueryInvalid("empty query".to_owned()));
  }
  if trimmed.chars().count() > MAX_QUERY_CHARS {
    return Err(EngineError::QueryInvalid(format!(
      "query exceeds {MAX_QUERY_CHARS} characters"
    )));
  }

  let lowercase = trimmed.to_lowercase();
  let words: Vec<&str> = lowercase
    .split_whitespace()
    .map(clean_word)
    .filter(|w| !w.is_empty())
    .collect();
  let word_count = words.len();

  let keywords: Vec<String> = words
    .iter()
    .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
    .map(|w| (*w).to_owned())
    .collect();

  let mut entities = Vec::new();
  let mut seen_entities = std::collections::HashSet::new();
  for entity in scan_entities(trimmed) {
    if seen_entities.insert(entity.to_lowercase()) {
      entities.push(entity);
    }
  }
  let temporal = words.iter().any(|w| TEMPORAL_WORDS.contains(w));
  let requires_reasoning = words.iter().any(|w| REASONING_WORDS.contains(w));
  let topics = topics_after_markers(&words);

  let complexity = if requires_reasoning || word_count > 15 || !topics.is_empty() {
    QueryComplexity::Complex
  } else if word_count > 8 || entities.len() > 2 || temporal {
    QueryComplexity::Moderate
  } else {
    QueryComplexity::Simple
  };

  Ok(QueryAnalysis {
    keywords,
    entities,
    temporal,
    topics,
    requires_reasoning,
    word_count,
    complexity,
  })
}

// ──────────────────────────────────────────────────
// Strategy
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoringWeights {
  pub keyword: f64,
  pub entity: f64,
  pub topic: f64,
  pub temporal: f64,
  pub recency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStrategy {
  pub complexity: QueryComplexity,
  pub max_facts: usize,
  pub max_tokens: usize,
  pub prefer_consolidated: bool,
  pub weights: ScoringWeights,
}

/// Map a complexity bucket onto retrieval parameters. With adaptive
/// retrieval disabled every query runs the moderate row.
#[must_use]
pub fn strategy_for(
  complexity: QueryComplexity,
  config: &AdaptiveRetrievalConfig,
) -> RetrievalStrategy {
  let complexity = if config.enabled {
    complexity
  } else {
    QueryComplexity::Moderate
  };
  match complexity {
    QueryComplexity::Simple => RetrievalStrategy {
      complexity,
      max_facts: 5,
      max_tokens: config.simple_query_tokens,
      prefer_consolidated: config.prefer_consolidated,
      weights: ScoringWeights {
        keyword: 0.40,
        entity: 0.30,
        topic: 0.10,
        temporal: 0.10,
        recency: 0.10,
      },
    },
    QueryComplexity::Moderate => RetrievalStrategy {
      complexity,
      max_facts: 10,
      max_tokens: config.moderate_query_tokens,
      prefer_consolidated: config.prefer_consolidated,
      weights: ScoringWeights {
        keyword: 0.30,
        entity: 0.30,
        topic: 0.20,
        temporal: 0.10,
        recency: 0.10,
      },
    },
    QueryComplexity::Complex => RetrievalStrategy {
      complexity,
      max_facts: 20,
      max_tokens: config.complex_query_tokens,
      prefer_consolidated: false,
      weights: ScoringWeights {
        keyword: 0.25,
        entity: 0.25,
        topic: 0.25,
        temporal: 0.15,
        recency: 0.10,
      },
    },
  }
}

/// Restrict candidates to consolidated facts when the strategy asks for it
/// and any exist.
#[must_use]
pub fn filter_candidates(
  facts: Vec<AtomicFact>,
  strategy: &RetrievalStrategy,
) -> Vec<AtomicFact> {
  if strategy.prefer_consolidated && facts.iter().any(AtomicFact::is_consolidated) {
    facts.into_iter().filter(AtomicFact::is_consolidated).collect()
  } else {
    facts
  }
}

// ──────────────────────────────────────────────────
// Scoring
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ScoredFact {
  pub fact: AtomicFact,
  pub relevance: f64,
  pub reasons: Vec<String>,
}

fn fact_tokens(statement: &str, chars_per_token: usize) -> usize {
  statement.chars().count().div_ceil(chars_per_token.max(1))
}

fn score_fact(
  fact: &AtomicFact,
  analysis: &QueryAnalysis,
  weights: &ScoringWeights,
  now: DateTime<Utc>,
) -> (f64, Vec<String>) {
  let mut relevance = 0.0;
  let mut reasons = Vec::new();

  if !analysis.keywords.is_empty() {
    let statement = fact.statement.to_lowercase();
    let fact_keywords: Vec<String> = fact.keywords.iter().map(|k| k.to_lowercase()).collect();
    let matched: Vec<&String> = analysis
      .keywords
      .iter()
      .filter(|kw| fact_keywords.iter().any(|fk| fk == *kw) || statement.contains(kw.as_str()))
      .collect();
    if !matched.is_empty() {
      relevance += matched.len() as f64 / analysis.keywords.len() as f64 * weights.keyword;
      reasons.push(format!(
        "matches keywords: {}",
        matched.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
      ));
    }
  }

  let fact_identifiers = fact.known_identifiers();
  let matched_entities: Vec<&String> = analysis
    .entities
    .iter()
    .filter(|e| fact_identifiers.contains(&e.to_lowercase()))
    .collect();
  if !matched_entities.is_empty() {
    relevance +=
      matched_entities.len() as f64 / analysis.entities.len().max(1) as f64 * weights.entity;
    reasons.push(format!(
      "mentions: {}",
      matched_entities.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    ));
  }

  if let Some(topic) = &fact.topic {
    let folded = topic.to_lowercase();
    if analysis.topics.iter().any(|t| folded.contains(&t.to_lowercase())) {
      relevance += weights.topic;
      reasons.push(format!("topic match: {topic}"));
    }
  }

  if analysis.temporal
    && let Some(timestamp) = fact.timestamp
  {
    let age = now.signed_duration_since(timestamp);
    if age <= Duration::days(7) {
      relevance += weights.temporal;
      reasons.push("recent fact".to_owned());
    } else if age <= Duration::days(30) {
      relevance += weights.temporal * 0.5;
      reasons.push("fact from the last month".to_owned());
    }
  }

  let age = now.signed_duration_since(fact.extracted_at);
  let age_days = age.num_seconds() as f64 / 86_400.0;
  let recency = (1.0 - age_days / 90.0).max(0.0);
  relevance += recency * weights.recency;
  if recency > 0.0 && age <= Duration::days(7) {
    reasons.push(format!("extracted {}", HumanTime::from(-age)));
  }

  (relevance, reasons)
}

// ──────────────────────────────────────────────────
// Selection
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalMetadata {
  /// Token estimate for the returned facts.
  pub total_tokens: usize,
  pub candidate_count: usize,
  /// Tokens for every stored fact divided by tokens returned; how much the
  /// budget saved over sending everything.
  pub compression_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
  pub facts: Vec<ScoredFact>,
  pub strategy: RetrievalStrategy,
  pub analysis: QueryAnalysis,
  pub metadata: RetrievalMetadata,
}

/// Score all candidates, then greedily take the best until either the fact
/// cap or the token budget stops us. Parents of selected facts are appended
/// afterwards when `include_parents` is on and the limits still allow.
#[must_use]
pub fn select_facts(
  candidates: Vec<AtomicFact>,
  all_facts: &[AtomicFact],
  analysis: QueryAnalysis,
  strategy: RetrievalStrategy,
  config: &AdaptiveRetrievalConfig,
  now: DateTime<Utc>,
) -> RetrievalResult {
  let candidate_count = candidates.len();
  // Budget savings are reported against the whole fact base, not just the
  // post-filter candidates.
  let all_tokens: usize = all_facts
    .iter()
    .map(|f| fact_tokens(&f.statement, config.chars_per_token))
    .sum();

  let mut scored: Vec<ScoredFact> = candidates
    .into_iter()
    .map(|fact| {
      let (relevance, reasons) = score_fact(&fact, &analysis, &strategy.weights, now);
      ScoredFact { fact, relevance, reasons }
    })
    .collect();
  scored.sort_by(|a, b| {
    b.relevance
      .partial_cmp(&a.relevance)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut selected: Vec<ScoredFact> = Vec::new();
  let mut total_tokens = 0usize;
  for candidate in scored {
    if selected.len() >= strategy.max_facts {
      break;
    }
    let tokens = fact_tokens(&candidate.fact.statement, config.chars_per_token);
    if total_tokens + tokens > strategy.max_tokens {
      break;
    }
    total_tokens += tokens;
    selected.push(candidate);
  }

  if config.include_parents {
    let selected_ids: Vec<_> = selected.iter().map(|s| s.fact.id).collect();
    for id in selected_ids {
      if selected.len() >= strategy.max_facts {
        break;
      }
      let Some(parent) = all_facts
        .iter()
        .find(|p| p.source_fact_ids.contains(&id))
      else {
        continue;
      };
      if selected.iter().any(|s| s.fact.id == parent.id) {
        continue;
      }
      let tokens = fact_tokens(&parent.statement, config.chars_per_token);
      if total_tokens + tokens > strategy.max_tokens {
        continue;
      }
      total_tokens += tokens;
      selected.push(ScoredFact {
        fact: parent.clone(),
        relevance: 0.5,
        reasons: vec!["parent fact for context".to_owned()],
      });
    }
  }

  let compression_ratio = if total_tokens == 0 {
    0.0
  } else {
    all_tokens as f64 / total_tokens as f64
  };

  RetrievalResult {
    facts: selected,
    strategy,
    analysis,
    metadata: RetrievalMetadata {
      total_tokens,
      candidate_count,
      compression_ratio,
    },
  }
}

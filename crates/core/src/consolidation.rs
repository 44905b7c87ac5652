use std::fmt::Write;
use std::time::Duration;

use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::extraction::LlmFn;
use crate::fact::{AtomicFact, FactCluster, intersect_preserving_case, union_preserving_case};
use atomem_shared::{ConsolidateError, SharedClock};

// ──────────────────────────────────────────────────
// Similarity
// ──────────────────────────────────────────────────

const ENTITY_WEIGHT: f64 = 0.3;
const PERSON_WEIGHT: f64 = 0.3;
const TOPIC_WEIGHT: f64 = 0.2;
const TEMPORAL_WEIGHT: f64 = 0.2;

fn jaccard(a: &[String], b: &[String]) -> f64 {
  let a: std::collections::HashSet<String> = a.iter().map(|s| s.to_lowercase()).collect();
  let b: std::collections::HashSet<String> = b.iter().map(|s| s.to_lowercase()).collect();
  let union = a.union(&b).count();
  if union == 0 {
    return 0.0;
  }
  a.intersection(&b).count() as f64 / union as f64
}

/// Weighted similarity over the enabled clustering dimensions, in [0, 1].
///
/// A dimension participates only when it is enabled *and* at least one side
/// has content for it (both sides, for the temporal dimension); dimensions
/// that participate contribute their weight to the normaliser. With no
/// participating dimension the similarity is 0.
#[must_use]
pub fn similarity(a: &AtomicFact, b: &AtomicFact, config: &ConsolidationConfig) -> f64 {
  let mut contribution = 0.0;
  let mut normaliser = 0.0;

  if config.entity_clustering {
    if !a.entities.is_empty() || !b.entities.is_empty() {
      normaliser += ENTITY_WEIGHT;
      contribution += ENTITY_WEIGHT * jaccard(&a.entities, &b.entities);
    }
    if !a.persons.is_empty() || !b.persons.is_empty() {
      normaliser += PERSON_WEIGHT;
      contribution += PERSON_WEIGHT * jaccard(&a.persons, &b.persons);
    }
  }

  if config.topic_clustering
    && (a.topic.is_some() || b.topic.is_some())
  {
    normaliser += TOPIC_WEIGHT;
    let equal = match (&a.topic, &b.topic) {
      (Some(ta), Some(tb)) => ta.eq_ignore_ascii_case(tb),
      _ => false,
    };
    if equal {
      contribution += TOPIC_WEIGHT;
    }
  }

  if config.temporal_clustering
    && let (Some(ta), Some(tb)) = (a.timestamp, b.timestamp)
  {
    normaliser += TEMPORAL_WEIGHT;
    let delta_ms = (ta - tb).num_milliseconds().unsigned_abs();
    if delta_ms <= config.temporal_window_ms {
      let proximity = 1.0 - delta_ms as f64 / config.temporal_window_ms as f64;
      contribution += TEMPORAL_WEIGHT * proximity;
    }
  }

  if normaliser == 0.0 {
    0.0
  } else {
    contribution / normaliser
  }
}

fn mean_pairwise_similarity(facts: &[AtomicFact], config: &ConsolidationConfig) -> f64 {
  if facts.len() < 2 {
    return 1.0;
  }
  let mut total = 0.0;
  let mut pairs = 0usize;
  for i in 0..facts.len() {
    for j in (i + 1)..facts.len() {
      total += similarity(&facts[i], &facts[j], config);
      pairs += 1;
    }
  }
  total / pairs as f64
}

// ──────────────────────────────────────────────────
// Clustering
// ──────────────────────────────────────────────────

fn modal_topic(facts: &[AtomicFact]) -> Option<String> {
  let mut counts: Vec<(String, usize, &str)> = Vec::new();
  for fact in facts {
    let Some(topic) = &fact.topic else { continue };
    let folded = topic.to_lowercase();
    match counts.iter_mut().find(|(key, _, _)| *key == folded) {
      Some((_, count, _)) => *count += 1,
      None => counts.push((folded, 1, topic)),
    }
  }
  // Ties resolve to the earliest topic seen.
  let mut best: Option<(usize, &str)> = None;
  for (_, count, original) in &counts {
    if best.is_none_or(|(c, _)| *count > c) {
      best = Some((*count, *original));
    }
  }
  best.map(|(_, topic)| topic.to_owned())
}

fn build_cluster(facts: Vec<AtomicFact>, config: &ConsolidationConfig) -> FactCluster {
  let entity_sets: Vec<&Vec<String>> = facts.iter().map(|f| &f.entities).collect();
  let person_sets: Vec<&Vec<String>> = facts.iter().map(|f| &f.persons).collect();

  let mut stamps: Vec<_> = facts.iter().filter_map(|f| f.timestamp).collect();
  stamps.sort();
  let time_range = match (stamps.first(), stamps.last()) {
    (Some(first), Some(last)) => Some((*first, *last)),
    _ => None,
  };

  // Coherence is always reported under the default dimension set, so scores
  // stay comparable across configurations.
  let coherence_score = mean_pairwise_similarity(&facts, &ConsolidationConfig::default());

  FactCluster {
    id: Uuid::now_v7(),
    common_entities: intersect_preserving_case(&entity_sets),
    common_persons: intersect_preserving_case(&person_sets),
    topic: modal_topic(&facts),
    time_range,
    coherence_score,
    facts,
  }
}

/// Greedy seed-based clustering over facts of one level.
///
/// Facts are visited in ascending timestamp order (undated last). Each
/// unassigned fact seeds a cluster; remaining unassigned facts join when
/// their mean similarity to the current members reaches the threshold, until
/// the cluster is full. Clusters below the minimum size are discarded.
#[must_use]
pub fn cluster_facts(facts: &[AtomicFact], config: &ConsolidationConfig) -> Vec<FactCluster> {
  let mut ordered: Vec<&AtomicFact> = facts.iter().collect();
  ordered.sort_by_key(|f| (f.timestamp.is_none(), f.timestamp));

  let mut assigned = vec![false; ordered.len()];
  let mut clusters = Vec::new();

  for seed_idx in 0..ordered.len() {
    if assigned[seed_idx] {
      continue;
    }
    assigned[seed_idx] = true;
    let mut members: Vec<AtomicFact> = vec![ordered[seed_idx].clone()];

    for candidate_idx in (seed_idx + 1)..ordered.len() {
      if members.len() >= config.max_facts_per_cluster {
        break;
      }
      if assigned[candidate_idx] {
        continue;
      }
      let candidate = ordered[candidate_idx];
      let mean: f64 = members
        .iter()
        .map(|member| similarity(candidate, member, config))
        .sum::<f64>()
        / members.len() as f64;
      if mean >= config.similarity_threshold {
        assigned[candidate_idx] = true;
        members.push(candidate.clone());
      }
    }

    if members.len() >= config.min_facts_for_cluster {
      clusters.push(build_cluster(members, config));
    }
  }

  clusters
}

// ──────────────────────────────────────────────────
// Consolidation prompt
// ──────────────────────────────────────────────────

const CONSOLIDATION_SYSTEM_PROMPT: &str = "\
You are consolidating related memory facts into one higher-level fact.

Write a single statement that captures the essence of all the facts below:
1. It must be self-contained and more abstract than any single source fact.
2. Preserve the entities, relationships and outcomes the sources agree on.
3. No pronouns, no relative time references.

Respond with the statement only — no JSON, no commentary, no quotation marks.";

fn build_consolidation_prompt(cluster: &FactCluster) -> String {
  let mut prompt = String::from(CONSOLIDATION_SYSTEM_PROMPT);
  let _ = write!(prompt, "\n\n== Facts ==\n");
  for fact in &cluster.facts {
    let _ = writeln!(prompt, "- {}", fact.statement);
  }
  prompt
}

// ──────────────────────────────────────────────────
// Cluster consolidation
// ──────────────────────────────────────────────────

/// Ask the consolidation LLM for one summary statement and build the
/// higher-level fact for this cluster.
///
/// The new fact unions the sources' keyword/person/entity sets, averages
/// their confidence and sits one level above the highest source.
pub async fn consolidate_cluster(
  cluster: &FactCluster,
  consolidate_fn: &LlmFn,
  timeout_ms: u64,
  clock: &SharedClock,
) -> Result<AtomicFact, ConsolidateError> {
  let prompt = build_consolidation_prompt(cluster);

  let response =
    tokio::time::timeout(Duration::from_millis(timeout_ms), (consolidate_fn)(prompt))
      .await
      .map_err(|_| ConsolidateError::Timeout(timeout_ms))?
      .map_err(|err| ConsolidateError::Provider(err.to_string()))?;

  let statement = response.trim();
  if statement.is_empty() {
    return Err(ConsolidateError::BadResponse("empty statement".to_owned()));
  }

  let sources = &cluster.facts;
  let confidence =
    sources.iter().map(|f| f.confidence).sum::<f64>() / sources.len() as f64;
  let location = sources
    .iter()
    .find_map(|f| f.location.as_ref().filter(|l| !l.is_empty()).cloned());

  Ok(AtomicFact {
    id: Uuid::now_v7(),
    statement: statement.to_owned(),
    keywords: union_preserving_case(sources.iter().map(|f| &f.keywords)),
    persons: union_preserving_case(sources.iter().map(|f| &f.persons)),
    entities: union_preserving_case(sources.iter().map(|f| &f.entities)),
    topic: cluster.topic.clone(),
    timestamp: cluster.time_range.map(|(start, _)| start),
    location,
    confidence,
    entropy: None,
    extracted_at: (clock)(),
    level: cluster.max_level() + 1,
    parent_cluster_id: Some(cluster.id),
    source_fact_ids: cluster.member_ids(),
    source_window_id: None,
    source_chunk_id: None,
    source_session_file: None,
  })
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration as ChronoDuration, TimeZone, Utc};

  use super::*;
  use atomem_shared::system_clock;

  fn fact(
    statement: &str,
    entities: &[&str],
    persons: &[&str],
    topic: Option<&str>,
    day: Option<i64>,
  ) -> AtomicFact {
    AtomicFact {
      id: Uuid::now_v7(),
      statement: statement.to_owned(),
      keywords: vec!["work".to_owned()],
      persons: persons.iter().map(|s| (*s).to_owned()).collect(),
      entities: entities.iter().map(|s| (*s).to_owned()).collect(),
      topic: topic.map(ToOwned::to_owned),
      timestamp: day.map(|d| {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + ChronoDuration::days(d)
      }),
      location: None,
      confidence: 0.9,
      entropy: None,
      extracted_at: Utc::now(),
      level: 0,
      parent_cluster_id: None,
      source_fact_ids: vec![],
      source_window_id: None,
      source_chunk_id: None,
      source_session_file: None,
    }
  }

  #[test]
  fn self_similarity_is_one() {
    let a = fact("Alice works at Acme.", &["Acme"], &["Alice"], Some("work"), Some(0));
    let config = ConsolidationConfig::default();
    assert!((similarity(&a, &a, &config) - 1.0).abs() < 1e-9);
  }

  #[test]
  fn similarity_is_symmetric_and_bounded() {
    let a = fact("Alice works at Acme.", &["Acme"], &["Alice"], Some("work"), Some(0));
    let b = fact("Bob joined Globex.", &["Globex"], &["Bob"], Some("career"), Some(3));
    let config = ConsolidationConfig::default();
    let ab = similarity(&a, &b, &config);
    let ba = similarity(&b, &a, &config);
    assert!((ab - ba).abs() < 1e-12);
    assert!((0.0..=1.0).contains(&ab));
  }

  #[test]
  fn no_enabled_dimensions_score_zero() {
    let a = fact("Alice works at Acme.", &["Acme"], &["Alice"], Some("work"), Some(0));
    let config = ConsolidationConfig {
      topic_clustering: false,
      entity_clustering: false,
      temporal_clustering: false,
      ..ConsolidationConfig::default()
    };
    assert_eq!(similarity(&a, &a, &config), 0.0);
  }

  #[test]
  fn temporal_proximity_decays_within_window() {
    let config = ConsolidationConfig {
      topic_clustering: false,
      entity_clustering: false,
      ..ConsolidationConfig::default()
    };
    let a = fact("a", &[], &[], None, Some(0));
    let near = fact("b", &[], &[], None, Some(1));
    let far = fact("c", &[], &[], None, Some(30));
    assert!(similarity(&a, &near, &config) > 0.8);
    assert_eq!(similarity(&a, &far, &config), 0.0);
  }

  #[test]
  fn related_facts_cluster_together() {
    let facts = vec![
      fact(
        "Alice presented the roadmap at Acme Corporation.",
        &["Acme Corporation"],
        &["Alice"],
        Some("work"),
        Some(0),
      ),
      fact(
        "Alice hired two engineers at Acme Corporation.",
        &["Acme Corporation"],
        &["Alice"],
        Some("work"),
        Some(1),
      ),
      fact(
        "Alice closed a partnership for Acme Corporation.",
        &["Acme Corporation"],
        &["Alice"],
        Some("work"),
        Some(2),
      ),
    ];
    let clusters = cluster_facts(&facts, &ConsolidationConfig::default());
    assert_eq!(clusters.len(), 1);
    let cluster = &clusters[0];
    assert_eq!(cluster.facts.len(), 3);
    assert_eq!(cluster.common_persons, vec!["Alice"]);
    assert_eq!(cluster.common_entities, vec!["Acme Corporation"]);
    assert_eq!(cluster.topic.as_deref(), Some("work"));
    assert!(cluster.coherence_score > 0.5);
    let (start, end) = cluster.time_range.unwrap();
    assert!(start < end);
  }

  #[test]
  fn small_groups_are_discarded() {
    let facts = vec![
      fact("Alice works at Acme.", &["Acme"], &["Alice"], Some("work"), Some(0)),
      fact("Alice likes Acme.", &["Acme"], &["Alice"], Some("work"), Some(1)),
    ];
    // default minimum cluster size is 3
    assert!(cluster_facts(&facts, &ConsolidationConfig::default()).is_empty());
  }

  #[test]
  fn unrelated_facts_do_not_cluster() {
    let facts = vec![
      fact("Alice works at Acme.", &["Acme"], &["Alice"], Some("work"), Some(0)),
      fact("Bob plays chess.", &["Chess Club"], &["Bob"], Some("hobby"), Some(50)),
      fact("Carol moved to Oslo.", &["Oslo"], &["Carol"], Some("life"), Some(100)),
    ];
    assert!(cluster_facts(&facts, &ConsolidationConfig::default()).is_empty());
  }

  #[test]
  fn cluster_cap_is_respected() {
    let config = ConsolidationConfig {
      max_facts_per_cluster: 3,
      ..ConsolidationConfig::default()
    };
    let facts: Vec<AtomicFact> = (0..5)
      .map(|i| {
        fact(
          &format!("Alice did thing {i} at Acme."),
          &["Acme"],
          &["Alice"],
          Some("work"),
          Some(i),
        )
      })
      .collect();
    let clusters = cluster_facts(&facts, &config);
    assert!(clusters.iter().all(|c| c.facts.len() <= 3));
  }

  #[tokio::test]
  async fn consolidation_builds_the_level_above() {
    let facts = vec![
      {
        let mut f = fact(
          "Alice presented at Acme Corporation.",
          &["Acme Corporation"],
          &["Alice"],
          Some("work"),
          Some(0),
        );
        f.confidence = 0.9;
        f
      },
      {
        let mut f = fact(
          "Alice hired engineers at Acme Corporation.",
          &["Acme Corporation"],
          &["Alice"],
          Some("work"),
          Some(1),
        );
        f.confidence = 0.95;
        f
      },
      {
        let mut f = fact(
          "Alice closed a deal at Acme Corporation.",
          &["Acme Corporation"],
          &["Alice"],
          Some("work"),
          Some(2),
        );
        f.confidence = 0.85;
        f
      },
    ];
    let clusters = cluster_facts(&facts, &ConsolidationConfig::default());
    assert_eq!(clusters.len(), 1);

    let consolidate: LlmFn = Arc::new(|_prompt| {
      Box::pin(async {
        Ok("Alice drove major initiatives at Acme Corporation in early March 2026.".to_owned())
      })
    });
    let consolidated =
      consolidate_cluster(&clusters[0], &consolidate, 1_000, &system_clock())
        .await
        .unwrap();

    assert_eq!(consolidated.level, 1);
    assert_eq!(consolidated.parent_cluster_id, Some(clusters[0].id));
    assert_eq!(consolidated.source_fact_ids.len(), 3);
    assert!((consolidated.confidence - 0.9).abs() < 1e-9);
    assert!(consolidated.persons.iter().any(|p| p == "Alice"));
    assert!(consolidated.entities.iter().any(|e| e == "Acme Corporation"));
    assert_eq!(consolidated.timestamp, clusters[0].time_range.map(|(s, _)| s));
  }

  #[tokio::test]
  async fn blank_statement_is_a_bad_response() {
    let facts = vec![
      fact("a", &["Acme"], &["Alice"], Some("work"), Some(0)),
      fact("b", &["Acme"], &["Alice"], Some("work"), Some(1)),
      fact("c", &["Acme"], &["Alice"], Some("work"), Some(2)),
    ];
    let clusters = cluster_facts(&facts, &ConsolidationConfig::default());
    let consolidate: LlmFn = Arc::new(|_prompt| Box::pin(async { Ok("   \n".to_owned()) }));
    let err = consolidate_cluster(&clusters[0], &consolidate, 1_000, &system_clock())
      .await
      .unwrap_err();
    assert!(matches!(err, ConsolidateError::BadResponse(_)));
  }
}

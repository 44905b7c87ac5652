use chrono::{DateTime, Utc};
use atomem_entities::atomic_fact;
use atomem_shared::StoreError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ──────────────────────────────────────────────────
// Domain model
// ──────────────────────────────────────────────────

/// A self-contained statement extracted from conversation, or a consolidated
/// abstraction over a cluster of lower-level facts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AtomicFact {
  pub id: Uuid,
  pub statement: String,
  pub keywords: Vec<String>,
  pub persons: Vec<String>,
  pub entities: Vec<String>,
  pub topic: Option<String>,
  pub timestamp: Option<DateTime<Utc>>,
  pub location: Option<String>,
  pub confidence: f64,
  pub entropy: Option<f64>,
  pub extracted_at: DateTime<Utc>,
  /// 0 = extracted from transcript; k > 0 = consolidated from level < k.
  pub level: i32,
  pub parent_cluster_id: Option<Uuid>,
  /// Ids of the facts the parent cluster contained. Set iff `level > 0`.
  pub source_fact_ids: Vec<Uuid>,
  pub source_window_id: Option<Uuid>,
  pub source_chunk_id: Option<String>,
  pub source_session_file: Option<String>,
}

impl AtomicFact {
  pub fn from_model(model: atomic_fact::Model) -> Result<Self, StoreError> {
    let corrupt = |err: serde_json::Error| StoreError::Corruption(err.to_string());
    Ok(Self {
      id: model.id,
      statement: model.statement,
      keywords: serde_json::from_value(model.keywords).map_err(corrupt)?,
      persons: serde_json::from_value(model.persons).map_err(corrupt)?,
      entities: serde_json::from_value(model.entities).map_err(corrupt)?,
      topic: model.topic,
      timestamp: model.timestamp.map(|dt| dt.with_timezone(&Utc)),
      location: model.location,
      confidence: model.confidence,
      entropy: model.entropy,
      extracted_at: model.extracted_at.with_timezone(&Utc),
      level: model.level,
      parent_cluster_id: model.parent_cluster_id,
      source_fact_ids: model
        .source_fact_ids
        .map(serde_json::from_value)
        .transpose()
        .map_err(corrupt)?
        .unwrap_or_default(),
      source_window_id: model.source_window_id,
      source_chunk_id: model.source_chunk_id,
      source_session_file: model.source_session_file,
    })
  }

  pub fn to_model(&self) -> Result<atomic_fact::Model, StoreError> {
    let corrupt = |err: serde_json::Error| StoreError::Corruption(err.to_string());
    Ok(atomic_fact::Model {
      id: self.id,
      statement: self.statement.clone(),
      keywords: serde_json::to_value(&self.keywords).map_err(corrupt)?,
      persons: serde_json::to_value(&self.persons).map_err(corrupt)?,
      entities: serde_json::to_value(&self.entities).map_err(corrupt)?,
      topic: self.topic.clone(),
      timestamp: self.timestamp.map(Into::into),
      location: self.location.clone(),
      source_window_id: self.source_window_id,
      source_chunk_id: self.source_chunk_id.clone(),
      source_session_file: self.source_session_file.clone(),
      confidence: self.confidence,
      entropy: self.entropy,
      extracted_at: self.extracted_at.into(),
      level: self.level,
      parent_cluster_id: self.parent_cluster_id,
      source_fact_ids: if self.source_fact_ids.is_empty() {
        None
      } else {
        Some(serde_json::to_value(&self.source_fact_ids).map_err(corrupt)?)
      },
    })
  }

  /// Case-folded union of `entities` and `persons`, the identifier set used
  /// for novelty comparison.
  #[must_use]
  pub fn known_identifiers(&self) -> Vec<String> {
    self
      .entities
      .iter()
      .chain(self.persons.iter())
      .map(|s| s.to_lowercase())
      .collect()
  }

  /// True once this fact summarises others.
  #[must_use]
  pub const fn is_consolidated(&self) -> bool {
    self.level > 0
  }
}

// ──────────────────────────────────────────────────
// Clusters (transient)
// ──────────────────────────────────────────────────

/// A group of related facts awaiting consolidation. Never persisted as a
/// row; only its id survives, in the consolidated fact's `parent_cluster_id`.
#[derive(Debug, Clone)]
pub struct FactCluster {
  pub id: Uuid,
  pub facts: Vec<AtomicFact>,
  pub common_entities: Vec<String>,
  pub common_persons: Vec<String>,
  pub topic: Option<String>,
  pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
  /// Mean pairwise similarity between members.
  pub coherence_score: f64,
}

impl FactCluster {
  #[must_use]
  pub fn member_ids(&self) -> Vec<Uuid> {
    self.facts.iter().map(|f| f.id).collect()
  }

  /// Highest level among members; the consolidated fact sits one above.
  #[must_use]
  pub fn max_level(&self) -> i32 {
    self.facts.iter().map(|f| f.level).max().unwrap_or(0)
  }
}

// ──────────────────────────────────────────────────
// Case-insensitive set helpers
// ──────────────────────────────────────────────────

/// Union preserving the first-seen casing of each value.
#[must_use]
pub(crate) fn union_preserving_case<'a, I>(sets: I) -> Vec<String>
where
  I: IntoIterator<Item = &'a Vec<String>>,
{
  let mut seen = std::collections::HashSet::new();
  let mut out = Vec::new();
  for set in sets {
    for value in set {
      if seen.insert(value.to_lowercase()) {
        out.push(value.clone());
      }
    }
  }
  out
}

/// Intersection across all sets, preserving casing from the first set.
#[must_use]
pub(crate) fn intersect_preserving_case(sets: &[&Vec<String>]) -> Vec<String> {
  let Some((first, rest)) = sets.split_first() else {
    return Vec::new();
  };
  first
    .iter()
    .filter(|value| {
      let folded = value.to_lowercase();
      rest
        .iter()
        .all(|set| set.iter().any(|v| v.to_lowercase() == folded))
    })
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fact_with_sets(entities: &[&str], persons: &[&str]) -> AtomicFact {
    AtomicFact {
      id: Uuid::now_v7(),
      statement: "Alice works at Acme Corporation.".to_owned(),
      keywords: vec![],
      persons: persons.iter().map(|s| (*s).to_owned()).collect(),
      entities: entities.iter().map(|s| (*s).to_owned()).collect(),
      topic: None,
      timestamp: None,
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
  fn model_roundtrip_preserves_sets() {
    let fact = fact_with_sets(&["Acme Corporation"], &["Alice"]);
    let restored = AtomicFact::from_model(fact.to_model().unwrap()).unwrap();
    assert_eq!(restored, fact);
  }

  #[test]
  fn union_is_case_insensitive_and_keeps_first_casing() {
    let a = vec!["Acme".to_owned(), "Globex".to_owned()];
    let b = vec!["acme".to_owned(), "Initech".to_owned()];
    let union = union_preserving_case([&a, &b]);
    assert_eq!(union, vec!["Acme", "Globex", "Initech"]);
  }

  #[test]
  fn intersection_requires_membership_in_every_set() {
    let a = vec!["Alice".to_owned(), "Bob".to_owned()];
    let b = vec!["alice".to_owned()];
    let c = vec!["ALICE".to_owned(), "Carol".to_owned()];
    assert_eq!(intersect_preserving_case(&[&a, &b, &c]), vec!["Alice"]);
  }

  #[test]
  fn known_identifiers_fold_case() {
    let fact = fact_with_sets(&["Acme Corporation"], &["Alice"]);
    assert_eq!(
      fact.known_identifiers(),
      vec!["acme corporation", "alice"]
    );
  }
}

use serde::{Deserialize, Serialize};

use atomem_shared::EngineError;

/// Seven days, the default temporal clustering window.
const DEFAULT_TEMPORAL_WINDOW_MS: u64 = 7 * 24 * 60 * 60 * 1000;

// ──────────────────────────────────────────────────
// Semantic compression (windowing + extraction)
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticCompressionConfig {
  pub enabled: bool,
  /// Turns per window.
  pub window_size: usize,
  /// Step between window start positions. Overlap is `window_size - stride`.
  pub stride: usize,
  /// Minimum entropy for a window to reach the extractor. Ties keep.
  pub entropy_threshold: f64,
  pub entity_weight: f64,
  pub divergence_weight: f64,
  /// Concurrent extractor LLM calls.
  pub max_parallel_workers: usize,
  pub max_facts_per_window: usize,
  /// Facts below this confidence are dropped at extraction time.
  pub min_confidence: f64,
}

impl Default for SemanticCompressionConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      window_size: 10,
      stride: 5,
      entropy_threshold: 0.3,
      entity_weight: 0.5,
      divergence_weight: 0.5,
      max_parallel_workers: 4,
      max_facts_per_window: 20,
      min_confidence: 0.7,
    }
  }
}

// ──────────────────────────────────────────────────
// Consolidation
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
  pub enabled: bool,
  pub min_facts_for_cluster: usize,
  pub max_facts_per_cluster: usize,
  /// Mean similarity a candidate must reach against current members.
  pub similarity_threshold: f64,
  pub max_consolidation_level: i32,
  pub temporal_window_ms: u64,
  /// Gates the topic dimension of the similarity function.
  pub topic_clustering: bool,
  /// Gates the entity and person dimensions.
  pub entity_clustering: bool,
  /// Gates the temporal dimension.
  pub temporal_clustering: bool,
}

impl Default for ConsolidationConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      min_facts_for_cluster: 3,
      max_facts_per_cluster: 10,
      similarity_threshold: 0.6,
      max_consolidation_level: 3,
      temporal_window_ms: DEFAULT_TEMPORAL_WINDOW_MS,
      topic_clustering: true,
      entity_clustering: true,
      temporal_clustering: true,
    }
  }
}

// ──────────────────────────────────────────────────
// Adaptive retrieval
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveRetrievalConfig {
  pub enabled: bool,
  pub simple_query_tokens: usize,
  pub moderate_query_tokens: usize,
  pub complex_query_tokens: usize,
  /// Restrict simple/moderate queries to consolidated facts when any exist.
  pub prefer_consolidated: bool,
  /// Append parent facts of selected facts when the budget allows.
  pub include_parents: bool,
  /// Token estimation divisor: `tokens = ceil(chars / chars_per_token)`.
  pub chars_per_token: usize,
}

impl Default for AdaptiveRetrievalConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      simple_query_tokens: 500,
      moderate_query_tokens: 1500,
      complex_query_tokens: 3000,
      prefer_consolidated: true,
      include_parents: true,
      chars_per_token: 4,
    }
  }
}

// ──────────────────────────────────────────────────
// Pipeline
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub compression: SemanticCompressionConfig,
  pub consolidation: ConsolidationConfig,
  pub retrieval: AdaptiveRetrievalConfig,
  /// Run consolidation on a timer while the pipeline is alive.
  pub background_consolidation: bool,
  pub consolidation_interval_ms: u64,
  /// Per-call LLM timeout applied to extraction and consolidation.
  pub llm_timeout_ms: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      compression: SemanticCompressionConfig::default(),
      consolidation: ConsolidationConfig::default(),
      retrieval: AdaptiveRetrievalConfig::default(),
      background_consolidation: false,
      consolidation_interval_ms: 60 * 60 * 1000,
      llm_timeout_ms: 30_000,
    }
  }
}

fn unit_interval(name: &str, value: f64) -> Result<(), EngineError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(EngineError::ConfigInvalid(format!(
      "{name} must be within [0, 1], got {value}"
    )))
  }
}

impl PipelineConfig {
  /// Validate every field once, at pipeline construction. The configuration
  /// is immutable afterwards.
  pub fn validate(&self) -> Result<(), EngineError> {
    let c = &self.compression;
    if c.window_size == 0 {
      return Err(EngineError::ConfigInvalid("window_size must be >= 1".into()));
    }
    if c.stride == 0 {
      return Err(EngineError::ConfigInvalid("stride must be >= 1".into()));
    }
    unit_interval("entropy_threshold", c.entropy_threshold)?;
    unit_interval("entity_weight", c.entity_weight)?;
    unit_interval("divergence_weight", c.divergence_weight)?;
    if (c.entity_weight + c.divergence_weight - 1.0).abs() > 1e-9 {
      return Err(EngineError::ConfigInvalid(
        "entity_weight and divergence_weight must sum to 1".into(),
      ));
    }
    if c.max_parallel_workers == 0 {
      return Err(EngineError::ConfigInvalid(
        "max_parallel_workers must be >= 1".into(),
      ));
    }
    if c.max_facts_per_window == 0 {
      return Err(EngineError::ConfigInvalid(
        "max_facts_per_window must be >= 1".into(),
      ));
    }
    unit_interval("min_confidence", c.min_confidence)?;

    let k = &self.consolidation;
    if k.min_facts_for_cluster < 2 {
      return Err(EngineError::ConfigInvalid(
        "min_facts_for_cluster must be >= 2".into(),
      ));
    }
    if k.max_facts_per_cluster < k.min_facts_for_cluster {
      return Err(EngineError::ConfigInvalid(
        "max_facts_per_cluster must be >= min_facts_for_cluster".into(),
      ));
    }
    unit_interval("similarity_threshold", k.similarity_threshold)?;
    if k.max_consolidation_level < 1 {
      return Err(EngineError::ConfigInvalid(
        "max_consolidation_level must be >= 1".into(),
      ));
    }
    if k.temporal_window_ms == 0 {
      return Err(EngineError::ConfigInvalid(
        "temporal_window_ms must be > 0".into(),
      ));
    }

    let r = &self.retrieval;
    for (name, tokens) in [
      ("simple_query_tokens", r.simple_query_tokens),
      ("moderate_query_tokens", r.moderate_query_tokens),
      ("complex_query_tokens", r.complex_query_tokens),
    ] {
      if tokens == 0 {
        return Err(EngineError::ConfigInvalid(format!("{name} must be > 0")));
      }
    }
    if r.chars_per_token == 0 {
      return Err(EngineError::ConfigInvalid("chars_per_token must be > 0".into()));
    }

    if self.consolidation_interval_ms == 0 {
      return Err(EngineError::ConfigInvalid(
        "consolidation_interval_ms must be > 0".into(),
      ));
    }
    if self.llm_timeout_ms == 0 {
      return Err(EngineError::ConfigInvalid("llm_timeout_ms must be > 0".into()));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    assert!(PipelineConfig::default().validate().is_ok());
  }

  #[test]
  fn rejects_zero_window_size() {
    let mut config = PipelineConfig::default();
    config.compression.window_size = 0;
    assert!(matches!(
      config.validate(),
      Err(EngineError::ConfigInvalid(_))
    ));
  }

  #[test]
  fn rejects_weights_not_summing_to_one() {
    let mut config = PipelineConfig::default();
    config.compression.entity_weight = 0.7;
    config.compression.divergence_weight = 0.5;
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_cluster_bounds_inversion() {
    let mut config = PipelineConfig::default();
    config.consolidation.max_facts_per_cluster = 2;
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_out_of_range_confidence() {
    let mut config = PipelineConfig::default();
    config.compression.min_confidence = 1.5;
    assert!(config.validate().is_err());
  }
}

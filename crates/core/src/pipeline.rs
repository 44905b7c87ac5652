use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::consolidation::{cluster_facts, consolidate_cluster};
use crate::entropy::score_window;
use crate::extraction::{EmbedFn, LlmFn, extract_facts};
use crate::retrieval::{
  RetrievalResult, analyze_query, filter_candidates, select_facts, strategy_for,
};
use crate::store::{CompressionStat, MemoryStore};
use crate::window::{ConversationWindow, create_windows};
use atomem_shared::{ConversationTurn, EngineError, EngineResult, SharedClock, system_clock};

/// How many recent facts form the "previous memory" context for filtering
/// and extraction.
const PREVIOUS_FACTS_LIMIT: u64 = 100;

/// How many of those are quoted verbatim in the extraction prompt.
const PREVIOUS_SUMMARY_FACTS: usize = 10;

// ──────────────────────────────────────────────────
// Summaries
// ──────────────────────────────────────────────────

#[derive(Debug, Serialize, Clone)]
pub struct TranscriptSummary {
  pub windows_created: usize,
  pub windows_processed: usize,
  pub facts_extracted: usize,
  /// Per-window extraction failures. Recoverable; the rest of the ingest
  /// committed normally.
  pub errors: Vec<String>,
  /// `None` when semantic compression is disabled (nothing was ingested).
  pub stat: Option<CompressionStat>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct ConsolidationSummary {
  /// Source facts that ended up inside a consolidated cluster.
  pub facts_consolidated: usize,
  /// Higher-level facts written.
  pub new_facts: usize,
  /// Mean of per-cluster ratios, 0 with no samples.
  pub compression_ratio: f64,
}

#[derive(Debug, Serialize, Clone)]
pub struct PipelineStats {
  pub total_facts: u64,
  pub facts_by_level: BTreeMap<i32, u64>,
  pub total_windows: u64,
  pub avg_compression_ratio: f64,
}

// ──────────────────────────────────────────────────
// Pipeline
// ──────────────────────────────────────────────────

/// Public entry point wiring the entropy filter, extractor, consolidator and
/// retriever over one [`MemoryStore`].
///
/// The LLM callables are opaque; production wiring and mocks both pass plain
/// closures. Configuration is immutable after construction.
pub struct Pipeline {
  store: Arc<MemoryStore>,
  config: PipelineConfig,
  extract_fn: LlmFn,
  consolidate_fn: LlmFn,
  embed_fn: Option<EmbedFn>,
  clock: SharedClock,
  cancel: CancellationToken,
  background: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
  /// Validate the configuration and assemble a pipeline. No background work
  /// starts until [`Pipeline::start`].
  pub fn new(
    store: Arc<MemoryStore>,
    config: PipelineConfig,
    extract_fn: LlmFn,
    consolidate_fn: LlmFn,
  ) -> EngineResult<Self> {
    config.validate()?;
    Ok(Self {
      store,
      config,
      extract_fn,
      consolidate_fn,
      embed_fn: None,
      clock: system_clock(),
      cancel: CancellationToken::new(),
      background: std::sync::Mutex::new(None),
    })
  }

  /// Wire an embedding provider; enables the semantic-divergence term of the
  /// entropy filter.
  #[must_use]
  pub fn with_embedder(mut self, embed_fn: EmbedFn) -> Self {
    self.embed_fn = Some(embed_fn);
    self
  }

  /// Replace the wall-clock source (tests).
  #[must_use]
  pub fn with_clock(mut self, clock: SharedClock) -> Self {
    self.clock = clock;
    self
  }

  #[must_use]
  pub fn store(&self) -> &MemoryStore {
    &self.store
  }

  fn check_cancelled(&self) -> EngineResult<()> {
    if self.cancel.is_cancelled() {
      Err(EngineError::Cancelled)
    } else {
      Ok(())
    }
  }

  // ──────────────────────────────────────────────────
  // Ingestion
  // ──────────────────────────────────────────────────

  /// Window the transcript, keep the high-entropy windows, extract facts
  /// from them, and commit windows + facts + one stat row atomically.
  pub async fn process_transcript(
    &self,
    turns: &[ConversationTurn],
    session_file: Option<&str>,
  ) -> EngineResult<TranscriptSummary> {
    self.check_cancelled()?;
    let compression = &self.config.compression;
    if !compression.enabled {
      return Ok(TranscriptSummary {
        windows_created: 0,
        windows_processed: 0,
        facts_extracted: 0,
        errors: Vec::new(),
        stat: None,
      });
    }

    let started = Instant::now();
    let now = (self.clock)();

    let mut windows =
      create_windows(turns, compression.window_size, compression.stride, session_file);
    let windows_created = windows.len();

    // Previous memory context: identifier set for novelty, statements for
    // the prompt, one embedding for divergence.
    let previous = self.store.get_recent_facts(PREVIOUS_FACTS_LIMIT).await?;
    let known: HashSet<String> = previous
      .iter()
      .flat_map(|fact| fact.known_identifiers())
      .collect();
    let previous_embedding = self.embed_previous_context(&previous).await;

    for window in &mut windows {
      self.check_cancelled()?;
      let window_embedding = match (&self.embed_fn, &previous_embedding) {
        (Some(embed), Some(_)) => match (embed)(window.render_turns()).await {
          Ok(vector) => Some(vector),
          Err(err) => {
            tracing::warn!(window_id = %window.id, error = %err, "Window embedding failed");
            None
          }
        },
        _ => None,
      };
      let scored = score_window(
        window,
        &known,
        window_embedding.as_deref(),
        previous_embedding.as_deref(),
        compression,
      );
      window.entropy = Some(scored.entropy);
      window.should_process = scored.should_keep;
    }

    let kept: Vec<ConversationWindow> =
      windows.iter().filter(|w| w.should_process).cloned().collect();

    let previous_summary = (!previous.is_empty()).then(|| {
      previous
        .iter()
        .take(PREVIOUS_SUMMARY_FACTS)
        .map(|fact| format!("- {}", fact.statement))
        .collect::<Vec<_>>()
        .join("\n")
    });

    let (facts, errors) = extract_facts(
      &kept,
      previous_summary.as_deref(),
      &self.extract_fn,
      compression,
      self.config.llm_timeout_ms,
      &self.clock,
    )
    .await;

    let chars_per_token = self.config.retrieval.chars_per_token.max(1);
    let input_chars: usize = turns.iter().map(|t| t.content.chars().count()).sum();
    let input_tokens = input_chars.div_ceil(chars_per_token);
    let fact_tokens: usize = facts
      .iter()
      .map(|f| f.statement.chars().count().div_ceil(chars_per_token))
      .sum();
    let compression_ratio = if facts.is_empty() {
      0.0
    } else {
      input_tokens as f64 / fact_tokens.max(1) as f64
    };
    let entropy_score = if windows.is_empty() {
      0.0
    } else {
      windows.iter().filter_map(|w| w.entropy).sum::<f64>() / windows.len() as f64
    };

    let stat = CompressionStat {
      id: Uuid::now_v7(),
      input_tokens: input_tokens as i64,
      output_facts: facts.len() as i32,
      compression_ratio,
      entropy_score,
      processing_time_ms: started.elapsed().as_millis() as i64,
      created_at: now,
      source_session_file: session_file.map(ToOwned::to_owned),
    };

    self
      .store
      .put_transcript_batch(&windows, &facts, &stat, now)
      .await?;

    tracing::info!(
      session_file = session_file.unwrap_or("<none>"),
      windows_created,
      windows_processed = kept.len(),
      facts_extracted = facts.len(),
      failed_windows = errors.len(),
      "Transcript processed"
    );

    Ok(TranscriptSummary {
      windows_created,
      windows_processed: kept.len(),
      facts_extracted: facts.len(),
      errors,
      stat: Some(stat),
    })
  }

  async fn embed_previous_context(
    &self,
    previous: &[crate::fact::AtomicFact],
  ) -> Option<Vec<f32>> {
    let embed = self.embed_fn.as_ref()?;
    if previous.is_empty() {
      return None;
    }
    let text = previous
      .iter()
      .take(PREVIOUS_SUMMARY_FACTS)
      .map(|fact| fact.statement.as_str())
      .collect::<Vec<_>>()
      .join("\n");
    match (embed)(text).await {
      Ok(vector) => Some(vector),
      Err(err) => {
        tracing::warn!(error = %err, "Previous-context embedding failed");
        None
      }
    }
  }

  // ──────────────────────────────────────────────────
  // Consolidation
  // ──────────────────────────────────────────────────

  /// Cluster and consolidate level by level until the configured depth or
  /// until no cluster reaches the minimum size. Each run operates on the
  /// snapshot of facts committed before it started.
  pub async fn run_consolidation(&self) -> EngineResult<ConsolidationSummary> {
    self.check_cancelled()?;
    let consolidation = &self.config.consolidation;
    if !consolidation.enabled {
      return Ok(ConsolidationSummary::default());
    }

    let level_zero = self.store.get_facts_by_level(0).await?;
    if level_zero.len() < consolidation.min_facts_for_cluster {
      tracing::debug!(
        facts = level_zero.len(),
        minimum = consolidation.min_facts_for_cluster,
        "Too few atomic facts, skipping consolidation"
      );
      return Ok(ConsolidationSummary::default());
    }

    // Facts already folded into a higher-level fact stay out of future
    // clusters; membership is recorded on the consolidated fact, so source
    // rows never need rewriting.
    let mut consumed: HashSet<Uuid> = self
      .store
      .get_all_facts()
      .await?
      .iter()
      .flat_map(|fact| fact.source_fact_ids.iter().copied())
      .collect();

    let mut summary = ConsolidationSummary::default();
    let mut ratios: Vec<f64> = Vec::new();

    for level in 0..consolidation.max_consolidation_level {
      self.check_cancelled()?;
      let facts: Vec<_> = self
        .store
        .get_facts_by_level(level)
        .await?
        .into_iter()
        .filter(|fact| !consumed.contains(&fact.id))
        .collect();
      if facts.len() < consolidation.min_facts_for_cluster {
        break;
      }
      let clusters = cluster_facts(&facts, consolidation);
      if clusters.is_empty() {
        break;
      }

      // Clusters run sequentially; a failed cluster is skipped, siblings go on.
      let mut new_facts = Vec::new();
      for cluster in &clusters {
        match consolidate_cluster(
          cluster,
          &self.consolidate_fn,
          self.config.llm_timeout_ms,
          &self.clock,
        )
        .await
        {
          Ok(fact) => {
            let source_chars: usize =
              cluster.facts.iter().map(|f| f.statement.chars().count()).sum();
            ratios.push(source_chars as f64 / fact.statement.chars().count().max(1) as f64);
            summary.facts_consolidated += cluster.facts.len();
            new_facts.push(fact);
          }
          Err(err) => {
            tracing::warn!(cluster_id = %cluster.id, error = %err, "Cluster consolidation failed");
          }
        }
      }

      if new_facts.is_empty() {
        break;
      }
      for fact in &new_facts {
        consumed.extend(fact.source_fact_ids.iter().copied());
      }
      self.store.put_facts(&new_facts).await?;
      summary.new_facts += new_facts.len();
      tracing::info!(
        level,
        clusters = clusters.len(),
        new_facts = new_facts.len(),
        "Consolidated one level"
      );
    }

    if !ratios.is_empty() {
      summary.compression_ratio = ratios.iter().sum::<f64>() / ratios.len() as f64;
    }

    Ok(summary)
  }

  // ──────────────────────────────────────────────────
  // Retrieval
  // ──────────────────────────────────────────────────

  /// Classify the query, pick a strategy and return a token-bounded set of
  /// scored facts. Deterministic; never calls an LLM.
  pub async fn search(&self, query: &str) -> EngineResult<RetrievalResult> {
    self.check_cancelled()?;
    let analysis = analyze_query(query)?;
    let strategy = strategy_for(analysis.complexity, &self.config.retrieval);

    let all_facts = self.store.get_all_facts().await?;
    let candidates = filter_candidates(all_facts.clone(), &strategy);
    let result = select_facts(
      candidates,
      &all_facts,
      analysis,
      strategy,
      &self.config.retrieval,
      (self.clock)(),
    );

    tracing::debug!(
      complexity = %result.strategy.complexity,
      returned = result.facts.len(),
      total_tokens = result.metadata.total_tokens,
      "Search completed"
    );
    Ok(result)
  }

  // ──────────────────────────────────────────────────
  // Stats & lifecycle
  // ──────────────────────────────────────────────────

  pub async fn stats(&self) -> EngineResult<PipelineStats> {
    self.check_cancelled()?;
    let facts_by_level = self.store.count_by_level().await?;
    let total_facts = facts_by_level.values().sum();
    Ok(PipelineStats {
      total_facts,
      facts_by_level,
      total_windows: self.store.count_windows().await?,
      avg_compression_ratio: self.store.avg_compression_ratio().await?,
    })
  }

  /// Spawn the background consolidation timer, when configured. Idempotent.
  pub fn start(self: &Arc<Self>) {
    if !self.config.background_consolidation {
      return;
    }
    let Ok(mut guard) = self.background.lock() else {
      return;
    };
    if guard.is_some() {
      return;
    }

    let pipeline = Arc::clone(self);
    let cancel = self.cancel.clone();
    let interval_ms = self.config.consolidation_interval_ms;
    *guard = Some(tokio::spawn(async move {
      let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // The first tick completes immediately; consume it so the first run
      // happens one full interval after start.
      interval.tick().await;
      loop {
        tokio::select! {
          () = cancel.cancelled() => break,
          _ = interval.tick() => {
            match pipeline.run_consolidation().await {
              Ok(summary) => tracing::debug!(
                new_facts = summary.new_facts,
                "Background consolidation tick"
              ),
              // Recoverable by policy: reschedule on the next tick regardless.
              Err(err) => tracing::warn!(error = %err, "Background consolidation failed"),
            }
          }
        }
      }
    }));
    tracing::info!(interval_ms, "Background consolidation started");
  }

  /// Cancel in-flight work and the background timer. Further calls on this
  /// pipeline return [`EngineError::Cancelled`]. Idempotent.
  pub fn stop(&self) {
    self.cancel.cancel();
    if let Ok(mut guard) = self.background.lock()
      && let Some(handle) = guard.take()
    {
      handle.abort();
    }
    tracing::debug!("Pipeline stopped");
  }
}

impl Drop for Pipeline {
  fn drop(&mut self) {
    self.stop();
  }
}

//! Batteries-included wiring for the semantic memory engine: an OpenAI-backed
//! [`MemoryEngine`] on top of [`atomem_core`].
//!
//! The core never talks to a provider directly; it takes opaque callables.
//! This crate supplies those callables from the `atomem_ai` provider crate
//! (configured through `OPENAI_*` environment variables) and delegates the
//! pipeline operations.

use std::sync::Arc;

use atomem_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestUserMessage, embed, generate_json,
  generate_text,
};
use schemars::JsonSchema;
use serde::Deserialize;

pub use atomem_core::{
  AdaptiveRetrievalConfig, AtomicFact, CompressionStat, ConsolidateError, ConsolidationConfig,
  ConsolidationSummary, ConversationTurn, EmbedFn, EngineError, EngineResult, ExtractError,
  LlmFn, MemoryStore, Pipeline, PipelineConfig, PipelineStats, QueryAnalysis, QueryComplexity,
  RetrievalResult, ScoredFact, SemanticCompressionConfig, StoreError, TranscriptSummary,
};

// ──────────────────────────────────────────────────
// Extractor response schema
// ──────────────────────────────────────────────────

/// Shape the extractor model is constrained to. The engine core re-parses
/// the raw string defensively, so this only has to keep the provider honest.
#[derive(Debug, Deserialize, JsonSchema)]
struct FactExtraction {
  facts: Vec<ExtractedFact>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractedFact {
  /// Self-contained sentence with coreferences resolved.
  statement: String,
  keywords: Vec<String>,
  persons: Vec<String>,
  entities: Vec<String>,
  topic: Option<String>,
  /// ISO-8601 instant the fact refers to.
  timestamp: Option<String>,
  location: Option<String>,
  /// Extraction certainty in [0, 1].
  confidence: f64,
}

// ──────────────────────────────────────────────────
// Provider callables
// ──────────────────────────────────────────────────

fn openai_extract_fn() -> LlmFn {
  Arc::new(|prompt| {
    Box::pin(async move {
      let user = ChatCompletionRequestUserMessage::from(prompt);
      generate_json::<FactExtraction>(
        vec![ChatCompletionRequestMessage::User(user)],
        "fact_extraction".to_owned(),
        Some("Atomic facts extracted from a conversation window".to_owned()),
      )
      .await
    })
  })
}

fn openai_consolidate_fn() -> LlmFn {
  Arc::new(|prompt| {
    Box::pin(async move {
      let user = ChatCompletionRequestUserMessage::from(prompt);
      generate_text(vec![ChatCompletionRequestMessage::User(user)]).await
    })
  })
}

fn openai_embed_fn() -> EmbedFn {
  Arc::new(|text| Box::pin(async move { embed(&text).await }))
}

// ──────────────────────────────────────────────────
// Engine facade
// ──────────────────────────────────────────────────

/// A ready-to-use memory engine: SQLite store, OpenAI-compatible extraction,
/// consolidation and embeddings, background consolidation per configuration.
pub struct MemoryEngine {
  pipeline: Arc<Pipeline>,
}

impl MemoryEngine {
  /// Open the database at `database_url` (e.g. `sqlite://memory.db?mode=rwc`),
  /// run migrations and assemble the pipeline.
  pub async fn connect(database_url: &str, config: PipelineConfig) -> EngineResult<Self> {
    let store = Arc::new(MemoryStore::connect(database_url).await?);
    Self::assemble(store, config)
  }

  /// Fully ephemeral engine on an in-memory database.
  pub async fn in_memory(config: PipelineConfig) -> EngineResult<Self> {
    let store = Arc::new(MemoryStore::in_memory().await?);
    Self::assemble(store, config)
  }

  fn assemble(store: Arc<MemoryStore>, config: PipelineConfig) -> EngineResult<Self> {
    let pipeline = Arc::new(
      Pipeline::new(store, config, openai_extract_fn(), openai_consolidate_fn())?
        .with_embedder(openai_embed_fn()),
    );
    pipeline.start();
    Ok(Self { pipeline })
  }

  /// Ingest a transcript; see [`Pipeline::process_transcript`].
  pub async fn process_transcript(
    &self,
    turns: &[ConversationTurn],
    session_file: Option<&str>,
  ) -> EngineResult<TranscriptSummary> {
    self.pipeline.process_transcript(turns, session_file).await
  }

  /// Run one consolidation pass now, independent of the background timer.
  pub async fn run_consolidation(&self) -> EngineResult<ConsolidationSummary> {
    self.pipeline.run_consolidation().await
  }

  /// Query memory under the adaptive token budget.
  pub async fn search(&self, query: &str) -> EngineResult<RetrievalResult> {
    self.pipeline.search(query).await
  }

  pub async fn stats(&self) -> EngineResult<PipelineStats> {
    self.pipeline.stats().await
  }

  /// Remove every stored window, fact and stat row.
  pub async fn clear(&self) -> EngineResult<()> {
    Ok(self.pipeline.store().clear().await?)
  }

  /// Stop the background timer and refuse further work.
  pub fn stop(&self) {
    self.pipeline.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // Provider callables are lazy: nothing touches the OPENAI_* environment
  // until an LLM call actually happens, so an empty engine works offline.
  #[tokio::test]
  async fn empty_engine_searches_and_counts_offline() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = MemoryEngine::in_memory(PipelineConfig::default()).await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_facts, 0);
    assert_eq!(stats.total_windows, 0);

    let result = engine.search("Where does Alice work?").await.unwrap();
    assert!(result.facts.is_empty());
    assert_eq!(result.metadata.total_tokens, 0);

    engine.stop();
  }
}

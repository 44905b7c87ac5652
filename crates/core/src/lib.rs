mod config;
pub use config::{
  AdaptiveRetrievalConfig, ConsolidationConfig, PipelineConfig, SemanticCompressionConfig,
};

mod fact;
pub use fact::{AtomicFact, FactCluster};

mod window;
pub use window::{ConversationWindow, create_windows};

mod entropy;
pub use entropy::{WindowEntropy, scan_entities, score_window};

mod extraction;
pub use extraction::{
  EmbedFn, LlmFn, RawFact, build_extraction_prompt, dedup_facts, extract_facts,
  extract_window_facts, parse_extractor_response,
};

mod consolidation;
pub use consolidation::{cluster_facts, consolidate_cluster, similarity};

mod retrieval;
pub use retrieval::{
  QueryAnalysis, QueryComplexity, RetrievalMetadata, RetrievalResult, RetrievalStrategy,
  ScoredFact, ScoringWeights, analyze_query, filter_candidates, select_facts, strategy_for,
};

mod store;
pub use store::{CompressionStat, MemoryStore};

mod pipeline;
pub use pipeline::{ConsolidationSummary, Pipeline, PipelineStats, TranscriptSummary};

pub use atomem_shared::{
  ConsolidateError, ConversationTurn, EngineError, EngineResult, ExtractError, SharedClock,
  StoreError, system_clock,
};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use atomem_entities::{atomic_fact, compression_stat, conversation_window};
use atomem_migration::{Migrator, MigratorTrait};
use atomem_shared::StoreError;
use sea_orm::{
  ColumnTrait, ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, EntityTrait,
  PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
  sea_query::OnConflict,
};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::fact::AtomicFact;
use crate::window::ConversationWindow;

// ──────────────────────────────────────────────────
// Compression stats
// ──────────────────────────────────────────────────

/// Ingest accounting, one row per `process_transcript` call.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CompressionStat {
  pub id: Uuid,
  pub input_tokens: i64,
  pub output_facts: i32,
  pub compression_ratio: f64,
  pub entropy_score: f64,
  pub processing_time_ms: i64,
  pub created_at: DateTime<Utc>,
  pub source_session_file: Option<String>,
}

impl CompressionStat {
  #[must_use]
  pub fn from_model(model: compression_stat::Model) -> Self {
    Self {
      id: model.id,
      input_tokens: model.input_tokens,
      output_facts: model.output_facts,
      compression_ratio: model.compression_ratio,
      entropy_score: model.entropy_score,
      processing_time_ms: model.processing_time_ms,
      created_at: model.created_at.with_timezone(&Utc),
      source_session_file: model.source_session_file,
    }
  }

  #[must_use]
  pub fn to_model(&self) -> compression_stat::Model {
    compression_stat::Model {
      id: self.id,
      input_tokens: self.input_tokens,
      output_facts: self.output_facts,
      compression_ratio: self.compression_ratio,
      entropy_score: self.entropy_score,
      processing_time_ms: self.processing_time_ms,
      created_at: self.created_at.into(),
      source_session_file: self.source_session_file.clone(),
    }
  }
}

// ──────────────────────────────────────────────────
// Store
// ──────────────────────────────────────────────────

/// Durable, transactional record of windows, facts and compression stats.
///
/// The store is the only owner of persistent rows; components operate on
/// copies and write back through this API. Writers are serialised behind an
/// async mutex, readers go straight to the pool and never observe a
/// partially committed batch.
pub struct MemoryStore {
  db: DatabaseConnection,
  write_lock: Mutex<()>,
}

impl MemoryStore {
  /// Open (or create) the database at `url` and apply pending migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let db = Database::connect(url).await?;
    Migrator::up(&db, None).await?;
    Ok(Self { db, write_lock: Mutex::new(()) })
  }

  /// Ephemeral single-connection store for tests and scratch pipelines.
  /// Each call returns a fully disjoint database.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // A pooled in-memory SQLite would hand every connection its own empty
    // database; one connection keeps a single coherent one.
    options.max_connections(1);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(Self { db, write_lock: Mutex::new(()) })
  }

  // ──────────────────────────────────────────────────
  // Writes
  // ──────────────────────────────────────────────────

  async fn upsert_window(
    window: &ConversationWindow,
    processed_at: DateTime<Utc>,
    txn: &DatabaseTransaction,
  ) -> Result<(), StoreError> {
    let model = window.to_model(processed_at)?;
    conversation_window::Entity::insert(conversation_window::ActiveModel::from(model))
      .on_conflict(
        OnConflict::column(conversation_window::Column::Id)
          .update_columns([
            conversation_window::Column::Turns,
            conversation_window::Column::StartIndex,
            conversation_window::Column::EndIndex,
            conversation_window::Column::Entropy,
            conversation_window::Column::ShouldProcess,
            conversation_window::Column::ProcessedAt,
            conversation_window::Column::SourceSessionFile,
          ])
          .to_owned(),
      )
      .exec(txn)
      .await?;
    Ok(())
  }

  async fn upsert_fact(fact: &AtomicFact, txn: &DatabaseTransaction) -> Result<(), StoreError> {
    let model = fact.to_model()?;
    atomic_fact::Entity::insert(atomic_fact::ActiveModel::from(model))
      .on_conflict(
        OnConflict::column(atomic_fact::Column::Id)
          .update_columns([
            atomic_fact::Column::Statement,
            atomic_fact::Column::Keywords,
            atomic_fact::Column::Persons,
            atomic_fact::Column::Entities,
            atomic_fact::Column::Topic,
            atomic_fact::Column::Timestamp,
            atomic_fact::Column::Location,
            atomic_fact::Column::SourceWindowId,
            atomic_fact::Column::SourceChunkId,
            atomic_fact::Column::SourceSessionFile,
            atomic_fact::Column::Confidence,
            atomic_fact::Column::Entropy,
            atomic_fact::Column::ExtractedAt,
            atomic_fact::Column::Level,
            atomic_fact::Column::ParentClusterId,
            atomic_fact::Column::SourceFactIds,
          ])
          .to_owned(),
      )
      .exec(txn)
      .await?;
    Ok(())
  }

  async fn insert_stat(
    stat: &CompressionStat,
    txn: &DatabaseTransaction,
  ) -> Result<(), StoreError> {
    compression_stat::Entity::insert(compression_stat::ActiveModel::from(stat.to_model()))
      .exec(txn)
      .await?;
    Ok(())
  }

  /// Idempotent single-window upsert.
  pub async fn put_window(
    &self,
    window: &ConversationWindow,
    processed_at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().await;
    let txn = self.db.begin().await?;
    Self::upsert_window(window, processed_at, &txn).await?;
    txn.commit().await?;
    Ok(())
  }

  /// Idempotent single-fact upsert.
  pub async fn put_fact(&self, fact: &AtomicFact) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().await;
    let txn = self.db.begin().await?;
    Self::upsert_fact(fact, &txn).await?;
    txn.commit().await?;
    Ok(())
  }

  /// Upsert a batch of facts in one transaction: all or nothing.
  pub async fn put_facts(&self, facts: &[AtomicFact]) -> Result<(), StoreError> {
    if facts.is_empty() {
      return Ok(());
    }
    let _guard = self.write_lock.lock().await;
    let txn = self.db.begin().await?;
    for fact in facts {
      Self::upsert_fact(fact, &txn).await?;
    }
    txn.commit().await?;
    Ok(())
  }

  /// Append one compression stat row.
  pub async fn put_stat(&self, stat: &CompressionStat) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().await;
    let txn = self.db.begin().await?;
    Self::insert_stat(stat, &txn).await?;
    txn.commit().await?;
    Ok(())
  }

  /// Commit a whole ingest atomically: every window, every extracted fact
  /// and the stat row become visible to readers at once, or not at all.
  pub async fn put_transcript_batch(
    &self,
    windows: &[ConversationWindow],
    facts: &[AtomicFact],
    stat: &CompressionStat,
    processed_at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().await;
    let txn = self.db.begin().await?;
    for window in windows {
      Self::upsert_window(window, processed_at, &txn).await?;
    }
    for fact in facts {
      Self::upsert_fact(fact, &txn).await?;
    }
    Self::insert_stat(stat, &txn).await?;
    txn.commit().await?;
    Ok(())
  }

  /// Remove every memory row. Administrative flows only.
  pub async fn clear(&self) -> Result<(), StoreError> {
    let _guard = self.write_lock.lock().await;
    let txn = self.db.begin().await?;
    atomic_fact::Entity::delete_many().exec(&txn).await?;
    conversation_window::Entity::delete_many().exec(&txn).await?;
    compression_stat::Entity::delete_many().exec(&txn).await?;
    txn.commit().await?;
    tracing::info!("Cleared all memory rows");
    Ok(())
  }

  // ──────────────────────────────────────────────────
  // Reads
  // ──────────────────────────────────────────────────

  /// Up to `limit` facts, newest `extracted_at` first.
  pub async fn get_recent_facts(&self, limit: u64) -> Result<Vec<AtomicFact>, StoreError> {
    let models = atomic_fact::Entity::find()
      .order_by_desc(atomic_fact::Column::ExtractedAt)
      .limit(limit)
      .all(&self.db)
      .await?;
    models.into_iter().map(AtomicFact::from_model).collect()
  }

  /// All facts at exactly `level`.
  pub async fn get_facts_by_level(&self, level: i32) -> Result<Vec<AtomicFact>, StoreError> {
    let models = atomic_fact::Entity::find()
      .filter(atomic_fact::Column::Level.eq(level))
      .all(&self.db)
      .await?;
    models.into_iter().map(AtomicFact::from_model).collect()
  }

  pub async fn get_all_facts(&self) -> Result<Vec<AtomicFact>, StoreError> {
    let models = atomic_fact::Entity::find().all(&self.db).await?;
    models.into_iter().map(AtomicFact::from_model).collect()
  }

  pub async fn get_fact(&self, id: Uuid) -> Result<Option<AtomicFact>, StoreError> {
    let model = atomic_fact::Entity::find_by_id(id).one(&self.db).await?;
    model.map(AtomicFact::from_model).transpose()
  }

  pub async fn count_windows(&self) -> Result<u64, StoreError> {
    Ok(conversation_window::Entity::find().count(&self.db).await?)
  }

  /// Fact counts keyed by level, ascending.
  pub async fn count_by_level(&self) -> Result<BTreeMap<i32, u64>, StoreError> {
    let rows: Vec<(i32, i64)> = atomic_fact::Entity::find()
      .select_only()
      .column(atomic_fact::Column::Level)
      .column_as(atomic_fact::Column::Id.count(), "count")
      .group_by(atomic_fact::Column::Level)
      .into_tuple()
      .all(&self.db)
      .await?;
    Ok(
      rows
        .into_iter()
        .map(|(level, count)| (level, count.max(0) as u64))
        .collect(),
    )
  }

  /// Mean compression ratio across all stat rows, 0 with no samples.
  pub async fn avg_compression_ratio(&self) -> Result<f64, StoreError> {
    let ratios: Vec<f64> = compression_stat::Entity::find()
      .select_only()
      .column(compression_stat::Column::CompressionRatio)
      .into_tuple()
      .all(&self.db)
      .await?;
    if ratios.is_empty() {
      return Ok(0.0);
    }
    Ok(ratios.iter().sum::<f64>() / ratios.len() as f64)
  }

  pub async fn get_stats_rows(&self) -> Result<Vec<CompressionStat>, StoreError> {
    let models = compression_stat::Entity::find()
      .order_by_desc(compression_stat::Column::CreatedAt)
      .all(&self.db)
      .await?;
    Ok(models.into_iter().map(CompressionStat::from_model).collect())
  }
}

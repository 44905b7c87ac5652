use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only ingest accounting, one row per `process_transcript` call.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "compression_stat")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub input_tokens: i64,
  pub output_facts: i32,
  pub compression_ratio: f64,
  pub entropy_score: f64,
  pub processing_time_ms: i64,
  pub created_at: DateTimeWithTimeZone,
  pub source_session_file: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

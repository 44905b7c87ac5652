use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A single stored fact row.
///
/// String sets (`keywords`, `persons`, `entities`) and `source_fact_ids` are
/// JSON arrays; the domain layer owns (de)serialisation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "atomic_fact")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub statement: String,
  pub keywords: Json,
  pub persons: Json,
  pub entities: Json,
  pub topic: Option<String>,
  pub timestamp: Option<DateTimeWithTimeZone>,
  pub location: Option<String>,
  pub source_window_id: Option<Uuid>,
  pub source_chunk_id: Option<String>,
  pub source_session_file: Option<String>,
  pub confidence: f64,
  pub entropy: Option<f64>,
  pub extracted_at: DateTimeWithTimeZone,
  pub level: i32,
  pub parent_cluster_id: Option<Uuid>,
  pub source_fact_ids: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

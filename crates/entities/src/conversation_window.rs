use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A windowed slice of a session transcript, stored once with the entropy
/// filter's decision. `turns` is a JSON array of conversation turns.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversation_window")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub turns: Json,
  pub start_index: i32,
  pub end_index: i32,
  pub entropy: Option<f64>,
  pub should_process: bool,
  pub processed_at: Option<DateTimeWithTimeZone>,
  pub source_session_file: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

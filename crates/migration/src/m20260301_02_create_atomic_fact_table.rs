use sea_orm_migration::{
  prelude::*,
  schema::{double, integer, json, text, timestamp_with_time_zone, uuid},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(AtomicFact::Table)
          .if_not_exists()
          .col(uuid(AtomicFact::Id).primary_key())
          .col(text(AtomicFact::Statement))
          .col(json(AtomicFact::Keywords))
          .col(json(AtomicFact::Persons))
          .col(json(AtomicFact::Entities))
          .col(text(AtomicFact::Topic).null())
          .col(timestamp_with_time_zone(AtomicFact::Timestamp).null())
          .col(text(AtomicFact::Location).null())
          .col(uuid(AtomicFact::SourceWindowId).null())
          .col(text(AtomicFact::SourceChunkId).null())
          .col(text(AtomicFact::SourceSessionFile).null())
          .col(double(AtomicFact::Confidence))
          .col(double(AtomicFact::Entropy).null())
          .col(timestamp_with_time_zone(AtomicFact::ExtractedAt))
          .col(integer(AtomicFact::Level).default(0))
          .col(uuid(AtomicFact::ParentClusterId).null())
          .col(json(AtomicFact::SourceFactIds).null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_atomic_fact_level")
          .table(AtomicFact::Table)
          .col(AtomicFact::Level)
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_atomic_fact_topic")
          .table(AtomicFact::Table)
          .col(AtomicFact::Topic)
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_atomic_fact_timestamp")
          .table(AtomicFact::Table)
          .col(AtomicFact::Timestamp)
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_atomic_fact_parent_cluster_id")
          .table(AtomicFact::Table)
          .col(AtomicFact::ParentClusterId)
          .to_owned(),
      )
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(AtomicFact::Table).to_owned())
      .await
  }
}

#[derive(Iden)]
pub enum AtomicFact {
  Table,

  Id,                // uuid v7
  Statement,         // self-contained sentence, coreferences resolved
  Keywords,          // JSON array of strings
  Persons,           // JSON array of strings
  Entities,          // JSON array of strings
  Topic,
  Timestamp,         // instant the fact refers to, if the LLM supplied one
  Location,
  SourceWindowId,    // provenance, level-0 facts only
  SourceChunkId,
  SourceSessionFile,
  Confidence,        // [0, 1]
  Entropy,           // entropy of the source window at extraction time
  ExtractedAt,
  Level,             // 0 = atomic, k > 0 = consolidated from level < k
  ParentClusterId,   // cluster this fact summarises (level > 0 only)
  SourceFactIds,     // JSON array of member fact ids (level > 0 only)
}

use sea_orm_migration::{
  prelude::*,
  schema::{big_integer, double, integer, text, timestamp_with_time_zone, uuid},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(CompressionStat::Table)
          .if_not_exists()
          .col(uuid(CompressionStat::Id).primary_key())
          .col(big_integer(CompressionStat::InputTokens))
          .col(integer(CompressionStat::OutputFacts))
          .col(double(CompressionStat::CompressionRatio))
          .col(double(CompressionStat::EntropyScore))
          .col(big_integer(CompressionStat::ProcessingTimeMs))
          .col(timestamp_with_time_zone(CompressionStat::CreatedAt))
          .col(text(CompressionStat::SourceSessionFile).null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_compression_stat_created_at")
          .table(CompressionStat::Table)
          .col(CompressionStat::CreatedAt)
          .to_owned(),
      )
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(CompressionStat::Table).to_owned())
      .await
  }
}

#[derive(Iden)]
pub enum CompressionStat {
  Table,

  Id,               // uuid v7
  InputTokens,      // estimated tokens in the source transcript
  OutputFacts,      // facts extracted by this ingest
  CompressionRatio, // input tokens / fact tokens, 0 when no facts
  EntropyScore,     // mean window entropy
  ProcessingTimeMs,
  CreatedAt,
  SourceSessionFile,
}

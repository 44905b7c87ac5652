use sea_orm_migration::{
  prelude::*,
  schema::{boolean, double, integer, json, text, timestamp_with_time_zone, uuid},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(ConversationWindow::Table)
          .if_not_exists()
          .col(uuid(ConversationWindow::Id).primary_key())
          .col(json(ConversationWindow::Turns))
          .col(integer(ConversationWindow::StartIndex))
          .col(integer(ConversationWindow::EndIndex))
          .col(double(ConversationWindow::Entropy).null())
          .col(boolean(ConversationWindow::ShouldProcess))
          .col(timestamp_with_time_zone(ConversationWindow::ProcessedAt).null())
          .col(text(ConversationWindow::SourceSessionFile).null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_conversation_window_processed_at")
          .table(ConversationWindow::Table)
          .col(ConversationWindow::ProcessedAt)
          .to_owned(),
      )
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(ConversationWindow::Table).to_owned())
      .await
  }
}

#[derive(Iden)]
pub enum ConversationWindow {
  Table,
  Id,                // uuid v5 of (session_file, start_index, end_index)
  Turns,             // JSON array of {speaker, content, timestamp?}
  StartIndex,        // first transcript position covered (inclusive)
  EndIndex,          // last transcript position covered (inclusive)
  Entropy,           // filter score, NULL until filtering ran
  ShouldProcess,     // final filter decision
  ProcessedAt,
  SourceSessionFile,
}

pub use sea_orm_migration::*;

mod m20260301_01_create_conversation_window_table;
mod m20260301_02_create_atomic_fact_table;
mod m20260301_03_create_compression_stat_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260301_01_create_conversation_window_table::Migration),
      Box::new(m20260301_02_create_atomic_fact_table::Migration),
      Box::new(m20260301_03_create_compression_stat_table::Migration),
    ]
  }
}

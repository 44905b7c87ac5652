use sea_orm::DbErr;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error for every public pipeline operation.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid configuration: {0}")]
  ConfigInvalid(String),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Extract(#[from] ExtractError),

  #[error(transparent)]
  Consolidate(#[from] ConsolidateError),

  #[error("invalid query: {0}")]
  QueryInvalid(String),

  #[error("operation cancelled")]
  Cancelled,
}

/// Persistent-layer failures. Fatal to the enclosing batch; the store is left
/// in its pre-call state.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store I/O failure: {0}")]
  Io(String),

  #[error("store write conflict: {0}")]
  Conflict(String),

  #[error("store corruption: {0}")]
  Corruption(String),
}

impl From<DbErr> for StoreError {
  fn from(err: DbErr) -> Self {
    match err {
      DbErr::RecordNotInserted | DbErr::RecordNotUpdated => Self::Conflict(err.to_string()),
      DbErr::Json(_) | DbErr::Type(_) | DbErr::TryIntoErr { .. } => {
        Self::Corruption(err.to_string())
      }
      other => Self::Io(other.to_string()),
    }
  }
}

impl From<DbErr> for EngineError {
  fn from(err: DbErr) -> Self {
    Self::Store(err.into())
  }
}

/// Per-window extraction failures. Recoverable: the window contributes zero
/// facts and sibling windows proceed.
#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("malformed extractor response: {0}")]
  BadResponse(String),

  #[error("extractor call timed out after {0}ms")]
  Timeout(u64),

  #[error("extraction cancelled")]
  Cancelled,

  #[error("extractor provider failure: {0}")]
  Provider(String),
}

/// Per-cluster consolidation failures. Recoverable: the cluster is skipped
/// and sibling clusters proceed.
#[derive(Debug, Error)]
pub enum ConsolidateError {
  #[error("malformed consolidation response: {0}")]
  BadResponse(String),

  #[error("consolidation call timed out after {0}ms")]
  Timeout(u64),

  #[error("consolidation cancelled")]
  Cancelled,

  #[error("consolidation provider failure: {0}")]
  Provider(String),
}

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Injectable wall-clock source. Production uses [`system_clock`]; tests pin
/// a fixed instant to make recency scoring and timestamps deterministic.
pub type SharedClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[must_use]
pub fn system_clock() -> SharedClock {
  Arc::new(Utc::now)
}

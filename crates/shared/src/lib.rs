mod error;
pub use error::{ConsolidateError, EngineError, EngineResult, ExtractError, StoreError};

mod env;
pub use env::APP_ENV;

mod turn;
pub use turn::ConversationTurn;

mod clock;
pub use clock::{SharedClock, system_clock};

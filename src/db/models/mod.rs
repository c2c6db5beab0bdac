pub mod prediction;
pub mod round;
pub mod session;

pub use prediction::Prediction;
pub use round::{Round, RoundSummary};
pub use session::GameSession;

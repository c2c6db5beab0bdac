pub mod reconciler;
pub mod types;

pub use reconciler::RoundReconciler;
pub use types::{GroundTruth, PredictionPayload, RoundLogRequest, RoundLogResponse};

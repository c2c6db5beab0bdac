//! Operations exposed to the transport layer. Each takes the shared
//! [`AppState`](crate::AppState) and returns an [`EngineResult`](crate::error::EngineResult).

pub mod coords;
pub mod dataset;
pub mod inference;
pub mod rounds;

pub use coords::{ingest_coordinate, CoordinateRequest, CoordinateResponse};
pub use dataset::export_dataset;
pub use inference::{
    run_inference, store_screenshot, InferenceRequest, InferenceResponse, ScreenshotRequest,
    ScreenshotResponse,
};
pub use rounds::{list_rounds, log_round, ListRoundsQuery};

pub mod coords_log;
pub mod export;
pub mod jsonl;
pub mod logger;

pub use coords_log::{CoordinateLog, CoordinateLogEntry};
pub use export::{write_csv, EXPORT_COLUMNS};
pub use logger::{
    read_entries, DatasetEntry, DatasetLogger, GroundTruthSnapshot, NewSample, PredictionSnapshot,
    SampleType,
};

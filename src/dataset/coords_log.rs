use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::jsonl::{read_jsonl, JsonlWriter};
use crate::correlation::CoordinateSample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateLogEntry {
    #[serde(flatten)]
    pub sample: CoordinateSample,
    pub logged_at: DateTime<Utc>,
}

/// Raw record of every ingested coordinate sample, kept apart from the
/// training dataset.
pub struct CoordinateLog {
    writer: JsonlWriter,
}

impl CoordinateLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            writer: JsonlWriter::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Returns the timestamp stamped onto the record.
    pub fn append(&self, sample: &CoordinateSample) -> Result<DateTime<Utc>> {
        let logged_at = Utc::now();
        self.writer.append(&CoordinateLogEntry {
            sample: sample.clone(),
            logged_at,
        })?;
        Ok(logged_at)
    }

    /// [`append`](Self::append) on the blocking pool, for async callers.
    pub async fn append_async(self: &Arc<Self>, sample: CoordinateSample) -> Result<DateTime<Utc>> {
        let log = Arc::clone(self);
        tokio::task::spawn_blocking(move || log.append(&sample))
            .await
            .context("coordinate log worker failed")?
    }

    pub fn read_entries(&self) -> Result<Vec<CoordinateLogEntry>> {
        read_jsonl(self.path())
    }
}

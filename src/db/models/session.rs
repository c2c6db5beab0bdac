//! Game session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A play session grouping rounds. Written once, on the first round logged
/// for an unseen id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub mode: Option<String>,
    pub player: Option<String>,
}

impl GameSession {
    pub fn new(id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            started_at,
            mode: None,
            player: None,
        }
    }
}

use serde::Deserialize;

use crate::{
    db::models::RoundSummary,
    error::EngineResult,
    reconcile::{RoundLogRequest, RoundLogResponse},
    AppState,
};

pub const DEFAULT_LIST_LIMIT: u32 = 25;
pub const MAX_LIST_LIMIT: u32 = 200;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListRoundsQuery {
    pub session_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

pub async fn log_round(state: &AppState, request: RoundLogRequest) -> EngineResult<RoundLogResponse> {
    state.reconciler.reconcile(request).await
}

pub async fn list_rounds(state: &AppState, query: ListRoundsQuery) -> EngineResult<Vec<RoundSummary>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let session_id = query.session_id.as_deref().filter(|s| !s.trim().is_empty());

    let rounds = state
        .db
        .list_rounds(session_id, limit, query.offset.unwrap_or(0))
        .await?;
    Ok(rounds)
}

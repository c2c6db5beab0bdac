use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime},
    models::GameSession,
};

fn row_to_session(row: &Row) -> Result<GameSession> {
    let started_at: String = row.get("started_at")?;

    Ok(GameSession {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        mode: row.get("mode")?,
        player: row.get("player")?,
    })
}

/// Inserts the session unless one with the same id exists. Returns whether a
/// row was written.
pub(crate) fn insert_session_if_absent(conn: &Connection, session: &GameSession) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO game_sessions (id, started_at, mode, player)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO NOTHING",
        params![
            session.id,
            format_datetime(&session.started_at),
            session.mode,
            session.player,
        ],
    )?;
    Ok(inserted > 0)
}

impl Database {
    pub async fn ensure_session(&self, session: &GameSession) -> Result<bool> {
        let record = session.clone();
        self.execute(move |conn| insert_session_if_absent(conn, &record))
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<GameSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, mode, player
                 FROM game_sessions
                 WHERE id = ?1",
            )?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;

            Ok(session)
        })
        .await
    }
}

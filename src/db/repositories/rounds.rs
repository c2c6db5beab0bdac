use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, to_i64},
    models::{GameSession, Prediction, Round, RoundSummary},
};

use super::sessions::insert_session_if_absent;

const ROUND_COLUMNS: &str = "r.id, r.session_id, r.round_index, r.gt_lat, r.gt_lon, r.gt_country, \
     r.gt_continent, r.score, r.screenshot_path, r.created_at";

const PREDICTION_FIELDS: [&str; 20] = [
    "round_id",
    "inference_id",
    "model_version",
    "lat",
    "lon",
    "continent_id",
    "continent_confidence",
    "country_id",
    "country_confidence",
    "grid_l4",
    "grid_l4_confidence",
    "grid_l6",
    "grid_l6_confidence",
    "confidence_lat",
    "confidence_lon",
    "inference_time_ms",
    "extra_json",
    "distance_km",
    "is_correct",
    "created_at",
];

/// Prefix used for prediction columns when selected next to round columns.
const JOINED_PREFIX: &str = "p_";

/// Outcome of one reconciled write.
#[derive(Debug, Clone)]
pub struct RoundWrite {
    pub round: Round,
    pub prediction: Prediction,
    pub stored_round: bool,
    pub stored_prediction: bool,
    pub created_session: bool,
}

fn prediction_columns(prefix: &str) -> String {
    PREDICTION_FIELDS
        .iter()
        .map(|field| format!("p.{field} AS {prefix}{field}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_round(row: &Row) -> Result<Round> {
    let created_at: String = row.get("created_at")?;

    Ok(Round {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        round_index: row.get("round_index")?,
        gt_lat: row.get("gt_lat")?,
        gt_lon: row.get("gt_lon")?,
        gt_country: row.get("gt_country")?,
        gt_continent: row.get("gt_continent")?,
        score: row.get("score")?,
        screenshot_path: row.get("screenshot_path")?,
        created_at: parse_datetime(&created_at, "rounds.created_at")?,
    })
}

/// Reads prediction columns named `{prefix}{field}`. `None` when the row
/// carries no prediction (left join miss).
fn row_to_prediction(row: &Row, prefix: &str) -> Result<Option<Prediction>> {
    let col = |field: &str| format!("{prefix}{field}");

    let round_id: Option<String> = row.get(col("round_id").as_str())?;
    let Some(round_id) = round_id else {
        return Ok(None);
    };
    let created_at: String = row.get(col("created_at").as_str())?;

    Ok(Some(Prediction {
        round_id,
        inference_id: row.get(col("inference_id").as_str())?,
        model_version: row.get(col("model_version").as_str())?,
        lat: row.get(col("lat").as_str())?,
        lon: row.get(col("lon").as_str())?,
        continent_id: row.get(col("continent_id").as_str())?,
        continent_confidence: row.get(col("continent_confidence").as_str())?,
        country_id: row.get(col("country_id").as_str())?,
        country_confidence: row.get(col("country_confidence").as_str())?,
        grid_l4: row.get(col("grid_l4").as_str())?,
        grid_l4_confidence: row.get(col("grid_l4_confidence").as_str())?,
        grid_l6: row.get(col("grid_l6").as_str())?,
        grid_l6_confidence: row.get(col("grid_l6_confidence").as_str())?,
        confidence_lat: row.get(col("confidence_lat").as_str())?,
        confidence_lon: row.get(col("confidence_lon").as_str())?,
        inference_time_ms: row.get(col("inference_time_ms").as_str())?,
        extra_json: row.get(col("extra_json").as_str())?,
        distance_km: row.get(col("distance_km").as_str())?,
        is_correct: row.get(col("is_correct").as_str())?,
        created_at: parse_datetime(&created_at, "predictions.created_at")?,
    }))
}

fn row_to_summary(row: &Row) -> Result<RoundSummary> {
    Ok(RoundSummary {
        round: row_to_round(row)?,
        prediction: row_to_prediction(row, JOINED_PREFIX)?,
    })
}

fn round_exists(conn: &Connection, round_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM rounds WHERE id = ?1",
            params![round_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn prediction_exists(conn: &Connection, round_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM predictions WHERE round_id = ?1",
            params![round_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Existing rounds keep their session, creation time and, when the update
/// carries none, their screenshot path.
fn upsert_round(conn: &Connection, round: &Round) -> Result<()> {
    conn.execute(
        "INSERT INTO rounds (id, session_id, round_index, gt_lat, gt_lon, gt_country, gt_continent, score, screenshot_path, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             round_index = excluded.round_index,
             gt_lat = excluded.gt_lat,
             gt_lon = excluded.gt_lon,
             gt_country = excluded.gt_country,
             gt_continent = excluded.gt_continent,
             score = excluded.score,
             screenshot_path = COALESCE(excluded.screenshot_path, rounds.screenshot_path)",
        params![
            round.id,
            round.session_id,
            round.round_index,
            round.gt_lat,
            round.gt_lon,
            round.gt_country,
            round.gt_continent,
            round.score,
            round.screenshot_path,
            format_datetime(&round.created_at),
        ],
    )
    .context("failed to upsert round")?;
    Ok(())
}

fn upsert_prediction(conn: &Connection, prediction: &Prediction) -> Result<()> {
    conn.execute(
        "INSERT INTO predictions (round_id, inference_id, model_version, lat, lon, continent_id, continent_confidence,
                                  country_id, country_confidence, grid_l4, grid_l4_confidence, grid_l6, grid_l6_confidence,
                                  confidence_lat, confidence_lon, inference_time_ms, extra_json, distance_km, is_correct, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
         ON CONFLICT(round_id) DO UPDATE SET
             inference_id = excluded.inference_id,
             model_version = excluded.model_version,
             lat = excluded.lat,
             lon = excluded.lon,
             continent_id = excluded.continent_id,
             continent_confidence = excluded.continent_confidence,
             country_id = excluded.country_id,
             country_confidence = excluded.country_confidence,
             grid_l4 = excluded.grid_l4,
             grid_l4_confidence = excluded.grid_l4_confidence,
             grid_l6 = excluded.grid_l6,
             grid_l6_confidence = excluded.grid_l6_confidence,
             confidence_lat = excluded.confidence_lat,
             confidence_lon = excluded.confidence_lon,
             inference_time_ms = excluded.inference_time_ms,
             extra_json = excluded.extra_json,
             distance_km = excluded.distance_km,
             is_correct = excluded.is_correct",
        params![
            prediction.round_id,
            prediction.inference_id,
            prediction.model_version,
            prediction.lat,
            prediction.lon,
            prediction.continent_id,
            prediction.continent_confidence,
            prediction.country_id,
            prediction.country_confidence,
            prediction.grid_l4,
            prediction.grid_l4_confidence,
            prediction.grid_l6,
            prediction.grid_l6_confidence,
            prediction.confidence_lat,
            prediction.confidence_lon,
            prediction.inference_time_ms,
            prediction.extra_json,
            prediction.distance_km,
            prediction.is_correct,
            format_datetime(&prediction.created_at),
        ],
    )
    .context("failed to upsert prediction")?;
    Ok(())
}

fn select_round(conn: &Connection, round_id: &str) -> Result<Option<Round>> {
    let sql = format!("SELECT {ROUND_COLUMNS} FROM rounds r WHERE r.id = ?1");
    let round = conn
        .query_row(&sql, params![round_id], |row| Ok(row_to_round(row)))
        .optional()?
        .transpose()?;
    Ok(round)
}

fn select_prediction(conn: &Connection, round_id: &str) -> Result<Option<Prediction>> {
    let sql = format!(
        "SELECT {} FROM predictions p WHERE p.round_id = ?1",
        prediction_columns("")
    );
    let prediction = conn
        .query_row(&sql, params![round_id], |row| Ok(row_to_prediction(row, "")))
        .optional()?
        .transpose()?;
    Ok(prediction.flatten())
}

impl Database {
    /// Writes session, round and prediction in one transaction. Either all
    /// three land or none does.
    pub async fn upsert_round_with_prediction(
        &self,
        session: GameSession,
        round: Round,
        prediction: Prediction,
    ) -> Result<RoundWrite> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open round transaction")?;

            let created_session = insert_session_if_absent(&tx, &session)?;
            let stored_round = !round_exists(&tx, &round.id)?;
            upsert_round(&tx, &round)?;
            let stored_prediction = !prediction_exists(&tx, &prediction.round_id)?;
            upsert_prediction(&tx, &prediction)?;

            let round = select_round(&tx, &round.id)?
                .context("round missing after upsert")?;
            let prediction = select_prediction(&tx, &prediction.round_id)?
                .context("prediction missing after upsert")?;

            tx.commit().context("failed to commit round transaction")?;

            Ok(RoundWrite {
                round,
                prediction,
                stored_round,
                stored_prediction,
                created_session,
            })
        })
        .await
    }

    pub async fn get_round(&self, round_id: &str) -> Result<Option<Round>> {
        let round_id = round_id.to_string();
        self.execute(move |conn| select_round(conn, &round_id)).await
    }

    pub async fn get_prediction(&self, round_id: &str) -> Result<Option<Prediction>> {
        let round_id = round_id.to_string();
        self.execute(move |conn| select_prediction(conn, &round_id))
            .await
    }

    pub async fn count_rounds(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM rounds", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Newest rounds first, with their predictions when present.
    pub async fn list_rounds(
        &self,
        session_id: Option<&str>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<RoundSummary>> {
        let session_id = session_id.map(str::to_string);
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {ROUND_COLUMNS}, {}
                 FROM rounds r
                 LEFT JOIN predictions p ON p.round_id = r.id
                 WHERE (?1 IS NULL OR r.session_id = ?1)
                 ORDER BY r.created_at DESC, r.rowid DESC
                 LIMIT ?2 OFFSET ?3",
                prediction_columns(JOINED_PREFIX)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![session_id, i64::from(limit), to_i64(offset)?])?;

            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                summaries.push(row_to_summary(row)?);
            }
            Ok(summaries)
        })
        .await
    }

    /// Every round in creation order, for dataset export.
    pub async fn export_rounds(&self) -> Result<Vec<RoundSummary>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {ROUND_COLUMNS}, {}
                 FROM rounds r
                 LEFT JOIN predictions p ON p.round_id = r.id
                 ORDER BY r.created_at ASC, r.rowid ASC",
                prediction_columns(JOINED_PREFIX)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;

            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                summaries.push(row_to_summary(row)?);
            }
            Ok(summaries)
        })
        .await
    }
}

use std::{borrow::Cow, io::Write};

use anyhow::{Context, Result};

use crate::db::models::RoundSummary;

pub const EXPORT_COLUMNS: [&str; 14] = [
    "round_id",
    "session_id",
    "round_index",
    "gt_lat",
    "gt_lon",
    "gt_country",
    "gt_continent",
    "score",
    "prediction_lat",
    "prediction_lon",
    "prediction_country",
    "prediction_continent",
    "model_version",
    "inference_id",
];

/// Writes the header and one CSV row per round. Returns the number of rows.
pub fn write_csv<W: Write>(mut out: W, rows: &[RoundSummary]) -> Result<usize> {
    writeln!(out, "{}", EXPORT_COLUMNS.join(",")).context("failed to write CSV header")?;
    for row in rows {
        let fields = csv_fields(row);
        let line = fields
            .iter()
            .map(|field| quote(field))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{line}").context("failed to write CSV row")?;
    }
    out.flush()?;
    Ok(rows.len())
}

fn csv_fields(row: &RoundSummary) -> [String; 14] {
    let round = &row.round;
    let prediction = row.prediction.as_ref();
    let coord = |value: Option<f64>| value.map(|v| format!("{v:.6}")).unwrap_or_default();
    let text = |value: Option<&String>| value.cloned().unwrap_or_default();

    [
        round.id.clone(),
        round.session_id.clone(),
        round.round_index.to_string(),
        round.gt_lat.to_string(),
        round.gt_lon.to_string(),
        round.gt_country.clone(),
        round.gt_continent.clone().unwrap_or_default(),
        round.score.to_string(),
        coord(prediction.and_then(|p| p.lat)),
        coord(prediction.and_then(|p| p.lon)),
        text(prediction.and_then(|p| p.country_id.as_ref())),
        text(prediction.and_then(|p| p.continent_id.as_ref())),
        text(prediction.map(|p| &p.model_version)),
        text(prediction.and_then(|p| p.inference_id.as_ref())),
    ]
}

fn quote(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::models::{Prediction, Round};

    fn summary(prediction: bool) -> RoundSummary {
        let round = Round {
            id: "r1".into(),
            session_id: "s1".into(),
            round_index: 3,
            gt_lat: 48.8566,
            gt_lon: 2.3522,
            gt_country: "FR".into(),
            gt_continent: None,
            score: 4321,
            screenshot_path: None,
            created_at: Utc::now(),
        };
        let prediction = prediction.then(|| Prediction {
            round_id: "r1".into(),
            inference_id: Some("inf, \"quoted\"".into()),
            model_version: "geovit-tinyvit-21m-v0".into(),
            lat: Some(48.9),
            lon: Some(2.3),
            continent_id: Some("EU".into()),
            continent_confidence: None,
            country_id: Some("FR".into()),
            country_confidence: None,
            grid_l4: None,
            grid_l4_confidence: None,
            grid_l6: None,
            grid_l6_confidence: None,
            confidence_lat: None,
            confidence_lon: None,
            inference_time_ms: None,
            extra_json: None,
            distance_km: None,
            is_correct: None,
            created_at: Utc::now(),
        });
        RoundSummary { round, prediction }
    }

    fn export(rows: &[RoundSummary]) -> String {
        let mut out = Vec::new();
        write_csv(&mut out, rows).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn header_only_for_empty_export() {
        assert_eq!(
            export(&[]),
            "round_id,session_id,round_index,gt_lat,gt_lon,gt_country,gt_continent,score,\
             prediction_lat,prediction_lon,prediction_country,prediction_continent,model_version,inference_id\n"
        );
    }

    #[test]
    fn missing_prediction_renders_empty_fields() {
        let csv = export(&[summary(false)]);
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(row, "r1,s1,3,48.8566,2.3522,FR,,4321,,,,,,");
    }

    #[test]
    fn prediction_fields_are_formatted_and_quoted() {
        let csv = export(&[summary(true)]);
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(
            row,
            "r1,s1,3,48.8566,2.3522,FR,,4321,48.900000,2.300000,FR,EU,geovit-tinyvit-21m-v0,\"inf, \"\"quoted\"\"\""
        );
    }
}

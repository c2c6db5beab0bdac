use std::io::Write;

use crate::{dataset::write_csv, error::EngineResult, AppState};

/// Streams every stored round as CSV. Returns the number of data rows.
pub async fn export_dataset<W: Write>(state: &AppState, out: W) -> EngineResult<usize> {
    let rounds = state.db.export_rounds().await?;
    Ok(write_csv(out, &rounds)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commands::{rounds::log_round, tests::test_state},
        reconcile::{GroundTruth, PredictionPayload, RoundLogRequest},
    };

    #[tokio::test]
    async fn exports_rounds_in_creation_order() {
        let (_dir, state) = test_state();
        for (round_id, guess) in [("a", Some(35.7)), ("b", None)] {
            let request = RoundLogRequest {
                session_id: "s1".into(),
                round_id: round_id.into(),
                round_index: 0,
                ground_truth: GroundTruth {
                    lat: 35.68,
                    lon: 139.69,
                    country: Some("Japan".into()),
                    continent: Some("AS".into()),
                    captured_at: None,
                },
                prediction: PredictionPayload {
                    lat: guess,
                    lon: guess.map(|_| 139.7),
                    ..PredictionPayload::default()
                },
                score: 10,
                screenshot_path: None,
                mode: None,
                player: None,
            };
            log_round(&state, request).await.unwrap();
        }

        let mut out = Vec::new();
        let rows = export_dataset(&state, &mut out).await.unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("round_id,session_id,round_index"));
        assert!(lines[1].starts_with("a,s1,0,35.68,139.69,JP,AS,10,35.700000,139.700000,"), "{}", lines[1]);
        assert!(lines[2].starts_with("b,s1,0,"));
        assert!(lines[2].contains(",10,,,"), "{}", lines[2]);
    }
}

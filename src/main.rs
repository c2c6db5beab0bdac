use std::{
    fs::File,
    io::{self, BufWriter},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use geoloop_lib::{
    commands::{export_dataset, ingest_coordinate, list_rounds, CoordinateRequest, ListRoundsQuery},
    geo::{
        CountryResolver, Gazetteer, GridAssigner, NearestCentroidGeocoder, LEVEL_COARSE,
        UNKNOWN_COUNTRY,
    },
    settings::Settings,
    utils::logging::init_logging,
    AppState,
};

#[derive(Parser, Debug)]
#[command(about = "Offline tools for the geoloop round store and geo resolution")]
struct Args {
    #[arg(long, default_value = "geoloop.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write every stored round as CSV.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List stored rounds, newest first, as JSON lines.
    Rounds {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u64>,
    },
    /// Print the grid cell for a coordinate.
    Grid {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = LEVEL_COARSE)]
        level: u8,
    },
    /// Resolve a country label and/or coordinate to a country code.
    Resolve {
        label: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Record a ground-truth coordinate in the coordinate log.
    Ingest {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        round: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let settings = Settings::load(&args.settings)?;

    match args.command {
        Command::Grid { lat, lon, level } => {
            let cell = GridAssigner::standard().assign(Some(lat), Some(lon), level);
            println!("{}", serde_json::to_string_pretty(&cell)?);
        }
        Command::Resolve { label, lat, lon } => {
            let gazetteer = Arc::new(Gazetteer::builtin()?);
            let resolver = CountryResolver::new(Arc::clone(&gazetteer))
                .with_geocoder(Arc::new(NearestCentroidGeocoder::new(gazetteer)))
                .with_timeout(settings.geocoder_timeout());
            match resolver.try_resolve(label.as_deref(), lat, lon).await {
                Ok(code) => println!("{code}"),
                Err(failure) => {
                    info!("unresolved: {failure}");
                    println!("{UNKNOWN_COUNTRY}");
                }
            }
        }
        Command::Export { out } => {
            let state = AppState::from_settings(settings)?;
            let rows = match out {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    export_dataset(&state, BufWriter::new(file)).await?
                }
                None => export_dataset(&state, io::stdout().lock()).await?,
            };
            info!("Exported {rows} rounds");
        }
        Command::Rounds {
            session,
            limit,
            offset,
        } => {
            let state = AppState::from_settings(settings)?;
            let query = ListRoundsQuery {
                session_id: session,
                limit,
                offset,
            };
            for summary in list_rounds(&state, query).await? {
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
        Command::Ingest {
            lat,
            lon,
            session,
            round,
        } => {
            let state = AppState::from_settings(settings)?;
            let request = CoordinateRequest {
                lat,
                lon,
                source: Some("cli".into()),
                captured_at: None,
                session_id: session,
                round_id: round,
                round_index: None,
                metadata: None,
            };
            let response = ingest_coordinate(&state, request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

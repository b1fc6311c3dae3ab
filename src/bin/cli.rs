//! Logbook CLI
//!
//! Command-line interface for Logbook operations:
//! - Record voyages, checkpoints and track points
//! - Import GPS tracks from CSV
//! - Query data
//! - Inspect and compact the database

use anyhow::{bail, Context};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use logbook::config::{generate_default_config, Config};
use logbook::import::TrackImporter;
use logbook::ingest::{Arrival, Ingestor, NewCheckpoint, NewTrackPoint, NewVoyage};
use logbook::query::QueryRouter;
use logbook::storage::{DocumentStore, Location, Stored, Voyage, WeatherInfo};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "logbook")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Voyage telemetry store for ships, checkpoints and GPS tracks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Database name (overrides config)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the collections and indexes (idempotent)
    Init,

    /// Start a voyage
    Depart {
        /// Ship identifier
        #[arg(long)]
        ship_id: String,
        /// Ship name
        #[arg(long)]
        ship_name: String,
        /// Departure port
        #[arg(long)]
        port: String,
        /// Voyage id (default: generated)
        #[arg(long)]
        id: Option<String>,
        /// Departure time (default: now). Supports: "now", ISO 8601, Unix millis, "-2h"
        #[arg(short, long, allow_hyphen_values = true)]
        time: Option<String>,
    },

    /// Complete a voyage
    Arrive {
        voyage_id: String,
        /// Arrival port
        #[arg(long)]
        port: Option<String>,
        /// Arrival time (default: now)
        #[arg(short, long, allow_hyphen_values = true)]
        time: Option<String>,
    },

    /// Cancel a voyage
    Cancel { voyage_id: String },

    /// Record a checkpoint
    Checkpoint {
        voyage_id: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Timestamp (default: now)
        #[arg(short, long, allow_hyphen_values = true)]
        time: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Weather condition (e.g. "fair")
        #[arg(long)]
        weather: Option<String>,
        /// Wind speed in knots
        #[arg(long)]
        wind: Option<f64>,
        /// Extra JSON payload
        #[arg(long)]
        payload: Option<String>,
    },

    /// Record a GPS track point
    Track {
        voyage_id: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Speed over ground in knots
        #[arg(long, default_value = "0")]
        speed: f64,
        /// Heading in degrees
        #[arg(long, default_value = "0")]
        heading: f64,
        #[arg(long, allow_hyphen_values = true)]
        altitude: Option<f64>,
        /// Timestamp (default: now)
        #[arg(short, long, allow_hyphen_values = true)]
        time: Option<String>,
    },

    /// Import GPS track points from CSV
    ImportTracks {
        /// Path to CSV file
        path: PathBuf,
        /// Voyage for every row (required without a voyage_id column)
        #[arg(long)]
        voyage: Option<String>,
        /// Timestamp format (strftime format)
        #[arg(long)]
        timestamp_format: Option<String>,
        /// Dry run (don't actually import)
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a query, e.g. "FIND checkpoints WHERE voyage_id = 'V1'"
    Query {
        query: String,
        /// Show the plan without running the query
        #[arg(long)]
        explain: bool,
    },

    /// List voyages, newest first
    Voyages {
        /// Only voyages of this ship (ordered by departure)
        #[arg(long)]
        ship: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Show a voyage with its checkpoints and track
    Show { voyage_id: String },

    /// Show database statistics
    Stats,

    /// Rewrite collection logs, dropping superseded versions
    Compact {
        /// Collection (default: all)
        collection: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_config(output.as_deref());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(database) = &cli.database {
        config.storage.database = database.clone();
    }
    config.logging.init_tracing()?;

    let store = Arc::new(
        DocumentStore::open(config.to_storage_config())
            .await
            .context("Failed to open database")?,
    );
    logbook::schema::initialize(&store).await?;

    let result = run(&cli, &config, &store).await;
    store.shutdown().await?;
    result
}

async fn run(cli: &Cli, config: &Config, store: &Arc<DocumentStore>) -> anyhow::Result<()> {
    let ingestor = Ingestor::new(Arc::clone(store), config.ingest.clone());
    let router = QueryRouter::new(Arc::clone(store));
    let json = cli.format == "json";

    match &cli.command {
        Commands::Init => {
            let collections = store.collection_names().await;
            println!("Database ready at {:?}", store.database_dir());
            for name in collections {
                let specs = store.index_specs(&name).await?;
                let fields: Vec<String> = specs
                    .iter()
                    .map(|s| {
                        if s.unique {
                            format!("{} (unique)", s.field)
                        } else {
                            s.field.clone()
                        }
                    })
                    .collect();
                println!("  {:<12} {}", name, fields.join(", "));
            }
        }

        Commands::Depart {
            ship_id,
            ship_name,
            port,
            id,
            time,
        } => {
            let mut request = NewVoyage::new(ship_id, ship_name, port);
            if let Some(id) = id {
                request = request.with_id(id);
            }
            if let Some(time) = time {
                request = request.departing_at(parse_time(time)?);
            }
            let voyage = ingestor.depart_voyage(request).await?;
            print_record(json, &voyage, |v| {
                format!(
                    "Voyage {} departed {} at {}",
                    v.record.voyage_id,
                    v.record.departure_port,
                    format_time(v.record.departure_time)
                )
            })?;
        }

        Commands::Arrive {
            voyage_id,
            port,
            time,
        } => {
            let arrival = Arrival {
                arrival_port: port.clone(),
                arrival_time: time.as_deref().map(parse_time).transpose()?,
            };
            let voyage = ingestor.arrive_voyage(voyage_id, arrival).await?;
            print_record(json, &voyage, |v| {
                format!(
                    "Voyage {} completed at {}",
                    v.record.voyage_id,
                    v.record
                        .arrival_time
                        .map(format_time)
                        .unwrap_or_else(|| "-".to_string())
                )
            })?;
        }

        Commands::Cancel { voyage_id } => {
            let voyage = ingestor.cancel_voyage(voyage_id).await?;
            print_record(json, &voyage, |v| {
                format!("Voyage {} cancelled", v.record.voyage_id)
            })?;
        }

        Commands::Checkpoint {
            voyage_id,
            lat,
            lon,
            time,
            description,
            weather,
            wind,
            payload,
        } => {
            let mut request = NewCheckpoint::new(voyage_id, Location::new(*lat, *lon));
            if let Some(time) = time {
                request = request.at(parse_time(time)?);
            }
            if let Some(description) = description {
                request = request.description(description);
            }
            if weather.is_some() || wind.is_some() {
                request.weather = Some(WeatherInfo {
                    condition: weather.clone(),
                    wind_speed: *wind,
                    ..Default::default()
                });
            }
            if let Some(payload) = payload {
                request = request.payload(
                    serde_json::from_str(payload).context("Payload is not valid JSON")?,
                );
            }
            let checkpoint = ingestor.record_checkpoint(request).await?;
            print_record(json, &checkpoint, |c| {
                format!(
                    "Checkpoint #{} recorded for voyage {} at {}",
                    c.id,
                    c.record.voyage_id,
                    format_time(c.record.timestamp)
                )
            })?;
        }

        Commands::Track {
            voyage_id,
            lat,
            lon,
            speed,
            heading,
            altitude,
            time,
        } => {
            let mut request =
                NewTrackPoint::new(voyage_id, Location::new(*lat, *lon)).moving(*speed, *heading);
            request.altitude = *altitude;
            if let Some(time) = time {
                request = request.at(parse_time(time)?);
            }
            let receipt = ingestor.record_track_point(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            } else {
                println!(
                    "Track point #{} recorded for voyage {} at {}{}",
                    receipt.track.id,
                    receipt.track.record.voyage_id,
                    format_time(receipt.track.record.timestamp),
                    if receipt.out_of_order {
                        " (out of order)"
                    } else {
                        ""
                    }
                );
            }
        }

        Commands::ImportTracks {
            path,
            voyage,
            timestamp_format,
            dry_run,
        } => {
            if !path.exists() {
                bail!("File not found: {:?}", path);
            }

            let mut importer = TrackImporter::new();
            if let Some(voyage) = voyage {
                importer = importer.with_voyage_id(voyage);
            }
            if let Some(format) = timestamp_format {
                importer = importer.with_timestamp_format(format);
            }

            let result = importer.import(path)?;

            println!("Import results:");
            println!("  Rows processed: {}", result.rows_processed);
            println!("  Rows failed: {}", result.rows_failed);

            if !result.errors.is_empty() {
                println!();
                println!("Errors (first 10):");
                for error in result.errors.iter().take(10) {
                    println!("  {}", error);
                }
            }

            if *dry_run {
                println!();
                println!("(Dry run - no data was imported)");
            } else if !result.points.is_empty() {
                let summary = importer.load(&ingestor, result.points).await?;
                println!();
                println!("  Imported: {}", summary.imported);
                if summary.out_of_order > 0 {
                    println!("  Out of order: {}", summary.out_of_order);
                }
            }
        }

        Commands::Query { query, explain } => {
            let parsed = logbook::query::parse_query(query)?;
            if *explain {
                println!("{}", router.explain(&parsed).await?);
                return Ok(());
            }

            let outcome = router.execute(&parsed).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }

            if json {
                let rows: Vec<serde_json::Value> = outcome
                    .documents
                    .iter()
                    .map(|doc| {
                        let mut fields = doc.fields.clone();
                        fields.insert("id".to_string(), doc.id.0.into());
                        serde_json::Value::Object(fields)
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for doc in &outcome.documents {
                    let body = serde_json::to_string(&doc.fields)?;
                    println!("{:>6}  {}", doc.id, body);
                }
                println!();
                println!(
                    "{} documents ({} scanned) in {} ms",
                    outcome.len(),
                    outcome.scanned,
                    outcome.execution_time_ms
                );
                println!("Plan: {}", outcome.plan);
            }
        }

        Commands::Voyages {
            ship,
            limit,
            offset,
        } => {
            let voyages = match ship {
                Some(ship) => router.voyages_for_ship(ship).await?,
                None => {
                    let limit = limit.unwrap_or(config.query.default_page_size);
                    router.list_voyages(limit, *offset).await?
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&voyages)?);
            } else if voyages.is_empty() {
                println!("No voyages recorded yet.");
                println!();
                println!("Start one with:");
                println!("  logbook-cli depart --ship-id S1 --ship-name Albatross --port Kiel");
            } else {
                print_voyage_table(&voyages);
            }
        }

        Commands::Show { voyage_id } => {
            let Some(details) = router.voyage_details(voyage_id).await? else {
                bail!("Voyage not found: {}", voyage_id);
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
                return Ok(());
            }

            let v = &details.voyage.record;
            println!("Voyage {} ({})", v.voyage_id, v.status);
            println!("  Ship:      {} ({})", v.ship_name, v.ship_id);
            println!(
                "  Departed:  {} at {}",
                v.departure_port,
                format_time(v.departure_time)
            );
            if let Some(arrival) = v.arrival_time {
                println!(
                    "  Arrived:   {} at {}",
                    v.arrival_port.as_deref().unwrap_or("-"),
                    format_time(arrival)
                );
            }

            println!();
            println!("Checkpoints ({}):", details.checkpoints.len());
            for c in &details.checkpoints {
                println!(
                    "  {}  {:>9.4} {:>10.4}  {}",
                    format_time(c.record.timestamp),
                    c.record.location.latitude,
                    c.record.location.longitude,
                    c.record.description.as_deref().unwrap_or("")
                );
            }

            println!();
            println!("Track points: {}", details.gps_tracks.len());
            if let (Some(first), Some(last)) =
                (details.gps_tracks.first(), details.gps_tracks.last())
            {
                println!(
                    "  {} .. {}",
                    format_time(first.record.timestamp),
                    format_time(last.record.timestamp)
                );
            }
        }

        Commands::Stats => {
            let stats = store.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Logbook v{}", env!("CARGO_PKG_VERSION"));
            println!("Database: {:?}", store.database_dir());
            println!();
            println!(
                "{:<14} {:>10} {:>12} {:>12}",
                "Collection", "Documents", "Log records", "Size"
            );
            println!("{}", "-".repeat(51));
            for c in &stats.collections {
                println!(
                    "{:<14} {:>10} {:>12} {:>12}",
                    c.name,
                    c.documents,
                    c.log_records,
                    format_bytes(c.log_size_bytes)
                );
                for index in &c.indexes {
                    println!(
                        "  index {:<16} {:>8} entries {:>8} keys{}",
                        index.field,
                        index.entries,
                        index.distinct_keys,
                        if index.unique { " unique" } else { "" }
                    );
                }
            }
            println!();
            println!("{}", stats);
        }

        Commands::Compact { collection } => {
            let names = match collection {
                Some(name) => vec![name.clone()],
                None => store.collection_names().await,
            };
            for name in names {
                let dropped = store.compact(&name).await?;
                println!("{}: dropped {} superseded records", name, dropped);
            }
        }

        Commands::Config { output } => write_config(output.as_deref())?,
    }

    Ok(())
}

fn write_config(output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = generate_default_config();
    match output {
        Some(path) => {
            // Create parent directory if needed
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &config)?;
            println!("Config written to {:?}", path);
        }
        None => print!("{}", config),
    }
    Ok(())
}

/// Parse a timestamp: "now", ISO 8601, Unix millis, or an offset from now
/// such as "-2h" or "-30m"
fn parse_time(s: &str) -> anyhow::Result<i64> {
    let s = s.trim();
    if s == "now" {
        return Ok(Utc::now().timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }
    if let Some(offset) = s.strip_prefix('-') {
        let offset = parse_duration(offset)?;
        return Utc::now()
            .checked_sub_signed(offset)
            .map(|dt| dt.timestamp_millis())
            .with_context(|| format!("Timestamp out of range: {}", s));
    }
    bail!("Invalid timestamp format: {}", s)
}

fn parse_duration(s: &str) -> anyhow::Result<TimeDelta> {
    let s = s.trim().to_lowercase();

    let (amount, unit): (&str, fn(i64) -> Option<TimeDelta>) =
        if let Some(days) = s.strip_suffix('d') {
            (days, TimeDelta::try_days)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, TimeDelta::try_hours)
        } else if let Some(minutes) = s.strip_suffix('m') {
            (minutes, TimeDelta::try_minutes)
        } else if let Some(seconds) = s.strip_suffix('s') {
            (seconds, TimeDelta::try_seconds)
        } else {
            bail!("Invalid duration format: {}. Use: 30s, 15m, 2h, 1d", s)
        };

    unit(amount.parse()?).with_context(|| format!("Duration out of range: {}", s))
}

fn format_time(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_record<R: serde::Serialize>(
    json: bool,
    record: &R,
    summary: impl Fn(&R) -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("{}", summary(record));
    }
    Ok(())
}

fn print_voyage_table(voyages: &[Stored<Voyage>]) {
    println!(
        "{:<38} {:<16} {:<12} {:<20} {}",
        "Voyage", "Ship", "Status", "Departed", "From"
    );
    println!("{}", "-".repeat(100));

    for v in voyages {
        let v = &v.record;
        println!(
            "{:<38} {:<16} {:<12} {:<20} {}",
            v.voyage_id,
            v.ship_name,
            v.status.to_string(),
            format_time(v.departure_time),
            v.departure_port
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2h").unwrap(), TimeDelta::hours(2));
        assert_eq!(parse_duration("30M").unwrap(), TimeDelta::minutes(30));
        assert!(parse_duration("2w").is_err());
        assert!(parse_duration("99999999999999999d").is_err());
    }

    #[test]
    fn test_parse_time_out_of_range() {
        assert_eq!(parse_time("1700000000000").unwrap(), 1_700_000_000_000);
        assert!(parse_time("-1h").unwrap() < Utc::now().timestamp_millis());
        assert!(parse_time("-99999999999999999d").is_err());
        assert!(parse_time("-106751991d").is_err());
        assert!(parse_time("yesterday").is_err());
    }
}

//! # HCS CLI - Analysis Job Runner
//!
//! Runs analysis jobs defined in YAML project files and materializes result
//! tables from the store.
//!
//! ## Usage
//!
//! ```bash
//! # Run an analysis job
//! hcs-cli run --project project.yml --database results.hcsdb
//!
//! # List per-object results of one image
//! hcs-cli export --database results.hcsdb list --image img_01.png
//!
//! # Plate rollup as CSV
//! hcs-cli export --database results.hcsdb plate > plate.csv
//!
//! # Enable debug logging
//! RUST_LOG=debug hcs-cli run --project project.yml --database results.hcsdb
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hcs_core::settings::{AnalyzeSettings, ObjectFilter, ResultsSettings};
use hcs_db::Database;
use hcs_engine::{FileImageReader, JobRunner};
use hcs_query::{Dashboard, Grouping, StatsPerGroup, StatsPerImage, Table};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments of the analysis runner
#[derive(Parser, Debug)]
#[command(name = "hcs-cli")]
#[command(about = "High-content screening analysis runner")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an analysis job from a YAML project file
    Run {
        /// Project YAML defining experiment, plate, classes, and pipelines
        #[arg(short, long)]
        project: PathBuf,
        /// Database file results are written to
        #[arg(short, long)]
        database: PathBuf,
        /// Job name recorded in the store
        #[arg(long, default_value = "analysis")]
        job_name: String,
    },
    /// Materialize result tables from a database
    Export {
        /// Database file to read
        #[arg(short, long)]
        database: PathBuf,
        #[command(subcommand)]
        shape: ExportShape,
    },
    /// Show experiment and job metadata of a database
    Info {
        #[arg(short, long)]
        database: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ExportShape {
    /// One row per object of one image
    List {
        /// File name of the image to list
        #[arg(long)]
        image: String,
    },
    /// Density heatmap grids of one image
    Heatmap {
        #[arg(long)]
        image: String,
    },
    /// One row per image of one well
    Well {
        #[arg(long)]
        group_id: u16,
    },
    /// One row per well of the plate
    Plate,
    /// Dashboard tables of one image, aligned by parent/tracking id
    Dashboard {
        #[arg(long)]
        image: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run { project, database, job_name } => run_job(project, database, job_name).await,
        Command::Export { database, shape } => export(database, shape),
        Command::Info { database } => info_cmd(database),
    }
}

async fn run_job(project: PathBuf, database: PathBuf, job_name: String) -> Result<()> {
    let yaml = std::fs::read_to_string(&project)
        .with_context(|| format!("read {}", project.display()))?;
    let settings: AnalyzeSettings = serde_yaml::from_str(&yaml).context("parse project file")?;

    let db = Arc::new(Database::open(&database)?);
    let runner = JobRunner::new(db.clone(), Arc::new(FileImageReader::new()), settings);
    let cancel = runner.cancel_token();
    let progress = runner.progress();

    tokio::select! {
        result = runner.start(&job_name) => {
            let job_id = result?;
            let snapshot = progress.snapshot();
            info!(
                job_id,
                completed = snapshot.completed,
                failed = snapshot.failed,
                "job done"
            );
        }
        _ = signal::ctrl_c() => {
            println!("\nReceived Ctrl-C, draining running tiles...");
            cancel.cancel();
        }
    }
    Ok(())
}

/// Results settings of the most recent job, with the caller's scope applied.
fn load_results_settings(db: &Database, filter: ObjectFilter) -> Result<ResultsSettings> {
    let meta = db.select_experiment()?;
    if meta.job_id.is_empty() {
        bail!("database holds no job");
    }
    let text = db.select_results_table_settings(&meta.job_id)?;
    let mut settings: ResultsSettings = if !text.is_empty() {
        serde_json::from_str(&text).context("parse results settings")?
    } else {
        // No stored table settings: derive a default set from the
        // analyze-settings cache, or from the job document when the cache
        // saw no measurements.
        let from_cache = hcs_query::results_settings_from_cache(&db)?;
        if from_cache.columns().is_empty() {
            let analyze = AnalyzeSettings::from_json_string(&meta.settings_json)?;
            analyze.to_results_settings()
        } else {
            from_cache
        }
    };
    settings.set_object_filter(filter);
    Ok(settings)
}

fn export(database: PathBuf, shape: ExportShape) -> Result<()> {
    let db = Database::open(&database)?;
    match shape {
        ExportShape::List { image } => {
            let mut filter = ObjectFilter::default();
            filter.image_ids.insert(db.select_image_id_from_file_name(&image)?);
            let settings = load_results_settings(&db, filter)?;
            let table = StatsPerImage::to_table(&db, &settings)?;
            print_table(&table);
        }
        ExportShape::Heatmap { image } => {
            let mut filter = ObjectFilter::default();
            filter.image_ids.insert(db.select_image_id_from_file_name(&image)?);
            let settings = load_results_settings(&db, filter)?;
            for (key, grid) in StatsPerImage::to_heatmap(&db, &settings)? {
                println!("# {}", key.create_header());
                print_table(&grid);
            }
        }
        ExportShape::Well { group_id } => {
            let filter = ObjectFilter { group_id, ..Default::default() };
            let settings = load_results_settings(&db, filter)?;
            let (table, _) = StatsPerGroup::to_table(&db, &settings, Grouping::ByWell)?;
            print_table(&table);
        }
        ExportShape::Plate => {
            let settings = load_results_settings(&db, ObjectFilter::default())?;
            let (table, _) = StatsPerGroup::to_table(&db, &settings, Grouping::ByPlate)?;
            print_table(&table);
        }
        ExportShape::Dashboard { image } => {
            let mut filter = ObjectFilter::default();
            filter.image_ids.insert(db.select_image_id_from_file_name(&image)?);
            let settings = load_results_settings(&db, filter)?;
            let table = StatsPerImage::to_table(&db, &settings)?;
            let coloc = db.select_colocalizing_classes()?;
            for (key, tab) in Dashboard::convert(&table, &coloc, true) {
                println!("# {:?} {}", key.dashboard_type, tab.title());
                print_table(&tab);
            }
        }
    }
    Ok(())
}

fn info_cmd(database: PathBuf) -> Result<()> {
    let db = Database::open(&database)?;
    let meta = db.select_experiment()?;
    println!("experiment: {} ({})", meta.experiment.experiment_name, meta.experiment.experiment_id);
    for job in db.select_jobs()? {
        let state = if job.time_finished_us.is_some() { "finished" } else { "open" };
        println!("job: {} ({}) {state}", job.job_name, job.job_id);
    }
    println!("images: {}", db.select_images()?.len());
    Ok(())
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Print a table as CSV with the row headers in the first column.
fn print_table(table: &Table) {
    let cols: Vec<i32> = table.columns().keys().copied().collect();
    let header: Vec<String> = std::iter::once(String::new())
        .chain(cols.iter().map(|c| csv_escape(&table.columns()[c].header)))
        .collect();
    println!("{}", header.join(","));

    for row in 0..table.nr_of_rows() {
        let mut line = vec![csv_escape(table.row_header(row))];
        for col in &cols {
            match table.cell(row, *col) {
                Some(cell) if cell.value.is_nan() => line.push(String::new()),
                Some(cell) => line.push(format!("{}", cell.value)),
                None => line.push(String::new()),
            }
        }
        println!("{}", line.join(","));
    }
}

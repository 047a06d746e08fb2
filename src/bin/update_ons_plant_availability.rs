use std::{error::Error, path::Path, path::PathBuf, process::ExitCode};

use clap::Parser;
use log::{error, info, warn};
use ons_ingest::{
    db::{
        ons::{
            config::PipelineConfig,
            plant_availability_archive::{PeriodReport, PlantAvailabilityArchive},
        },
        prod_db::ProdDb,
    },
    interval::month::Month,
};
use tabled::{builder::Builder, settings::Style};

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Download the ONS hourly plant availability files and load them into the staging table."
)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Path to a json config file, use the production config if missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Months to load instead of the configured ones, e.g. 2025_07,2025_08
    #[arg(short, long, value_delimiter = ',')]
    months: Option<Vec<Month>>,

    /// Print the reports as json instead of a table
    #[arg(long)]
    json: bool,
}

/// Make an ASCII table from the reports
fn ascii_table(reports: &[PeriodReport]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec![
        "Month", "State", "In file", "Parsed", "Loaded", "Rejected", "Error",
    ]);
    for report in reports {
        builder.push_record(vec![
            report.month.token(),
            report.state.to_string(),
            report
                .summary
                .map(|s| s.rows_in_file.to_string())
                .unwrap_or_default(),
            report
                .summary
                .map(|s| s.rows_parsed.to_string())
                .unwrap_or_default(),
            report
                .summary
                .map(|s| s.rows_loaded.to_string())
                .unwrap_or_default(),
            report
                .summary
                .map(|s| s.rows_rejected().to_string())
                .unwrap_or_default(),
            report.error.clone().unwrap_or_default(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}

fn run(args: &Args) -> Result<Vec<PeriodReport>, Box<dyn Error>> {
    let env_file = format!(".env/{}.env", args.env);
    if let Err(e) = dotenvy::from_path(Path::new(&env_file)) {
        warn!("Not loading {}: {}", env_file, e);
    }

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => ProdDb::ons_plant_availability(),
    };
    if let Some(months) = &args.months {
        config = config.with_periods(months.clone());
    }
    info!(
        "Loading {} months into {}",
        config.periods.len(),
        config.qualified_table()
    );

    let archive = PlantAvailabilityArchive::from_config(config)?;
    Ok(archive.run())
}

/// Run this job once a month, after ONS publishes the previous month.
fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let reports = match run(&args) {
        Ok(reports) => reports,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("Failed to write the reports as json: {}", e),
        }
    } else {
        println!("{}", ascii_table(&reports));
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        error!("{} of {} months failed", failed, reports.len());
        return ExitCode::FAILURE;
    }
    info!("Done");
    ExitCode::SUCCESS
}

//! Operator CLI for the sensor store
//!
//! Usage:
//!   sensorctl ingest <file|->       Validate and append raw lines
//!   sensorctl run                   Run the pipeline once
//!   sensorctl query <from> <to>     Print readings and daily Power as JSON
//!   sensorctl health                Check the database
//!
//! The database path comes from SENSOR_DB_PATH (see `PipelineConfig`).

use dotenv::dotenv;
use sensorline::{PipelineConfig, PipelineEngine, QueryRange};
use serde::Serialize;
use std::io::Read;
use std::process::ExitCode;

const USAGE: &str = "usage: sensorctl <ingest <file|-> | run | query <from> <to> | health>";

enum Command {
    Ingest(String),
    Run,
    Query(String, String),
    Health,
}

fn parse_args(args: &[String]) -> Option<Command> {
    match args {
        [cmd, source] if cmd == "ingest" => Some(Command::Ingest(source.clone())),
        [cmd] if cmd == "run" => Some(Command::Run),
        [cmd, from, to] if cmd == "query" => Some(Command::Query(from.clone(), to.clone())),
        [cmd] if cmd == "health" => Some(Command::Health),
        _ => None,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_source(source: &str) -> std::io::Result<String> {
    if source == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        Ok(body)
    } else {
        std::fs::read_to_string(source)
    }
}

fn execute(command: Command, engine: &PipelineEngine) -> Result<bool, Box<dyn std::error::Error>> {
    match command {
        Command::Ingest(source) => {
            let body = read_source(&source)?;
            let outcome = engine.ingest(&body)?;
            print_json(&outcome)?;
            Ok(outcome.is_accepted())
        }
        Command::Run => {
            let summary = engine.run_pipeline()?;
            print_json(&summary)?;
            Ok(true)
        }
        Command::Query(from, to) => {
            let Some(range) = QueryRange::parse(&from, &to) else {
                log::error!("❌ Invalid date range: {} .. {}", from, to);
                return Ok(false);
            };
            print_json(&engine.query(&range)?)?;
            Ok(true)
        }
        Command::Health => {
            let healthy = engine.health_check();
            print_json(&serde_json::json!({ "healthy": healthy }))?;
            Ok(healthy)
        }
    }
}

fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let config = PipelineConfig::from_env();
    let engine = match PipelineEngine::open(&config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("❌ Failed to open {}: {}", config.db_path, e);
            return ExitCode::FAILURE;
        }
    };

    match execute(command, &engine) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use staywise_core::{
    ComplianceEngine, EngineConfig, PassportCandidate, PlannedTrip, PolicyTable, RawVisit,
    StayPolicy, ValidationMode, DEFAULT_VISA_TYPE,
};
use staywise_observability::{init_tracing, RunMetrics};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "staywise")]
#[command(about = "Stay-limit compliance calculator")]
struct Cli {
    /// JSON array of stay policies.
    #[arg(long, env = "STAYWISE_POLICY_FILE")]
    policies: Option<PathBuf>,

    /// `strict` fails on the first invalid visit, `tolerant` reports and skips it.
    #[arg(long, env = "STAYWISE_MODE", default_value = "tolerant")]
    mode: String,

    /// Disable the 90/180 fallback for countries without a policy.
    #[arg(long, env = "STAYWISE_NO_DEFAULT_POLICY")]
    no_default_policy: bool,

    /// Print run counters to stderr when done.
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Schengen 90/180 status.
    Schengen {
        #[arg(long)]
        visits: PathBuf,
        #[arg(long, value_parser = parse_date)]
        as_of: NaiveDate,
    },
    /// Schengen plus per-country status with warnings and recommendations.
    Status {
        #[arg(long)]
        visits: PathBuf,
        #[arg(long, value_parser = parse_date)]
        as_of: NaiveDate,
    },
    /// Check a planned trip before booking it.
    ValidateTrip {
        #[arg(long)]
        visits: PathBuf,
        #[arg(long)]
        country: String,
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        now: NaiveDate,
        #[arg(long, default_value = DEFAULT_VISA_TYPE)]
        visa_type: String,
    },
    /// Overstay warnings, Schengen listed separately.
    Warnings {
        #[arg(long)]
        visits: PathBuf,
        #[arg(long, value_parser = parse_date)]
        as_of: NaiveDate,
    },
    /// Rank passports for a destination.
    Compare {
        #[arg(long)]
        passports: PathBuf,
        #[arg(long)]
        destination: String,
        #[arg(long, value_parser = parse_date)]
        as_of: NaiveDate,
        /// Days already used per passport, as `passport_id=days`.
        #[arg(long = "used", value_parser = parse_usage)]
        used: Vec<(String, i64)>,
    },
    /// First date a trip of the given length fits.
    EarliestEntry {
        #[arg(long)]
        visits: PathBuf,
        #[arg(long)]
        country: String,
        #[arg(long)]
        days: i64,
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,
        #[arg(long)]
        visa_type: Option<String>,
    },
    /// Longest compliant stay entering on a date.
    MaxStay {
        #[arg(long)]
        visits: PathBuf,
        #[arg(long)]
        country: String,
        #[arg(long, value_parser = parse_date)]
        entry: NaiveDate,
        #[arg(long)]
        visa_type: Option<String>,
    },
}

fn main() -> Result<()> {
    init_tracing("staywise_cli");
    let cli = Cli::parse();

    let metrics = RunMetrics::shared();
    let engine = build_engine(&cli)?;
    let started = Instant::now();

    match cli.command {
        Command::Schengen { visits, as_of } => {
            let status = engine.calculate_schengen_status(&load_visits(&visits)?, as_of)?;
            if !status.is_compliant {
                metrics.inc_violation();
            }
            print_json(&status)?;
        }
        Command::Status { visits, as_of } => {
            let result = engine.calculate_comprehensive_status(&load_visits(&visits)?, as_of)?;
            metrics.add_rejected(result.rejected.len());
            if !result.status.is_compliant
                || result.countries.iter().any(|c| !c.status.is_compliant)
            {
                metrics.inc_violation();
            }
            print_json(&result)?;
        }
        Command::ValidateTrip {
            visits,
            country,
            start,
            end,
            now,
            visa_type,
        } => {
            let trip = PlannedTrip {
                country_code: country,
                visa_type,
                start,
                end,
            };
            let assessment = engine.validate_future_trip(&load_visits(&visits)?, &trip, now)?;
            if !assessment.can_travel {
                metrics.inc_violation();
            }
            print_json(&assessment)?;
        }
        Command::Warnings { visits, as_of } => {
            let report = engine.check_overstay_warnings(&load_visits(&visits)?, as_of)?;
            metrics.add_rejected(report.rejected.len());
            print_json(&report)?;
        }
        Command::Compare {
            passports,
            destination,
            as_of,
            used,
        } => {
            let candidates: Vec<PassportCandidate> = load_json(&passports)?;
            let used = used.into_iter().collect::<HashMap<_, _>>();
            let comparison = engine.compare_passports(&candidates, &destination, &used, as_of)?;
            print_json(&comparison)?;
        }
        Command::EarliestEntry {
            visits,
            country,
            days,
            from,
            visa_type,
        } => {
            let date = engine.earliest_entry(
                &load_visits(&visits)?,
                &country,
                visa_type.as_deref(),
                days,
                from,
            )?;
            print_json(&serde_json::json!({
                "country": country,
                "days": days,
                "earliest_entry": date,
            }))?;
        }
        Command::MaxStay {
            visits,
            country,
            entry,
            visa_type,
        } => {
            let max_days =
                engine.max_stay(&load_visits(&visits)?, &country, visa_type.as_deref(), entry)?;
            print_json(&serde_json::json!({
                "country": country,
                "entry": entry,
                "max_stay_days": max_days,
            }))?;
        }
    }

    metrics.inc_evaluation();
    metrics.observe_latency(started.elapsed());
    info!("evaluation complete");

    if cli.metrics {
        eprintln!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    }

    Ok(())
}

fn build_engine(cli: &Cli) -> Result<ComplianceEngine> {
    let mode = ValidationMode::parse(&cli.mode)
        .ok_or_else(|| anyhow!("invalid --mode value `{}`", cli.mode))?;
    let default_policy = (!cli.no_default_policy).then(StayPolicy::default_rolling);

    let table = match &cli.policies {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed reading policies from {}", path.display()))?;
            PolicyTable::from_json_str(&json, default_policy)
                .with_context(|| format!("invalid policy table {}", path.display()))?
        }
        None => PolicyTable::new(Vec::new(), default_policy)?,
    };

    info!(
        policies = table.policies().len(),
        has_default = table.default_policy().is_some(),
        mode = ?mode,
        "policy table loaded"
    );

    Ok(ComplianceEngine::new(
        Arc::new(table),
        EngineConfig {
            mode,
            ..EngineConfig::default()
        },
    ))
}

fn load_visits(path: &Path) -> Result<Vec<RawVisit>> {
    load_json(path)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("`{value}` is not a YYYY-MM-DD date"))
}

fn parse_usage(value: &str) -> Result<(String, i64), String> {
    let (id, days) = value
        .split_once('=')
        .ok_or_else(|| format!("`{value}` must look like passport_id=days"))?;
    let days = days
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("`{days}` is not a whole number of days"))?;
    Ok((id.trim().to_string(), days))
}

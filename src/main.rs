//! airfield-briefing: refresh service for an airfield weather briefing.
//!
//! Single-binary Tokio application that:
//! 1. Loads and validates the schedule, upstream and AI configuration
//! 2. Warms the current refresh cycle on a fixed interval
//! 3. Journals every build to a daily JSONL file

mod config;
mod journal;

use std::sync::Arc;
use std::time::Duration;

use briefing::{RefreshEvent, RefreshScheduler, Schedule};
use chrono::Utc;
use clap::Parser;
use common::AppConfig;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::journal::{resolve_journal_dir, RefreshJournal};

/// Airfield weather briefing refresh service
#[derive(Parser)]
#[command(name = "airfield-briefing", about = "Airfield weather briefing refresh service")]
struct Cli {
    /// Build (or serve from cache) the current bundle, print it as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Validate configuration, print the effective schedule and exit.
    #[arg(long)]
    check_config: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

const DEFAULT_LOG_FILTER: &str =
    "airfield_briefing=info,briefing=info,llm_client=info,metar_client=info,open_meteo_client=info";

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn model_labels(cfg: &AppConfig) -> Vec<String> {
    cfg.ai
        .models
        .iter()
        .map(|spec| format!("{}:{}", spec.provider.as_str(), spec.model))
        .collect()
}

fn print_schedule(cfg: &AppConfig) -> anyhow::Result<()> {
    let schedule = Schedule::from_config(&cfg.schedule)?;
    let now = Utc::now();
    let cycle = schedule.cycle_at(now);
    let (start, end) = schedule.window();

    println!("timezone:      {}", schedule.timezone().name());
    println!("local time:    {}", schedule.local_label(now));
    println!("window:        {}-{}", start.format("%H:%M"), end.format("%H:%M"));
    println!(
        "slots:         {}",
        schedule
            .slots()
            .iter()
            .map(|slot| slot.format("%H:%M").to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("mode:          {:?}", cfg.schedule.mode);
    println!("current cycle: {} (in window: {})", cycle.key, schedule.in_window(now));
    println!("next cycle:    {}", schedule.next_cycle(cycle.key).key);
    println!("ai models:     {}", model_labels(cfg).join(", "));
    println!();
    println!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Airfield briefing starting up...");

    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Airfield: {} ({}), METAR station {}, position {:.5},{:.5}",
        cfg.airfield.name, cfg.airfield.icao, cfg.airfield.metar_station, cfg.airfield.lat, cfg.airfield.lon
    );
    info!(
        "Schedule: {} window {}-{}, {} slots, mode {:?}",
        cfg.schedule.timezone,
        cfg.schedule.window_start,
        cfg.schedule.window_end,
        cfg.schedule.slots.len(),
        cfg.schedule.mode
    );
    info!("AI chain: {}", model_labels(&cfg).join(" -> "));
    for provider in config::missing_credentials(&cfg) {
        warn!("No credential for {}; its models will be skipped", provider.as_str());
    }

    // ── Check-config mode ────────────────────────────────────────────
    if cli.check_config {
        return print_schedule(&cfg);
    }

    let scheduler = RefreshScheduler::from_config(&cfg)?;

    // ── Once mode ────────────────────────────────────────────────────
    if cli.once {
        let bundle = scheduler.get_current_bundle(Utc::now()).await;
        println!("{}", serde_json::to_string_pretty(&*bundle)?);
        return Ok(());
    }

    // ── Journal ──────────────────────────────────────────────────────
    let journal = RefreshJournal::open(resolve_journal_dir(), Utc::now())?;
    info!("Refresh journal path: {}", journal.dir().display());
    let journal = Arc::new(Mutex::new(journal));
    journal.lock().await.write_event(
        json!({
            "kind": "service_start",
            "airfield": cfg.airfield.icao,
            "metar_station": cfg.airfield.metar_station,
            "timezone": cfg.schedule.timezone,
            "window": [cfg.schedule.window_start, cfg.schedule.window_end],
            "slots": cfg.schedule.slots,
            "mode": cfg.schedule.mode,
            "models": model_labels(&cfg),
        }),
        Utc::now(),
    );

    let journal_handle = {
        let journal = Arc::clone(&journal);
        let mut events = scheduler.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let RefreshEvent::BuildFinished(report) = &event {
                            debug!("Journaling build {} for cycle {}", report.build_id, report.cycle);
                        }
                        journal.lock().await.record(&event, Utc::now());
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Refresh journal lagged; {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    // ── Cycle warmer ─────────────────────────────────────────────────
    let warmer_handle = {
        let scheduler = scheduler.clone();
        let interval = Duration::from_secs(cfg.schedule.warmer_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let bundle = scheduler.get_current_bundle(Utc::now()).await;
                debug!(
                    "Serving cycle {} (stale: {}, failed sources: {:?})",
                    bundle.cycle, bundle.stale, bundle.source_errors
                );
            }
        })
    };

    info!(
        "Cycle warmer running every {}s. Press Ctrl+C to stop.",
        cfg.schedule.warmer_interval_secs
    );

    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            "ctrl_c"
        }
        r = warmer_handle => {
            error!("Cycle warmer exited: {:?}", r);
            "warmer_exit"
        }
        r = journal_handle => {
            error!("Journal task exited: {:?}", r);
            "journal_exit"
        }
    };

    if let Some(report) = scheduler.status().await {
        info!(
            "Last build: cycle {} {:?}, failed sources {:?}",
            report.cycle, report.outcome, report.source_errors
        );
    }
    journal.lock().await.write_event(
        json!({
            "kind": "service_stop",
            "reason": shutdown_reason,
            "builds": scheduler.builds_started(),
        }),
        Utc::now(),
    );

    info!("Airfield briefing stopped.");
    Ok(())
}

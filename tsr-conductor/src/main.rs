/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use tsr_conductor::clock::SystemClock;
use tsr_conductor::conductor::Conductor;
use tsr_conductor::config::{self, Setup};
use tsr_conductor::notification::Notification;
use tsr_conductor::timeline::BasicResolver;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Timeline conductor.
///
/// Example:
///   tsr-conductor --config demos/setup.yaml --timeline demos/timeline.json
#[derive(Debug, Parser)]
#[command(
    name = "tsr-conductor",
    about = "Resolves a broadcast timeline and schedules device commands ahead of time",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML setup file (timing, devices, mappings).
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Path to a JSON timeline file.
    #[arg(short = 't', long = "timeline")]
    timeline: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!(config = %cli.config.display(), timeline = ?cli.timeline, "tsr-conductor starting up...");

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ── Load setup ────────────────────────────────────────────────────────────
    let setup = Setup::load_from_file(&cli.config)?;
    let timeline = match &cli.timeline {
        Some(path) => config::load_timeline(path)?,
        None => {
            warn!("No timeline file provided, starting with an empty timeline");
            Vec::new()
        }
    };

    let (conductor, mut notifications) = Conductor::new(
        setup.config,
        Arc::new(SystemClock),
        Arc::new(BasicResolver::new()),
    );

    // ── Register devices ──────────────────────────────────────────────────────
    for (id, options) in setup.devices {
        // A device that fails to register is reported and skipped.
        if let Err(e) = conductor.add_device(&id, options).await {
            warn!(device = %id, "device not registered: {}", e);
        }
    }
    conductor.set_mapping(setup.mappings)?;
    conductor.set_timeline(timeline);
    conductor.init();

    info!(devices = conductor.devices().len(), "conductor running, press Ctrl-C to stop");

    // ── Relay notifications until shutdown ────────────────────────────────────
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            n = notifications.recv() => match n {
                Some(n) => log_notification(&n),
                None => break,
            },
        }
    }

    info!("shutting down");
    conductor.destroy().await;
    Ok(())
}

fn log_notification(n: &Notification) {
    match n {
        Notification::Error(report) => error!(
            source = ?report.source,
            device = ?report.device_id,
            "{}", report.message
        ),
        Notification::SetTimelineTriggerTime(fixes) => {
            for fix in fixes {
                info!(object = %fix.id, time = fix.time, "\"now\" trigger fixed");
            }
        }
        Notification::TimelineCallback {
            time,
            object_id,
            callback,
            callback_data,
        } => info!(time, object = %object_id, callback = %callback, data = %callback_data, "timeline callback"),
        Notification::ConnectionChanged { device_id, connected } => {
            info!(device = %device_id, connected, "device connection changed")
        }
    }
}

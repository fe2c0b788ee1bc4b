// src/main.rs
mod cache;
mod clock;
mod config;
mod controller;
mod ctx;
mod errors;
mod fusion;
mod health;
mod hysteresis;
mod ir;
mod mail;
mod model;
mod msgcell;
mod pipeline;
mod selector;
mod sources;
mod states;
mod storage;
mod util;

use anyhow::Result;
use clap::Parser;
use pump_protocol::decimal_round;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();

    // -------- logging ----------
    std::fs::create_dir_all(&cli.log_dir)?;
    let file_appender = tracing_appender::rolling::never(&cli.log_dir, "controller.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pump_controller=debug".parse().unwrap())
                .add_directive("hyper=warn".parse().unwrap())
                .add_directive("reqwest=warn".parse().unwrap()),
        )
        .with_writer(writer)
        .with_ansi(false)
        .compact()
        .init();
    info!("----- START -----");

    // -------- config + services ----------
    let settings = config::Settings::load(&cli.config)?;
    info!(
        minimum_inside_temp = %decimal_round(settings.minimum_inside_temp, 1),
        timezone = %settings.timezone,
        "controller starting"
    );
    let ctx = ctx::Ctx::build(&cli, settings)?;

    // the clock has to be trustworthy before any cache window or forecast
    // comparison means anything
    clock::wait_for_valid_time(5 * 60).await;

    // -------- machine loop ----------
    let mut state = pipeline::PipelineState::new();
    tokio::select! {
        result = states::run_machine(&ctx, &mut state) => {
            warn!("machine loop ended unexpectedly");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received; exiting.");
        }
    }
    Ok(())
}

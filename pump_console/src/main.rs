// Operator console: drops command messages into the remote message cell the
// controller polls, and shows the controller's last log-cell write.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pump_protocol::{OperatorCommand, OperatorMessage, SET_POINTS};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Operator console for the heat-pump controller")]
struct Cli {
    /// URL of the message cell the controller polls
    #[arg(long, env = "PUMP_MESSAGE_CELL_URL")]
    message_cell_url: Option<String>,
    /// URL of the log cell the controller writes
    #[arg(long, env = "PUMP_LOG_CELL_URL")]
    log_cell_url: Option<String>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Hand control back to the autonomous loop
    Auto {
        /// Override the minimum inside temperature, in °C
        #[arg(long)]
        min_inside_temp: Option<Decimal>,
    },
    /// Turn the pump off
    Off,
    /// Heat at a fixed set-point
    SetTemp { temp: i32 },
    /// Show the controller's latest status trace
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Cmd::Auto { min_inside_temp } => {
            post_message(
                &client,
                cli.message_cell_url.as_deref(),
                OperatorMessage { command: OperatorCommand::Auto { min_inside_temp } },
            )
            .await
        }
        Cmd::Off => {
            post_message(
                &client,
                cli.message_cell_url.as_deref(),
                OperatorMessage { command: OperatorCommand::TurnOff },
            )
            .await
        }
        Cmd::SetTemp { temp } => {
            if !SET_POINTS.contains(&temp) {
                bail!("the pump only accepts set-points {SET_POINTS:?}");
            }
            post_message(
                &client,
                cli.message_cell_url.as_deref(),
                OperatorMessage { command: OperatorCommand::SetTemp { temp } },
            )
            .await
        }
        Cmd::Status => show_status(&client, cli.log_cell_url.as_deref()).await,
    }
}

async fn post_message(
    client: &reqwest::Client,
    url: Option<&str>,
    message: OperatorMessage,
) -> Result<()> {
    let url = url.context("no message cell URL configured")?;
    let body = message.to_wire_json();
    info!(url, body = %body, "posting operator message");
    client
        .post(url)
        .body(body)
        .send()
        .await?
        .error_for_status()
        .context("the message cell rejected the write")?;
    println!("sent: {}", message.command_word());
    println!("the controller picks it up within its next poll (up to ~10 minutes)");
    Ok(())
}

async fn show_status(client: &reqwest::Client, url: Option<&str>) -> Result<()> {
    let url = url.context("no log cell URL configured")?;
    let content = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    if content.trim().is_empty() {
        println!("the controller has not written a status yet");
    } else {
        println!("{content}");
    }
    Ok(())
}

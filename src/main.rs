//! `courier` developer CLI.
//!
//! `check-config` prints the effective configuration. `simulate` pushes
//! messages read from stdin through a real dispatcher backed by a client that
//! only logs, which makes coalescing and throttling visible without a network.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use courier::captcha::CaptchaHook;
use courier::client::{ApiClient, Response};
use courier::config::Config;
use courier::error::SendError;
use courier::message::{OutgoingMessage, PeerId};
use courier::Dispatcher;

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Outbound message dispatcher tools")]
struct Cli {
    /// Config file (defaults to $COURIER_CONFIG_PATH or ~/.courier/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load, validate and print the effective configuration.
    CheckConfig,
    /// Dispatch `<peer> <text>` or JSON lines from stdin through a logging client.
    Simulate {
        /// Override the configured sending interval.
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Simulated API latency per send.
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Command::Simulate {
            interval_ms,
            latency_ms,
        } => {
            if let Some(ms) = interval_ms {
                config.dispatch.sending_interval_ms = ms;
                config.dispatch.validate()?;
            }
            let _guard = match config.logging.logs_dir {
                Some(ref dir) => Some(courier::logging::init_production(dir, &config.logging.level)?),
                None => {
                    courier::logging::init_cli(&config.logging.level);
                    None
                }
            };
            simulate(&config, Duration::from_millis(latency_ms)).await
        }
    }
}

/// Client that logs each message and answers with a sequential message id.
struct LoggingClient {
    next_id: AtomicI64,
    latency: Duration,
}

#[async_trait]
impl ApiClient for LoggingClient {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Response, SendError> {
        tokio::time::sleep(self.latency).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            peer = %message.peer,
            message_id = id,
            text = %message.text,
            attachments = message.attachments.len(),
            "message sent"
        );
        Ok(serde_json::json!(id))
    }

    fn on_challenge_required(&self, _hook: CaptchaHook) {
        debug!("logging client never raises captcha");
    }
}

async fn simulate(config: &Config, latency: Duration) -> Result<()> {
    let client = Arc::new(LoggingClient {
        next_id: AtomicI64::new(1),
        latency,
    });
    let dispatcher = Dispatcher::new(client, &config.dispatch);
    dispatcher.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = parse_line(line)?;
        let peer = message.peer;
        let delivery = dispatcher.enqueue_outgoing(message);
        pending.push(tokio::spawn(async move {
            match delivery.await {
                Ok(response) => println!("peer {peer}: sent, response {response}"),
                Err(e) => println!("peer {peer}: failed, {e}"),
            }
        }));
    }

    for handle in pending {
        handle.await.context("delivery task panicked")?;
    }
    dispatcher.shutdown().await;
    Ok(())
}

/// Parse a JSON message object or a `<peer> <text>` line.
fn parse_line(line: &str) -> Result<OutgoingMessage> {
    if line.starts_with('{') {
        return serde_json::from_str(line).with_context(|| format!("invalid message JSON: {line}"));
    }
    let (peer, text) = line.split_once(' ').unwrap_or((line, ""));
    let peer: i64 = peer
        .parse()
        .with_context(|| format!("invalid peer id in line: {line}"))?;
    Ok(OutgoingMessage::text(PeerId::new(peer), text))
}

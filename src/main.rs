//! Webhook Relay Client
//!
//! A CLI tool for receiving webhooks on a local server.
//!
//! `listen` opens a WebSocket session to the relay service, which hands out
//! a public receive URL. Every webhook posted to that URL is replayed
//! against the given local URL, and the local server's response is sent
//! back to the original sender.

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

mod config;
mod error;
mod protocol;
mod relay;

use config::Config;
use relay::{ListenOptions, RelayClient};

#[derive(Parser, Debug)]
#[command(name = "webhook-relay")]
#[command(author, version, about = "Forward webhooks to your local server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward webhook requests to a local URL
    Listen(ListenArgs),
}

#[derive(Parser, Debug)]
struct ListenArgs {
    /// Local URL to forward webhooks to (e.g. http://localhost:8000/webhook/)
    url: Url,

    /// Disable session history logging on the relay
    #[arg(long)]
    no_logging: bool,

    /// Relay session token (defaults to the one saved in the config file)
    #[arg(long, env = "RELAY_TOKEN")]
    token: Option<String>,

    /// Alternate relay host, for testing
    #[arg(long, env = "RELAY_DEBUG_URL")]
    relay_host: Option<String>,

    /// Connect to the relay without TLS
    #[arg(long, env = "RELAY_DISABLE_SECURITY")]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Listen(args) => run_listen(args).await,
    }
}

async fn run_listen(args: ListenArgs) -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring config file: {:#}", e);
        Config::default()
    });

    let token = match args.token.or_else(|| config.relay.token.clone()) {
        Some(token) => token,
        None => {
            let token = relay::token::generate_token();
            if let Err(e) = Config::save_token(&token) {
                eprintln!("Failed to save relay token, it is only valid for this run: {:#}", e);
            }
            token
        }
    };

    let options = ListenOptions {
        disable_security: args.insecure || config.relay.disable_security,
        relay_host: args.relay_host.or(config.relay.debug_url),
        logging: !args.no_logging,
        ..ListenOptions::default()
    };

    let client = RelayClient::new(&token, args.url, options)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    client.listen(cancel).await.context("Webhook relay stopped")?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("error")
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

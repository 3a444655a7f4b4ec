//! Hoon Language Server - LSP on stdio, forwarded to a running ship.
//!
//! stdout carries the protocol, so logs go to a file (or stderr if the file
//! cannot be opened).

use anyhow::{Context, Result};
use clap::Parser;
use hoon_lsp::{Bridge, BridgeConfig, BridgeDefaults, LspConnection};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use urbit_channel::{
    login, retry_async, Channel, ChannelConfig, ChannelDefaults, ChannelError, RetryConfig,
};

#[derive(Parser, Debug)]
#[command(name = "hoon-language-server")]
#[command(about = "Language server for Hoon, backed by a running ship")]
#[command(version)]
struct Args {
    /// Base URL of the ship
    #[arg(long, default_value = ChannelDefaults::BASE_URL)]
    url: String,

    /// HTTP port of the running ship
    #[arg(short, long, default_value_t = ChannelDefaults::PORT)]
    port: u16,

    /// Ship name, without the sig
    #[arg(long, default_value = ChannelDefaults::SHIP)]
    ship: String,

    /// Login code (+code) of the ship
    #[arg(long, default_value = ChannelDefaults::FAKE_ZOD_CODE)]
    code: String,

    /// Milliseconds before a saved file's notification is sent again
    #[arg(short, long, default_value_t = BridgeDefaults::NOTIFICATION_DELAY.as_millis() as u64)]
    delay: u64,

    /// Seconds to wait for the ship to answer a request
    #[arg(long, default_value_t = BridgeDefaults::REQUEST_TIMEOUT.as_secs())]
    request_timeout: u64,

    /// Log file
    #[arg(long, default_value = BridgeDefaults::LOG_FILE)]
    log_file: PathBuf,

    /// Write logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.url.clone(), self.port)
    }

    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.ship.clone())
            .with_notification_delay(Duration::from_millis(self.delay))
            .with_request_timeout(Duration::from_secs(self.request_timeout))
    }
}

fn init_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file);
    match file {
        Ok(file) => install_subscriber(Mutex::new(file), filter, args.log_json),
        Err(e) => {
            install_subscriber(std::io::stderr, filter, args.log_json);
            warn!(
                "Cannot open log file {}: {}; logging to stderr",
                args.log_file.display(),
                e
            );
        }
    }
}

fn install_subscriber<W>(writer: W, filter: EnvFilter, json: bool)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting Hoon language server");

    let channel_config = args.channel_config();
    let cookies = retry_async(
        &RetryConfig::new(),
        || login(&channel_config, &args.code),
        ChannelError::is_retryable,
    )
    .await
    .with_context(|| format!("Failed to log in to {}:{}", args.url, args.port))?;
    info!("Got cookie");

    let channel = Channel::new(&channel_config.with_cookies(cookies))?;
    let connection = LspConnection::new(
        tokio::io::stdin(),
        tokio::io::stdout(),
        BridgeDefaults::MAX_MESSAGE_SIZE,
    );
    let bridge = Bridge::new(channel.clone(), args.bridge_config(), connection.outbound());

    // A failed first subscribe is retried in the background; local requests
    // such as the handshake still work meanwhile.
    if let Err(e) = bridge.serve().await {
        error!("Starting without a subscription: {}", e);
    }

    if let Err(e) = connection.listen(bridge).await {
        error!("Client connection failed: {}", e);
    }

    info!("Shutting down");
    if let Err(e) = channel.close().await {
        warn!("Failed to close channel: {}", e);
    }
    Ok(())
}

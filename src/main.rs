use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hubflow::{
    config::{Config, MNEMONIC_ENV},
    dispatch::Dispatcher,
    ibc, metrics,
    metrics::Metrics,
    subscription::EventSubscription,
    Error, Result,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file. Without it the mainnet preset
    /// is used and the mnemonic is read from the environment.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream events matching the configured filter as JSON lines until interrupted.
    Watch,

    /// Execute one request or an array of requests read from a file (`-` for stdin).
    Exec {
        /// Report failed requests as `{"error": ...}` items instead of stopping.
        #[arg(long)]
        continue_on_fail: bool,

        input: PathBuf,
    },

    /// List the known IBC transfer destinations.
    Destinations,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "hubflow=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::parse("", std::env::var(MNEMONIC_ENV).ok())?,
    };

    info!(
        network = %config.network.kind,
        chain_id = %config.network.chain_id,
        signer = config.credentials.has_mnemonic(),
        "Configuration loaded"
    );

    let metrics = if config.metrics.enabled {
        let (metrics, registry) = Metrics::new()?;
        let port = config.metrics.port;

        tokio::spawn(async move {
            if let Err(e) = metrics::run(port, registry).await {
                error!("Metrics server failed: {e}");
            }
        });

        Some(metrics)
    } else {
        None
    };

    match cli.command {
        Command::Watch => watch_events(&config, metrics).await,
        Command::Exec {
            continue_on_fail,
            input,
        } => exec(&config, metrics, &input, continue_on_fail).await,
        Command::Destinations => {
            let destinations: Vec<Value> = ibc::destinations()
                .map(|(key, route)| json!({ "key": key, "route": route }))
                .collect();
            print_json(&Value::Array(destinations))
        }
    }
}

async fn watch_events(config: &Config, metrics: Option<Metrics>) -> Result<()> {
    let subscription = &config.subscription;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        stop_tx.send_replace(true);
    })
    .map_err(|e| Error::Config(format!("failed to install signal handler: {e}")))?;

    let (engine, mut events) = EventSubscription::start(
        config.network.websocket.to_string(),
        &subscription.filter,
        subscription.options.clone(),
        metrics,
    )?;

    info!(
        category = subscription.filter.category.label(),
        query = engine.query(),
        "Watching events"
    );

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                info!("Interrupted, closing the subscription");
                break;
            }
            event = events.next() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
        }
    }

    engine.close().await;
    info!(reconnects = engine.reconnects(), "Subscription closed");

    Ok(())
}

async fn exec(
    config: &Config,
    metrics: Option<Metrics>,
    input: &Path,
    continue_on_fail: bool,
) -> Result<()> {
    let content = if input == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let mut dispatcher = Dispatcher::new(config.credentials.clone())?;
    if let Some(metrics) = metrics {
        dispatcher = dispatcher.with_metrics(metrics);
    }

    let document: Value = serde_json::from_str(&content)?;
    let result = dispatcher
        .execute_document(document, continue_on_fail)
        .await?;
    print_json(&result)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

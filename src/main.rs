use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use nmea_env_broadcast::{
    run_broadcast, BroadcastConfig, ReadingSource, SentenceKind, SessionOutcome, SimulatedSource,
    TransportMode,
};

#[derive(Parser, Debug)]
#[command(name = "nmea-env-broadcast", version)]
#[command(about = "Broadcast barometer, temperature, heading and attitude as NMEA-0183 sentences")]
struct Args {
    /// UDP destination address, or local bind address in TCP mode
    address: Option<String>,

    /// UDP destination port, or local listen port in TCP mode
    port: Option<u16>,

    /// Delay in seconds between message cycles (default 0.1)
    delay: Option<f64>,

    /// Transport mode
    #[arg(value_enum, ignore_case = true)]
    mode: Option<TransportMode>,

    /// TOML configuration file; arguments override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for a TCP client before giving up
    #[arg(long)]
    accept_timeout: Option<f64>,

    /// Seconds a single send may block
    #[arg(long)]
    write_timeout: Option<f64>,

    /// Sentence types to send each cycle, e.g. MDA,MMB,HDM,XDR
    #[arg(long, value_delimiter = ',')]
    sentences: Option<Vec<SentenceKind>>,

    /// Refuse to send to broadcast addresses
    #[arg(long)]
    no_broadcast: bool,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Use simulated instruments instead of the I2C sensors
    #[arg(long)]
    simulate: bool,
}

impl Args {
    async fn into_config(self) -> anyhow::Result<BroadcastConfig> {
        let mut config = match &self.config {
            Some(path) => BroadcastConfig::load(path).await?,
            None => BroadcastConfig::default(),
        };
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(delay) = self.delay {
            config.delay = delay;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(secs) = self.accept_timeout {
            config.accept_timeout = secs;
        }
        if let Some(secs) = self.write_timeout {
            config.write_timeout = secs;
        }
        if let Some(sentences) = self.sentences {
            config.sentences = sentences;
        }
        if self.no_broadcast {
            config.broadcast = false;
        }
        if self.cycles.is_some() {
            config.cycles = self.cycles;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "hardware")]
fn open_source(config: &BroadcastConfig, simulate: bool) -> anyhow::Result<Box<dyn ReadingSource>> {
    if simulate {
        return Ok(simulated());
    }
    let board = nmea_env_broadcast::hardware::SensorBoard::open(config.i2c_bus)?;
    info!("Instruments ready on I2C bus {}", config.i2c_bus);
    Ok(Box::new(board))
}

#[cfg(not(feature = "hardware"))]
fn open_source(_config: &BroadcastConfig, _simulate: bool) -> anyhow::Result<Box<dyn ReadingSource>> {
    Ok(simulated())
}

fn simulated() -> Box<dyn ReadingSource> {
    info!("Using simulated instruments");
    Box::new(SimulatedSource::default())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn run(args: Args) -> anyhow::Result<SessionOutcome> {
    let simulate = args.simulate;
    let config = args.into_config().await?;

    info!("Address: {}", config.address);
    info!("Port: {}", config.port);
    info!("Delay: {}s", config.delay);
    info!("Using mode: {}", config.mode);

    let source = open_source(&config, simulate)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    println!("Type Ctrl-C to exit...");
    Ok(run_broadcast(&config, source, cancel).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(outcome) => {
            info!(
                "{} cycles, {} sentences sent, {} cycles skipped",
                outcome.cycles, outcome.sentences_sent, outcome.rejected_cycles
            );
            println!("Exiting cleanly.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            println!("Something went wrong, exiting.");
            ExitCode::FAILURE
        }
    }
}

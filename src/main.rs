use clap::{Args, Parser, Subcommand, ValueEnum};
use h2race::http::h2::{ConnectionConfig, ConnectionError};
use h2race::http::tls::{TlsConfig, TlsConnector, TlsVersion};
use h2race::http::{Connector, TcpConnector};
use h2race::race::{RaceConfig, RaceReport};
use h2race::replay::{load_flows, Flow, ReplayError, Replayer};
use h2race::sink::{EventSink, LogSink};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(flatten)]
    options: RaceOptions,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Race every captured request against the others
    Race {
        /// JSON file with the captured flows
        flows: PathBuf,
    },
    /// Send a priority chain first, then race the captured requests after it
    Dependent {
        /// JSON file with the captured flows
        flows: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RaceOptions {
    /// Skip certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    /// Pin the TLS version (1.2 or 1.3)
    #[arg(long = "tls-version", global = true)]
    tls_version: Option<TlsVersion>,

    /// Connect to this port instead of the flow's
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Pause between the withheld frames and the release, in milliseconds
    #[arg(long = "settle-ms", default_value_t = 100, global = true)]
    settle_ms: u64,

    /// How long to watch for responses, in seconds
    #[arg(long = "window-secs", default_value_t = 10, global = true)]
    window_secs: u64,

    #[arg(long = "handshake-timeout-secs", default_value_t = 10, global = true)]
    handshake_timeout_secs: u64,

    /// Streams in the dependency chain
    #[arg(long = "chain-length", default_value_t = 10, global = true)]
    chain_length: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Race,
    Dependent,
}

fn replay_with<C: Connector>(
    connector: C,
    options: &RaceOptions,
    mode: Mode,
    flows: &[Flow],
    sink: Arc<dyn EventSink>,
) -> Result<Option<RaceReport>, ReplayError> {
    let conn_config = ConnectionConfig::builder()
        .handshake_timeout(Duration::from_secs(options.handshake_timeout_secs))
        .build()?;
    let race_config = RaceConfig::builder()
        .settle_delay(Duration::from_millis(options.settle_ms))
        .read_window(Duration::from_secs(options.window_secs))
        .chain_length(options.chain_length)
        .build()?;

    let replayer = Replayer::new(connector, sink)
        .connection_config(conn_config)
        .race_config(race_config)
        .port(options.port);

    match mode {
        Mode::Race => replayer.race_replay(flows),
        Mode::Dependent => replayer.dependent_stream_replay(flows),
    }
}

fn run(cli: &Cli) -> Result<(), ReplayError> {
    let (mode, path) = match &cli.command {
        Commands::Race { flows } => (Mode::Race, flows),
        Commands::Dependent { flows } => (Mode::Dependent, flows),
    };

    let flows = load_flows(path)?;
    info!("loaded {} flows from {}", flows.len(), path.display());

    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let tls = flows.first().map_or(true, Flow::is_tls);
    let report = if tls {
        let mut builder = TlsConfig::client().verify_peer(!cli.options.insecure);
        if let Some(version) = cli.options.tls_version {
            builder = builder.version(version);
        }
        let config = builder.build().map_err(ConnectionError::from)?;
        replay_with(TlsConnector::with_config(config), &cli.options, mode, &flows, sink)?
    } else {
        replay_with(TcpConnector::new(), &cli.options, mode, &flows, sink)?
    };

    if let Some(report) = report {
        for (stream_id, status) in report.statuses() {
            match status {
                Some(status) => println!("stream {}: {}", stream_id, status),
                None => println!("stream {}: no response", stream_id),
            }
        }
        println!(
            "released {} streams in {:?}, {} answered",
            report.stream_ids.len(),
            report.release_duration,
            report.completed()
        );
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = SimpleLogger::new().with_level(cli.log_level.into()).init() {
        eprintln!("Cannot initialise logging: {}", e);
    }

    if let Err(e) = run(&cli) {
        error!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_options() {
        let cli = Cli::try_parse_from([
            "h2race",
            "race",
            "flows.json",
            "--tls-version",
            "1.3",
            "--port",
            "8443",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Race { .. }));
        assert_eq!(cli.options.tls_version, Some(TlsVersion::Tls13));
        assert_eq!(cli.options.port, Some(8443));
        assert_eq!(cli.options.settle_ms, 100);
    }

    #[test]
    fn test_rejects_unknown_tls_version() {
        let result = Cli::try_parse_from(["h2race", "race", "flows.json", "--tls-version", "1.0"]);
        assert!(result.is_err());
    }
}

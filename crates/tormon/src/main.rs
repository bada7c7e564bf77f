//! tormon - republish Tor relay state to InfluxDB
//!
//! Startup is strict: the daemon exits right away if the metrics store, the
//! control port, or the first authentication is unavailable. Once running,
//! per-tick failures are logged and skipped.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info};

use tormon_core::auth::AuthGate;
use tormon_core::config::{DaemonConfig, LogFormat};
use tormon_core::control::{ControlClient, TorControlClient};
use tormon_core::error::{ConfigError, format_error_with_remediation};
use tormon_core::job::standard_jobs;
use tormon_core::logging::init_logging;
use tormon_core::publish::Publisher;
use tormon_core::router::QueryRouter;
use tormon_core::scheduler::Scheduler;
use tormon_core::sink::{InfluxSink, MetricsSink};

const EXIT_SINK: u8 = 1;
const EXIT_CONTROL: u8 = 2;
const EXIT_AUTH: u8 = 3;
/// `EX_USAGE` from sysexits.h
const EXIT_CONFIG: u8 = 64;

#[derive(Parser, Debug)]
#[command(name = "tormon", version, about = "Republish Tor relay state to InfluxDB")]
struct Cli {
    /// TOML configuration file; flags and environment override it
    #[arg(short, long, env = "TORMON_CONFIG")]
    config: Option<PathBuf>,

    /// Fingerprint of the monitored relay
    #[arg(long, env = "TOR_FP")]
    fingerprint: Option<String>,

    /// InfluxDB host
    #[arg(long, env = "INFLUX_HOST")]
    influx_host: Option<String>,

    /// InfluxDB port
    #[arg(long, env = "INFLUX_PORT")]
    influx_port: Option<u16>,

    /// InfluxDB database
    #[arg(long, env = "INFLUX_DB")]
    influx_db: Option<String>,

    /// Value of the `host` tag
    #[arg(long, env = "TAG_HOST")]
    tag_host: Option<String>,

    /// Extra tag as key=value (repeatable)
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    tags: Vec<(String, String)>,

    /// Tor control host
    #[arg(long, env = "TORCONTROL_HOST")]
    control_host: Option<String>,

    /// Tor control port
    #[arg(long, env = "TORCONTROL_PORT")]
    control_port: Option<u16>,

    /// Tor control password
    #[arg(long, env = "TORCONTROL_PASSWORD", hide_env_values = true)]
    control_password: Option<String>,

    /// Tor control auth cookie file
    #[arg(long, env = "TORCONTROL_COOKIE_FILE")]
    control_cookie_file: Option<PathBuf>,

    /// Log filter (e.g. info, tormon_core=debug)
    #[arg(long, env = "TORMON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: pretty or json
    #[arg(long, env = "TORMON_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn parse_tag(raw: &str) -> anyhow::Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got {raw:?}");
    };
    if key.is_empty() {
        bail!("tag key must not be empty");
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(fingerprint) = &self.fingerprint {
            config.fingerprint.clone_from(fingerprint);
        }
        if let Some(host) = &self.influx_host {
            config.sink.host.clone_from(host);
        }
        if let Some(port) = self.influx_port {
            config.sink.port = port;
        }
        if let Some(db) = &self.influx_db {
            config.sink.database.clone_from(db);
        }
        if let Some(host) = &self.tag_host {
            config.tags.insert("host".to_string(), host.clone());
        }
        for (key, value) in &self.tags {
            config.tags.insert(key.clone(), value.clone());
        }
        if let Some(host) = &self.control_host {
            config.control.host.clone_from(host);
        }
        if let Some(port) = self.control_port {
            config.control.port = port;
        }
        if self.control_password.is_some() {
            config.control.password.clone_from(&self.control_password);
        }
        if self.control_cookie_file.is_some() {
            config.control.cookie_file.clone_from(&self.control_cookie_file);
        }
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if self.log_file.is_some() {
            config.log.file.clone_from(&self.log_file);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<DaemonConfig> {
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    cli.apply(&mut config);
    config.fingerprint = config.fingerprint.trim().to_string();
    config.validate()?;
    Ok(config)
}

fn report_config_error(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");
    if let Some(config_err) = err.downcast_ref::<ConfigError>() {
        eprintln!();
        eprint!("{}", config_err.remediation().render_plain());
    }
}

fn fail(code: u8, stage: &str, err: tormon_core::Error) -> ExitCode {
    error!(stage, error = %err, "Startup failed");
    eprintln!("{}", format_error_with_remediation(&err));
    ExitCode::from(code)
}

/// Register the shutdown handlers now and return a future that resolves on
/// SIGINT or SIGTERM. Registration precedes startup so an early signal is not
/// lost to the default handler.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = int.recv() => {}
            _ = term.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

async fn run(config: DaemonConfig) -> ExitCode {
    let shutdown = match shutdown_signal() {
        Ok(shutdown) => shutdown,
        Err(err) => {
            error!(error = %err, "Could not listen for shutdown signals");
            return ExitCode::FAILURE;
        }
    };

    let sink = match InfluxSink::new(&config.sink.host, config.sink.port, config.sink.timeout()) {
        Ok(sink) => sink,
        Err(err) => return fail(EXIT_SINK, "sink", err.into()),
    };
    if let Err(err) = sink.ping().await {
        return fail(EXIT_SINK, "sink", err.into());
    }
    if let Err(err) = sink.create_database(&config.sink.database).await {
        return fail(EXIT_SINK, "sink", err.into());
    }
    info!(url = sink.base_url(), database = %config.sink.database, "Connected to InfluxDB");

    let addr = config.control.addr();
    let client = match TorControlClient::connect(addr.as_str(), config.control.timeout()).await {
        Ok(client) => Arc::new(client),
        Err(err) => return fail(EXIT_CONTROL, "control", err.into()),
    };
    let client: Arc<dyn ControlClient> = client;

    let credential = config.control.credential();
    if let Err(err) = client.authenticate(&credential).await {
        return fail(EXIT_AUTH, "auth", err.into());
    }
    info!(addr = %addr, fingerprint = %config.fingerprint, "Authenticated to Tor control port");

    let router = QueryRouter::new(AuthGate::new(Arc::clone(&client), credential), client);
    let publisher = Publisher::new(Arc::new(sink), config.sink.database.clone(), config.tags.clone());
    let handle = Scheduler::new(publisher).spawn(standard_jobs(&router, &config.fingerprint));

    shutdown.await;
    info!("Exit");
    handle.shutdown().await;
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            report_config_error(&err);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if cli.check {
        println!(
            "configuration ok: fingerprint={} sink={}:{}/{} control={}",
            config.fingerprint,
            config.sink.host,
            config.sink.port,
            config.sink.database,
            config.control.addr()
        );
        return ExitCode::SUCCESS;
    }

    if let Err(err) = init_logging(&config.log) {
        eprintln!("Error: {err}");
        return ExitCode::from(EXIT_CONFIG);
    }

    run(config).await
}

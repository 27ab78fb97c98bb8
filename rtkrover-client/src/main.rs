//! rtkrover daemon: NTRIP caster in, GNSS receiver out.
//!
//! The supervisor state machine lives in `rtkrover-core` and runs on its
//! own thread; this binary wires it to real TCP, a serial port (or
//! stdout), the `log` facade, and signal-driven graceful shutdown.

mod sink;
mod task;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::{miette, Result};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use rtkrover_core::{LogLevel, NtripClient, NtripConfig, NtripHandle};

use sink::open_sink;
use task::SupervisorTask;
use transport::{SystemClock, TcpTransport};

#[derive(Parser, Clone, Debug)]
#[command(
    name = "rtkrover",
    version,
    about = "Stream RTCM corrections from an NTRIP caster to a GNSS receiver"
)]
struct Cli {
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Caster host name or address
    #[arg(short = 'H', long)]
    host: String,

    /// Caster port
    #[arg(short, long, default_value_t = 2101)]
    port: u16,

    /// Mount point to subscribe to
    #[arg(short, long)]
    mount: String,

    /// Basic-auth user name
    #[arg(short, long, default_value = "")]
    user: String,

    /// Basic-auth password
    #[arg(long, default_value = "")]
    pass: String,

    /// NMEA GGA sentence forwarded to the caster (Rev2 only)
    #[arg(long)]
    gga: Option<String>,

    /// Serial device of the GNSS receiver; '-' writes to stdout
    #[arg(short, long, default_value = "-")]
    device: String,

    /// Serial baud rate
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Reconnect attempts before lockout
    #[arg(long, default_value_t = 5)]
    max_tries: u32,

    /// Delay between connection attempts, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    retry_delay_ms: u64,

    /// Zombie stream detection timeout, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    health_timeout_ms: u64,

    /// TCP connect and HTTP response timeout, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    connect_timeout_ms: u64,

    /// Seconds between stats log lines; 0 disables them
    #[arg(long, default_value_t = 30)]
    stats_interval_secs: u64,

    /// Do not retry with NTRIP Rev1 when the Rev2 handshake fails
    #[arg(long)]
    no_rev1_fallback: bool,
}

fn build_config(args: &Cli) -> NtripConfig {
    NtripConfig {
        host: args.host.clone(),
        port: args.port,
        mount: args.mount.clone(),
        user: args.user.clone(),
        pass: args.pass.clone(),
        gga_sentence: args.gga.clone().unwrap_or_default(),
        max_tries: args.max_tries,
        retry_delay_ms: args.retry_delay_ms,
        health_timeout_ms: args.health_timeout_ms,
        connect_timeout_ms: args.connect_timeout_ms,
        rev1_fallback: !args.no_rev1_fallback,
        ..Default::default()
    }
}

/// Bridge the core's logger port onto the `log` facade.
fn forward_to_log(level: LogLevel, tag: &str, message: &str) {
    let level = match level {
        LogLevel::Error => log::Level::Error,
        LogLevel::Warning => log::Level::Warn,
        LogLevel::Info => log::Level::Info,
        LogLevel::Debug => log::Level::Debug,
    };
    log::log!(target: "rtkrover", level, "[{}] {}", tag, message);
}

async fn run_supervisor(subsys: SubsystemHandle, mut task: SupervisorTask) -> Result<()> {
    subsys.on_shutdown_requested().await;
    log::info!("shutting down NTRIP supervisor");
    tokio::task::spawn_blocking(move || task.stop())
        .await
        .map_err(|e| miette!("supervisor stop task failed: {}", e))?;
    Ok(())
}

async fn report_stats(
    subsys: SubsystemHandle,
    handle: NtripHandle,
    every: Duration,
) -> Result<()> {
    if every.is_zero() {
        subsys.on_shutdown_requested().await;
        return Ok(());
    }
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => return Ok(()),
            _ = ticker.tick() => {
                let stats = handle.stats();
                log::info!(
                    target: "rtkrover",
                    "state={} healthy={} frames={} crc_errors={} bytes={} reconnects={} uptime_ms={} last_type={}",
                    handle.state(),
                    handle.is_healthy(),
                    stats.total_frames,
                    stats.crc_errors,
                    stats.bytes_received,
                    stats.reconnects,
                    stats.total_uptime_ms,
                    stats.last_message_type,
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .parse_default_env()
        .init();

    let config = build_config(&args);
    let gnss = open_sink(&args.device, args.baud)?;
    let client = NtripClient::new(config, TcpTransport::new(), SystemClock::new(), gnss)
        .map_err(|e| miette!("invalid configuration: {}", e))?;
    let handle = client.handle();
    handle.set_logger(Some(Arc::new(forward_to_log)));

    let task =
        SupervisorTask::spawn(client).map_err(|e| miette!("cannot start supervisor: {}", e))?;
    let stats_handle = handle.clone();
    let stats_every = Duration::from_secs(args.stats_interval_secs);

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("supervisor", move |subsys| {
            run_supervisor(subsys, task)
        }));
        s.start(SubsystemBuilder::new("stats", move |subsys| {
            report_stats(subsys, stats_handle, stats_every)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(6))
    .await
    .map_err(Into::<miette::Report>::into)
}

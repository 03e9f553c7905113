//! # rlncd
//!
//! Userspace daemon terminating a random linear network coding overlay on
//! top of the kernel `batman_adv` generic-netlink helper family: PLAIN
//! frames handed to it from the kernel are absorbed into generations and
//! re-emitted as coded ENC frames, and ENC/REQ/ACK traffic arriving from a
//! peer daemon is decoded back into the original PLAIN frames.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: bat0, G=64, S=1454, N=2 encoders, no loss model
//! rlncd
//!
//! # Lossy link, larger generation, metrics scrape endpoint
//! rlncd --interface bat0 --symbols 32 --e1 5 --e2 2 --metrics-port 9090
//!
//! # Pure I/O benchmark: PLAIN frames loop straight back out, no coding
//! rlncd --benchmark
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rlncd_core::config::{Config, LossModel};
use rlncd_core::counters::Counters;
use rlncd_core::decoder_pool::DecoderPool;
use rlncd_core::encoder_pool::EncoderPool;
use rlncd_core::iomux::{IoMux, OUTBOUND_BANDS};
use rlncd_core::metrics::MetricsServer;
use rlncd_core::netlink::resolve_ifindex;
use rlncd_core::pqueue::BlockingPriorityQueue;
use rlncd_core::rtt::ControlTracker;

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI / env / optional TOML overlay ────────────────
    let args = parse_args()?;
    let config = Arc::new(build_config(&args)?);

    tracing::info!(
        interface = %config.interface,
        symbols = config.symbols,
        symbol_size = config.symbol_size,
        encoders = config.encoders,
        e1 = config.loss.e1,
        e2 = config.loss.e2,
        e3 = config.loss.e3,
        benchmark = config.benchmark,
        metrics_port = ?config.metrics_port,
        "rlncd starting"
    );

    // ── Resolve the bound interface's ifindex up front ─────────
    // REGISTER's kernel reply would also carry this, but that arrives
    // asynchronously and the pools need a stable ifindex to stamp outbound
    // frames with the moment they're constructed.
    let ifindex = resolve_ifindex(&config.interface)?;
    tracing::info!(interface = %config.interface, ifindex, "resolved ifindex");

    // ── Shared plumbing ─────────────────────────────────────────
    let counters = Arc::new(Counters::new());
    let fallback_ms = 1000.0 * (config.req_timeout_secs.max(config.ack_timeout_secs));
    let ctrl = Arc::new(ControlTracker::new(fallback_ms));
    let outbound = Arc::new(BlockingPriorityQueue::new(
        OUTBOUND_BANDS,
        rlncd_core::frame::Frame::new(rlncd_core::frame::Command::Frame, Vec::new()),
    ));

    let encoder_pool = EncoderPool::new(config.clone(), outbound.clone(), counters.clone(), ifindex);
    let decoder_pool = Arc::new(DecoderPool::new(
        config.clone(),
        outbound.clone(),
        ctrl.clone(),
        counters.clone(),
        ifindex,
    ));

    let iomux = IoMux::start(config.clone(), outbound, encoder_pool.clone(), decoder_pool.clone())?;

    // ── Metrics server (optional) ───────────────────────────────
    let mut metrics_server = None;
    if let Some(port) = config.metrics_port {
        let bind: SocketAddr = format!("0.0.0.0:{port}").parse()?;
        match MetricsServer::start(bind, counters.clone()) {
            Ok(server) => {
                tracing::info!(addr = %server.addr(), "metrics scrape endpoint listening");
                metrics_server = Some(server);
            }
            Err(err) => tracing::error!(error = %err, "failed to start metrics server"),
        }
    }

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            running.store(false, Ordering::Relaxed);
        })
        .expect("error setting signal handler");
    }

    // ── Main loop: just poll the running flag and log periodically ─
    let stats_interval = Duration::from_secs(5);
    let mut last_stats_log = std::time::Instant::now();
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if last_stats_log.elapsed() >= stats_interval {
            tracing::info!(packets = iomux.packets(), ifindex = iomux.ifindex(), "rlncd stats");
            if let Some(path) = &config.counters_path {
                if let Err(err) = dump_counters(path, &counters) {
                    tracing::warn!(error = %err, path, "failed to dump counters");
                }
            }
            last_stats_log = std::time::Instant::now();
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────
    drop(metrics_server);
    iomux.shutdown();
    encoder_pool.shutdown();
    counters.log();
    if let Some(path) = &config.counters_path {
        let _ = dump_counters(path, &counters);
    }

    tracing::info!("rlncd stopped");
    Ok(())
}

fn dump_counters(path: &str, counters: &Counters) -> anyhow::Result<()> {
    let snapshot = counters.snapshot();
    let body = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, body)?;
    Ok(())
}

// ─── CLI Parsing ────────────────────────────────────────────────────────────

struct Args {
    interface: Option<String>,
    symbols: Option<usize>,
    symbol_size: Option<usize>,
    encoders: Option<usize>,
    encoder_timeout_secs: Option<f64>,
    decoder_timeout_secs: Option<f64>,
    req_timeout_secs: Option<f64>,
    ack_timeout_secs: Option<f64>,
    fixed_overshoot: Option<f64>,
    e1: Option<u32>,
    e2: Option<u32>,
    e3: Option<u32>,
    benchmark: bool,
    metrics_port: Option<u16>,
    counters_path: Option<String>,
    config_path: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();

    let mut interface = None;
    let mut symbols = None;
    let mut symbol_size = None;
    let mut encoders = None;
    let mut encoder_timeout_secs = None;
    let mut decoder_timeout_secs = None;
    let mut req_timeout_secs = None;
    let mut ack_timeout_secs = None;
    let mut fixed_overshoot = None;
    let mut e1 = None;
    let mut e2 = None;
    let mut e3 = None;
    let mut benchmark = false;
    let mut metrics_port = None;
    let mut counters_path = None;
    let mut config_path = None;

    macro_rules! next_val {
        ($flag:expr, $i:expr, $args:expr) => {{
            $i += 1;
            $args.get($i).ok_or_else(|| anyhow::anyhow!("{} requires a value", $flag))?
        }};
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--interface" | "-i" => interface = Some(next_val!("--interface", i, args).clone()),
            "--symbols" | "-g" => {
                let v = next_val!("--symbols", i, args);
                symbols = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --symbols '{v}': {e}"))?);
            }
            "--symbol-size" | "-s" => {
                let v = next_val!("--symbol-size", i, args);
                symbol_size = Some(
                    v.parse()
                        .map_err(|e| anyhow::anyhow!("invalid --symbol-size '{v}': {e}"))?,
                );
            }
            "--encoders" | "-n" => {
                let v = next_val!("--encoders", i, args);
                encoders = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --encoders '{v}': {e}"))?);
            }
            "--encoder-timeout" => {
                let v = next_val!("--encoder-timeout", i, args);
                encoder_timeout_secs = Some(
                    v.parse()
                        .map_err(|e| anyhow::anyhow!("invalid --encoder-timeout '{v}': {e}"))?,
                );
            }
            "--decoder-timeout" => {
                let v = next_val!("--decoder-timeout", i, args);
                decoder_timeout_secs = Some(
                    v.parse()
                        .map_err(|e| anyhow::anyhow!("invalid --decoder-timeout '{v}': {e}"))?,
                );
            }
            "--req-timeout" => {
                let v = next_val!("--req-timeout", i, args);
                req_timeout_secs = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --req-timeout '{v}': {e}"))?);
            }
            "--ack-timeout" => {
                let v = next_val!("--ack-timeout", i, args);
                ack_timeout_secs = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --ack-timeout '{v}': {e}"))?);
            }
            "--fixed-overshoot" => {
                let v = next_val!("--fixed-overshoot", i, args);
                fixed_overshoot = Some(
                    v.parse()
                        .map_err(|e| anyhow::anyhow!("invalid --fixed-overshoot '{v}': {e}"))?,
                );
            }
            "--e1" => {
                let v = next_val!("--e1", i, args);
                e1 = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --e1 '{v}': {e}"))?);
            }
            "--e2" => {
                let v = next_val!("--e2", i, args);
                e2 = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --e2 '{v}': {e}"))?);
            }
            "--e3" => {
                let v = next_val!("--e3", i, args);
                e3 = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid --e3 '{v}': {e}"))?);
            }
            "--benchmark" => benchmark = true,
            "--metrics-port" | "-m" => {
                let v = next_val!("--metrics-port", i, args);
                metrics_port = Some(v.parse().map_err(|e| anyhow::anyhow!("invalid port '{v}': {e}"))?);
            }
            "--counters-path" => counters_path = Some(next_val!("--counters-path", i, args).clone()),
            "--config" | "-c" => config_path = Some(next_val!("--config", i, args).clone()),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    // Fallback: env vars, for anything the CLI left unset.
    if interface.is_none() {
        interface = std::env::var("RLNCD_INTERFACE").ok();
    }
    if symbols.is_none() {
        if let Ok(v) = std::env::var("RLNCD_SYMBOLS") {
            symbols = v.parse().ok();
        }
    }
    if symbol_size.is_none() {
        if let Ok(v) = std::env::var("RLNCD_SYMBOL_SIZE") {
            symbol_size = v.parse().ok();
        }
    }
    if encoders.is_none() {
        if let Ok(v) = std::env::var("RLNCD_ENCODERS") {
            encoders = v.parse().ok();
        }
    }
    if e1.is_none() {
        if let Ok(v) = std::env::var("RLNCD_E1") {
            e1 = v.parse().ok();
        }
    }
    if e2.is_none() {
        if let Ok(v) = std::env::var("RLNCD_E2") {
            e2 = v.parse().ok();
        }
    }
    if e3.is_none() {
        if let Ok(v) = std::env::var("RLNCD_E3") {
            e3 = v.parse().ok();
        }
    }
    if !benchmark {
        benchmark = std::env::var("RLNCD_BENCHMARK").ok().as_deref() == Some("1");
    }
    if metrics_port.is_none() {
        if let Ok(v) = std::env::var("RLNCD_METRICS_PORT") {
            metrics_port = v.parse().ok();
        }
    }
    if counters_path.is_none() {
        counters_path = std::env::var("RLNCD_COUNTERS_PATH").ok();
    }
    if config_path.is_none() {
        config_path = std::env::var("RLNCD_CONFIG").ok();
    }

    Ok(Args {
        interface,
        symbols,
        symbol_size,
        encoders,
        encoder_timeout_secs,
        decoder_timeout_secs,
        req_timeout_secs,
        ack_timeout_secs,
        fixed_overshoot,
        e1,
        e2,
        e3,
        benchmark,
        metrics_port,
        counters_path,
        config_path,
    })
}

/// Layer config sources lowest-to-highest priority: built-in defaults, then
/// an optional TOML file, then individually-set CLI/env fields.
fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut cfg = match &args.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
            Config::from_toml_str(&text)?
        }
        None => Config::default(),
    };

    if let Some(v) = &args.interface {
        cfg.interface = v.clone();
    }
    if let Some(v) = args.symbols {
        cfg.symbols = v;
    }
    if let Some(v) = args.symbol_size {
        cfg.symbol_size = v;
    }
    if let Some(v) = args.encoders {
        cfg.encoders = v;
    }
    if let Some(v) = args.encoder_timeout_secs {
        cfg.encoder_timeout_secs = v;
    }
    if let Some(v) = args.decoder_timeout_secs {
        cfg.decoder_timeout_secs = v;
    }
    if let Some(v) = args.req_timeout_secs {
        cfg.req_timeout_secs = v;
    }
    if let Some(v) = args.ack_timeout_secs {
        cfg.ack_timeout_secs = v;
    }
    if let Some(v) = args.fixed_overshoot {
        cfg.fixed_overshoot = v;
    }
    if args.e1.is_some() || args.e2.is_some() || args.e3.is_some() {
        cfg.loss = LossModel::from_percent(
            args.e1.unwrap_or(0),
            args.e2.unwrap_or(0),
            args.e3.unwrap_or(0),
        );
    }
    if args.benchmark {
        cfg.benchmark = true;
    }
    if let Some(v) = args.metrics_port {
        cfg.metrics_port = Some(v);
    }
    if let Some(v) = &args.counters_path {
        cfg.counters_path = Some(v.clone());
    }

    Ok(cfg)
}

fn print_help() {
    eprintln!(
        r#"rlncd — Random linear network coding overlay daemon for batman_adv

USAGE:
  rlncd [OPTIONS]

OPTIONS:
  --interface, -i <name>     Interface the batman_adv helper family is bound to (default: bat0)
  --symbols, -g <n>          Generation size G, symbols per generation (default: 64)
  --symbol-size, -s <n>      Symbol size S in bytes (default: 1454)
  --encoders, -n <n>         Number of concurrently live encoder slots N (default: 2)
  --encoder-timeout <secs>   Encoder idle retirement timeout (default: 10)
  --decoder-timeout <secs>   Decoder idle retirement timeout (default: 10)
  --req-timeout <secs>       Decoder REQ retransmit interval (default: 0.5)
  --ack-timeout <secs>       Decoder ACK retransmit interval (default: 0.5)
  --fixed-overshoot <f>      Source budget overshoot multiplier (default: 1.06)
  --e1 <pct>                 First-leg loss percentage, 0-100 (default: 0)
  --e2 <pct>                 Second-leg loss percentage, 0-100 (default: 0)
  --e3 <pct>                 Third-leg loss percentage, 0-100 (default: 0)
  --benchmark                Loop PLAIN frames straight back out, no coding
  --metrics-port, -m <port>  Serve a Prometheus counters endpoint on 0.0.0.0:<port>/metrics
  --counters-path <path>     Periodically dump the counters map to this path as JSON
  --config, -c <path>        TOML config file, overlaid under CLI/env fields
  --help, -h                 Show this help

ENVIRONMENT VARIABLES:
  RLNCD_INTERFACE       Fallback for --interface
  RLNCD_SYMBOLS         Fallback for --symbols
  RLNCD_SYMBOL_SIZE     Fallback for --symbol-size
  RLNCD_ENCODERS        Fallback for --encoders
  RLNCD_E1 / E2 / E3    Fallback for --e1/--e2/--e3
  RLNCD_BENCHMARK       Set to "1" to enable --benchmark
  RLNCD_METRICS_PORT    Fallback for --metrics-port
  RLNCD_COUNTERS_PATH   Fallback for --counters-path
  RLNCD_CONFIG          Fallback for --config
  RUST_LOG              Log level filter (e.g. info, debug, rlncd_core=trace)

EXAMPLES:
  # Defaults
  rlncd

  # Lossy link with a metrics endpoint
  rlncd --interface bat0 --e1 5 --e2 2 --metrics-port 9090

  # Pure I/O benchmark, no coding
  rlncd --benchmark
"#
    );
}

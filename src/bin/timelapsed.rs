//! timelapsed - timelapse bucketing daemon
//!
//! This daemon:
//! 1. Recovers bucket state left on disk by a previous run
//! 2. Captures one still per tick into the live still directory
//! 3. Hands off each finished 5-minute bucket to the consolidation worker
//! 4. Merges 5-minute clips into hourly clips and hourly clips into daily clips
//!
//! Any failure ends the process with a non-zero status; run it under a
//! supervisor that restarts it.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use timelapse_buckets::{
    CaptureLoop, Clock, DeviceBackendKind, Devices, LocalClock, TickScheduler, TimelapseConfig,
};

#[derive(Parser, Debug)]
#[command(name = "timelapsed", about = "Timelapse capture and consolidation daemon")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "TIMELAPSE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the bucket directories
    #[arg(long)]
    root: Option<PathBuf>,

    /// Device backend: command or stub
    #[arg(long)]
    backend: Option<String>,

    /// Run a single tick, wait for consolidation and exit
    #[arg(long)]
    once: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        log::error!("timelapsed: fatal: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut cfg = TimelapseConfig::load_from(args.config.as_deref())?;
    if let Some(root) = args.root {
        cfg.root = root;
    }
    if let Some(backend) = args.backend.as_deref() {
        cfg.backend = DeviceBackendKind::parse(backend)?;
    }
    log::info!(
        "timelapsed {} starting: root={} tick={}s backend={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.root.display(),
        cfg.tick.as_secs(),
        cfg.backend
    );

    // installed before recovery: requeueing leftovers can block on the queue
    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let devices = Devices::from_config(&cfg)?;
    let clock = LocalClock;
    let mut capture = CaptureLoop::start(&cfg, devices, clock.now())?;

    let mut scheduler = TickScheduler::new(cfg.tick);
    let max_ticks = if args.once { Some(1) } else { None };
    let ticks = capture.run(&mut scheduler, &clock, &stop, max_ticks)?;
    log::info!("timelapsed: {} tick(s) run, shutting down", ticks);

    let pending = capture.finish()?;
    log::info!(
        "timelapsed: stopped with {} pending 5-minute and {} pending hourly clip(s)",
        pending.five_mins.len(),
        pending.hours.len()
    );
    Ok(())
}

//! # Crack-Clean Console Supervisor
//!
//! Starts the five workers, waits until MainController reports ready, issues
//! START and then monitors the system from the console.
//!
//! ## Loop
//! - Liveness check every `main.proc_check_interval_ms`; any dead worker ends the run.
//! - Status snapshot logged every `--period-ms`, optionally appended to `--status-csv`.
//! - `--duration-secs` bounds the run; otherwise it runs until a worker dies.
//!
//! ## Devices
//! Camera, detector and joystick are simulated. The actuator is the serial
//! Jrk G2 named in the config unless `--sim-actuator` is given.
//!
//! Logging goes through `env_logger`; set `RUST_LOG=info` to see progress.

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};

use crack_clean::{
    app::{CcApp, Devices},
    config::Config,
    controllers::actuator::ActuatorLink,
    utils::status_export::StatusCsv,
};

#[derive(Debug, Parser)]
#[command(name = "crack_clean", about = "Crack-following actuator control")]
struct Cli {
    /// JSON config file; missing fields keep their defaults.
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Status update period.
    #[arg(long = "period-ms", value_name = "MS", default_value_t = 1000)]
    period_ms: u64,

    /// Stop after this many seconds.
    #[arg(long = "duration-secs", value_name = "SECS")]
    duration_secs: Option<u64>,

    /// Drive the simulated Jrk G2 instead of the serial device.
    #[arg(long = "sim-actuator", action = clap::ArgAction::SetTrue)]
    sim_actuator: bool,

    /// Override the actuator serial device.
    #[arg(long = "device", value_name = "TTY")]
    device: Option<String>,

    /// Append every status snapshot to this CSV file.
    #[arg(long = "status-csv", value_name = "PATH")]
    status_csv: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(device) = &cli.device {
        cfg.actuator.device = device.clone();
    }

    let mut devices = Devices::simulated(&cfg);
    if !cli.sim_actuator {
        devices.actuator = ActuatorLink::Serial;
    }

    let mut csv = match &cli.status_csv {
        Some(path) => Some(
            StatusCsv::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => None,
    };

    info!("=== CRACK CLEAN START ===");
    let mut app = CcApp::start(cfg.clone(), devices).context("startup failed")?;

    run_console(&mut app, &cfg, &cli, &mut csv);

    let exits = app.stop();
    for exit in &exits {
        info!("[Console] {} exited with {}", exit.name, exit.code);
    }
    info!("=== CRACK CLEAN FINISHED ===");

    if exits.iter().any(|e| e.code != 0) {
        bail!("one or more workers failed");
    }
    Ok(())
}

fn run_console(app: &mut CcApp, cfg: &Config, cli: &Cli, csv: &mut Option<StatusCsv>) {
    let started = Instant::now();
    let period = Duration::from_millis(cli.period_ms);
    let run_for = cli.duration_secs.map(Duration::from_secs);
    let mut last_check = Instant::now();

    loop {
        if last_check.elapsed() >= cfg.main.proc_check_interval() {
            last_check = Instant::now();
            let dead = app.dead_workers();
            if !dead.is_empty() {
                for name in &dead {
                    error!("[Console] worker \"{}\" has terminated", name);
                }
                error!("[Console] exiting due to terminated workers");
                return;
            }
        }

        match app.get_status() {
            Ok(Some(s)) => {
                info!(
                    "[Console] mode: {}; detect_thresh: {}; simpfilter_thresh: {}; \
                     adaptfilter_thresh: {}; adaptfilter_radius: {}; filter_mode: {}; \
                     ips: {:.1}; dc_call_ms: {:.1}; img_age_ms: {:.1}; dc_y_mm: {:?}; \
                     target: {}; img: {:?}",
                    s.mode,
                    s.detect_thresh,
                    s.simpfilter_thresh,
                    s.adaptfilter_thresh,
                    s.adaptfilter_radius,
                    s.filter_mode,
                    s.ips,
                    s.dc_call_ms,
                    s.img_age_ms,
                    s.dc_y_mm,
                    s.target,
                    s.img
                );
                if let Some(w) = csv.as_mut() {
                    if let Err(e) = w.append(&s) {
                        warn!("[Console] status CSV write failed: {}", e);
                    }
                }
            }
            Ok(None) => info!("[Console] [no status]"),
            Err(e) => {
                error!("[Console] status query failed: {}", e);
                return;
            }
        }

        if run_for.is_some_and(|d| started.elapsed() >= d) {
            info!("[Console] run duration reached");
            return;
        }
        thread::sleep(period);
    }
}

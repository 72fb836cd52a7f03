use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use gpsdo::bench::{BenchDac, BenchOscillator, BenchState, NullLeds};
use gpsdo::config::SystemConfig;
use gpsdo::controller::{FixGate, Foreground};
use gpsdo::fixed::{Centi, Deci};
use gpsdo::nmea;
use gpsdo::persistence::FileTrimStore;
use gpsdo::shared::SharedState;
use gpsdo::status::{DisciplineStatus, ResetCause};
use gpsdo::traits::Watchdog;

#[cfg(unix)]
use gpsdo::serial::{self, SentenceReader};
#[cfg(unix)]
use gpsdo::watchdog::DeviceWatchdog;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device with live NMEA sentences; the bench generates its own
    /// fix stream when omitted
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Configuration file (created with defaults when missing)
    #[arg(long, default_value = "gpsdo.json")]
    config: PathBuf,

    /// File backing the non-volatile trim cell
    #[arg(long, default_value = "gpsdo-trim.dat")]
    trim_file: PathBuf,

    /// Watchdog device to keep petted (e.g. /dev/watchdog)
    #[arg(long)]
    watchdog: Option<PathBuf>,

    /// Simulated seconds to run (0 = until interrupted)
    #[arg(long, default_value_t = 1800)]
    seconds: u64,

    /// Bench oscillator free-running error, ppb
    #[arg(long, default_value_t = 40.0)]
    error_ppb: f64,

    /// Drop the simulated fix at this second to watch holdover
    #[arg(long)]
    outage_at: Option<u64>,

    /// Length of the simulated fix outage, seconds
    #[arg(long, default_value_t = 30)]
    outage_len: u64,

    /// Pace the bench at one PPS per wall-clock second
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

/// Pets a real watchdog device when one was given, otherwise nothing.
struct HostWatchdog {
    #[cfg(unix)]
    device: Option<DeviceWatchdog>,
}

impl Watchdog for HostWatchdog {
    fn pet(&mut self) {
        #[cfg(unix)]
        if let Some(device) = &mut self.device {
            device.pet();
        }
    }
}

fn load_config(path: &Path) -> SystemConfig {
    if let Ok(content) = std::fs::read_to_string(path) {
        if let Ok(cfg) = serde_json::from_str::<SystemConfig>(&content) {
            return cfg;
        }
        warn!("unparseable config {}, using defaults", path.display());
        return SystemConfig::default();
    }

    let cfg = SystemConfig::default();
    if let Ok(rendered) = serde_json::to_string_pretty(&cfg) {
        let _ = std::fs::write(path, rendered);
    }
    cfg
}

#[cfg(unix)]
fn spawn_gps_reader(device: PathBuf, mut gate: FixGate, running: Arc<AtomicBool>) {
    use std::io::Read;

    thread::spawn(move || {
        let mut port = match serial::open_port(&device) {
            Ok(port) => port,
            Err(e) => {
                warn!("GPS port unavailable: {e:#}");
                return;
            }
        };
        info!("Reading NMEA from {}", device.display());

        let mut reader = SentenceReader::new();
        let mut buf = [0u8; 256];
        while running.load(Ordering::SeqCst) {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if let Some(sentence) = reader.push(byte) {
                            gate.on_sentence(&sentence);
                        }
                    }
                }
                Err(e) => {
                    warn!("GPS read failed: {e}");
                    break;
                }
            }
        }
    });
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .format_target(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);
    config.validate()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let shared = Arc::new(SharedState::new(&config.sampling));
    let status_shared = Arc::new(RwLock::new(DisciplineStatus::default()));

    let state = BenchState::shared(args.error_ppb, config.sampling.phase_midpoint);
    let mut oscillator = BenchOscillator::new(shared.clone(), state.clone(), &config.sampling);
    let gate = FixGate::new(shared.clone(), &config.sampling);

    let watchdog = HostWatchdog {
        #[cfg(unix)]
        device: match &args.watchdog {
            Some(path) => Some(DeviceWatchdog::open(path)?),
            None => None,
        },
    };

    let mut foreground = Foreground::new(
        shared.clone(),
        config,
        BenchDac(state.clone()),
        FileTrimStore::new(&args.trim_file),
        watchdog,
        NullLeds,
        ResetCause::PowerOn,
        status_shared.clone(),
    )?;

    // With a live receiver the gate moves to the reader thread; otherwise
    // the bench fabricates one GSA sentence per second.
    let mut bench_gate = Some(gate);
    #[cfg(unix)]
    if let Some(device) = &args.device {
        if let Some(gate) = bench_gate.take() {
            spawn_gps_reader(device.clone(), gate, running.clone());
        }
    }
    #[cfg(not(unix))]
    if let Some(device) = &args.device {
        warn!(
            "serial input unsupported on this platform, ignoring {}",
            device.display()
        );
    }

    info!(
        "Bench: {:+.1} ppb free-running error, trim cell {}",
        args.error_ppb,
        args.trim_file.display()
    );

    let mut second: u64 = 0;
    while running.load(Ordering::SeqCst) && (args.seconds == 0 || second < args.seconds) {
        second += 1;

        if let Some(gate) = bench_gate.as_mut() {
            // Ten seconds of acquisition, then a solid fix apart from the
            // scripted outage.
            let in_outage = args
                .outage_at
                .map(|at| second >= at && second < at + args.outage_len)
                .unwrap_or(false);
            let fix = second > 10 && !in_outage;
            gate.on_sentence(&nmea::encode_gsa(fix, "1.61"));
        }

        oscillator.pps_second()?;
        foreground.poll()?;

        if second % 60 == 0 {
            if let Ok(st) = status_shared.read() {
                info!(
                    "t={}s fix={:?} grade={:?} drift={} err={} word=0x{:04x} osc={:+.2}ppb",
                    second,
                    st.fix,
                    st.grade,
                    Deci(st.sample_drift_deci),
                    Centi(st.current_error_centi),
                    st.dac_word,
                    state.borrow().error_ppb(),
                );
            }
        }

        if args.realtime {
            thread::sleep(Duration::from_secs(1));
        }
    }

    if let Ok(st) = status_shared.read() {
        info!("Final: {}", serde_json::to_string(&*st)?);
    }
    Ok(())
}

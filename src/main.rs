// src/main.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use muon_logger::drivers::{list_ports, DeviceOpener, SerialOpener, SimulatedOpener};
use muon_logger::environment::StaticEnvironment;
use muon_logger::types::GeoLocation;
use muon_logger::visualizer::status_line;
use muon_logger::{ConnectionMode, LoggerConfig, Record, SessionController};

#[derive(Parser)]
#[command(name = "muon-logger")]
#[command(about = "Log scintillator events from a serial detector and track live statistics")]
#[command(version)]
struct Cli {
    /// Serial port of the detector, e.g. /dev/ttyACM0 or COM4
    #[arg(long)]
    port: Option<String>,

    /// Use a synthetic detector instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// JSON configuration file; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for session logs (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print the serial ports visible to the OS and exit
    #[arg(long)]
    list_ports: bool,

    /// Fixed latitude recorded with every row
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Fixed longitude recorded with every row
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Seconds between status lines
    #[arg(long, default_value_t = 5)]
    status_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_ports {
        for port in list_ports().context("failed to enumerate serial ports")? {
            println!("{port}");
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => LoggerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LoggerConfig::default(),
    };
    if let Some(dir) = cli.log_dir {
        config.log_dir = dir;
    }
    config.validate()?;

    let mode = if cli.simulate {
        ConnectionMode::Simulation
    } else {
        ConnectionMode::Hardware
    };
    let opener: Box<dyn DeviceOpener> = match mode {
        ConnectionMode::Hardware => Box::new(SerialOpener::new(config.baud_rate, config.read_timeout())),
        ConnectionMode::Simulation => Box::new(SimulatedOpener::default()),
    };
    let port = match mode {
        ConnectionMode::Hardware => cli.port,
        ConnectionMode::Simulation => Some(cli.port.unwrap_or_else(|| "simulated".to_owned())),
    };
    let location = cli.lat.zip(cli.lon).map(|(lat, lon)| GeoLocation { lat, lon });

    let tick = config.tick_interval();
    let mut controller =
        SessionController::new(config, opener, Arc::new(StaticEnvironment { location }));
    controller.on_record(|accepted| {
        if let Record::Event(event) = &accepted.record {
            log::debug!(
                "hit at {:.6} s: peak {:?} mV, dead {} us",
                accepted.elapsed_s,
                event.peak_mv,
                event.dead_time_us()
            );
        }
    });
    controller
        .start_session(port.as_deref())
        .context("could not start logging")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let status_every = Duration::from_secs(cli.status_secs.max(1));
    let mut last_status = Instant::now();
    let mut outcome = Ok(());
    while running.load(Ordering::SeqCst) {
        thread::sleep(tick);
        if let Err(e) = controller.tick() {
            outcome = Err(e).context("logging stopped");
            break;
        }
        if last_status.elapsed() >= status_every {
            last_status = Instant::now();
            log::info!("{}", status_line(&controller.current_metrics()));
        }
    }

    if let Some(path) = controller.stop_session() {
        log::info!("session saved to {}", path.display());
    }
    outcome
}

// src/engine.rs
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::config::LoggerConfig;
use crate::drivers::{
    decode_line, ingestion_channel, ClockReconciler, DeviceLink, DeviceOpener, IngestReceiver,
    IngestSender, LineReader, Received, SessionAggregator, SessionError,
};
use crate::environment::{EnvironmentMonitor, EnvironmentProvider};
use crate::recorder::{LogRow, SessionLog};
use crate::types::{AcceptedRecord, RateHistoryEntry, Record, Snapshot};
use crate::visualizer::{PlotPoint, PlotTrace};

/// Receives every record once it has been reconciled and logged.
pub type RecordCallback = Box<dyn FnMut(&AcceptedRecord) + Send>;

/// Why the reader thread stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    Halted,
    ConsumerGone,
    Broken(String),
}

/// Blocking read loop. Only ever enqueues; never touches statistics.
fn run_reader(
    mut reader: Box<dyn LineReader>,
    tx: IngestSender,
    halt: Arc<AtomicBool>,
) -> ReaderExit {
    while !halt.load(Ordering::SeqCst) {
        match reader.read_line() {
            Ok(Some(line)) => {
                let Some(record) = decode_line(&line) else {
                    continue;
                };
                if tx.push(Received::now(record)).is_err() {
                    return ReaderExit::ConsumerGone;
                }
            }
            Ok(None) => {}
            // The controller closed the link under us; that is the normal way out.
            Err(_) if halt.load(Ordering::SeqCst) => return ReaderExit::Halted,
            Err(e) => return ReaderExit::Broken(e.to_string()),
        }
    }
    ReaderExit::Halted
}

/// One logging run: device link, log file, clock anchor and reader thread.
struct Session {
    port: String,
    clock: ClockReconciler,
    log: SessionLog,
    link: Option<Box<dyn DeviceLink>>,
    ingest: IngestReceiver,
    halt: Arc<AtomicBool>,
    reader: Option<JoinHandle<ReaderExit>>,
    last_rate_history: Instant,
    log_failures: u64,
}

impl Session {
    /// Halts the reader, closes the link, then finalizes the log.
    fn close(self) -> PathBuf {
        let Session {
            port,
            link,
            ingest,
            halt,
            reader,
            log,
            ..
        } = self;
        halt.store(true, Ordering::SeqCst);
        // Unblocks a reader stuck on a full queue.
        drop(ingest);
        drop(link);
        if let Some(handle) = reader {
            match handle.join() {
                Ok(exit) => log::debug!("reader on {port} exited: {exit:?}"),
                Err(_) => log::error!("reader thread on {port} panicked"),
            }
        }
        log.finish()
    }
}

/// Drives the Idle -> Running -> Idle lifecycle and the fixed-cadence tick.
pub struct SessionController {
    config: LoggerConfig,
    opener: Box<dyn DeviceOpener>,
    aggregator: SessionAggregator,
    environment: EnvironmentMonitor,
    session: Option<Session>,
    listeners: Vec<RecordCallback>,
    plot: PlotTrace,
    selected_port: Option<String>,
    port_present: bool,
    last_port_check: Option<Instant>,
    last_env_refresh: Option<Instant>,
}

impl SessionController {
    pub fn new(
        config: LoggerConfig,
        opener: Box<dyn DeviceOpener>,
        provider: Arc<dyn EnvironmentProvider>,
    ) -> Self {
        Self {
            aggregator: SessionAggregator::new(config.stats.clone()),
            plot: PlotTrace::new(config.plot_capacity),
            environment: EnvironmentMonitor::new(provider),
            config,
            opener,
            session: None,
            listeners: Vec::new(),
            selected_port: None,
            port_present: false,
            last_port_check: None,
            last_env_refresh: None,
        }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_log_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.log.path())
    }

    pub fn on_record(&mut self, callback: impl FnMut(&AcceptedRecord) + Send + 'static) {
        self.listeners.push(Box::new(callback));
    }

    /// Opens the device, creates the log and starts the reader.
    ///
    /// Everything that can fail happens before the statistics are reset, so a
    /// failed start leaves the previous state untouched and the link closed.
    pub fn start_session(&mut self, port: Option<&str>) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        let port = port
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(SessionError::NoPortSelected)?
            .to_owned();
        self.selected_port = Some(port.clone());

        let connection_error = |e: std::io::Error| SessionError::Connection {
            port: port.clone(),
            reason: e.to_string(),
        };
        let mut link = self.opener.open(&port).map_err(connection_error)?;
        let reader = link.reader().map_err(connection_error)?;
        let started_wall = Local::now();
        let started = Instant::now();
        let log = SessionLog::create(&self.config.log_dir, &self.config.log_prefix, started_wall)?;

        thread::sleep(self.config.settle_delay());
        for command in &self.config.startup_commands {
            if let Err(e) = link.send_command(command) {
                log::warn!("device command {command:?} failed on {port}: {e}");
            }
        }

        let (tx, ingest) = ingestion_channel(self.config.channel_capacity);
        let halt = Arc::new(AtomicBool::new(false));
        let reader_halt = Arc::clone(&halt);
        let handle = thread::Builder::new()
            .name(format!("reader-{port}"))
            .spawn(move || run_reader(reader, tx, reader_halt));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                log.discard();
                return Err(connection_error(e));
            }
        };

        self.aggregator.reset(started);
        self.plot.clear();
        self.session = Some(Session {
            port: port.clone(),
            clock: ClockReconciler::new(started),
            log,
            link: Some(link),
            ingest,
            halt,
            reader: Some(handle),
            last_rate_history: started,
            log_failures: 0,
        });
        log::info!("logging started on {port}");
        Ok(())
    }

    /// Halts the reader, logs everything it delivered, then tears the session down.
    /// Returns the path of the finished log, or `None` if nothing was running.
    pub fn stop_session(&mut self) -> Option<PathBuf> {
        let reader = {
            let session = self.session.as_mut()?;
            session.halt.store(true, Ordering::SeqCst);
            session.link = None;
            session.reader.take()
        };
        if let Some(handle) = reader {
            // Keep the queue moving so a reader blocked on a full queue can see the halt.
            while !handle.is_finished() {
                self.log_queued();
                thread::sleep(Duration::from_millis(1));
            }
            if let Some(session) = self.session.as_mut() {
                session.reader = Some(handle);
            }
        }
        self.log_queued();
        let session = self.session.take()?;
        let port = session.port.clone();
        let path = session.close();
        self.aggregator.finish();
        self.plot.clear();
        log::info!("logging stopped on {port}");
        Some(path)
    }

    /// One scheduling tick: housekeeping, then drain and fold every queued record.
    ///
    /// A broken device link ends the session and is returned as
    /// [`SessionError::Connection`].
    pub fn tick(&mut self) -> Result<(), SessionError> {
        let now = Instant::now();
        self.housekeeping(now);

        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let drained = session.ingest.drain();
        self.process(drained.items);

        if let Some(session) = self.session.as_mut() {
            let interval = self.config.rate_history_interval();
            if now.saturating_duration_since(session.last_rate_history) >= interval {
                session.last_rate_history = now;
                self.aggregator
                    .record_rate_history(Local::now(), now, &self.environment.reading());
            }
        }

        if drained.producer_gone {
            return Err(self.connection_lost());
        }
        Ok(())
    }

    /// Read-only copy of every displayed metric.
    pub fn current_metrics(&mut self) -> Snapshot {
        let mut snapshot = self.aggregator.snapshot(Instant::now());
        snapshot.running = self.session.is_some();
        snapshot.connected = self.session.is_some() || self.port_present;
        snapshot.environment = self.environment.reading();
        snapshot
    }

    pub fn rate_history(&self) -> Vec<RateHistoryEntry> {
        self.aggregator
            .stats()
            .map(|s| s.rate_history().cloned().collect())
            .unwrap_or_default()
    }

    pub fn plot_points(&self) -> Vec<PlotPoint> {
        self.plot.points()
    }

    fn housekeeping(&mut self, now: Instant) {
        let port_due = self
            .last_port_check
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.port_check_interval());
        if port_due {
            self.last_port_check = Some(now);
            self.port_present = match &self.selected_port {
                Some(port) => self.opener.port_present(port),
                None => false,
            };
        }

        let env_due = self
            .last_env_refresh
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.environment_refresh());
        if env_due {
            self.last_env_refresh = Some(now);
            self.environment.request_refresh();
        }
        self.environment.poll();
    }

    fn log_queued(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let drained = session.ingest.drain();
        self.process(drained.items);
    }

    fn process(&mut self, items: Vec<Received>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let environment = self.environment.reading();
        for item in items {
            let at = session
                .clock
                .reconcile(item.record.device_timestamp_us(), item.wall, item.at);
            self.aggregator.ingest(&item.record, item.at);

            let Some(row) = LogRow::new(&item.record, &at, &environment) else {
                continue;
            };
            if let Err(e) = session.log.append(&row) {
                session.log_failures += 1;
                log::error!("{e} ({} rows lost so far)", session.log_failures);
            }

            match &item.record {
                Record::Sample(s) => self.plot.push(at.elapsed_s, s.millivolts()),
                Record::Event(e) => {
                    if let Some(peak) = e.peak_mv.filter(|p| p.is_finite()) {
                        self.plot.push(at.elapsed_s, peak);
                    }
                }
                Record::Hello => {}
            }

            let accepted = AcceptedRecord {
                record: item.record,
                timestamp: at.timestamp,
                elapsed_s: at.elapsed_s,
            };
            for listener in &mut self.listeners {
                listener(&accepted);
            }
        }
    }

    fn connection_lost(&mut self) -> SessionError {
        let Some(mut session) = self.session.take() else {
            return SessionError::Connection {
                port: String::new(),
                reason: "no active session".to_owned(),
            };
        };
        let exit = session
            .reader
            .take()
            .map(|h| h.join().unwrap_or_else(|_| ReaderExit::Broken("reader panicked".to_owned())));
        let reason = match exit {
            Some(ReaderExit::Broken(reason)) => reason,
            other => format!("reader stopped unexpectedly ({other:?})"),
        };
        let port = session.port.clone();
        log::warn!("connection to {port} lost: {reason}");
        session.close();
        self.aggregator.finish();
        self.plot.clear();
        SessionError::Connection { port, reason }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_session();
    }
}

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serialport::SerialPort;

/// Read side of a device link. Held by the reader thread.
pub trait LineReader: Send {
    /// `Ok(Some(line))` for one complete line, `Ok(None)` when the read timed out.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// An open device connection. Dropping it closes the link.
pub trait DeviceLink: Send {
    fn send_command(&mut self, command: &str) -> io::Result<()>;
    /// Hands out a read-only capability on the same connection.
    fn reader(&mut self) -> io::Result<Box<dyn LineReader>>;
}

/// Something that can open device links by port name.
pub trait DeviceOpener: Send {
    fn open(&self, port: &str) -> io::Result<Box<dyn DeviceLink>>;
    fn port_present(&self, port: &str) -> bool;
}

/// Names of the serial ports currently visible to the OS.
pub fn list_ports() -> Result<Vec<String>, serialport::Error> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// Longest partial line kept while waiting for its newline.
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Splits a byte stream into lines. Partial lines survive read timeouts.
#[derive(Default)]
struct LineAssembler {
    pending: Vec<u8>,
    // Bytes of `pending` already known to hold no newline.
    scanned: usize,
}

impl LineAssembler {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let Some(found) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') else {
            if self.pending.len() > MAX_PENDING_LINE {
                log::trace!("discarding {} bytes without a line break", self.pending.len());
                self.pending.clear();
                self.scanned = 0;
            } else {
                self.scanned = self.pending.len();
            }
            return None;
        };
        let pos = self.scanned + found;
        self.scanned = 0;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&raw).trim().to_owned())
    }
}

pub struct SerialOpener {
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialOpener {
    pub fn new(baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            baud_rate,
            read_timeout,
        }
    }
}

impl DeviceOpener for SerialOpener {
    fn open(&self, port: &str) -> io::Result<Box<dyn DeviceLink>> {
        let serial = serialport::new(port, self.baud_rate)
            .timeout(self.read_timeout)
            .open()?;
        log::info!("opened {port} at {} baud", self.baud_rate);
        Ok(Box::new(SerialLink { port: serial }))
    }

    fn port_present(&self, port: &str) -> bool {
        list_ports().map_or(false, |ports| ports.iter().any(|p| p == port))
    }
}

struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl DeviceLink for SerialLink {
    fn send_command(&mut self, command: &str) -> io::Result<()> {
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn reader(&mut self) -> io::Result<Box<dyn LineReader>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SerialLineReader {
            port,
            lines: LineAssembler::default(),
            chunk: [0; 512],
        }))
    }
}

struct SerialLineReader {
    port: Box<dyn SerialPort>,
    lines: LineAssembler,
    chunk: [u8; 512],
}

impl LineReader for SerialLineReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Some(line));
            }
            match self.port.read(&mut self.chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.lines.extend(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Synthetic detector: a hello line, a sample every 20 ms, and events at
/// random intervals with a heavy-tailed peak amplitude.
pub struct SimulatedOpener {
    pub mean_event_interval: Duration,
}

impl Default for SimulatedOpener {
    fn default() -> Self {
        Self {
            mean_event_interval: Duration::from_secs(2),
        }
    }
}

impl DeviceOpener for SimulatedOpener {
    fn open(&self, port: &str) -> io::Result<Box<dyn DeviceLink>> {
        log::info!("opened simulated device on {port}");
        Ok(Box::new(SimulatedLink {
            closed: Arc::new(AtomicBool::new(false)),
            mean_event_us: self.mean_event_interval.as_micros().max(1) as f64,
        }))
    }

    fn port_present(&self, _port: &str) -> bool {
        true
    }
}

struct SimulatedLink {
    closed: Arc<AtomicBool>,
    mean_event_us: f64,
}

impl DeviceLink for SimulatedLink {
    fn send_command(&mut self, command: &str) -> io::Result<()> {
        log::debug!("simulated device ignoring {command:?}");
        Ok(())
    }

    fn reader(&mut self) -> io::Result<Box<dyn LineReader>> {
        let mut rng = StdRng::from_entropy();
        let first_event_us = exponential(&mut rng, self.mean_event_us);
        Ok(Box::new(SimulatedReader {
            closed: Arc::clone(&self.closed),
            rng,
            device_us: 0,
            next_event_us: first_event_us as i64,
            mean_event_us: self.mean_event_us,
            said_hello: false,
        }))
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

const SIM_SAMPLE_PERIOD_US: i64 = 20_000;
const SIM_BASELINE_ADC: i64 = 1092;
const SIM_MV_PER_ADC: f64 = 3300.0 / 4096.0;

struct SimulatedReader {
    closed: Arc<AtomicBool>,
    rng: StdRng,
    device_us: i64,
    next_event_us: i64,
    mean_event_us: f64,
    said_hello: bool,
}

impl LineReader for SimulatedReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated link closed"));
        }
        if !self.said_hello {
            self.said_hello = true;
            return Ok(Some(serde_json::json!({ "type": "hello" }).to_string()));
        }
        if self.next_event_us <= self.device_us + SIM_SAMPLE_PERIOD_US {
            self.device_us = self.next_event_us.max(self.device_us);
            self.next_event_us =
                self.device_us + exponential(&mut self.rng, self.mean_event_us) as i64;
            let peak_mv = 60.0 + exponential(&mut self.rng, 45.0);
            let line = serde_json::json!({
                "type": "event",
                "ts_us": self.device_us,
                "mv_peak": (peak_mv * 10.0).round() / 10.0,
                "adc_peak": SIM_BASELINE_ADC + (peak_mv / SIM_MV_PER_ADC) as i64,
                "baseline_adc": SIM_BASELINE_ADC,
                "dead_us": self.rng.gen_range(150..260),
            });
            return Ok(Some(line.to_string()));
        }
        thread::sleep(Duration::from_micros(SIM_SAMPLE_PERIOD_US as u64));
        self.device_us += SIM_SAMPLE_PERIOD_US;
        let noise: f64 = (0..4).map(|_| self.rng.gen_range(-1.5..1.5)).sum();
        let line = serde_json::json!({
            "type": "sample",
            "ts_us": self.device_us,
            "mv": (noise * 100.0).round() / 100.0,
            "adc": SIM_BASELINE_ADC + (noise / SIM_MV_PER_ADC) as i64,
        });
        Ok(Some(line.to_string()))
    }
}

fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
    -mean * u.ln()
}

/// What a [`ManualLink`] reader does once its scripted lines run out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Keep timing out, like a quiet device.
    Idle,
    /// Fail the next read, like an unplugged device.
    Disconnect,
}

/// In-memory device for tests and deterministic playback.
#[derive(Clone)]
pub struct ManualOpener {
    lines: Vec<String>,
    end: ScriptEnd,
    sent: Arc<Mutex<Vec<String>>>,
    open_error: Option<String>,
    reject_commands: bool,
}

impl ManualOpener {
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>, end: ScriptEnd) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            end,
            sent: Arc::new(Mutex::new(Vec::new())),
            open_error: None,
            reject_commands: false,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            open_error: Some(reason.to_owned()),
            ..Self::new(Vec::<String>::new(), ScriptEnd::Idle)
        }
    }

    pub fn rejecting_commands(mut self) -> Self {
        self.reject_commands = true;
        self
    }

    /// Commands written to any link opened by this opener, in order.
    pub fn sent_commands(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl DeviceOpener for ManualOpener {
    fn open(&self, _port: &str) -> io::Result<Box<dyn DeviceLink>> {
        if let Some(reason) = &self.open_error {
            return Err(io::Error::new(io::ErrorKind::NotFound, reason.clone()));
        }
        Ok(Box::new(ManualLink {
            lines: Some(self.lines.iter().cloned().collect()),
            end: self.end,
            sent: Arc::clone(&self.sent),
            closed: Arc::new(AtomicBool::new(false)),
            reject_commands: self.reject_commands,
        }))
    }

    fn port_present(&self, _port: &str) -> bool {
        self.open_error.is_none()
    }
}

struct ManualLink {
    lines: Option<VecDeque<String>>,
    end: ScriptEnd,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    reject_commands: bool,
}

impl DeviceLink for ManualLink {
    fn send_command(&mut self, command: &str) -> io::Result<()> {
        if self.reject_commands {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write rejected"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(command.to_owned());
        }
        Ok(())
    }

    fn reader(&mut self) -> io::Result<Box<dyn LineReader>> {
        let lines = self
            .lines
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "reader already taken"))?;
        Ok(Box::new(ManualReader {
            lines,
            end: self.end,
            closed: Arc::clone(&self.closed),
        }))
    }
}

impl Drop for ManualLink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ManualReader {
    lines: VecDeque<String>,
    end: ScriptEnd,
    closed: Arc<AtomicBool>,
}

impl LineReader for ManualReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
        }
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        match self.end {
            ScriptEnd::Idle => {
                thread::sleep(Duration::from_millis(5));
                Ok(None)
            }
            ScriptEnd::Disconnect => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "device disconnected",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::decode_line;
    use crate::types::Record;

    #[test]
    fn assembler_keeps_partial_lines_across_reads() {
        let mut lines = LineAssembler::default();
        lines.extend(b"{\"type\":\"sam");
        assert!(lines.next_line().is_none());
        lines.extend(b"ple\",\"mv\":1.0}\r\n{\"type\":\"hello\"}\n");
        assert_eq!(lines.next_line().as_deref(), Some("{\"type\":\"sample\",\"mv\":1.0}"));
        assert_eq!(lines.next_line().as_deref(), Some("{\"type\":\"hello\"}"));
        assert!(lines.next_line().is_none());
    }

    #[test]
    fn assembler_replaces_invalid_utf8() {
        let mut lines = LineAssembler::default();
        lines.extend(&[0xff, b'o', b'k', b'\n']);
        assert_eq!(lines.next_line().as_deref(), Some("\u{fffd}ok"));
    }

    #[test]
    fn assembler_drops_overlong_partial_lines() {
        let mut lines = LineAssembler::default();
        let chunk = [b'x'; 512];
        for _ in 0..(MAX_PENDING_LINE / chunk.len() + 2) {
            lines.extend(&chunk);
            assert!(lines.next_line().is_none());
            assert!(lines.pending.len() <= MAX_PENDING_LINE + chunk.len());
        }
        assert!(lines.pending.len() < MAX_PENDING_LINE);

        lines.extend(b"tail\n{\"type\":\"hello\"}\n");
        lines.next_line();
        assert_eq!(lines.next_line().as_deref(), Some("{\"type\":\"hello\"}"));
        assert!(lines.next_line().is_none());
        assert!(lines.pending.is_empty());
    }

    #[test]
    fn manual_link_replays_then_disconnects() {
        let opener = ManualOpener::new(["a", "b"], ScriptEnd::Disconnect);
        let mut link = opener.open("test").unwrap();
        link.send_command("SET PULSER ON").unwrap();
        let mut reader = link.reader().unwrap();
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("a"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("b"));
        assert!(reader.read_line().is_err());
        assert_eq!(opener.sent_commands(), vec!["SET PULSER ON".to_owned()]);
    }

    #[test]
    fn closing_manual_link_breaks_its_reader() {
        let opener = ManualOpener::new(["a"], ScriptEnd::Idle);
        let mut link = opener.open("test").unwrap();
        let mut reader = link.reader().unwrap();
        drop(link);
        assert!(reader.read_line().is_err());
    }

    #[test]
    fn simulated_device_emits_decodable_lines() {
        let opener = SimulatedOpener {
            mean_event_interval: Duration::from_millis(30),
        };
        let mut link = opener.open("sim").unwrap();
        let mut reader = link.reader().unwrap();
        let mut kinds = Vec::new();
        for _ in 0..40 {
            let line = reader.read_line().unwrap().unwrap();
            let record = decode_line(&line).expect("simulated line should decode");
            kinds.push(record.kind());
            if let Record::Event(e) = record {
                assert!(e.peak_mv.unwrap() >= 60.0);
                assert!(e.dead_time_us() >= 150.0);
            }
        }
        assert_eq!(kinds[0], "hello");
        assert!(kinds.contains(&"sample"));
        assert!(kinds.contains(&"event"));
    }
}

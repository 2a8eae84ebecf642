use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat};

use crate::drivers::{LogError, Reconciled};
use crate::types::{EnvironmentReading, Record};

/// Column order of every session log.
pub const LOG_HEADER: [&str; 13] = [
    "timestamp_local",
    "elapsed_s",
    "type",
    "mv",
    "adc",
    "mv_peak",
    "adc_peak",
    "baseline_adc",
    "dead_us",
    "lat",
    "lon",
    "temp_C",
    "pressure_hPa",
];

/// One formatted log row. Unset numeric fields are empty strings.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRow {
    fields: [String; 13],
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn fixed(value: Option<f64>, decimals: usize) -> String {
    value.map(|v| format!("{v:.decimals$}")).unwrap_or_default()
}

impl LogRow {
    /// Rows exist for samples and events only; handshakes are not logged.
    pub fn new(record: &Record, at: &Reconciled, env: &EnvironmentReading) -> Option<Self> {
        let timestamp = at.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false);
        let (elapsed, kind, values) = match record {
            Record::Sample(s) => (
                format!("{:.3}", at.elapsed_s),
                "sample",
                [
                    opt(s.millivolts),
                    opt(s.adc),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ],
            ),
            Record::Event(e) => (
                format!("{:.6}", at.elapsed_s),
                "event",
                [
                    String::new(),
                    String::new(),
                    opt(e.peak_mv),
                    opt(e.peak_adc),
                    opt(e.baseline_adc),
                    opt(e.dead_time_us),
                ],
            ),
            Record::Hello => return None,
        };
        let [mv, adc, mv_peak, adc_peak, baseline, dead] = values;
        Some(Self {
            fields: [
                timestamp,
                elapsed,
                kind.to_owned(),
                mv,
                adc,
                mv_peak,
                adc_peak,
                baseline,
                dead,
                fixed(env.lat, 6),
                fixed(env.lon, 6),
                fixed(env.temp_c, 2),
                fixed(env.pressure_hpa, 1),
            ],
        })
    }

    pub fn fields(&self) -> &[String; 13] {
        &self.fields
    }
}

/// Append-only CSV log for one session.
///
/// Every row reopens the file in append mode and closes it again, so a crash
/// loses at most the row being written.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    rows: u64,
}

impl SessionLog {
    /// Creates `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.csv` and writes the header.
    pub fn create(dir: &Path, prefix: &str, started: DateTime<Local>) -> Result<Self, LogError> {
        fs::create_dir_all(dir).map_err(|source| LogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let stamp = started.format("%Y%m%d_%H%M%S");
        let (path, file) = create_unique(dir, &format!("{prefix}_{stamp}"))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(LOG_HEADER).map_err(|source| LogError::Csv {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("session log {}", path.display());
        Ok(Self { path, rows: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn append(&mut self, row: &LogRow) -> Result<(), LogError> {
        let io_err = |source| LogError::Io {
            path: self.path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(row.fields())
            .map_err(|source| LogError::Csv {
                path: self.path.clone(),
                source,
            })?;
        writer.flush().map_err(io_err)?;
        self.rows += 1;
        Ok(())
    }

    /// Removes a log that never received a row.
    pub fn discard(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("could not remove unused log {}: {e}", self.path.display());
        }
    }

    /// Closes out the session and returns where the log lives.
    pub fn finish(self) -> PathBuf {
        log::info!("session log closed after {} rows: {}", self.rows, self.path.display());
        self.path
    }
}

fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File), LogError> {
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.csv")
        } else {
            format!("{stem}_{attempt}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
            Err(source) => return Err(LogError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, Sample};
    use chrono::TimeZone;

    fn at(elapsed_s: f64) -> Reconciled {
        Reconciled {
            timestamp: Local.timestamp_opt(1_700_000_000, 250_000_000).unwrap(),
            elapsed_s,
        }
    }

    fn sample() -> Record {
        Record::Sample(Sample {
            device_timestamp_us: Some(10),
            millivolts: Some(1.25),
            adc: Some(1094),
        })
    }

    fn event() -> Record {
        Record::Event(Event {
            device_timestamp_us: Some(20),
            peak_mv: Some(143.5),
            peak_adc: None,
            baseline_adc: Some(1092),
            dead_time_us: Some(212.0),
        })
    }

    #[test]
    fn sample_row_layout() {
        let env = EnvironmentReading {
            lat: Some(51.5),
            lon: Some(-0.125),
            temp_c: None,
            pressure_hpa: Some(1013.27),
        };
        let row = LogRow::new(&sample(), &at(1.23456), &env).unwrap();
        let f = row.fields();
        assert!(f[0].starts_with(&at(0.0).timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()));
        assert_eq!(f[1], "1.235");
        assert_eq!(f[2], "sample");
        assert_eq!(f[3], "1.25");
        assert_eq!(f[4], "1094");
        assert!(f[5..9].iter().all(String::is_empty));
        assert_eq!(f[9], "51.500000");
        assert_eq!(f[10], "-0.125000");
        assert_eq!(f[11], "");
        assert_eq!(f[12], "1013.3");
    }

    #[test]
    fn event_row_layout() {
        let row = LogRow::new(&event(), &at(1.23456789), &EnvironmentReading::default()).unwrap();
        let f = row.fields();
        assert_eq!(f[1], "1.234568");
        assert_eq!(f[2], "event");
        assert_eq!(f[3], "");
        assert_eq!(f[4], "");
        assert_eq!(f[5], "143.5");
        assert_eq!(f[6], "");
        assert_eq!(f[7], "1092");
        assert_eq!(f[8], "212");
        assert!(f[9..].iter().all(String::is_empty));
    }

    #[test]
    fn hello_has_no_row() {
        assert!(LogRow::new(&Record::Hello, &at(0.0), &EnvironmentReading::default()).is_none());
    }

    #[test]
    fn log_appends_rows_after_header() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let mut log = SessionLog::create(dir.path(), "muon", started).unwrap();
        assert!(log.path().ends_with("muon_20240309_140507.csv"));

        let env = EnvironmentReading::default();
        log.append(&LogRow::new(&sample(), &at(0.5), &env).unwrap()).unwrap();
        log.append(&LogRow::new(&event(), &at(0.75), &env).unwrap()).unwrap();
        assert_eq!(log.rows_written(), 2);

        let path = log.finish();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_owned).collect();
        assert_eq!(headers, LOG_HEADER.to_vec());
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "sample");
        assert_eq!(&rows[1][2], "event");
        assert_eq!(&rows[1][8], "212");
    }

    #[test]
    fn discarded_log_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::create(dir.path(), "muon", Local::now()).unwrap();
        let path = log.path().to_path_buf();
        log.discard();
        assert!(!path.exists());
    }

    #[test]
    fn same_second_sessions_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let first = SessionLog::create(dir.path(), "muon", started).unwrap();
        let second = SessionLog::create(dir.path(), "muon", started).unwrap();
        assert_ne!(first.path(), second.path());
    }
}

// src/types.rs
use chrono::{DateTime, Local};

/// Where records come from.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum ConnectionMode {
    #[default]
    Hardware,
    Simulation,
}

/// Periodic raw waveform sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub device_timestamp_us: Option<i64>,
    /// Amplitude as reported; `None` when the field was absent or unparseable.
    pub millivolts: Option<f64>,
    pub adc: Option<i64>,
}

impl Sample {
    /// Amplitude used for statistics. Unparseable values count as 0.0.
    pub fn millivolts(&self) -> f64 {
        self.millivolts.unwrap_or(0.0)
    }
}

/// A detected hit.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub device_timestamp_us: Option<i64>,
    pub peak_mv: Option<f64>,
    pub peak_adc: Option<i64>,
    pub baseline_adc: Option<i64>,
    /// Dead time as reported; `None` when the field was absent or unparseable.
    pub dead_time_us: Option<f64>,
}

impl Event {
    pub fn dead_time_us(&self) -> f64 {
        self.dead_time_us.unwrap_or(0.0)
    }

    /// Dead time in seconds, negative reports clamped to zero.
    pub fn dead_time_seconds(&self) -> f64 {
        let us = self.dead_time_us();
        if us.is_nan() {
            return 0.0;
        }
        us.max(0.0) / 1_000_000.0
    }
}

/// One decoded device line. Immutable once decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Sample(Sample),
    Event(Event),
    Hello,
}

impl Record {
    pub fn device_timestamp_us(&self) -> Option<i64> {
        match self {
            Record::Sample(s) => s.device_timestamp_us,
            Record::Event(e) => e.device_timestamp_us,
            Record::Hello => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Record::Sample(_) => "sample",
            Record::Event(_) => "event",
            Record::Hello => "hello",
        }
    }
}

/// A record after it has been reconciled and written to the session log.
#[derive(Clone, Debug)]
pub struct AcceptedRecord {
    pub record: Record,
    pub timestamp: DateTime<Local>,
    pub elapsed_s: f64,
}

/// Best-effort location fix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
}

/// Best-effort weather reading at a location.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Weather {
    pub temp_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
}

/// Latest known environment, attached to every log row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvironmentReading {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub temp_c: Option<f64>,
    pub pressure_hpa: Option<f64>,
}

impl EnvironmentReading {
    pub fn apply_location(&mut self, location: GeoLocation) {
        self.lat = Some(location.lat);
        self.lon = Some(location.lon);
    }

    /// Only fields the provider actually returned overwrite the previous reading.
    pub fn apply_weather(&mut self, weather: Weather) {
        if weather.temp_c.is_some() {
            self.temp_c = weather.temp_c;
        }
        if weather.pressure_hpa.is_some() {
            self.pressure_hpa = weather.pressure_hpa;
        }
    }

    pub fn location(&self) -> Option<GeoLocation> {
        Some(GeoLocation {
            lat: self.lat?,
            lon: self.lon?,
        })
    }
}

/// One periodic rate-history point.
#[derive(Clone, Debug, PartialEq)]
pub struct RateHistoryEntry {
    pub at: DateTime<Local>,
    pub cpm: u64,
    pub pressure_hpa: Option<f64>,
    pub temp_c: Option<f64>,
}

/// Read-only copy of every displayed metric. Each one is `None` when undefined,
/// and all of them are `None` while no session is running.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub running: bool,
    pub connected: bool,
    pub total_count: Option<u64>,
    pub cpm: Option<u64>,
    pub cpm_sigma: Option<f64>,
    pub live_cpm: Option<f64>,
    pub since_last_event_s: Option<f64>,
    pub mean_interval_s: Option<f64>,
    pub interval_cv: Option<f64>,
    pub last_peak_mv: Option<f64>,
    pub session_peak_mv: Option<f64>,
    pub noise_rms_mv: Option<f64>,
    pub mpv_mv: Option<f64>,
    pub run_time_s: Option<f64>,
    pub dead_time_s: Option<f64>,
    pub dead_time_pct: Option<f64>,
    pub hit_active: bool,
    pub environment: EnvironmentReading,
}

use std::time::Instant;

use chrono::{DateTime, Local};

use crate::config::StatsConfig;
use crate::drivers::{RateWindow, RingBuffer, RunningHistogram};
use crate::types::{EnvironmentReading, Event, RateHistoryEntry, Record, Sample, Snapshot};

const MIN_MEAN_INTERVAL_S: f64 = 1e-9;
const MIN_RUN_TIME_S: f64 = 1e-6;

/// Running statistics for one session. Mutated only by [`SessionAggregator`].
#[derive(Clone, Debug)]
pub struct RunningStats {
    started: Instant,
    event_times: RateWindow,
    intervals: RingBuffer<f64>,
    samples: RingBuffer<f64>,
    histogram: RunningHistogram,
    session_peak_mv: Option<f64>,
    last_peak_mv: Option<f64>,
    session_total: u64,
    dead_time_total_s: f64,
    last_event_at: Option<Instant>,
    rate_history: RingBuffer<RateHistoryEntry>,
}

impl RunningStats {
    fn new(config: &StatsConfig, started: Instant) -> Self {
        Self {
            started,
            event_times: RateWindow::new(config.rate_window()),
            intervals: RingBuffer::with_capacity(config.interval_capacity),
            samples: RingBuffer::with_capacity(config.sample_capacity),
            histogram: RunningHistogram::new(
                config.histogram.bin_width_mv,
                config.histogram.bin_count,
            ),
            session_peak_mv: None,
            last_peak_mv: None,
            session_total: 0,
            dead_time_total_s: 0.0,
            last_event_at: None,
            rate_history: RingBuffer::with_capacity(config.rate_history_capacity),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn session_total(&self) -> u64 {
        self.session_total
    }

    pub fn dead_time_total_s(&self) -> f64 {
        self.dead_time_total_s
    }

    pub fn session_peak_mv(&self) -> Option<f64> {
        self.session_peak_mv
    }

    pub fn last_peak_mv(&self) -> Option<f64> {
        self.last_peak_mv
    }

    pub fn histogram(&self) -> &RunningHistogram {
        &self.histogram
    }

    pub fn intervals(&self) -> &RingBuffer<f64> {
        &self.intervals
    }

    pub fn samples(&self) -> &RingBuffer<f64> {
        &self.samples
    }

    pub fn rate_history(&self) -> impl Iterator<Item = &RateHistoryEntry> {
        self.rate_history.iter()
    }

    fn add_event(&mut self, event: &Event, at: Instant) {
        if let Some(last) = self.last_event_at {
            self.intervals
                .push(at.saturating_duration_since(last).as_secs_f64());
        }
        self.last_event_at = Some(at);
        self.event_times.push(at);
        self.session_total += 1;
        self.dead_time_total_s += event.dead_time_seconds();

        let Some(peak) = event.peak_mv.filter(|p| p.is_finite()) else {
            return;
        };
        self.last_peak_mv = Some(peak);
        self.histogram.add(peak);
        if self.session_peak_mv.map_or(true, |best| peak > best) {
            self.session_peak_mv = Some(peak);
        }
    }

    fn add_sample(&mut self, sample: &Sample) {
        let mv = sample.millivolts();
        if mv.is_finite() {
            self.samples.push(mv);
        }
    }
}

/// Owns the running statistics and derives every displayed metric from them.
///
/// Statistics survive a stop until the next [`reset`](Self::reset) but are not
/// reported while the aggregator is inactive.
pub struct SessionAggregator {
    config: StatsConfig,
    stats: Option<RunningStats>,
    active: bool,
}

impl SessionAggregator {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            stats: None,
            active: false,
        }
    }

    /// Replaces all statistics with an empty set in one step and starts reporting.
    pub fn reset(&mut self, started: Instant) {
        self.stats = Some(RunningStats::new(&self.config, started));
        self.active = true;
    }

    /// Stops reporting. The statistics stay in memory until the next reset.
    pub fn finish(&mut self) {
        self.active = false;
    }

    pub fn stats(&self) -> Option<&RunningStats> {
        self.stats.as_ref().filter(|_| self.active)
    }

    /// Folds one record received at `at` into the statistics.
    pub fn ingest(&mut self, record: &Record, at: Instant) {
        let Some(stats) = self.stats.as_mut().filter(|_| self.active) else {
            log::debug!("ignoring {} record while idle", record.kind());
            return;
        };
        match record {
            Record::Event(event) => stats.add_event(event, at),
            Record::Sample(sample) => stats.add_sample(sample),
            Record::Hello => {}
        }
    }

    /// Appends a rate-history point using the windowed count at `now`.
    pub fn record_rate_history(
        &mut self,
        wall: DateTime<Local>,
        now: Instant,
        environment: &EnvironmentReading,
    ) {
        let Some(stats) = self.stats.as_mut().filter(|_| self.active) else {
            return;
        };
        let cpm = stats.event_times.count_at(now) as u64;
        stats.rate_history.push(RateHistoryEntry {
            at: wall,
            cpm,
            pressure_hpa: environment.pressure_hpa,
            temp_c: environment.temp_c,
        });
    }

    /// Evicts stale rate-window entries and computes every metric at `now`.
    pub fn snapshot(&mut self, now: Instant) -> Snapshot {
        let hit_flash = self.config.hit_flash();
        let min_noise_samples = self.config.min_noise_samples;
        let Some(stats) = self.stats.as_mut().filter(|_| self.active) else {
            return Snapshot::default();
        };

        let windowed = stats.event_times.count_at(now);
        let run_s = now.saturating_duration_since(stats.started).as_secs_f64();
        let dead_s = stats.dead_time_total_s;
        let live_s = (run_s - dead_s).max(0.0);
        let live_cpm = (live_s > 0.0).then(|| stats.session_total as f64 / (live_s / 60.0));

        let mean_interval = stats.intervals.mean();
        let interval_cv = match (mean_interval, stats.intervals.sample_variance()) {
            (Some(mean), Some(var)) if mean > MIN_MEAN_INTERVAL_S => Some(var.sqrt() / mean),
            _ => None,
        };

        let noise_rms = if stats.samples.len() >= min_noise_samples {
            stats.samples.population_variance().map(f64::sqrt)
        } else {
            None
        };

        let since_last = stats
            .last_event_at
            .map(|t| now.saturating_duration_since(t));

        Snapshot {
            running: true,
            connected: true,
            total_count: Some(stats.session_total),
            cpm: Some(windowed as u64),
            cpm_sigma: Some((windowed as f64).sqrt()),
            live_cpm,
            since_last_event_s: since_last.map(|d| d.as_secs_f64()),
            mean_interval_s: mean_interval,
            interval_cv,
            last_peak_mv: stats.last_peak_mv,
            session_peak_mv: stats.session_peak_mv,
            noise_rms_mv: noise_rms,
            mpv_mv: stats.histogram.mode_center(),
            run_time_s: Some(run_s),
            dead_time_s: Some(dead_s),
            dead_time_pct: (run_s > MIN_RUN_TIME_S).then(|| 100.0 * dead_s / run_s),
            hit_active: since_last.is_some_and(|d| d <= hit_flash),
            environment: EnvironmentReading::default(),
        }
    }
}

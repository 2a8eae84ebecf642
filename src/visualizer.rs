// src/visualizer.rs
use crate::drivers::RingBuffer;
use crate::types::Snapshot;

/// One point of the live amplitude trace.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlotPoint {
    pub elapsed_s: f64,
    pub mv: f64,
}

/// Bounded trace fed with sample amplitudes and event peaks, oldest points first.
pub struct PlotTrace {
    points: RingBuffer<PlotPoint>,
}

impl PlotTrace {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: RingBuffer::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, elapsed_s: f64, mv: f64) {
        self.points.push(PlotPoint { elapsed_s, mv });
    }

    pub fn points(&self) -> Vec<PlotPoint> {
        self.points.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

fn show(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "--".to_owned(), |v| format!("{v:.decimals$}"))
}

/// Single-line summary of a snapshot; unavailable metrics print as `--`.
pub fn status_line(s: &Snapshot) -> String {
    let state = match (s.running, s.connected) {
        (true, _) => "logging",
        (false, true) => "connected",
        (false, false) => "disconnected",
    };
    format!(
        "[{state}] total {} | cpm {} ±{} | live {} | <dt> {} s cv {} | peak {}/{} mV | rms {} | mpv {} | run {} s dead {} s ({}%)",
        s.total_count.map_or_else(|| "--".to_owned(), |n| n.to_string()),
        s.cpm.map_or_else(|| "--".to_owned(), |n| n.to_string()),
        show(s.cpm_sigma, 1),
        show(s.live_cpm, 1),
        show(s.mean_interval_s, 2),
        show(s.interval_cv, 2),
        show(s.last_peak_mv, 1),
        show(s.session_peak_mv, 1),
        show(s.noise_rms_mv, 1),
        show(s.mpv_mv, 0),
        show(s.run_time_s, 0),
        show(s.dead_time_s, 3),
        show(s.dead_time_pct, 2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_keeps_latest_points() {
        let mut trace = PlotTrace::new(3);
        for i in 0..5 {
            trace.push(i as f64, 10.0 * i as f64);
        }
        let xs: Vec<f64> = trace.points().iter().map(|p| p.elapsed_s).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
        trace.clear();
        assert!(trace.is_empty());
    }

    #[test]
    fn idle_status_shows_placeholders() {
        let line = status_line(&Snapshot::default());
        assert!(line.starts_with("[disconnected] total -- | cpm -- ±--"));
    }

    #[test]
    fn running_status_formats_values() {
        let snap = Snapshot {
            running: true,
            total_count: Some(12),
            cpm: Some(4),
            cpm_sigma: Some(2.0),
            mpv_mv: Some(85.0),
            ..Default::default()
        };
        let line = status_line(&snap);
        assert!(line.contains("[logging] total 12 | cpm 4 ±2.0"));
        assert!(line.contains("mpv 85"));
    }
}

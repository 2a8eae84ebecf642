use std::time::Instant;

use chrono::{DateTime, Duration, Local};

/// First device-clock / host-clock pair seen in a session.
#[derive(Clone, Copy, Debug)]
struct Anchor {
    device_epoch_us: i64,
    wall: DateTime<Local>,
    monotonic: Instant,
}

/// Reconciled host time for one record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reconciled {
    pub timestamp: DateTime<Local>,
    pub elapsed_s: f64,
}

/// Maps device-relative microsecond counters onto host wall-clock time.
///
/// The anchor is captured once, from the first record carrying a device
/// timestamp, and never moves afterwards. Records without a timestamp use the
/// host time at which they were received.
///
/// A device time that lands outside the representable calendar range is
/// treated like a missing timestamp.
#[derive(Clone, Debug)]
pub struct ClockReconciler {
    start_monotonic: Instant,
    anchor: Option<Anchor>,
}

impl ClockReconciler {
    pub fn new(start_monotonic: Instant) -> Self {
        Self {
            start_monotonic,
            anchor: None,
        }
    }

    #[cfg(test)]
    fn device_epoch_us(&self) -> Option<i64> {
        self.anchor.map(|a| a.device_epoch_us)
    }

    /// `received_*` is the host time at which the record's line arrived.
    pub fn reconcile(
        &mut self,
        device_timestamp_us: Option<i64>,
        received_wall: DateTime<Local>,
        received_monotonic: Instant,
    ) -> Reconciled {
        let host_time = Reconciled {
            timestamp: received_wall,
            elapsed_s: self.local_elapsed(received_monotonic),
        };
        let Some(ts_us) = device_timestamp_us else {
            return host_time;
        };
        let anchor = *self.anchor.get_or_insert_with(|| {
            log::debug!("clock anchored at device time {ts_us} us");
            Anchor {
                device_epoch_us: ts_us,
                wall: received_wall,
                monotonic: received_monotonic,
            }
        });
        let offset_us = ts_us.saturating_sub(anchor.device_epoch_us);
        let anchor_elapsed = anchor
            .monotonic
            .saturating_duration_since(self.start_monotonic)
            .as_secs_f64();
        match anchor
            .wall
            .checked_add_signed(Duration::microseconds(offset_us))
        {
            Some(timestamp) => Reconciled {
                timestamp,
                elapsed_s: anchor_elapsed + offset_us as f64 / 1_000_000.0,
            },
            None => {
                log::trace!("device time {ts_us} us out of range, using host time");
                host_time
            }
        }
    }

    fn local_elapsed(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.start_monotonic)
            .as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wall(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_timestamp_becomes_the_epoch() {
        let t0 = Instant::now();
        let mut clock = ClockReconciler::new(t0);
        let anchored = clock.reconcile(Some(1000), wall(2), t0 + std::time::Duration::from_secs(2));
        assert_eq!(clock.device_epoch_us(), Some(1000));
        assert_eq!(anchored.timestamp, wall(2));
        assert!((anchored.elapsed_s - 2.0).abs() < 1e-9);

        // A later first-timestamp candidate never moves the anchor.
        let later = clock.reconcile(Some(2_000_000), wall(30), t0 + std::time::Duration::from_secs(30));
        assert_eq!(clock.device_epoch_us(), Some(1000));
        let expected = wall(2) + Duration::microseconds(1_999_000);
        assert_eq!(later.timestamp, expected);
        assert!((later.elapsed_s - 3.999).abs() < 1e-9);
    }

    #[test]
    fn reconciles_relative_to_anchor_wall_clock() {
        let t0 = Instant::now();
        let anchor_wall = wall(100);
        let mut clock = ClockReconciler::new(t0);
        clock.reconcile(Some(1000), anchor_wall, t0);
        let r = clock.reconcile(Some(2_000_000), wall(500), t0);
        let delta = r.timestamp - anchor_wall;
        assert_eq!(delta.num_microseconds(), Some(1_999_000));
    }

    #[test]
    fn untimestamped_records_fall_back_to_host_time() {
        let t0 = Instant::now();
        let mut clock = ClockReconciler::new(t0);
        for step in 1..=3 {
            let r = clock.reconcile(
                None,
                wall(step),
                t0 + std::time::Duration::from_millis(500 * step as u64),
            );
            assert_eq!(r.timestamp, wall(step));
            assert!((r.elapsed_s - 0.5 * step as f64).abs() < 1e-9);
        }
        assert_eq!(clock.device_epoch_us(), None);
    }

    #[test]
    fn out_of_range_device_time_falls_back_to_host_time() {
        let t0 = Instant::now();
        let mut clock = ClockReconciler::new(t0);
        clock.reconcile(Some(1000), wall(0), t0);
        for ts in [i64::MAX, i64::MIN] {
            let at = t0 + std::time::Duration::from_secs(7);
            let r = clock.reconcile(Some(ts), wall(7), at);
            assert_eq!(r.timestamp, wall(7));
            assert!((r.elapsed_s - 7.0).abs() < 1e-9);
        }
        assert_eq!(clock.device_epoch_us(), Some(1000));
        let r = clock.reconcile(Some(1_001_000), wall(9), t0);
        assert_eq!(r.timestamp, wall(1));
    }

    #[test]
    fn saturated_float_timestamp_from_the_wire_is_survivable() {
        let t0 = Instant::now();
        let mut clock = ClockReconciler::new(t0);
        for line in [r#"{"type":"sample","ts_us":0}"#, r#"{"type":"sample","ts_us":1e30}"#] {
            let record = crate::drivers::decode_line(line).unwrap();
            clock.reconcile(record.device_timestamp_us(), wall(3), t0);
        }
        assert_eq!(clock.device_epoch_us(), Some(0));
    }
}

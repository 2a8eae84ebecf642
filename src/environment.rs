// src/environment.rs
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use crate::types::{EnvironmentReading, GeoLocation, Weather};

/// Best-effort location and weather lookups. Either call may return `None`;
/// callers keep their previous reading in that case.
pub trait EnvironmentProvider: Send + Sync {
    fn locate(&self) -> Option<GeoLocation>;
    fn weather(&self, at: GeoLocation) -> Option<Weather>;
}

/// Fixed location, no weather source.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticEnvironment {
    pub location: Option<GeoLocation>,
}

impl EnvironmentProvider for StaticEnvironment {
    fn locate(&self) -> Option<GeoLocation> {
        self.location
    }

    fn weather(&self, _at: GeoLocation) -> Option<Weather> {
        None
    }
}

/// What one background refresh came back with.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvironmentUpdate {
    pub location: Option<GeoLocation>,
    pub weather: Option<Weather>,
}

/// Runs lookups off the tick thread, one at a time, and hands results back
/// through a channel that the tick polls without blocking.
pub struct EnvironmentMonitor {
    provider: Arc<dyn EnvironmentProvider>,
    in_flight: Option<Receiver<EnvironmentUpdate>>,
    reading: EnvironmentReading,
}

impl EnvironmentMonitor {
    pub fn new(provider: Arc<dyn EnvironmentProvider>) -> Self {
        Self {
            provider,
            in_flight: None,
            reading: EnvironmentReading::default(),
        }
    }

    pub fn reading(&self) -> EnvironmentReading {
        self.reading
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts a lookup unless one is already running.
    pub fn request_refresh(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let (tx, rx) = channel();
        let provider = Arc::clone(&self.provider);
        let last_known = self.reading.location();
        let spawned = thread::Builder::new()
            .name("environment".into())
            .spawn(move || {
                let location = provider.locate();
                let weather = location.or(last_known).and_then(|at| provider.weather(at));
                tx.send(EnvironmentUpdate { location, weather }).ok();
            });
        match spawned {
            Ok(_) => self.in_flight = Some(rx),
            Err(e) => log::warn!("environment refresh not started: {e}"),
        }
    }

    /// Applies a finished lookup if there is one. Never blocks.
    pub fn poll(&mut self) -> Option<EnvironmentUpdate> {
        let rx = self.in_flight.as_ref()?;
        let update = match rx.try_recv() {
            Ok(update) => update,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                self.in_flight = None;
                return None;
            }
        };
        self.in_flight = None;
        if let Some(location) = update.location {
            self.reading.apply_location(location);
        }
        if let Some(weather) = update.weather {
            self.reading.apply_weather(weather);
        }
        log::debug!("environment refreshed: {:?}", self.reading);
        Some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    struct Flaky;

    impl EnvironmentProvider for Flaky {
        fn locate(&self) -> Option<GeoLocation> {
            None
        }

        fn weather(&self, _at: GeoLocation) -> Option<Weather> {
            Some(Weather {
                temp_c: Some(4.0),
                pressure_hpa: None,
            })
        }
    }

    fn wait_for(monitor: &mut EnvironmentMonitor) -> EnvironmentUpdate {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(update) = monitor.poll() {
                return update;
            }
            assert!(Instant::now() < deadline, "refresh never finished");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn static_location_is_applied() {
        let provider = StaticEnvironment {
            location: Some(GeoLocation { lat: 51.5, lon: -0.12 }),
        };
        let mut monitor = EnvironmentMonitor::new(Arc::new(provider));
        assert!(monitor.poll().is_none());
        monitor.request_refresh();
        assert!(monitor.is_refreshing());
        wait_for(&mut monitor);
        let reading = monitor.reading();
        assert_eq!(reading.lat, Some(51.5));
        assert_eq!(reading.lon, Some(-0.12));
        assert_eq!(reading.temp_c, None);
        assert!(!monitor.is_refreshing());
    }

    #[test]
    fn missing_location_skips_weather() {
        let mut monitor = EnvironmentMonitor::new(Arc::new(Flaky));
        monitor.request_refresh();
        let update = wait_for(&mut monitor);
        assert_eq!(update, EnvironmentUpdate::default());
        assert_eq!(monitor.reading(), EnvironmentReading::default());
    }
}

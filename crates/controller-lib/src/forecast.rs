//! Per-uplink load forecasts
//!
//! Holds the latest predicted byte rate of each uplink. Forecasts only feed
//! the reroute reward; they never pick a path on their own.

use crate::inference::LoadForecaster;
use crate::models::PortNo;
use crate::stats::PathHistory;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Result of one forecasting pass over the uplinks
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ForecastPass {
    /// Uplinks forecast this pass with their predicted byte rate
    pub updated: Vec<(PortNo, f64)>,
    /// Uplinks skipped because their window is not yet full
    pub warming_up: usize,
    /// Uplinks whose model call failed
    pub errors: usize,
}

/// Latest predicted load per uplink
pub struct LoadForecast {
    forecaster: Option<Arc<dyn LoadForecaster>>,
    sequence_length: usize,
    predicted: BTreeMap<PortNo, f64>,
}

impl LoadForecast {
    pub fn new(forecaster: Option<Arc<dyn LoadForecaster>>, sequence_length: usize) -> Self {
        Self {
            forecaster,
            sequence_length,
            predicted: BTreeMap::new(),
        }
    }

    /// Forecast every uplink whose window holds exactly `sequence_length`
    /// samples. Shorter windows are skipped and keep no forecast.
    pub fn update(&mut self, histories: &BTreeMap<PortNo, PathHistory>) -> ForecastPass {
        let mut pass = ForecastPass::default();
        let Some(forecaster) = &self.forecaster else {
            return pass;
        };

        for (port, history) in histories {
            if history.len() < self.sequence_length {
                pass.warming_up += 1;
                continue;
            }

            let window = history.to_vec();
            let window = &window[window.len() - self.sequence_length..];

            match forecaster.forecast(window) {
                Ok(load) if load.is_finite() => {
                    let load = load.max(0.0);
                    self.predicted.insert(*port, load);
                    pass.updated.push((*port, load));
                }
                Ok(load) => {
                    pass.errors += 1;
                    debug!(port, load, "Discarding non-finite forecast");
                }
                Err(e) => {
                    pass.errors += 1;
                    debug!(port, error = %e, "Load forecast failed");
                }
            }
        }

        pass
    }

    /// Latest forecast for an uplink, if one has been made
    pub fn predicted_load(&self, port: PortNo) -> Option<f64> {
        self.predicted.get(&port).copied()
    }

    pub fn predicted_loads(&self) -> &BTreeMap<PortNo, f64> {
        &self.predicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Mutex;

    /// Forecaster that records every window it is called with
    struct RecordingForecaster {
        windows: Mutex<Vec<Vec<f64>>>,
        result: f64,
    }

    impl RecordingForecaster {
        fn new(result: f64) -> Self {
            Self {
                windows: Mutex::new(Vec::new()),
                result,
            }
        }
    }

    impl LoadForecaster for RecordingForecaster {
        fn forecast(&self, window: &[f64]) -> Result<f64> {
            self.windows.lock().unwrap().push(window.to_vec());
            Ok(self.result)
        }
    }

    fn histories(samples: &[f64], capacity: usize) -> BTreeMap<PortNo, PathHistory> {
        let mut history = PathHistory::new(capacity);
        for value in samples {
            history.push(*value);
        }
        BTreeMap::from([(5, history)])
    }

    #[test]
    fn test_not_invoked_before_window_is_full() {
        let recorder = Arc::new(RecordingForecaster::new(42.0));
        let mut forecast = LoadForecast::new(Some(recorder.clone()), 3);

        let pass = forecast.update(&histories(&[1.0, 2.0], 3));
        assert_eq!(pass.warming_up, 1);
        assert!(recorder.windows.lock().unwrap().is_empty());
        assert_eq!(forecast.predicted_load(5), None);
    }

    #[test]
    fn test_invoked_with_oldest_first_window() {
        let recorder = Arc::new(RecordingForecaster::new(42.0));
        let mut forecast = LoadForecast::new(Some(recorder.clone()), 3);

        let pass = forecast.update(&histories(&[1.0, 2.0, 3.0, 4.0], 3));
        assert_eq!(pass.updated, vec![(5, 42.0)]);
        assert_eq!(*recorder.windows.lock().unwrap(), vec![vec![2.0, 3.0, 4.0]]);
        assert_eq!(forecast.predicted_load(5), Some(42.0));
    }

    #[test]
    fn test_negative_forecast_clamped() {
        let mut forecast = LoadForecast::new(Some(Arc::new(RecordingForecaster::new(-5.0))), 1);
        forecast.update(&histories(&[1.0], 1));
        assert_eq!(forecast.predicted_load(5), Some(0.0));
    }

    #[test]
    fn test_non_finite_forecast_discarded() {
        let mut forecast = LoadForecast::new(Some(Arc::new(RecordingForecaster::new(f64::NAN))), 1);
        let pass = forecast.update(&histories(&[1.0], 1));
        assert_eq!(pass.errors, 1);
        assert_eq!(forecast.predicted_load(5), None);
    }

    #[test]
    fn test_disabled_without_forecaster() {
        let mut forecast = LoadForecast::new(None, 1);
        assert_eq!(forecast.update(&histories(&[1.0], 1)), ForecastPass::default());
        assert_eq!(forecast.predicted_load(5), None);
    }
}

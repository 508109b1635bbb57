//! Prediction services consumed by the control loop
//!
//! The classifier and forecaster are opaque capabilities: the loop hands
//! them feature vectors or load windows and gets a label or a load back.
//! Any scaling the models need lives inside the implementations.

mod classifier;
mod forecaster;
mod onnx;
mod scaling;

pub use classifier::OnnxClassifier;
pub use forecaster::{ForecastModelConfig, LastValueForecaster, OnnxForecaster};
pub use scaling::{MinMaxScaler, StandardScaler};

use crate::models::{FeatureVector, TrafficClass};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Labels a flow's traffic class from its features
pub trait FlowClassifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> Result<TrafficClass>;
}

/// Predicts the next-interval byte rate of one uplink from its oldest-first
/// load window
pub trait LoadForecaster: Send + Sync {
    fn forecast(&self, window: &[f64]) -> Result<f64>;
}

pub const CLASSIFIER_MODEL: &str = "classification/classifier.onnx";
pub const CLASSIFIER_SCALER: &str = "classification/classifier_scaler.json";
pub const FORECASTER_MODEL: &str = "traffic_predict/forecaster.onnx";
pub const FORECASTER_SCALER: &str = "traffic_predict/prediction_scaler.json";
pub const FORECASTER_CONFIG: &str = "traffic_predict/model_config.json";

/// Models available to the controller after startup loading
pub struct LoadedModels {
    pub classifier: Option<Arc<dyn FlowClassifier>>,
    pub forecaster: Option<Arc<dyn LoadForecaster>>,
    /// Window length, possibly overridden by the exported model config
    pub sequence_length: usize,
}

impl LoadedModels {
    pub fn none(sequence_length: usize) -> Self {
        Self {
            classifier: None,
            forecaster: None,
            sequence_length,
        }
    }
}

/// Load both models from `model_dir`.
///
/// A model that fails to load is left out; the caller degrades to fast-path
/// routing for whatever depends on it.
pub fn load_models(model_dir: Option<&Path>, sequence_length: usize) -> LoadedModels {
    let Some(dir) = model_dir else {
        warn!("No model directory configured, classification and forecasting disabled");
        return LoadedModels::none(sequence_length);
    };

    let classifier = match load_classifier(dir) {
        Ok(classifier) => {
            info!(path = %dir.join(CLASSIFIER_MODEL).display(), "Loaded flow classifier");
            Some(Arc::new(classifier) as Arc<dyn FlowClassifier>)
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Flow classifier unavailable, rerouting disabled");
            None
        }
    };

    let (forecaster, sequence_length) = match load_forecaster(dir, sequence_length) {
        Ok((forecaster, length)) => (Some(forecaster), length),
        Err(e) => {
            warn!(
                error = %format!("{:#}", e),
                "Load forecaster unavailable, rewards use zero load"
            );
            (None, sequence_length)
        }
    };

    LoadedModels {
        classifier,
        forecaster,
        sequence_length,
    }
}

fn load_classifier(dir: &Path) -> Result<OnnxClassifier> {
    let scaler_path = dir.join(CLASSIFIER_SCALER);
    let scaler = scaler_path.exists().then_some(scaler_path.as_path());
    OnnxClassifier::load(&dir.join(CLASSIFIER_MODEL), scaler)
}

fn load_forecaster(dir: &Path, sequence_length: usize) -> Result<(Arc<dyn LoadForecaster>, usize)> {
    let config_path = dir.join(FORECASTER_CONFIG);
    let model_config = if config_path.exists() {
        Some(ForecastModelConfig::load(&config_path)?)
    } else {
        None
    };

    let sequence_length = model_config
        .as_ref()
        .and_then(|c| c.sequence_length)
        .filter(|length| *length > 0)
        .unwrap_or(sequence_length);

    if let Some(config) = model_config.as_ref().filter(|c| !c.is_sequence_model()) {
        info!(model_type = %config.best_model_type, "Using persistence load forecaster");
        return Ok((Arc::new(LastValueForecaster), sequence_length));
    }

    let scaler = MinMaxScaler::load(&dir.join(FORECASTER_SCALER))?;
    let forecaster = OnnxForecaster::load(&dir.join(FORECASTER_MODEL), scaler, sequence_length)?;
    info!(sequence_length, "Loaded sequence load forecaster");
    Ok((Arc::new(forecaster), sequence_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_model_dir_disables_both() {
        let models = load_models(None, 10);
        assert!(models.classifier.is_none());
        assert!(models.forecaster.is_none());
        assert_eq!(models.sequence_length, 10);
    }

    #[test]
    fn test_empty_model_dir_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let models = load_models(Some(dir.path()), 10);
        assert!(models.classifier.is_none());
        assert!(models.forecaster.is_none());
    }

    #[test]
    fn test_persistence_forecaster_from_model_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("traffic_predict")).unwrap();
        std::fs::write(
            dir.path().join(FORECASTER_CONFIG),
            r#"{"best_model_type": "ARIMA", "sequence_length": 4}"#,
        )
        .unwrap();

        let models = load_models(Some(dir.path()), 10);
        assert_eq!(models.sequence_length, 4);
        let forecaster = models.forecaster.expect("persistence forecaster");
        assert_eq!(forecaster.forecast(&[1.0, 2.0, 3.0, 9.0]).unwrap(), 9.0);
    }
}

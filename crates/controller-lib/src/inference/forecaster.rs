//! Next-interval load forecasting per uplink

use super::onnx::{self, TractModel};
use super::scaling::MinMaxScaler;
use super::LoadForecaster;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tract_onnx::prelude::*;

/// Forecaster settings exported next to the trained model
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastModelConfig {
    #[serde(default = "default_model_type")]
    pub best_model_type: String,
    #[serde(default)]
    pub sequence_length: Option<usize>,
}

fn default_model_type() -> String {
    "LSTM".to_string()
}

impl ForecastModelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Whether the exported model is a sequence network served via ONNX
    pub fn is_sequence_model(&self) -> bool {
        self.best_model_type.eq_ignore_ascii_case("lstm")
    }
}

/// ONNX sequence model over a `[1, sequence_length, 1]` window
pub struct OnnxForecaster {
    model: TractModel,
    scaler: MinMaxScaler,
    sequence_length: usize,
}

impl OnnxForecaster {
    pub fn load(model_path: &Path, scaler: MinMaxScaler, sequence_length: usize) -> Result<Self> {
        let model = onnx::load_model(model_path, &[1, sequence_length, 1])?;
        Ok(Self {
            model,
            scaler,
            sequence_length,
        })
    }
}

impl LoadForecaster for OnnxForecaster {
    fn forecast(&self, window: &[f64]) -> Result<f64> {
        if window.len() != self.sequence_length {
            anyhow::bail!(
                "Forecast window has {} samples, model expects {}",
                window.len(),
                self.sequence_length
            );
        }

        let scaled: Vec<f32> = window
            .iter()
            .map(|value| self.scaler.transform(*value) as f32)
            .collect();
        let input: Tensor =
            tract_ndarray::Array3::from_shape_vec((1, self.sequence_length, 1), scaled)
                .context("Failed to shape forecaster input")?
                .into();

        let output = onnx::run(&self.model, input, "forecaster")?;
        let output = output.cast_to::<f32>()?;
        let view = output.to_array_view::<f32>()?;
        let predicted = *view.iter().next().context("Empty forecast tensor")?;

        Ok(self.scaler.inverse_transform(predicted as f64))
    }
}

/// Persistence forecaster: the next interval looks like the newest sample
#[derive(Debug, Default, Clone, Copy)]
pub struct LastValueForecaster;

impl LoadForecaster for LastValueForecaster {
    fn forecast(&self, window: &[f64]) -> Result<f64> {
        window.last().copied().context("Empty forecast window")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_last_value_forecaster() {
        assert_eq!(LastValueForecaster.forecast(&[1.0, 2.0, 3.0]).unwrap(), 3.0);
        assert!(LastValueForecaster.forecast(&[]).is_err());
    }

    #[test]
    fn test_model_config_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"best_model_type": "ARIMA", "sequence_length": 12}}"#).unwrap();
        let config = ForecastModelConfig::load(file.path()).unwrap();
        assert!(!config.is_sequence_model());
        assert_eq!(config.sequence_length, Some(12));

        let config: ForecastModelConfig = serde_json::from_str("{}").unwrap();
        assert!(config.is_sequence_model());
        assert_eq!(config.sequence_length, None);
    }
}

//! Input scaling shipped alongside the models
//!
//! The training notebooks fit these scalers; we only replay them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Per-feature standardization: `(x - mean) / scale`
#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl StandardScaler {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler {}", path.display()))?;
        let scaler: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scaler {}", path.display()))?;
        scaler.check_len(scaler.mean.len())?;
        Ok(scaler)
    }

    /// Ensure the scaler covers exactly `features` inputs
    pub fn check_len(&self, features: usize) -> Result<()> {
        if self.mean.len() != features || self.scale.len() != features {
            anyhow::bail!(
                "Scaler has {} means and {} scales, expected {}",
                self.mean.len(),
                self.scale.len(),
                features
            );
        }
        Ok(())
    }

    pub fn transform(&self, values: &mut [f32]) {
        for ((value, mean), scale) in values.iter_mut().zip(&self.mean).zip(&self.scale) {
            // Constant features were fit with a zero scale
            let scale = if scale.abs() < f32::EPSILON { 1.0 } else { *scale };
            *value = (*value - mean) / scale;
        }
    }
}

/// Univariate min-max scaling onto `feature_range`
#[derive(Debug, Clone, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: f64,
    pub data_max: f64,
    #[serde(default = "default_feature_range")]
    pub feature_range: (f64, f64),
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl MinMaxScaler {
    pub fn new(data_min: f64, data_max: f64) -> Self {
        Self {
            data_min,
            data_max,
            feature_range: default_feature_range(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scaler {}", path.display()))
    }

    fn data_range(&self) -> f64 {
        let range = self.data_max - self.data_min;
        if range.abs() < f64::EPSILON {
            1.0
        } else {
            range
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        let (lo, hi) = self.feature_range;
        (value - self.data_min) / self.data_range() * (hi - lo) + lo
    }

    pub fn inverse_transform(&self, value: f64) -> f64 {
        let (lo, hi) = self.feature_range;
        let span = if (hi - lo).abs() < f64::EPSILON { 1.0 } else { hi - lo };
        (value - lo) / span * self.data_range() + self.data_min
    }
}

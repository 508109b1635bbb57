//! Traffic class inference

use super::onnx::{self, TractModel};
use super::scaling::StandardScaler;
use super::FlowClassifier;
use crate::models::{FeatureVector, TrafficClass};
use anyhow::{Context, Result};
use std::path::Path;
use tract_onnx::prelude::*;

/// ONNX flow classifier with its fitted input scaler.
///
/// Accepts models that emit either an integer label tensor or one f32 score
/// per class.
pub struct OnnxClassifier {
    model: TractModel,
    scaler: Option<StandardScaler>,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path, scaler_path: Option<&Path>) -> Result<Self> {
        let model = onnx::load_model(model_path, &[1, FeatureVector::LEN])?;
        let scaler = match scaler_path {
            Some(path) => {
                let scaler = StandardScaler::load(path)?;
                scaler.check_len(FeatureVector::LEN)?;
                Some(scaler)
            }
            None => None,
        };

        Ok(Self { model, scaler })
    }

    fn features_to_tensor(&self, features: &FeatureVector) -> Result<Tensor> {
        let mut data = features.to_array();
        if let Some(scaler) = &self.scaler {
            scaler.transform(&mut data);
        }
        let array = tract_ndarray::Array2::from_shape_vec((1, FeatureVector::LEN), data.to_vec())
            .context("Failed to shape classifier input")?;
        Ok(array.into())
    }
}

/// Map a raw model output to a class label
pub(crate) fn label_from_output(output: &Tensor) -> Result<TrafficClass> {
    let index = match output.datum_type() {
        DatumType::I64 => {
            let view = output.to_array_view::<i64>()?;
            let label = *view.iter().next().context("Empty label tensor")?;
            usize::try_from(label).map_err(|_| anyhow::anyhow!("Negative class label {}", label))?
        }
        DatumType::I32 => {
            let view = output.to_array_view::<i32>()?;
            let label = *view.iter().next().context("Empty label tensor")?;
            usize::try_from(label).map_err(|_| anyhow::anyhow!("Negative class label {}", label))?
        }
        _ => {
            let view = output.cast_to::<f32>()?;
            let scores = view.to_array_view::<f32>()?;
            argmax(scores.iter().copied()).context("Empty score tensor")?
        }
    };

    TrafficClass::from_index(index).with_context(|| format!("Unknown class label {}", index))
}

fn argmax(values: impl Iterator<Item = f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, value) in values.enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

impl FlowClassifier for OnnxClassifier {
    fn classify(&self, features: &FeatureVector) -> Result<TrafficClass> {
        let input = self.features_to_tensor(features)?;
        let output = onnx::run(&self.model, input, "classifier")?;
        label_from_output(&output)
    }
}

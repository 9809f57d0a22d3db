//! Seams to the model zoo: the catalog that lists and describes generators,
//! and the sample source that runs them.

mod local;

use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::SampleTensor;

pub use local::LocalModelZoo;

#[derive(Debug, Error)]
pub enum ZooError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("invalid config for {model_id}: {reason}")]
    InvalidConfig { model_id: String, reason: String },
    #[error("model artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),
    #[error("inference backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed zoo config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw per-model configuration as published by the zoo.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    fields: Map<String, Value>,
}

impl ModelConfig {
    pub fn from_value(model_id: &str, value: Value) -> Result<Self, ZooError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ZooError::InvalidConfig {
                model_id: model_id.to_string(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Walks nested objects, e.g. `lookup(&["selection", "organ"])`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    pub fn lookup_str(&self, path: &[&str]) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    pub fn lookup_u64(&self, path: &[&str]) -> Option<u64> {
        self.lookup(path).and_then(Value::as_u64)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub trait ModelCatalog: Send + Sync {
    /// Model identifiers in catalog order.
    fn list_models(&self) -> Result<Vec<String>, ZooError>;

    fn get_config_by_id(&self, model_id: &str) -> Result<ModelConfig, ZooError>;
}

/// One field of a produced sample record.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Tensor(SampleTensor),
    TensorList(Vec<SampleTensor>),
    /// Labels, masks metadata and anything else that is not image data.
    Other(Value),
}

impl FieldValue {
    /// Tensors carried by this field; empty for non-tensor fields.
    pub fn tensors(&self) -> &[SampleTensor] {
        match self {
            FieldValue::Tensor(tensor) => std::slice::from_ref(tensor),
            FieldValue::TensorList(tensors) => tensors,
            FieldValue::Other(_) => &[],
        }
    }
}

/// A single unit yielded by a sample source, fields in production order.
#[derive(Debug, Clone, Default)]
pub struct SampleRecord {
    fields: Vec<(String, FieldValue)>,
}

impl SampleRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

pub type SampleStream<'a> = Box<dyn Iterator<Item = Result<SampleRecord, ZooError>> + Send + 'a>;

pub trait SampleSource: Send + Sync {
    /// Starts producing samples for `model_id`. The stream is sized for
    /// `num_samples` but callers must not rely on it stopping there.
    fn samples(&self, model_id: &str, num_samples: usize) -> Result<SampleStream<'_>, ZooError>;
}

/// Stand-in used when the binary is built without an inference backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSampleSource;

impl SampleSource for UnavailableSampleSource {
    fn samples(&self, _model_id: &str, _num_samples: usize) -> Result<SampleStream<'_>, ZooError> {
        Err(ZooError::Backend(
            "no inference backend compiled in (enable the `tch-backend` feature)".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_walks_nested_objects() {
        let config = ModelConfig::from_value(
            "m",
            json!({
                "description": { "title": "A GAN" },
                "selection": { "organ": ["breast", "lung"] },
                "execution": { "latent_dim": 128 }
            }),
        )
        .unwrap();

        assert_eq!(config.lookup_str(&["description", "title"]), Some("A GAN"));
        assert_eq!(config.lookup_u64(&["execution", "latent_dim"]), Some(128));
        assert!(config.lookup(&["selection", "organ"]).unwrap().is_array());
        assert_eq!(config.lookup(&["selection", "modality"]), None);
        assert_eq!(config.lookup(&["description", "title", "deeper"]), None);
        assert_eq!(config.lookup(&[]), None);
    }

    #[test]
    fn non_object_config_is_rejected() {
        let err = ModelConfig::from_value("broken", json!([1, 2])).unwrap_err();
        assert!(matches!(err, ZooError::InvalidConfig { ref model_id, .. } if model_id == "broken"));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn field_value_exposes_tensors_by_variant() {
        let tensor = SampleTensor::from_u8(vec![2, 2], vec![0, 1, 2, 3]).unwrap();
        assert_eq!(FieldValue::Tensor(tensor.clone()).tensors().len(), 1);
        assert_eq!(
            FieldValue::TensorList(vec![tensor.clone(), tensor]).tensors().len(),
            2
        );
        assert!(FieldValue::Other(json!("label")).tensors().is_empty());
    }

    #[test]
    fn unavailable_source_fails_to_start() {
        assert!(matches!(
            UnavailableSampleSource.samples("any", 1),
            Err(ZooError::Backend(_))
        ));
    }
}

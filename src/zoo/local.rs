use std::{fs, path::PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use super::{ModelCatalog, ModelConfig, ZooError};

const GLOBAL_CONFIG_FILE: &str = "global.json";

/// A model zoo laid out on disk:
///
/// ```text
/// <root>/global.json          { "<model_id>": { ...config... }, ... }
/// <root>/<model_id>/...       generator artifacts
/// ```
///
/// Catalog order is the key order of `global.json`.
#[derive(Debug, Clone)]
pub struct LocalModelZoo {
    root: PathBuf,
    models: Map<String, Value>,
}

impl LocalModelZoo {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ZooError> {
        let root = root.into();
        let path = root.join(GLOBAL_CONFIG_FILE);
        let raw = fs::read_to_string(&path)?;
        let models = match serde_json::from_str::<Value>(&raw)? {
            Value::Object(models) => models,
            _ => {
                return Err(ZooError::InvalidConfig {
                    model_id: GLOBAL_CONFIG_FILE.to_string(),
                    reason: "top level must map model ids to configs".into(),
                });
            }
        };

        info!(root = %root.display(), models = models.len(), "opened model zoo");
        Ok(Self { root, models })
    }

    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id)
    }
}

impl ModelCatalog for LocalModelZoo {
    fn list_models(&self) -> Result<Vec<String>, ZooError> {
        Ok(self.models.keys().cloned().collect())
    }

    fn get_config_by_id(&self, model_id: &str) -> Result<ModelConfig, ZooError> {
        let value = self
            .models
            .get(model_id)
            .ok_or_else(|| ZooError::UnknownModel(model_id.to_string()))?;
        ModelConfig::from_value(model_id, value.clone())
    }
}

use std::{collections::HashMap, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    cache::TtlCache,
    model::{MetadataValue, ModelDescriptor},
    zoo::{ModelCatalog, ModelConfig, ZooError},
};

const NO_DESCRIPTION: &str = "No description provided.";
const CONFIG_ERROR_DESCRIPTION: &str = "Error fetching config";

/// Display metadata for every model in the catalog, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    descriptors: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
    warnings: Vec<String>,
}

impl ModelRegistry {
    /// Builds the registry from one pass over the catalog.
    ///
    /// A model whose config cannot be fetched still gets an entry, with
    /// placeholder metadata and a warning. Only a failure to list the catalog
    /// is fatal.
    pub fn build(catalog: &dyn ModelCatalog) -> Result<Self, ZooError> {
        let mut registry = Self::default();

        for model_id in catalog.list_models()? {
            let described = catalog
                .get_config_by_id(&model_id)
                .and_then(|config| describe(&model_id, &config));
            let descriptor = match described {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(%model_id, error = %err, "could not fetch model config");
                    registry
                        .warnings
                        .push(format!("Could not fetch config for {model_id}: {err}"));
                    placeholder(&model_id)
                }
            };
            registry.insert(descriptor);
        }

        info!(
            models = registry.len(),
            warnings = registry.warnings.len(),
            "model registry built"
        );
        Ok(registry)
    }

    fn insert(&mut self, descriptor: ModelDescriptor) {
        match self.index.get(&descriptor.id) {
            Some(&pos) => self.descriptors[pos] = descriptor,
            None => {
                self.index.insert(descriptor.id.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.index.get(model_id).map(|&pos| &self.descriptors[pos])
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.index.contains_key(model_id)
    }

    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.id.as_str())
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Missing keys and non-string leaves fall back to literals, but a
/// `description` or `selection` section that is not an object is an error.
fn describe(model_id: &str, config: &ModelConfig) -> Result<ModelDescriptor, ZooError> {
    for section in ["description", "selection"] {
        if config.lookup(&[section]).is_some_and(|value| !value.is_object()) {
            return Err(ZooError::InvalidConfig {
                model_id: model_id.to_string(),
                reason: format!("`{section}` must be an object"),
            });
        }
    }

    Ok(ModelDescriptor {
        id: model_id.to_string(),
        name: display_name(model_id),
        description: config
            .lookup_str(&["description", "title"])
            .unwrap_or(NO_DESCRIPTION)
            .to_string(),
        modality: config
            .lookup(&["selection", "modality"])
            .and_then(MetadataValue::from_json)
            .unwrap_or_else(MetadataValue::unknown),
        anatomy: config
            .lookup(&["selection", "organ"])
            .and_then(MetadataValue::from_json)
            .unwrap_or_else(MetadataValue::unknown),
    })
}

fn placeholder(model_id: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: model_id.to_string(),
        name: display_name(model_id),
        description: CONFIG_ERROR_DESCRIPTION.to_string(),
        modality: MetadataValue::unknown(),
        anatomy: MetadataValue::unknown(),
    }
}

/// `00001_DCGAN_MMG_CALC_ROI` -> `00001 Dcgan Mmg Calc Roi`.
///
/// Underscores become spaces, then every letter that follows a non-letter is
/// upper-cased and every other letter lower-cased.
pub fn display_name(model_id: &str) -> String {
    let mut name = String::with_capacity(model_id.len());
    let mut after_letter = false;
    for ch in model_id.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if after_letter {
                name.extend(ch.to_lowercase());
            } else {
                name.extend(ch.to_uppercase());
            }
            after_letter = true;
        } else {
            name.push(ch);
            after_letter = false;
        }
    }
    name
}

/// Lazily built, time-bounded registry shared by the whole process.
pub struct RegistryService {
    catalog: Arc<dyn ModelCatalog>,
    cache: TtlCache<(), Arc<ModelRegistry>>,
}

impl RegistryService {
    pub fn new(catalog: Arc<dyn ModelCatalog>, ttl: Duration) -> Self {
        Self {
            catalog,
            cache: TtlCache::new(ttl),
        }
    }

    /// Returns the cached registry, rebuilding it once the TTL has elapsed.
    pub fn registry(&self) -> Result<Arc<ModelRegistry>, ZooError> {
        self.cache.get_or_try_insert_with((), || {
            ModelRegistry::build(self.catalog.as_ref()).map(Arc::new)
        })
    }

    /// Drops the cached registry and rebuilds it immediately. Placeholder
    /// entries are only retried this way or on expiry.
    pub fn refresh(&self) -> Result<Arc<ModelRegistry>, ZooError> {
        self.cache.invalidate(&());
        self.registry()
    }
}

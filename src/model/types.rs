use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A metadata field the zoo publishes either as one value or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Single(String),
    Many(Vec<String>),
}

impl MetadataValue {
    pub fn unknown() -> Self {
        MetadataValue::Single("Unknown".to_string())
    }

    /// Accepts a string or an array made only of strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(MetadataValue::Single(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(MetadataValue::Many),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Single(value) => f.write_str(value),
            MetadataValue::Many(values) => f.write_str(&values.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub modality: MetadataValue,
    pub anatomy: MetadataValue,
}

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A generated raster image with a process-unique identity.
///
/// Clones share both the pixels and the identity, so encoded bytes cached for
/// one clone are valid for all of them.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    id: u64,
    image: Arc<DynamicImage>,
}

impl GeneratedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            image: Arc::new(image),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn metadata_accepts_strings_and_string_lists_only() {
        assert_eq!(
            MetadataValue::from_json(&json!("MMG")),
            Some(MetadataValue::Single("MMG".into()))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(["MMG", "CT"])),
            Some(MetadataValue::Many(vec!["MMG".into(), "CT".into()]))
        );
        assert_eq!(MetadataValue::from_json(&json!(["MMG", 3])), None);
        assert_eq!(MetadataValue::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn metadata_serializes_untagged() {
        let single = serde_json::to_value(MetadataValue::Single("lung".into())).unwrap();
        let many = serde_json::to_value(MetadataValue::Many(vec!["a".into(), "b".into()])).unwrap();
        assert_eq!(single, json!("lung"));
        assert_eq!(many, json!(["a", "b"]));
        assert_eq!(
            MetadataValue::Many(vec!["a".into(), "b".into()]).to_string(),
            "a, b"
        );
    }

    #[test]
    fn generated_images_get_distinct_ids_and_clones_share_them() {
        let a = GeneratedImage::new(DynamicImage::new_luma8(2, 2));
        let b = GeneratedImage::new(DynamicImage::new_luma8(2, 2));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
        assert_eq!((a.width(), a.height()), (2, 2));
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    model::{ConversionError, GeneratedImage},
    zoo::{SampleRecord, SampleSource, ZooError},
};

#[derive(Debug, Error)]
enum GenerationError {
    #[error(transparent)]
    Zoo(#[from] ZooError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Result of one generation request. A failed request carries an empty batch
/// and a user-facing message instead of an error.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub model_id: String,
    pub requested: usize,
    pub images: Vec<GeneratedImage>,
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct BatchGenerator {
    source: Arc<dyn SampleSource>,
    max_images: usize,
}

impl BatchGenerator {
    pub fn new(source: Arc<dyn SampleSource>, max_images: usize) -> Self {
        Self { source, max_images }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Produces at most `num_images` images from `model_id`. Never fails:
    /// errors from the sample source end up in [`BatchOutcome::error`].
    pub fn generate_image_batch(&self, model_id: &str, num_images: usize) -> BatchOutcome {
        let requested = num_images.min(self.max_images);
        if requested < num_images {
            warn!(%model_id, num_images, max = self.max_images, "clamping image count");
        }

        if requested == 0 {
            return BatchOutcome {
                model_id: model_id.to_string(),
                requested,
                images: Vec::new(),
                error: None,
            };
        }

        match self.collect(model_id, requested) {
            Ok(images) => {
                info!(%model_id, requested, generated = images.len(), "image batch generated");
                BatchOutcome {
                    model_id: model_id.to_string(),
                    requested,
                    images,
                    error: None,
                }
            }
            Err(err) => {
                error!(%model_id, error = %err, "image generation failed");
                BatchOutcome {
                    model_id: model_id.to_string(),
                    requested,
                    images: Vec::new(),
                    error: Some(format!("Image generation failed: {err}")),
                }
            }
        }
    }

    fn collect(
        &self,
        model_id: &str,
        requested: usize,
    ) -> Result<Vec<GeneratedImage>, GenerationError> {
        let mut batch = Vec::with_capacity(requested);
        for record in self.source.samples(model_id, requested)? {
            let images = process_images(&record?)?;
            debug!(%model_id, produced = images.len(), "decoded sample record");
            batch.extend(images);
            if batch.len() >= requested {
                break;
            }
        }
        batch.truncate(requested);
        Ok(batch)
    }
}

/// Converts every tensor-valued field of `record` into an image, in field
/// order. Non-tensor fields are skipped.
pub fn process_images(record: &SampleRecord) -> Result<Vec<GeneratedImage>, ConversionError> {
    let mut images = Vec::new();
    for (_, value) in record.fields() {
        for tensor in value.tensors() {
            images.push(GeneratedImage::new(tensor.to_image()?));
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        model::SampleTensor,
        zoo::{FieldValue, SampleStream},
    };

    fn gray(value: u8) -> SampleTensor {
        SampleTensor::from_u8(vec![1, 4, 4], vec![value; 16]).unwrap()
    }

    /// Yields records of `per_record` images forever and counts pulls.
    struct EndlessSource {
        per_record: usize,
        pulled: Arc<AtomicUsize>,
    }

    impl SampleSource for EndlessSource {
        fn samples(&self, _model_id: &str, _num_samples: usize) -> Result<SampleStream<'_>, ZooError> {
            let per_record = self.per_record;
            let pulled = self.pulled.clone();
            Ok(Box::new(std::iter::repeat_with(move || {
                let n = pulled.fetch_add(1, Ordering::SeqCst);
                Ok(SampleRecord::new()
                    .with_field("label", FieldValue::Other(json!(n)))
                    .with_field(
                        "sample",
                        FieldValue::TensorList((0..per_record).map(|i| gray(i as u8)).collect()),
                    ))
            })))
        }
    }

    struct FailingSource;

    impl SampleSource for FailingSource {
        fn samples(&self, model_id: &str, _num_samples: usize) -> Result<SampleStream<'_>, ZooError> {
            Err(ZooError::MissingArtifact(format!("{model_id}/generator.pt").into()))
        }
    }

    struct FailsMidStream;

    impl SampleSource for FailsMidStream {
        fn samples(&self, _model_id: &str, _num_samples: usize) -> Result<SampleStream<'_>, ZooError> {
            let records = vec![
                Ok(SampleRecord::new().with_field("sample", FieldValue::Tensor(gray(1)))),
                Err(ZooError::Backend("CUDA out of memory".into())),
            ];
            Ok(Box::new(records.into_iter()))
        }
    }

    fn endless(per_record: usize) -> (BatchGenerator, Arc<AtomicUsize>) {
        let pulled = Arc::new(AtomicUsize::new(0));
        let source = EndlessSource {
            per_record,
            pulled: pulled.clone(),
        };
        (BatchGenerator::new(Arc::new(source), 16), pulled)
    }

    #[test]
    fn stops_pulling_once_batch_is_full_and_truncates() {
        let (generator, pulled) = endless(3);
        let outcome = generator.generate_image_batch("m", 4);

        assert!(outcome.is_ok());
        assert_eq!(outcome.images.len(), 4);
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn never_exceeds_requested_count() {
        let (generator, _) = endless(5);
        for n in 1..=16 {
            assert!(generator.generate_image_batch("m", n).images.len() <= n);
        }
    }

    #[test]
    fn clamps_to_configured_ceiling() {
        let (generator, _) = endless(2);
        assert_eq!(generator.max_images(), 16);
        let outcome = generator.generate_image_batch("m", 40);
        assert_eq!(outcome.requested, 16);
        assert_eq!(outcome.images.len(), 16);
    }

    #[test]
    fn finite_source_that_runs_dry_returns_a_short_batch() {
        struct TwoRecords;
        impl SampleSource for TwoRecords {
            fn samples(&self, _: &str, _: usize) -> Result<SampleStream<'_>, ZooError> {
                Ok(Box::new((0..2).map(|i| {
                    Ok(SampleRecord::new().with_field("sample", FieldValue::Tensor(gray(i))))
                })))
            }
        }

        let outcome = BatchGenerator::new(Arc::new(TwoRecords), 16).generate_image_batch("m", 5);
        assert!(outcome.is_ok());
        assert_eq!(outcome.requested, 5);
        assert_eq!(outcome.images.len(), 2);
        assert!(outcome.images.len() < outcome.requested);
    }

    #[test]
    fn zero_images_skips_the_source() {
        let generator = BatchGenerator::new(Arc::new(FailingSource), 16);
        let outcome = generator.generate_image_batch("m", 0);
        assert!(outcome.is_ok());
        assert!(outcome.images.is_empty());
    }

    #[test]
    fn source_failure_returns_empty_batch_with_message() {
        let generator = BatchGenerator::new(Arc::new(FailingSource), 16);
        let outcome = generator.generate_image_batch("00001_DCGAN", 4);

        assert!(outcome.images.is_empty());
        let message = outcome.error.unwrap();
        assert!(message.starts_with("Image generation failed:"));
        assert!(message.contains("00001_DCGAN/generator.pt"));
    }

    #[test]
    fn mid_stream_failure_discards_partial_batch() {
        let generator = BatchGenerator::new(Arc::new(FailsMidStream), 16);
        let outcome = generator.generate_image_batch("m", 4);
        assert!(outcome.images.is_empty());
        assert!(outcome.error.unwrap().contains("CUDA out of memory"));
    }

    #[test]
    fn process_images_flattens_fields_in_order() {
        let record = SampleRecord::new()
            .with_field("sample", FieldValue::Tensor(gray(10)))
            .with_field("mask", FieldValue::TensorList(vec![gray(20), gray(30)]))
            .with_field("label", FieldValue::Other(json!("benign")));

        let images = process_images(&record).unwrap();
        let firsts: Vec<u8> = images
            .iter()
            .map(|img| img.image().to_luma8().as_raw()[0])
            .collect();
        assert_eq!(firsts, vec![10, 20, 30]);
    }

    #[test]
    fn bad_tensor_shape_is_a_generation_failure() {
        struct OddShape;
        impl SampleSource for OddShape {
            fn samples(&self, _: &str, _: usize) -> Result<SampleStream<'_>, ZooError> {
                let tensor = SampleTensor::from_u8(vec![2, 2, 2], vec![0; 8]).unwrap();
                Ok(Box::new(std::iter::once(Ok(
                    SampleRecord::new().with_field("sample", FieldValue::Tensor(tensor)),
                ))))
            }
        }

        let outcome = BatchGenerator::new(Arc::new(OddShape), 16).generate_image_batch("m", 1);
        assert!(outcome.images.is_empty());
        assert!(outcome.error.unwrap().contains("channel count 2"));
    }
}

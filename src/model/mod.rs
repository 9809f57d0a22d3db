mod generator;
mod registry;
mod tensor;
mod types;

#[cfg(feature = "tch-backend")]
mod loader;

pub use generator::{BatchGenerator, BatchOutcome, process_images};
pub use registry::{ModelRegistry, RegistryService, display_name};
pub use tensor::{ConversionError, SampleTensor, TensorData};
pub use types::{GeneratedImage, MetadataValue, ModelDescriptor};

#[cfg(feature = "tch-backend")]
pub use loader::TorchSampleSource;

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod packager;
pub mod server;
pub mod session;
pub mod zoo;

pub use config::AppConfig;
pub use model::{BatchGenerator, BatchOutcome, GeneratedImage, ModelDescriptor, ModelRegistry};
pub use packager::ImagePackager;
pub use server::{AppState, build_router};
pub use zoo::{LocalModelZoo, ModelCatalog, SampleSource};

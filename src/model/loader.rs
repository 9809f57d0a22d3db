use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, no_grad};
use tracing::info;

use crate::{
    model::SampleTensor,
    zoo::{
        FieldValue, LocalModelZoo, ModelCatalog, ModelConfig, SampleRecord, SampleSource,
        SampleStream, ZooError,
    },
};

/// How a generator's raw output maps onto `[0, 1]` intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputRange {
    Unit,
    Tanh,
}

#[derive(Debug, Clone, PartialEq)]
struct ExecutionSettings {
    generator_file: String,
    latent_dim: i64,
    batch_size: usize,
    output_range: OutputRange,
}

impl ExecutionSettings {
    fn from_config(config: &ModelConfig) -> Self {
        let generator_file = config
            .lookup_str(&["execution", "generator_file"])
            .unwrap_or("generator.pt")
            .to_string();
        let latent_dim = config
            .lookup_u64(&["execution", "latent_dim"])
            .and_then(|v| i64::try_from(v).ok())
            .unwrap_or(100);
        let batch_size = config
            .lookup_u64(&["execution", "batch_size"])
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(4)
            .max(1);
        let output_range = match config.lookup_str(&["execution", "output_range"]) {
            Some("tanh") => OutputRange::Tanh,
            _ => OutputRange::Unit,
        };

        Self {
            generator_file,
            latent_dim,
            batch_size,
            output_range,
        }
    }
}

/// Runs TorchScript generators stored under `<zoo>/<model_id>/`.
///
/// Each generator is loaded once per process and kept for reuse.
pub struct TorchSampleSource {
    zoo: Arc<LocalModelZoo>,
    device: Device,
    modules: Mutex<HashMap<String, Arc<Mutex<tch::CModule>>>>,
}

impl TorchSampleSource {
    pub fn new(zoo: Arc<LocalModelZoo>, device: Device) -> Self {
        Self {
            zoo,
            device,
            modules: Mutex::new(HashMap::new()),
        }
    }

    fn module(
        &self,
        model_id: &str,
        settings: &ExecutionSettings,
    ) -> Result<Arc<Mutex<tch::CModule>>, ZooError> {
        if let Some(module) = self.modules.lock().get(model_id) {
            return Ok(module.clone());
        }

        let path = self.zoo.model_dir(model_id).join(&settings.generator_file);
        if !path.exists() {
            return Err(ZooError::MissingArtifact(path));
        }
        let mut module = tch::CModule::load_on_device(&path, self.device)
            .map_err(|e| ZooError::Backend(e.to_string()))?;
        module.set_eval();
        info!(%model_id, path = %path.display(), device = ?self.device, "loaded generator");

        let module = Arc::new(Mutex::new(module));
        self.modules
            .lock()
            .insert(model_id.to_string(), module.clone());
        Ok(module)
    }
}

impl SampleSource for TorchSampleSource {
    fn samples(&self, model_id: &str, num_samples: usize) -> Result<SampleStream<'_>, ZooError> {
        let config = self.zoo.get_config_by_id(model_id)?;
        let settings = ExecutionSettings::from_config(&config);
        let module = self.module(model_id, &settings)?;
        let device = self.device;
        let mut remaining = num_samples;

        Ok(Box::new(std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let batch = remaining.min(settings.batch_size);
            remaining -= batch;
            Some(run_generator(&module, device, batch, &settings))
        })))
    }
}

fn run_generator(
    module: &Mutex<tch::CModule>,
    device: Device,
    batch: usize,
    settings: &ExecutionSettings,
) -> Result<SampleRecord, ZooError> {
    no_grad(|| {
        let latent = Tensor::randn([batch as i64, settings.latent_dim], (Kind::Float, device));
        let output = module
            .lock()
            .forward_ts(&[latent])
            .map_err(|e| ZooError::Backend(e.to_string()))?;

        let output = output.to_device(Device::Cpu).to_kind(Kind::Float);
        let output = match settings.output_range {
            OutputRange::Unit => output,
            OutputRange::Tanh => (output + 1.0) / 2.0,
        };

        let samples = (0..batch as i64)
            .map(|i| to_sample_tensor(&output.get(i)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SampleRecord::new().with_field("sample", FieldValue::TensorList(samples)))
    })
}

fn to_sample_tensor(tensor: &Tensor) -> Result<SampleTensor, ZooError> {
    let shape = tensor
        .size()
        .iter()
        .map(|&d| d as usize)
        .collect::<Vec<_>>();
    let data = Vec::<f32>::try_from(&tensor.flatten(0, -1))
        .map_err(|e| ZooError::Backend(e.to_string()))?;
    SampleTensor::from_f32(shape, data).map_err(|e| ZooError::Backend(e.to_string()))
}

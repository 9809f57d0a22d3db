use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_zoo_path: PathBuf,
    /// Upper bound on images produced by a single generation request.
    pub max_images: usize,
    pub default_num_images: usize,
    pub registry_ttl: Duration,
    pub image_cache_ttl: Duration,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            model_zoo_path: PathBuf::from("models"),
            max_images: 16,
            default_num_images: 4,
            registry_ttl: Duration::from_secs(86_400),
            image_cache_ttl: Duration::from_secs(3_600),
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("SERVER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let model_zoo_path = env::var("MODEL_ZOO_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_zoo_path);

        let max_images = parse_env("MAX_IMAGES").unwrap_or(defaults.max_images);
        if max_images == 0 {
            anyhow::bail!("MAX_IMAGES must be at least 1");
        }
        let default_num_images = parse_env("DEFAULT_NUM_IMAGES")
            .unwrap_or(defaults.default_num_images)
            .clamp(1, max_images);

        let registry_ttl = parse_env("REGISTRY_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.registry_ttl);
        let image_cache_ttl = parse_env("IMAGE_CACHE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.image_cache_ttl);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_zoo_path,
            max_images,
            default_num_images,
            registry_ttl,
            image_cache_ttl,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA unavailable, falling back to CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_studio_limits() {
        let config = AppConfig::default();
        assert_eq!(config.max_images, 16);
        assert_eq!(config.default_num_images, 4);
        assert_eq!(config.registry_ttl, Duration::from_secs(86_400));
        assert_eq!(config.image_cache_ttl, Duration::from_secs(3_600));
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[cfg(feature = "tch-backend")]
    #[test]
    fn unknown_device_falls_back_to_cpu() {
        assert_eq!(parse_device("tpu"), Device::Cpu);
        assert_eq!(parse_device("CPU"), Device::Cpu);
    }
}

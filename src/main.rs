use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medigan_studio::{AppConfig, AppState, LocalModelZoo, SampleSource, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(zoo = %config.model_zoo_path.display(), "opening model zoo");

    let zoo = Arc::new(LocalModelZoo::open(&config.model_zoo_path)?);
    let source = sample_source(&config, zoo.clone());
    let state = AppState::new(config.clone(), zoo, source);

    let registry = state.registry.registry()?;
    tracing::info!(models = registry.len(), "model registry ready");

    let router = build_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "studio server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(feature = "tch-backend")]
fn sample_source(config: &AppConfig, zoo: Arc<LocalModelZoo>) -> Arc<dyn SampleSource> {
    Arc::new(medigan_studio::model::TorchSampleSource::new(
        zoo,
        config.device,
    ))
}

#[cfg(not(feature = "tch-backend"))]
fn sample_source(_config: &AppConfig, _zoo: Arc<LocalModelZoo>) -> Arc<dyn SampleSource> {
    tracing::warn!("built without an inference backend; generation requests will fail");
    Arc::new(medigan_studio::zoo::UnavailableSampleSource)
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

use plant_health_service::config::PlantHealthConfig;
use plant_health_service::Application;
use service_core::observability::init_tracing;

const SERVICE_NAME: &str = "plant-health-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match PlantHealthConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(SERVICE_NAME, "info", None);
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(
        SERVICE_NAME,
        &config.common.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}

use assessment_api::{
    config::Config, create_router, services::timeout_sweeper::TimeoutSweeper, AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = init_telemetry();

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assessment_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer());
    match &telemetry {
        Some(tracer) => registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer.clone()))
            .init(),
        None => registry.init(),
    }

    tracing::info!("Starting assessment API");

    let config = Config::load()?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let sweep_interval = Duration::from_secs(config.workers.sweep_interval_secs);
    let (app_state, ranking_worker) = AppState::connect(config).await?;
    let app_state = Arc::new(app_state);

    tokio::spawn(ranking_worker.run());
    tokio::spawn(TimeoutSweeper::new(app_state.sessions.clone(), sweep_interval).run());

    let app = create_router(app_state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    tracing::info!("Shutting down OpenTelemetry");
    Ok(())
}

fn init_telemetry() -> Option<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("OpenTelemetry disabled: failed to create OTLP exporter: {}", e);
            return None;
        }
    };

    let resource = Resource::builder_empty()
        .with_service_name("assessment-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("assessment-api");
    opentelemetry::global::set_tracer_provider(provider);

    Some(tracer)
}

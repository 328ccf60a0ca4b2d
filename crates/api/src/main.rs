use cascade_api::app;
use cascade_api::config::ApiConfig;

#[tokio::main]
async fn main() {
    cascade_observability::init();

    let config = match ApiConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let services = match app::services::AppServices::postgres(&config.database_url).await {
        Ok(services) => services,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize services");
            std::process::exit(1);
        }
    };

    let _sweeper = services.start_sweeper();
    let router = app::build_app(services);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = config.port, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(port = config.port, "listening");

    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

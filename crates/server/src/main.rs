use server::{config, db, health, openapi, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app_config = config::load_config();
    let logger_provider = if app_config.features.telemetry {
        telemetry::init_telemetry()
    } else {
        None
    };
    telemetry::init_tracing(logger_provider);
    health::record_start_time();

    let pool = db::create_pool()?;
    db::run_migrations(&pool).await?;

    let state = db::AppState::new(pool, config::workflow_settings());
    let mut router = openapi::api_router(state);

    if app_config.features.telemetry {
        router = router.layer(telemetry::OtelTraceLayer);
    }

    let router = router
        .layer(tower_http::request_id::PropagateRequestIdLayer::x_request_id())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::request_id::SetRequestIdLayer::x_request_id(
            tower_http::request_id::MakeRequestUuid,
        ));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("matterflow v{} listening on {addr}", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Signal received, shutting down");
        })
        .await?;

    if let Some(provider) = logger_provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to flush OTLP logs: {e}");
        }
    }
    Ok(())
}

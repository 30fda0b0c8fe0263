use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Request;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::observability::Metrics;
use crate::plugin::PluginManager;

use super::hooks::post_response_layer;
use super::{BuildError, Module};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boots the adapter with the first-party plugin set.
pub async fn run(config_path: PathBuf) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = AppConfig::load_from_path(config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    run_with_manager(config, PluginManager::with_defaults()).await
}

/// Boots the adapter with a caller-supplied plugin manager; embedders
/// register their own capability factories before calling this.
pub async fn run_with_manager(config: AppConfig, manager: PluginManager) -> Result<(), AnyError> {
    let metrics = Arc::new(Metrics::new());
    let (app, modules) = build_router(&manager, &config, metrics)?;

    let listener = TcpListener::bind(config.http.address).await?;
    info!(address = %config.http.address, app = %config.app_name, "ONIX adapter listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Modules release their plugins in reverse mount order.
    for module in modules.iter().rev() {
        module.dispose();
    }

    Ok(())
}

/// Builds every configured module and mounts each at its path prefix. The
/// post-response hook middleware wraps the whole router so deferred delivery
/// fires after the client response on every module.
pub fn build_router(
    manager: &PluginManager,
    config: &AppConfig,
    metrics: Arc<Metrics>,
) -> Result<(Router, Vec<Arc<Module>>), BuildError> {
    let mut app = Router::new();
    let mut modules = Vec::new();

    for module_cfg in &config.modules {
        let module = Arc::new(Module::build(manager, module_cfg, metrics.clone())?);
        let route_path = format!("{}/{{*action}}", module.path().trim_end_matches('/'));

        let handler_module = module.clone();
        app = app.route(
            &route_path,
            any(move |req: Request| {
                let module = handler_module.clone();
                async move { module.handle(req).await }
            }),
        );

        info!(module = module.name(), path = module.path(), "Module mounted");
        modules.push(module);
    }

    let app = app
        .layer(RequestDecompressionLayer::new())
        .layer(axum::middleware::from_fn(post_response_layer));

    Ok((app, modules))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

use std::sync::Arc;

use survey_export::config::AppConfig;
use survey_export::database::Database;
use survey_export::domains::export::ExportQueueManager;
use survey_export::rest::{create_app, AppState};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    survey_export::init_logging();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let db = match Database::connect(&config).await {
        Ok(db) => db,
        Err(err) => {
            log::error!("Database initialization failed: {}", err);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let export_service = AppState::export_service(db.pool(), &config);
    // Exports queued or running when the last process stopped will never finish
    if let Err(err) = export_service.fail_unfinished().await {
        log::error!("Failed to close out unfinished exports: {}", err);
    }
    let (export_queue, dispatcher) = ExportQueueManager::start(
        export_service.clone(),
        config.export_workers,
        ExportQueueManager::DEFAULT_CAPACITY,
        shutdown.clone(),
    );
    let app = create_app(Arc::new(AppState::new(db.pool(), export_service, export_queue)));

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("Failed to bind {}: {}", config.bind_addr, err);
            std::process::exit(1);
        }
    };
    log::info!("rest server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", err);
            }
            log::info!("Shutdown requested");
            signal.cancel();
        })
        .await;
    if let Err(err) = served {
        log::error!("Server error: {}", err);
    }

    // Covers the server exiting on its own
    shutdown.cancel();
    if let Err(err) = dispatcher.await {
        log::error!("Export queue did not stop cleanly: {}", err);
    }

    db.close().await;
}

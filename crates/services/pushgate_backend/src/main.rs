// File: services/pushgate_backend/src/main.rs
mod app_state;
mod service_factory;

use axum::Router;
use pushgate_common::{init_with_file, init_with_level, parse_level};
use pushgate_config::load_config;
use pushgate_subscription::routes;
use service_factory::{build_state, Stores};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = Arc::new(load_config().expect("Failed to load config"));

    let level = parse_level(config.log.level.as_deref());
    // held until exit so the file writer flushes
    let _log_guard = match config.log.dir.as_deref() {
        Some(dir) => Some(init_with_file(level, dir)),
        None => {
            init_with_level(level);
            None
        }
    };

    let stores = Stores::from_config(&config)
        .await
        .expect("Failed to open the device store");
    let state = build_state(config.clone(), stores).expect("Failed to initialize services");

    #[allow(unused_mut)] // mutated only with the openapi feature
    let mut app: Router = routes(state.service.clone());

    // Conditionally add Swagger UI and JSON endpoint if openapi feature enabled
    #[cfg(feature = "openapi")]
    {
        use pushgate_subscription::doc::SubscriptionApiDoc;
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;

        #[derive(OpenApi)]
        #[openapi(
            info(
                title = "Pushgate API",
                version = "0.1.0",
                description = "Push notification gateway webhook endpoints",
                license(name = "MIT", url = "https://opensource.org/licenses/MIT")
            ),
            components(),
        )]
        struct ApiDoc;

        let mut openapi_doc = ApiDoc::openapi();
        openapi_doc.merge(SubscriptionApiDoc::openapi());
        info!("Adding Swagger UI at /docs");

        let swagger_ui = SwaggerUi::new("/docs").url("/docs/openapi.json", openapi_doc);
        app = app.merge(swagger_ui);
    }

    let app = app.layer(TraceLayer::new_for_http());

    let addr = state.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind the listen address");
    info!("Starting server at http://{}", addr);
    info!("Hubs are told to call back {}", state.config.callback_uri);

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server stopped with an error: {}", e);
    }

    // queued jobs live in memory only
    debug!(stats = ?state.router.stats(), "final delivery counters");
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down");
}

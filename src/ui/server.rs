//! HTTP control server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post, put},
    Router,
};
use parking_lot::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::app::App;
use crate::state::SharedState;
use crate::ui::handlers;

/// State shared by every handler
pub struct AppState {
    /// Effects, telemetry catalog, plots; handlers read and edit it directly
    pub shared: Arc<SharedState>,
    /// Source/device/recording control; blocking, so used off the async threads
    pub app: Mutex<App>,
    pub started: Instant,
}

impl AppState {
    pub fn new(app: App) -> Arc<Self> {
        Arc::new(Self {
            shared: app.state(),
            app: Mutex::new(app),
            started: Instant::now(),
        })
    }
}

pub struct WebServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        Self { addr, state }
    }

    /// API routes
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/devices", get(handlers::get_devices))
            .route("/api/catalog", get(handlers::get_catalog))
            .route("/api/channels", get(handlers::get_channels))
            .route(
                "/api/effects",
                get(handlers::get_effects).post(handlers::create_effect),
            )
            .route(
                "/api/effects/:id",
                put(handlers::update_effect).delete(handlers::delete_effect),
            )
            .route("/api/effects/:id/plot", get(handlers::get_plot))
            .route("/api/recording", post(handlers::set_recording))
            .route("/api/source", put(handlers::set_source))
            .route("/api/audio", put(handlers::set_audio))
            .route("/api/settings/load", post(handlers::load_settings))
            .route("/api/settings/save", post(handlers::save_settings))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "HTTP API listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

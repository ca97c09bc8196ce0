//! `PlazaServer`: Axum HTTP surface and WebSocket upgrade into the room.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::origin::{require_allowed_origin, OriginPolicy};
use crate::room::Room;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Body of every plain (non-channel) response.
pub const HEALTH_BODY: &str = "Plaza backend OK";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The shared room.
    pub room: Arc<Room>,
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// The plaza server: one room behind an origin-checked HTTP surface.
pub struct PlazaServer {
    config: Arc<ServerConfig>,
    room: Arc<Room>,
    origins: Arc<OriginPolicy>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl PlazaServer {
    /// Create a new server with an empty room.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_room(config, Arc::new(Room::new()))
    }

    /// Create a server around an existing room.
    pub fn with_room(config: ServerConfig, room: Arc<Room>) -> Self {
        let origins = Arc::new(OriginPolicy::new(&config.allowed_origins));
        Self {
            config: Arc::new(config),
            room,
            origins,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Build the Axum router.
    ///
    /// Layer order, outermost first: request tracing, origin guard, CORS.
    pub fn router(&self) -> Router {
        let state = AppState {
            room: Arc::clone(&self.room),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
        };

        Router::new()
            .route("/ws", any(ws_handler))
            .fallback(health_handler)
            .layer(cors_layer(Arc::clone(&self.origins)))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.origins),
                require_allowed_origin,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        if self.origins.is_closed() {
            warn!("origin allow-list is empty, every request will be rejected");
        }

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(%error, "server terminated with error");
            }
        });

        info!(%local_addr, "plaza server listening");
        Ok((local_addr, handle))
    }

    /// Get the room.
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the origin policy.
    pub fn origins(&self) -> &OriginPolicy {
        &self.origins
    }
}

fn cors_layer(origins: Arc<OriginPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _parts| {
            origins.allows_header(origin)
        }))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// `/ws`: upgrade into a room session, or 426 for anything else.
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%rejection, "non-upgrade request to /ws");
            return (StatusCode::UPGRADE_REQUIRED, "Expected websocket").into_response();
        }
    };

    let AppState {
        room,
        config,
        shutdown,
    } = state;
    let token = shutdown.token();
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| shutdown.track(run_ws_session(socket, room, config, token)))
}

/// Every other path: plain-text liveness, 204 for a bare `OPTIONS`.
async fn health_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        HEALTH_BODY.into_response()
    }
}

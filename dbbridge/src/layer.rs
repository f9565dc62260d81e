//! DbBridgeLayer - Main Axum integration layer
//!
//! This module provides the main entry point for mounting the dbbridge API
//! into an Axum application.

use crate::api::{create_api_router, ApiState};
use crate::registry::EngineRegistry;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

/// Mounts the capability API of an [`EngineRegistry`]
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use axum::Router;
/// use dbbridge::{DbBridgeLayer, EngineRegistry, UnconfiguredChatModel};
///
/// let registry = EngineRegistry::with_default_plugins(Arc::new(UnconfiguredChatModel));
/// let bridge = DbBridgeLayer::new("/bridge", registry);
/// let app: Router = Router::new().merge(bridge.into_router());
/// ```
pub struct DbBridgeLayer {
    base_path: String,
    registry: Arc<EngineRegistry>,
    request_timeout: Option<Duration>,
}

impl DbBridgeLayer {
    /// Create a new layer at the given base path
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path the API is mounted under (e.g., "/bridge"), may be empty
    /// * `registry` - The engine registry, fully built
    pub fn new(base_path: impl Into<String>, registry: EngineRegistry) -> Self {
        Self::shared(base_path, Arc::new(registry))
    }

    /// Create a layer over a registry that is already shared
    pub fn shared(base_path: impl Into<String>, registry: Arc<EngineRegistry>) -> Self {
        Self {
            base_path: base_path.into().trim_end_matches('/').to_string(),
            registry,
            request_timeout: None,
        }
    }

    /// Bound every capability call (connection and work) by `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Convert into an Axum Router that can be merged
    ///
    /// The returned router serves the API at `{base_path}/api/*` with
    /// permissive CORS.
    pub fn into_router(self) -> Router {
        let state = ApiState {
            registry: self.registry,
            timeout: self.request_timeout,
        };

        Router::new()
            .nest(&format!("{}/api", self.base_path), create_api_router(state))
            .layer(CorsLayer::permissive())
    }
}

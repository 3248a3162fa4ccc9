//! Liveness endpoints.

use axum::Json;
use serde::Serialize;

/// Liveness body.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Reports process liveness.
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

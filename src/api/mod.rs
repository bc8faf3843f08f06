//! HTTP routes

pub mod health;
pub mod listenbrainz;

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::ingest::Ingestor;
use crate::db::{PlayStore, UserStore};

/// Shared state handed to every handler through `web::Data`
pub struct AppState {
    pub ingestor: Ingestor,
    pub users: Arc<dyn UserStore>,
    pub plays: Arc<dyn PlayStore>,
    /// Cancelled on shutdown so in-flight submissions stop waiting on upstreams
    pub shutdown: CancellationToken,
}

/// Error body in the shape ListenBrainz clients expect
pub(crate) fn error_response(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "code": status.as_u16(),
        "error": message.into(),
    }))
}

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // ListenBrainz-compatible routes
        .service(web::scope("/1").configure(listenbrainz::configure))
        // Liveness
        .configure(health::configure);
}

//! ListenBrainz-compatible API routes
//!
//! Lets any ListenBrainz client (or a custom scrobbler URL setting) submit
//! listens with a per-user API token.

use actix_web::http::{header, StatusCode};
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use super::{error_response, AppState};
use crate::error::PiperError;
use crate::models::listenbrainz::ListenPayload;
use crate::models::{SubmitListens, User};
use crate::utils::auth::parse_authorization;

const DEFAULT_LISTEN_COUNT: u32 = 25;
const MAX_LISTEN_COUNT: u32 = 100;
/// Large enough for a full `import` batch
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListensQuery {
    pub count: Option<u32>,
}

fn header_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_authorization)
}

/// Resolve the user behind `Authorization: Token <t>`
async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<User, HttpResponse> {
    let Some(token) = header_token(req) else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "You need to provide an Authorization header.",
        ));
    };

    match state.users.user_by_api_token(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid authorization token.",
        )),
        Err(e) => {
            error!("Token lookup failed: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

/// Submit listens
#[post("/submit-listens")]
pub async fn submit_listens(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> impl Responder {
    let user = match authenticate(&req, &state).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let submission: SubmitListens = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON document submitted: {}", e),
            )
        }
    };
    let listen_type = submission.listen_type;

    match state
        .ingestor
        .submit(&state.shutdown, &user, submission, Utc::now())
        .await
    {
        Ok(outcome) if outcome.accepted == 0 => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "code": 400,
                "error": "No valid listens submitted",
                "errors": outcome.errors,
            }))
        }
        Ok(outcome) => {
            info!(
                "Accepted {} {:?} listen(s) from {}",
                outcome.accepted, listen_type, user.handle
            );
            HttpResponse::Ok().json(serde_json::json!({
                "status": "ok",
                "accepted": outcome.accepted,
                "errors": outcome.errors,
            }))
        }
        Err(e @ PiperError::Validation { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!("Submission from {} failed: {}", user.handle, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store listens")
        }
    }
}

/// Check a token; always 200 with `valid` set, like ListenBrainz
#[get("/validate-token")]
pub async fn validate_token(
    req: HttpRequest,
    query: web::Query<TokenQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    let token = header_token(&req).or(query.token.as_deref().map(str::trim));
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "You need to provide an Authorization token.");
    };

    match state.users.user_by_api_token(token).await {
        Ok(Some(user)) => HttpResponse::Ok().json(serde_json::json!({
            "code": 200,
            "message": "Token valid.",
            "valid": true,
            "user_name": user.handle,
        })),
        Ok(None) => HttpResponse::Ok().json(serde_json::json!({
            "code": 200,
            "message": "Token invalid.",
            "valid": false,
        })),
        Err(e) => {
            error!("Token lookup failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

/// Most recent stored plays for a user
#[get("/user/{handle}/listens")]
pub async fn user_listens(
    path: web::Path<String>,
    query: web::Query<ListensQuery>,
    state: web::Data<AppState>,
) -> impl Responder {
    let handle = path.into_inner();
    let count = query
        .count
        .unwrap_or(DEFAULT_LISTEN_COUNT)
        .clamp(1, MAX_LISTEN_COUNT);

    let user = match state.users.user_by_handle(&handle).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("Cannot find user: {}", handle))
        }
        Err(e) => {
            error!("User lookup failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match state.plays.recent_tracks(user.id, count).await {
        Ok(tracks) => {
            let listens: Vec<ListenPayload> = tracks.iter().map(ListenPayload::from).collect();
            HttpResponse::Ok().json(serde_json::json!({
                "payload": {
                    "count": listens.len(),
                    "user_id": user.handle,
                    "listens": listens,
                }
            }))
        }
        Err(e) => {
            error!("Failed to load listens for {}: {}", user.handle, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .service(submit_listens)
        .service(validate_token)
        .service(user_listens);
}

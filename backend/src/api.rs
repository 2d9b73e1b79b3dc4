use crate::db;
use crate::email;
use crate::errors::ApiError;
use crate::models::*;
use crate::state::AppState;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use merkle_groups::types::{CommitmentHex, SerializedGroup};
use rand::Rng;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/reload", post(trigger_reload))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/status", get(status))
        .route("/api/v1/login/send-email", post(send_login_email))
        .route("/api/v1/login/confirm", post(confirm_login))
        .route("/api/v1/participants/:uuid", get(get_participant))
        .route("/api/v1/groups/latest-roots", get(latest_roots))
        .route("/api/v1/groups/:id", get(get_group))
        .route("/api/v1/groups/:id/latest-root", get(get_latest_root))
        .route("/api/v1/groups/:id/historic/:root", get(get_historic_group))
        .route("/api/v1/sync/load", post(load_blob))
        .route("/api/v1/sync/save", post(save_blob))
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // In production, this should be a strong secret from environment.
    let expected_key = std::env::var("API_KEY").unwrap_or_else(|_| "dev-secret-key".to_string());

    if let Some(provided_key) = headers.get("X-API-KEY") {
        if provided_key == expected_key.as_str() {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!("unauthorized access attempt");
    Err(StatusCode::UNAUTHORIZED)
}

/// Issue a 6-digit login token for a ticket holder's email.
///
/// In dev bypass mode the token is returned directly and a test ticket
/// holder is seeded on the fly.
async fn send_login_email(
    State(state): State<AppState>,
    Json(req): Json<SendLoginEmailRequest>,
) -> Result<Json<SendLoginEmailResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();

    CommitmentHex { hex: req.commitment.clone() }
        .to_fr()
        .map_err(|e| ApiError::BadRequest(format!("invalid commitment: {e}")))?;

    let token = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));

    if email::bypass_enabled() {
        db::insert_ticket_holder(&state.db, &email, "Test User", Role::Resident, "atlantis", "")
            .await?;
    }

    let Some(holder) = db::set_login_token(&state.db, &email, &token).await? else {
        return Err(ApiError::NotFound(format!("{email} doesn't have a ticket")));
    };

    let force = req.force.unwrap_or(false);
    if let Some(existing) = &holder.commitment {
        if *existing != req.commitment && !force {
            return Err(ApiError::Conflict(format!("{email} already registered")));
        }
    }

    info!(%email, registered = holder.commitment.is_some(), "saved login token");

    if email::bypass_enabled() {
        info!(%email, "bypassing email, returning token");
        return Ok(Json(SendLoginEmailResponse { token: Some(token) }));
    }

    email::deliver_login_token(&email, &holder.name, &token).await?;
    Ok(Json(SendLoginEmailResponse { token: None }))
}

/// Verify the emailed token, record the commitment, and rebuild the groups.
async fn confirm_login(
    State(state): State<AppState>,
    Json(req): Json<ConfirmLoginRequest>,
) -> Result<Json<Participant>, ApiError> {
    let email = req.email.trim().to_lowercase();

    let Some(holder) = db::fetch_ticket_holder(&state.db, &email).await? else {
        return Err(ApiError::NotFound(format!("ticket for {email} not found")));
    };

    if holder.email_token.as_deref() != Some(req.token.as_str()) {
        return Err(ApiError::BadRequest(
            "wrong token; if you got more than one email, use the latest one".to_string(),
        ));
    }

    CommitmentHex { hex: req.commitment.clone() }
        .to_fr()
        .map_err(|e| ApiError::BadRequest(format!("invalid commitment: {e}")))?;

    info!(%email, "saving new commitment");
    let uuid = db::save_commitment(&state.db, &email, &req.commitment).await?;

    // The commitment is already persisted when the reload runs. If the
    // reload fails here the caller sees the error and the background loop
    // retries until the participant lands in the trees.
    state.reload_bounded().await?;

    let Some(participant) = state.groups.get_participant(uuid).await? else {
        return Err(ApiError::Internal);
    };
    if participant.commitment != req.commitment {
        return Err(ApiError::Conflict("commitment mismatch".to_string()));
    }

    info!(%email, uuid = %participant.uuid, "added new participant");
    Ok(Json(participant))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let (n_ticket_holders, n_commitments, n_e2ee) = db::fetch_counts(&state.db).await?;

    let groups = state
        .groups
        .latest_roots()
        .await
        .into_iter()
        .map(|e| GroupCount { group_id: e.group_id, members: e.member_count })
        .collect();

    Ok(Json(StatusResponse {
        time: Utc::now(),
        db: DbCounts { n_ticket_holders, n_commitments, n_e2ee },
        groups,
    }))
}

async fn get_participant(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Participant>, ApiError> {
    let Some(participant) = state.groups.get_participant(uuid).await? else {
        return Err(ApiError::NotFound("participant not found".to_string()));
    };

    Ok(Json(participant))
}

async fn latest_roots(
    State(state): State<AppState>,
) -> Json<Vec<crate::groups::LatestRootEntry>> {
    Json(state.groups.latest_roots().await)
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SerializedGroup>, ApiError> {
    let Some(group) = state.groups.get_group(&id).await else {
        return Err(ApiError::NotFound(format!("missing group {id}")));
    };

    Ok(Json(group.serialized()))
}

async fn get_latest_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<String>, ApiError> {
    let entry = state
        .groups
        .latest_roots()
        .await
        .into_iter()
        .find(|e| e.group_id == id);

    match entry {
        Some(entry) => Ok(Json(entry.root)),
        None => Err(ApiError::NotFound(format!("missing group {id}"))),
    }
}

async fn get_historic_group(
    State(state): State<AppState>,
    Path((id, root)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(serialized) = state.groups.get_historic_group(&id, &root).await? else {
        return Err(ApiError::NotFound("historic group not found".to_string()));
    };

    let group = serde_json::from_str(&serialized).map_err(|_| ApiError::Internal)?;
    Ok(Json(group))
}

/// Operator-triggered synchronous reload.
async fn trigger_reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    state.reload_bounded().await?;
    Ok(Json(ReloadResponse { ok: true }))
}

async fn load_blob(
    State(state): State<AppState>,
    Json(req): Json<LoadBlobRequest>,
) -> Result<Json<LoadBlobResponse>, ApiError> {
    let Some(blob) = db::load_encrypted_blob(&state.db, &req.blob_key).await? else {
        return Err(ApiError::NotFound("no blob saved under this key".to_string()));
    };

    let encrypted_blob = serde_json::from_str(&blob).map_err(|_| ApiError::Internal)?;
    Ok(Json(LoadBlobResponse { encrypted_blob }))
}

async fn save_blob(
    State(state): State<AppState>,
    Json(req): Json<SaveBlobRequest>,
) -> Result<&'static str, ApiError> {
    let blob = serde_json::to_string(&req.encrypted_blob).map_err(|_| ApiError::Internal)?;
    db::save_encrypted_blob(&state.db, &req.blob_key, &blob).await?;

    Ok("ok")
}

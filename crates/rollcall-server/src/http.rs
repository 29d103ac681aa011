//! HTTP request handlers
//!
//! Kiosk display endpoints authenticate with the kiosk secret; everything
//! else with a bearer access token.

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use image::ImageFormat;
use qrcode::QrCode;
use rollcall_attendance::{
    CheckInInfo, KioskInfo, KioskRegistration, KioskView, PairRequest, PairedKiosk, SessionInfo,
    StartSessionRequest, StartedSession,
};
use rollcall_core::protocol::{
    CheckInRequest, CheckInResponse, LoginRequest, RefreshRequest, TokenPair,
};
use rollcall_core::{Error, Principal};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::state::{bearer_token, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        // Credentials
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/me", get(me_handler))
        // Kiosk display
        .route("/api/kiosks/init", post(kiosk_init_handler))
        .route("/api/kiosks/:id/state", get(kiosk_state_handler))
        .route("/api/kiosks/:id/qr", get(kiosk_qr_handler))
        // Kiosk management
        .route("/api/kiosks", get(list_kiosks_handler))
        .route("/api/kiosks/by-registration-pin", get(registration_pin_handler))
        .route("/api/kiosks/pair", post(pair_handler))
        .route("/api/kiosks/:id/unpair", post(unpair_handler))
        .route("/api/kiosks/by-display-pin", get(display_pin_handler))
        // Sessions
        .route("/api/sessions", post(start_session_handler).get(list_sessions_handler))
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(close_session_handler),
        )
        .route("/api/sessions/:id/attendees", get(attendees_handler))
        .route("/api/check-in", post(check_in_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Credentials
// ============================================================================

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<TokenPair>> {
    let pair = state
        .credentials
        .login(&request.username, &request.password)
        .await?;
    Ok(Json(pair))
}

async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let pair = state.credentials.refresh(&request.refresh_token).await?;
    Ok(Json(pair))
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<StatusCode> {
    state.credentials.logout(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Principal>> {
    Ok(Json(state.authenticate(&headers)?))
}

// ============================================================================
// Kiosk display
// ============================================================================

/// Kiosk secret from `?kiosk_secret=` or the Authorization header
#[derive(Debug, Deserialize)]
pub struct KioskQuery {
    #[serde(default)]
    kiosk_secret: Option<String>,
    /// QR code size in pixels
    #[serde(default = "default_qr_size")]
    size: u32,
}

fn default_qr_size() -> u32 {
    300
}

const MAX_QR_SIZE: u32 = 2048;

fn extract_kiosk_secret(query: &KioskQuery, headers: &HeaderMap) -> Result<String, Error> {
    query
        .kiosk_secret
        .clone()
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| Error::Unauthenticated("missing kiosk secret".to_string()))
}

async fn kiosk_init_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<KioskRegistration>> {
    Ok(Json(state.attendance.init_kiosk().await?))
}

async fn kiosk_state_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<KioskQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<KioskView>> {
    let secret = extract_kiosk_secret(&query, &headers)?;
    Ok(Json(state.attendance.kiosk_view(&id, &secret).await?))
}

/// Render the current `{session_id, token}` payload as a PNG QR code
async fn kiosk_qr_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<KioskQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let secret = extract_kiosk_secret(&query, &headers)?;
    let payload = state.attendance.current_payload(&id, &secret).await?;
    let json = serde_json::to_string(&payload).map_err(|e| Error::Internal(e.to_string()))?;

    let code = QrCode::new(json.as_bytes()).map_err(|e| Error::Internal(e.to_string()))?;
    let image = code.render::<image::Luma<u8>>().build();

    let size = query.size.clamp(64, MAX_QR_SIZE);
    let resized = image::imageops::resize(&image, size, size, image::imageops::FilterType::Nearest);

    let mut buffer = Cursor::new(Vec::new());
    resized
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| Error::Internal(e.to_string()))?;

    debug!(kiosk_id = %id, "Rendered check-in code");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        buffer.into_inner(),
    )
        .into_response())
}

// ============================================================================
// Kiosk management
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PinQuery {
    pin: String,
}

async fn list_kiosks_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<KioskInfo>>> {
    let principal = state.authenticate(&headers)?;
    Ok(Json(state.attendance.list_kiosks(&principal).await?))
}

async fn registration_pin_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PinQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<KioskInfo>> {
    let principal = state.authenticate_pin_lookup(&headers)?;
    let kiosk = state
        .attendance
        .resolve_registration_pin(&principal, &query.pin)
        .await?;
    Ok(Json(kiosk))
}

async fn pair_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PairRequest>,
) -> ApiResult<Json<PairedKiosk>> {
    let principal = state.authenticate_pin_lookup(&headers)?;
    Ok(Json(state.attendance.pair_kiosk(&principal, request).await?))
}

async fn unpair_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Json<KioskInfo>> {
    let principal = state.authenticate(&headers)?;
    Ok(Json(state.attendance.unpair_kiosk(&principal, &id).await?))
}

async fn display_pin_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PinQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<KioskInfo>> {
    let principal = state.authenticate_pin_lookup(&headers)?;
    let kiosk = state
        .attendance
        .resolve_display_pin(&principal, &query.pin)
        .await?;
    Ok(Json(kiosk))
}

// ============================================================================
// Sessions and check-in
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default)]
    kiosk_id: Option<String>,
}

async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<StartedSession>)> {
    let principal = state.authenticate_pin_lookup(&headers)?;
    let started = state.attendance.start_session(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    let principal = state.authenticate(&headers)?;
    let sessions = state
        .attendance
        .list_sessions(&principal, query.kiosk_id.as_deref())
        .await?;
    Ok(Json(sessions))
}

async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionInfo>> {
    let principal = state.authenticate(&headers)?;
    Ok(Json(state.attendance.get_session(&principal, &id).await?))
}

async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionInfo>> {
    let principal = state.authenticate(&headers)?;
    Ok(Json(state.attendance.close_session(&principal, &id).await?))
}

async fn attendees_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<CheckInInfo>>> {
    let principal = state.authenticate(&headers)?;
    Ok(Json(state.attendance.attendees(&principal, &id).await?))
}

async fn check_in_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<CheckInResponse>, ApiError> {
    let principal = state.authenticate(&headers)?;
    Ok(Json(state.attendance.check_in(&principal, request).await?))
}

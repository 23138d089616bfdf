//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the daemon reaches 1.0.

use std::str::FromStr;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::oneshot;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::commands::SwarmCommand;
use super::server::SharedState;
use crate::action::{self, ActionOutcome};
use crate::aggregate::{self, Family};
use crate::api_client::types::{
    AddDeviceRequest, ErrorResponse, ScanResponse, SettingsPatch, SwarmState, TotalsState,
};
use crate::device::Device;
use crate::device_api::DeviceAction;
use crate::error::Error;

/// Long enough for a manual add to resolve and probe its peer.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_swarm))
        .routes(routes!(get_totals))
        .routes(routes!(get_families))
        .routes(routes!(post_scan))
        .routes(routes!(post_refresh))
        .routes(routes!(add_device))
        .routes(routes!(remove_device))
        .routes(routes!(device_action))
        .routes(routes!(patch_settings))
}

/// An engine error rendered as a status code and a JSON message.
struct ApiError(StatusCode, String);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidAddress(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Duplicate(_) => StatusCode::CONFLICT,
            Error::NeedsFirmwareUpgrade(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotAMiner { .. } | Error::ScanTarget(_) => StatusCode::BAD_GATEWAY,
            Error::UnknownDevice(_) => StatusCode::NOT_FOUND,
            Error::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            Error::Io(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

/// Send a command to the engine and wait for its reply.
async fn request<T>(
    state: &SharedState,
    command: impl FnOnce(oneshot::Sender<T>) -> SwarmCommand,
) -> Result<T, ApiError> {
    let (tx, rx) = oneshot::channel();
    state
        .swarm_cmd_tx
        .send(command(tx))
        .await
        .map_err(|_| Error::EngineStopped)?;
    // Result layers: timeout / channel-closed.
    let Ok(Ok(reply)) = tokio::time::timeout(COMMAND_TIMEOUT, rx).await else {
        return Err(Error::EngineStopped.into());
    };
    Ok(reply)
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct SwarmQuery {
    /// Case-insensitive text matched against name, models and address.
    filter: Option<String>,
}

/// Return the current swarm snapshot, optionally filtered.
#[utoipa::path(
    get,
    path = "/swarm",
    tag = "swarm",
    params(SwarmQuery),
    responses(
        (status = OK, description = "Current swarm state", body = SwarmState),
    ),
)]
async fn get_swarm(
    State(state): State<SharedState>,
    Query(query): Query<SwarmQuery>,
) -> Json<SwarmState> {
    let mut swarm = state.swarm_state();
    if let Some(filter) = query.filter.as_deref() {
        swarm.devices.retain(|d| aggregate::matches(&d.device, filter));
    }
    Json(swarm)
}

/// Return fleet-wide totals.
#[utoipa::path(
    get,
    path = "/swarm/totals",
    tag = "swarm",
    responses(
        (status = OK, description = "Fleet totals", body = TotalsState),
    ),
)]
async fn get_totals(State(state): State<SharedState>) -> Json<TotalsState> {
    Json(state.swarm_rx.borrow().totals)
}

/// Return the distinct hardware families in the fleet.
#[utoipa::path(
    get,
    path = "/swarm/families",
    tag = "swarm",
    responses(
        (status = OK, description = "Distinct model combinations", body = Vec<Family>),
    ),
)]
async fn get_families(State(state): State<SharedState>) -> Json<Vec<Family>> {
    let devices: Vec<Device> = state
        .swarm_state()
        .devices
        .into_iter()
        .map(|d| d.device)
        .collect();
    Json(aggregate::families(&devices))
}

/// Start a discovery pass over the seed's subnet.
#[utoipa::path(
    post,
    path = "/swarm/scan",
    tag = "swarm",
    responses(
        (status = ACCEPTED, description = "Whether a scan was started", body = ScanResponse),
        (status = BAD_REQUEST, description = "No seed address configured", body = ErrorResponse),
    ),
)]
async fn post_scan(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let started = request(&state, |reply| SwarmCommand::Scan { reply }).await??;
    Ok((StatusCode::ACCEPTED, Json(ScanResponse { started })))
}

/// Refresh every registered device now.
#[utoipa::path(
    post,
    path = "/swarm/refresh",
    tag = "swarm",
    responses(
        (status = ACCEPTED, description = "Whether a refresh was started", body = ScanResponse),
    ),
)]
async fn post_refresh(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let started = request(&state, |reply| SwarmCommand::Refresh { reply }).await?;
    Ok((StatusCode::ACCEPTED, Json(ScanResponse { started })))
}

/// Probe a peer by IP or hostname and add it to the swarm.
#[utoipa::path(
    post,
    path = "/swarm/devices",
    tag = "devices",
    request_body = AddDeviceRequest,
    responses(
        (status = CREATED, description = "Device added", body = Device),
        (status = BAD_REQUEST, description = "Malformed address", body = ErrorResponse),
        (status = CONFLICT, description = "Device already in the swarm", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Device firmware must be upgraded", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "No miner answered", body = ErrorResponse),
    ),
)]
async fn add_device(
    State(state): State<SharedState>,
    Json(req): Json<AddDeviceRequest>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    let address = req.address;
    let device = request(&state, |reply| SwarmCommand::AddDevice { address, reply }).await??;
    Ok((StatusCode::CREATED, Json(device)))
}

/// Remove a device by address or connection address.
#[utoipa::path(
    delete,
    path = "/swarm/devices/{address}",
    tag = "devices",
    params(
        ("address" = String, Path, description = "Device address or connection address"),
    ),
    responses(
        (status = OK, description = "Removed device", body = Device),
        (status = NOT_FOUND, description = "Device not found", body = ErrorResponse),
    ),
)]
async fn remove_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device = request(&state, |reply| SwarmCommand::RemoveDevice { address, reply }).await??;
    Ok(Json(device))
}

/// Send a one-shot action (restart, identify) to a device.
#[utoipa::path(
    post,
    path = "/swarm/devices/{address}/{action}",
    tag = "devices",
    params(
        ("address" = String, Path, description = "Device address or connection address"),
        ("action" = String, Path, description = "restart or identify"),
    ),
    responses(
        (status = OK, description = "What the device answered", body = ActionOutcome),
        (status = BAD_REQUEST, description = "Unknown action", body = ErrorResponse),
        (status = NOT_FOUND, description = "Device not found", body = ErrorResponse),
    ),
)]
async fn device_action(
    State(state): State<SharedState>,
    Path((address, action)): Path<(String, String)>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let action = DeviceAction::from_str(&action)
        .map_err(|_| ApiError(StatusCode::BAD_REQUEST, format!("unknown action {action:?}")))?;
    let device = state
        .swarm_state()
        .find(&address)
        .map(|d| d.device.clone())
        .ok_or(Error::UnknownDevice(address))?;

    Ok(Json(
        action::dispatch(state.device_api.as_ref(), &device, action).await,
    ))
}

/// Apply partial updates to engine settings.
#[utoipa::path(
    patch,
    path = "/swarm/settings",
    tag = "swarm",
    request_body = SettingsPatch,
    responses(
        (status = OK, description = "Updated swarm state", body = SwarmState),
        (status = BAD_REQUEST, description = "Invalid setting", body = ErrorResponse),
    ),
)]
async fn patch_settings(
    State(state): State<SharedState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SwarmState>, ApiError> {
    request(&state, |reply| SwarmCommand::UpdateSettings { patch, reply }).await??;
    Ok(Json(state.swarm_state()))
}

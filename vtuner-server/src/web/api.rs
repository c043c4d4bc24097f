//! JSON API for device status, tuning and pool configuration.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use vtuner_core::{CaptureError, DeviceSettings, DeviceStatus, ParentStatus, TuningRequest};

use crate::web::state::WebState;

// ============================================================================
// Data structures
// ============================================================================

/// Device status plus the alias currently holding it.
#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    #[serde(flatten)]
    pub status: DeviceStatus,
    pub alias: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PoolInfo {
    pub name: String,
    /// Members in selection order.
    pub members: Vec<String>,
    pub available: usize,
}

#[derive(Debug, Deserialize)]
pub struct ExternalLockRequest {
    pub locked: bool,
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(error: &CaptureError) -> StatusCode {
    match error {
        CaptureError::NoAvailableDevice(_) => StatusCode::SERVICE_UNAVAILABLE,
        CaptureError::NotFound(_) => StatusCode::NOT_FOUND,
        CaptureError::DuplicateName(_) => StatusCode::CONFLICT,
        CaptureError::Instantiation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CaptureError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &CaptureError) -> Response {
    (
        status_for(error),
        Json(json!({
            "success": false,
            "error": error.to_string()
        })),
    )
        .into_response()
}

// ============================================================================
// Status endpoints
// ============================================================================

/// Get every loaded device, ordered by name.
pub async fn get_devices(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let context = &web_state.context;
    let devices: Vec<DeviceInfo> = context
        .list_all_sorted()
        .iter()
        .map(|device| DeviceInfo {
            status: DeviceStatus::capture(device.as_ref()),
            alias: context.pools().alias_for_device(device.name()),
        })
        .collect();

    Json(json!({
        "success": true,
        "devices": devices,
        "count": devices.len(),
        "uptime_seconds": web_state.uptime_secs()
    }))
}

/// Get pools with their members in selection order.
pub async fn get_pools(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let pools = web_state.context.pools();
    let list: Vec<PoolInfo> = pools
        .pool_names()
        .into_iter()
        .map(|name| {
            let members = pools.pool_members(&name);
            PoolInfo {
                available: members
                    .iter()
                    .filter(|d| !d.is_locked() && !d.is_external_locked())
                    .count(),
                members: members.iter().map(|d| d.name().to_string()).collect(),
                name,
            }
        })
        .collect();

    Json(json!({
        "success": true,
        "use_pools": pools.use_pools(),
        "pools": list,
        "bindings": pools.bindings()
    }))
}

pub async fn get_parents(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let parents: Vec<ParentStatus> = web_state
        .context
        .discovery()
        .parents()
        .iter()
        .map(|p| ParentStatus::from(p.as_ref()))
        .collect();

    Json(json!({
        "success": true,
        "parents": parents
    }))
}

/// Descriptors that can be instantiated, in descriptor order.
pub async fn get_descriptors(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let descriptors = web_state.context.factory().unloaded_sorted();
    Json(json!({
        "success": true,
        "descriptors": descriptors,
        "implementations": web_state.context.factory().implementation_tags()
    }))
}

// ============================================================================
// Tuning endpoints
// ============================================================================

pub async fn tune(
    State(web_state): State<Arc<WebState>>,
    Json(request): Json<TuningRequest>,
) -> Response {
    match web_state.context.select(&request) {
        Ok(selection) => {
            info!(
                "Tuned {} on {} (channel {:?})",
                selection.alias,
                selection.device.name(),
                request.channel
            );
            Json(json!({
                "success": true,
                "alias": selection.alias,
                "device": selection.device.name(),
                "pool": selection.pool,
                "retuned": selection.retuned
            }))
            .into_response()
        }
        Err(e) => {
            debug!("Tune request for {} rejected: {}", request.alias, e);
            error_response(&e)
        }
    }
}

pub async fn release(
    State(web_state): State<Arc<WebState>>,
    Path(alias): Path<String>,
) -> Response {
    match web_state.context.release(&alias) {
        Ok(device) => Json(json!({
            "success": true,
            "alias": alias,
            "device": device.name()
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Device configuration endpoints
// ============================================================================

/// Change a device's pool and/or merit.
pub async fn update_device(
    State(web_state): State<Arc<WebState>>,
    Path(name): Path<String>,
    Json(settings): Json<DeviceSettings>,
) -> Response {
    if settings.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "Nothing to update"
            })),
        )
            .into_response();
    }

    match web_state.context.configure_device(&name, settings) {
        // Not loaded yet; applied when it is.
        Ok(None) => Json(json!({
            "success": true,
            "device": name,
            "result": "stored"
        }))
        .into_response(),
        Ok(Some(result)) => Json(json!({
            "success": true,
            "device": name,
            "result": result
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn set_external_lock(
    State(web_state): State<Arc<WebState>>,
    Path(name): Path<String>,
    Json(payload): Json<ExternalLockRequest>,
) -> Response {
    match web_state.context.registry().get_device(&name) {
        Ok(device) => {
            device.attributes().set_external_locked(payload.locked);
            info!("External lock on {} set to {}", name, payload.locked);
            Json(json!({
                "success": true,
                "device": name,
                "external_locked": payload.locked
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chord_core::{ChordError, DeviceId, ErrorKind, Mode, Selection, SelectionOption};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidSelector | ErrorKind::UnknownDeviceType | ErrorKind::UnknownCapability => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::UnknownDevice => StatusCode::NOT_FOUND,
        ErrorKind::DuplicateDeviceId | ErrorKind::NoDeviceAvailable => StatusCode::CONFLICT,
        ErrorKind::Spec => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: ChordError) -> Response {
    debug!(error = %e, "Request failed");
    (status_for(e.kind()), Json(ApiError::new(e.to_string()))).into_response()
}

/// A selection as returned to clients, with the problems reported while running it
#[derive(Serialize)]
pub struct SelectionResponse {
    id: String,
    selector: Option<String>,
    mode: Mode,
    devices: Vec<DeviceId>,
    diagnostics: Vec<String>,
}

impl SelectionResponse {
    fn new(selection: &Selection, diagnostics: Vec<ChordError>) -> Self {
        Self {
            id: selection.id().to_string(),
            selector: selection.selector().map(str::to_string),
            mode: selection.mode(),
            devices: selection.device_ids().to_vec(),
            diagnostics: diagnostics.iter().map(ToString::to_string).collect(),
        }
    }
}

/// List all known devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

/// Get a specific device by ID
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.get_device(&id).await {
        Some(device) => Json(device).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response(),
    }
}

/// Device join request body
#[derive(Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    name: Option<String>,
    /// Emulated devices are added with `live = false`
    #[serde(default = "default_live")]
    live: bool,
}

fn default_live() -> bool {
    true
}

/// Add a device
pub async fn join_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinRequest>,
) -> impl IntoResponse {
    let id = req.id.map(DeviceId::new);
    match state
        .join_device(id, &req.device_type, req.name.as_deref(), req.live)
        .await
    {
        Ok(device) => {
            info!(device = %device.id, live = device.live, "Device joined");
            (StatusCode::CREATED, Json(device)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Remove a device
pub async fn leave_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.leave_device(&DeviceId::new(id)).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response()
    }
}

/// Raw occurrence reported by a device
#[derive(Deserialize)]
pub struct EventRequest {
    event: String,
    #[serde(default)]
    value: Option<String>,
    /// Occurrence time; now when absent
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Deliver a raw device event
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EventRequest>,
) -> impl IntoResponse {
    match state
        .trigger(&DeviceId::new(id), &req.event, req.value, req.timestamp)
        .await
    {
        Ok(fired) => Json(serde_json::json!({ "fired": fired })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SelectRequest {
    selector: String,
}

/// Compile a selector and return the devices it matches
pub async fn select(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    let mut engine = state.engine.lock().await;
    match engine.try_select(&req.selector) {
        Ok(selection) => {
            let diagnostics = engine.take_diagnostics();
            Json(SelectionResponse::new(&selection, diagnostics)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SuggestRequest {
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Suggest selectors for a set of devices
pub async fn suggest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SuggestRequest>,
) -> impl IntoResponse {
    let include: Vec<DeviceId> = req.include.into_iter().map(DeviceId::new).collect();
    let exclude: Vec<DeviceId> = req.exclude.into_iter().map(DeviceId::new).collect();
    let engine = state.engine.lock().await;
    Json(engine.suggest_selectors(&include, &exclude))
}

/// Selection action to run
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// Show markup, or a layout from the device spec by id
    Show {
        #[serde(default)]
        markup: Option<String>,
        #[serde(default)]
        layout: Option<String>,
    },
    Play { media: String },
    Call { callee: String },
    Wakeup,
    StartApp { app: String },
    KillApp { app: String },
    #[serde(rename_all = "camelCase")]
    UpdateUiAttr {
        element_id: String,
        attr: String,
        value: String,
    },
    /// Clear the UI on every device; the selector is ignored
    Reset,
}

#[derive(Deserialize)]
pub struct ActionRequest {
    selector: String,
    #[serde(default)]
    mode: Mode,
    #[serde(default)]
    option: Option<SelectionOption>,
    #[serde(flatten)]
    action: Action,
}

/// Run an action on the devices a selector matches
pub async fn run_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    let mut engine = state.engine.lock().await;
    let mut selection = match engine.try_select(&req.selector) {
        Ok(selection) => selection,
        Err(e) => return error_response(e),
    };
    selection.set_mode(req.mode);
    if let Some(option) = req.option {
        selection.set_option(option);
    }

    info!(selection = %selection.id(), action = ?req.action, "Running action");
    match req.action {
        Action::Show { markup, layout } => {
            let markup = match (markup, layout) {
                (Some(markup), _) => markup,
                (None, Some(layout)) => match engine.get_layout_by_id(&layout) {
                    Some(markup) => markup.to_string(),
                    None => {
                        return (
                            StatusCode::NOT_FOUND,
                            Json(ApiError::new(format!("Unknown layout: {}", layout))),
                        )
                            .into_response()
                    }
                },
                (None, None) => String::new(),
            };
            selection.show(&mut engine, &markup);
        }
        Action::Play { media } => {
            selection.play(&mut engine, &media);
        }
        Action::Call { callee } => {
            selection.call(&mut engine, &callee);
        }
        Action::Wakeup => {
            selection.wakeup(&mut engine);
        }
        Action::StartApp { app } => {
            selection.start_app(&mut engine, &app);
        }
        Action::KillApp { app } => {
            selection.kill_app(&mut engine, &app);
        }
        Action::UpdateUiAttr {
            element_id,
            attr,
            value,
        } => {
            selection.update_ui_attr(&mut engine, &element_id, &attr, &value);
        }
        Action::Reset => engine.reset_devices(),
    }

    let diagnostics = engine.take_diagnostics();
    Json(SelectionResponse::new(&selection, diagnostics)).into_response()
}

#[derive(Deserialize)]
pub struct SubscriptionRequest {
    selector: String,
    event: String,
    #[serde(default)]
    mode: Mode,
    #[serde(default)]
    option: Option<SelectionOption>,
}

/// Listen on a selection; aggregated events go out over `/ws`
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubscriptionRequest>,
) -> impl IntoResponse {
    match state
        .subscribe_selection(&req.selector, req.mode, req.option, &req.event)
        .await
    {
        Ok(selection) => {
            let diagnostics = state.engine.lock().await.take_diagnostics();
            (
                StatusCode::CREATED,
                Json(SelectionResponse::new(&selection, diagnostics)),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}

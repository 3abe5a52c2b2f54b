use crate::errors::Error;
use crate::metrics::gather_metrics;
use crate::model::{
    Alert, AlertStatus, CalibrationRequest, Device, HealthCheck, HealthMetrics, HistoryOptions,
    NewDevice, NewSensor, Sensor, TelemetryBatch,
};
use crate::pipeline::ProcessingSummary;
use crate::service::IotService;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
struct AppState {
    service: Arc<IotService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareBody {
    firmware_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareCompletionBody {
    firmware_version: String,
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatusBody {
    status: AlertStatus,
    user_id: String,
}

pub fn create_router(service: Arc<IotService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/devices", post(register_device))
        .route("/api/v1/devices/:id/activate", post(activate_device))
        .route("/api/v1/devices/:id/deactivate", post(deactivate_device))
        .route("/api/v1/devices/:id/firmware", post(update_firmware))
        .route(
            "/api/v1/devices/:id/firmware/complete",
            post(complete_firmware_update),
        )
        .route(
            "/api/v1/devices/:id/health",
            get(health_history).post(record_health_check),
        )
        .route("/api/v1/fields/:id/devices", get(devices_by_field))
        .route("/api/v1/owners/:id/devices", get(devices_by_owner))
        .route("/api/v1/owners/:id/alerts", get(active_alerts))
        .route("/api/v1/alerts/:id", put(update_alert))
        .route("/api/v1/sensors", post(create_sensor))
        .route("/api/v1/sensors/:id/calibrate", post(calibrate_sensor))
        .route("/api/v1/data", post(process_sensor_data))
        .with_state(state)
}

async fn metrics_handler() -> String {
    gather_metrics()
}

async fn register_device(
    State(state): State<AppState>,
    Json(body): Json<NewDevice>,
) -> Result<(StatusCode, Json<Device>), AppError> {
    let device = state.service.register_device(body).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn activate_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.service.activate_device(&id).await?))
}

async fn deactivate_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(state.service.deactivate_device(&id).await?))
}

async fn update_firmware(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FirmwareBody>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(
        state
            .service
            .update_firmware(&id, &body.firmware_version)
            .await?,
    ))
}

async fn complete_firmware_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FirmwareCompletionBody>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(
        state
            .service
            .complete_firmware_update(&id, &body.firmware_version, body.success)
            .await?,
    ))
}

async fn record_health_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HealthMetrics>,
) -> Result<Json<HealthCheck>, AppError> {
    Ok(Json(state.service.record_health_check(&id, body).await?))
}

async fn health_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(options): Query<HistoryOptions>,
) -> Result<Json<Vec<HealthCheck>>, AppError> {
    Ok(Json(
        state
            .service
            .get_device_health_history(&id, options)
            .await?,
    ))
}

async fn devices_by_field(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Device>>, AppError> {
    Ok(Json(state.service.get_devices_by_field(&id).await?))
}

async fn devices_by_owner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Device>>, AppError> {
    Ok(Json(state.service.get_devices_by_owner(&id).await?))
}

async fn active_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Alert>>, AppError> {
    Ok(Json(state.service.get_active_alerts_for_owner(&id).await?))
}

async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AlertStatusBody>,
) -> Result<Json<Alert>, AppError> {
    Ok(Json(
        state
            .service
            .update_alert_status(&id, body.status, &body.user_id)
            .await?,
    ))
}

async fn create_sensor(
    State(state): State<AppState>,
    Json(body): Json<NewSensor>,
) -> Result<(StatusCode, Json<Sensor>), AppError> {
    let sensor = state.service.create_sensor(body).await?;
    Ok((StatusCode::CREATED, Json(sensor)))
}

async fn calibrate_sensor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CalibrationRequest>,
) -> Result<Json<Sensor>, AppError> {
    Ok(Json(state.service.calibrate_sensor(&id, body).await?))
}

async fn process_sensor_data(
    State(state): State<AppState>,
    Json(body): Json<TelemetryBatch>,
) -> Result<Json<ProcessingSummary>, AppError> {
    let device_id = body
        .device_id
        .ok_or_else(|| Error::Validation("deviceId is required".to_string()))?;
    Ok(Json(
        state
            .service
            .process_sensor_data(&device_id, body.sensor_data)
            .await?,
    ))
}

struct AppError(Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error: {}", self.0);
        } else {
            warn!("API request rejected: {}", self.0);
        }
        let body = serde_json::json!({ "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

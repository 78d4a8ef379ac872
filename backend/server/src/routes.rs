use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Query, State, rejection::JsonRejection},
};
use chrono::NaiveDate;
use process::{
    ProcessError, import_history,
    utils::{decode_latin1, parse_request_date},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::fs;
use tracing::info;

use crate::{
    config::Config,
    error::AppError,
    models::{StoredRecord, Zone, ZoneSummary},
    reconcile::{BackfillReport, append_record, backfill_date},
    state::AppState,
    store::{Store, duplicate_zone},
    utils::{authorize, read_local_rows},
};

pub const UPLOAD_FIELD: &str = "file";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecordPayload {
    acumulados_hoy: u64,
    fecha: String,
    idzona: String,
}

#[derive(Deserialize)]
pub struct NewZonePayload {
    nombre: String,
    code: String,
    habitantes: u64,
}

#[derive(Deserialize)]
pub struct ZoneQuery {
    code: Option<String>,
}

#[derive(Deserialize)]
pub struct BackfillPayload {
    fecha: String,
}

#[derive(Serialize)]
pub struct BackfillResponse {
    status: &'static str,

    #[serde(flatten)]
    report: BackfillReport,
}

fn parse_date(input: &str) -> Result<NaiveDate, AppError> {
    parse_request_date(input).map_err(|e: ProcessError| AppError::BadRequest(e.to_string()))
}

/// Checks `auth` before the rest of a mutating request body is validated.
fn authorized_body<T: DeserializeOwned>(
    config: &Config,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<T, AppError> {
    let Json(body) = body?;
    authorize(config, body.get("auth").and_then(Value::as_str))?;

    serde_json::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Every record of every zone. Kept for clients predating multiple zones.
pub async fn daily_records_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<StoredRecord>>, AppError> {
    Ok(Json(state.store.all_records().await?))
}

pub async fn daily_record_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<StoredRecord>, AppError> {
    let payload: NewRecordPayload = authorized_body(&state.config, body)?;
    let date = parse_date(&payload.fecha)?;
    let cumulative = i64::try_from(payload.acumulados_hoy)
        .map_err(|e| AppError::BadRequest(format!("acumuladosHoy: {e}")))?;

    let stored = append_record(&state.store, &state.locks, &payload.idzona, cumulative, date)
        .await?;

    Ok(Json(stored))
}

/// Registers a zone with its full history rebuilt from the local feed copy.
pub async fn zone_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Zone>, AppError> {
    let payload: NewZonePayload = authorized_body(&state.config, body)?;
    if payload.habitantes == 0 {
        return Err(AppError::BadRequest(ProcessError::InvalidPopulation.to_string()));
    }

    let _guard = state.locks.lock(&payload.code).await;
    if state.store.find_zone(&payload.code).await?.is_some() {
        return Err(duplicate_zone(&payload.code));
    }

    let rows = read_local_rows(&state.config).await?;
    let history = import_history(&rows, &payload.nombre, payload.habitantes)?;
    let stored = state.store.insert_records(&history).await?;

    let summary = ZoneSummary {
        name: payload.nombre,
        code: payload.code,
        population: payload.habitantes,
    };
    let zone = state.store.create_zone(summary, &stored).await?;

    info!("Created zone {} with {} records", zone.summary.name, zone.records.len());
    Ok(Json(zone))
}

pub async fn zone_records_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ZoneQuery>,
) -> Result<Json<Vec<StoredRecord>>, AppError> {
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or(AppError::MissingField("la zona de salud"))?;

    let zone = state
        .store
        .find_zone(&code)
        .await?
        .ok_or(AppError::ZoneNotFound(code))?;

    Ok(Json(state.store.records_by_ids(&zone.records).await?))
}

pub async fn zones_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ZoneSummary>>, AppError> {
    Ok(Json(state.store.list_zones().await?))
}

/// Replaces the local feed copy, re-encoding it from ISO-8859-1 to UTF-8.
pub async fn upload_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let bytes = field.bytes().await?;
        let text = decode_latin1(&bytes);

        fs::create_dir_all(&state.config.csv_dir).await?;
        fs::write(state.config.local_csv(), text).await?;

        info!("Replaced local feed copy ({} bytes)", bytes.len());
        return Ok(Json(json!({ "status": "OK" })));
    }

    Err(AppError::BadRequest(format!("Missing '{UPLOAD_FIELD}' field")))
}

/// Fills in one date for every zone from the local feed copy. Superseded by the poller.
pub async fn backfill_handler<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BackfillResponse>, AppError> {
    let payload: BackfillPayload = authorized_body(&state.config, body)?;
    let date = parse_date(&payload.fecha)?;

    let rows = read_local_rows(&state.config).await?;
    let report = backfill_date(&state.store, &state.locks, &rows, date).await?;

    Ok(Json(BackfillResponse {
        status: "OK",
        report,
    }))
}

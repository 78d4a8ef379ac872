//! # Reconciliation
//!
//! Merges parsed feed rows into the store without duplicating (zone, date) records.
//!
//! Every zone is handled independently and concurrently. Each zone's
//! check-derive-insert-attach sequence runs under that zone's lock, so a manual request and
//! the poller can never both create a record for the same zone and date.
//!
//! ## Global short-circuit
//!
//! [`reconcile`] stops as soon as any record exists for the feed's newest date, in any zone.
//! This assumes every zone is published on the same cadence by the same feed. A zone lagging
//! behind the others on that date is not picked up by the poller and needs
//! [`backfill_date`] (`POST /datosporfecha`).
use chrono::NaiveDate;
use futures::future::join_all;
use process::{CsvRow, derive_record, find_row, last_date, utils::midnight};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    error::AppError,
    models::{StoredRecord, Zone, ZoneSummary},
    state::ZoneLocks,
    store::{Store, duplicate_date},
};

#[derive(Debug)]
enum ZoneStep {
    Created(StoredRecord),
    AlreadyPresent,
    MissingRow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneFailure {
    pub code: String,

    #[serde(rename = "err")]
    pub error: String,
}

/// Per-zone result of merging one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    #[serde(rename = "fecha", with = "midnight")]
    pub date: NaiveDate,

    #[serde(rename = "creados")]
    pub created: Vec<String>,

    #[serde(rename = "existentes")]
    pub present: Vec<String>,

    #[serde(rename = "sinDatos")]
    pub missing: Vec<String>,

    #[serde(rename = "fallidos")]
    pub failed: Vec<ZoneFailure>,
}

impl BackfillReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            created: Vec::new(),
            present: Vec::new(),
            missing: Vec::new(),
            failed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    AlreadyIngested(NaiveDate),
    Backfilled(BackfillReport),
}

/// Ingests the newest date of the feed unless the store already holds it.
pub async fn reconcile<S: Store>(
    store: &S,
    locks: &ZoneLocks,
    rows: &[CsvRow],
) -> Result<ReconcileOutcome, AppError> {
    let date = last_date(rows).ok_or(AppError::EmptyFeed)?;

    if store.any_record_on(date).await? {
        return Ok(ReconcileOutcome::AlreadyIngested(date));
    }

    info!("New data available for {date}");
    let report = backfill_date(store, locks, rows, date).await?;

    Ok(ReconcileOutcome::Backfilled(report))
}

/// Creates the `date` record of every zone that lacks one and has a feed row for it.
pub async fn backfill_date<S: Store>(
    store: &S,
    locks: &ZoneLocks,
    rows: &[CsvRow],
    date: NaiveDate,
) -> Result<BackfillReport, AppError> {
    let zones = store.list_zones().await?;

    let tasks: Vec<_> = zones
        .iter()
        .map(|zone| backfill_zone(store, locks, rows, zone, date))
        .collect();
    let steps = join_all(tasks).await;

    let mut report = BackfillReport::new(date);
    for (zone, step) in zones.into_iter().zip(steps) {
        match step {
            Ok(ZoneStep::Created(stored)) => {
                debug!("Created record {} for {}", stored.id, zone.name);
                report.created.push(zone.code);
            }
            Ok(ZoneStep::AlreadyPresent) => report.present.push(zone.code),
            Ok(ZoneStep::MissingRow) => {
                warn!("No feed row for {} on {date}", zone.name);
                report.missing.push(zone.code);
            }
            Err(e) => {
                error!("Failed to update {} on {date}: {e}", zone.name);
                report.failed.push(ZoneFailure {
                    code: zone.code,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

async fn backfill_zone<S: Store>(
    store: &S,
    locks: &ZoneLocks,
    rows: &[CsvRow],
    summary: &ZoneSummary,
    date: NaiveDate,
) -> Result<ZoneStep, AppError> {
    let _guard = locks.lock(&summary.code).await;

    if store.zone_record_on(&summary.code, date).await?.is_some() {
        return Ok(ZoneStep::AlreadyPresent);
    }

    let Some(row) = find_row(rows, &summary.name, date) else {
        return Ok(ZoneStep::MissingRow);
    };

    let zone = store
        .find_zone(&summary.code)
        .await?
        .ok_or_else(|| AppError::ZoneNotFound(summary.code.clone()))?;

    let stored = derive_and_append(store, &zone, row.cumulative, date).await?;
    Ok(ZoneStep::Created(stored))
}

/// Derives and stores one record from a zone's cumulative count, for `POST /datodiario`.
pub async fn append_record<S: Store>(
    store: &S,
    locks: &ZoneLocks,
    code: &str,
    cumulative: i64,
    date: NaiveDate,
) -> Result<StoredRecord, AppError> {
    let _guard = locks.lock(code).await;

    let zone = store
        .find_zone(code)
        .await?
        .ok_or_else(|| AppError::ZoneNotFound(code.to_string()))?;

    if store.zone_record_on(code, date).await?.is_some() {
        return Err(duplicate_date(code, date));
    }

    derive_and_append(store, &zone, cumulative, date).await
}

/// Caller holds the zone's lock.
async fn derive_and_append<S: Store>(
    store: &S,
    zone: &Zone,
    cumulative: i64,
    date: NaiveDate,
) -> Result<StoredRecord, AppError> {
    let prior: Vec<_> = store
        .records_by_ids(&zone.records)
        .await?
        .into_iter()
        .map(|stored| stored.record)
        .collect();

    let record = derive_record(cumulative, &prior, zone.summary.population, date)?;
    let stored = store.insert_record(&record).await?;
    store.attach_record(&zone.summary.code, &stored).await?;

    Ok(stored)
}

//! # Feed Poller
//!
//! Background task pulling the published feed on a fixed interval.
//!
//! ## Tick
//! 1. GET the feed, which is served in ISO-8859-1
//! 2. Decode it to UTF-8 and keep a copy in `datos_descargados.csv` for inspection
//! 3. Parse it and hand the rows to [`reconcile`]
//!
//! A failed tick is logged and forgotten. The next tick retries from scratch, and any zone
//! that missed its record is still missing it then.
use std::sync::Arc;

use process::{CsvRow, parse_rows, utils::decode_latin1};
use tokio::{
    fs,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::AppError,
    reconcile::{ReconcileOutcome, reconcile},
    state::AppState,
    store::Store,
};

/// Downloads the feed, stores the decoded snapshot and parses it.
pub async fn fetch_feed<S: Store>(state: &AppState<S>, url: &str) -> Result<Vec<CsvRow>, AppError> {
    let response = state.client.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;

    let text = decode_latin1(&bytes);

    fs::create_dir_all(&state.config.csv_dir).await?;
    fs::write(state.config.snapshot_csv(), &text).await?;

    Ok(parse_rows(text.as_bytes(), &state.config.layout)?)
}

/// One poller tick, independent of the timer.
pub async fn poll_once<S: Store>(
    state: &AppState<S>,
    url: &str,
) -> Result<ReconcileOutcome, AppError> {
    let rows = fetch_feed(state, url).await?;

    reconcile(&state.store, &state.locks, &rows).await
}

/// Starts the poller, or returns `None` when no feed is configured.
pub fn spawn_poller<S: Store>(state: Arc<AppState<S>>) -> Option<JoinHandle<()>> {
    let Some(url) = state.config.csv_source.clone() else {
        warn!("No feed configured, poller not started");
        return None;
    };

    let period = state.config.poll_interval;
    info!("Polling {url} every {}s", period.as_secs());

    Some(tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match poll_once(&state, &url).await {
                Ok(ReconcileOutcome::AlreadyIngested(date)) => {
                    debug!("Feed already ingested up to {date}");
                }
                Ok(ReconcileOutcome::Backfilled(report)) => {
                    info!(
                        "Ingested {}: {} created, {} present, {} without data, {} failed",
                        report.date,
                        report.created.len(),
                        report.present.len(),
                        report.missing.len(),
                        report.failed.len()
                    );
                }
                Err(e) => error!("Feed poll failed: {e}"),
            }
        }
    }))
}

//! Poller ticks against a mock feed server.

use std::fs;

use chrono::NaiveDate;
use incidence::{
    config::Config,
    error::AppError,
    models::ZoneSummary,
    poller::poll_once,
    reconcile::ReconcileOutcome,
    state::AppState,
    store::{MemoryStore, Store},
};
use process::DailyRecord;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const FEED: &str = "\
Código;Fecha;Código ZBS;Zona Básica;Casos;Casos acumulados
1;01/10/2020 0:00;101;Pamplona;10;10
2;01/10/2020 0:00;102;Tudela;10;10
3;02/10/2020 0:00;101;Pamplona;5;15
4;02/10/2020 0:00;102;Tudela;2;12
";

fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u32 as u8).collect()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 10, d).unwrap()
}

async fn seeded_state(dir: &TempDir) -> std::sync::Arc<AppState<MemoryStore>> {
    let config = Config {
        csv_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let state = AppState::new(config, MemoryStore::new()).unwrap();

    for (name, code) in [("Pamplona", "101"), ("Tudela", "102")] {
        let first_day = DailyRecord {
            new_cases: 10,
            cumulative: 10,
            ia7: 100.0,
            ia14: 100.0,
            date: date(1),
        };
        let stored = state.store.insert_records(&[first_day]).await.unwrap();
        let zone = ZoneSummary {
            name: name.to_string(),
            code: code.to_string(),
            population: 10_000,
        };
        state.store.create_zone(zone, &stored).await.unwrap();
    }

    state
}

async fn feed_server(status: u16, body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datos.csv"))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_tick_ingests_new_date() {
    let dir = tempfile::tempdir().unwrap();
    let state = seeded_state(&dir).await;
    let server = feed_server(200, latin1(FEED)).await;
    let url = format!("{}/datos.csv", server.uri());

    let outcome = poll_once(&state, &url).await.unwrap();

    let ReconcileOutcome::Backfilled(report) = outcome else {
        panic!("expected new data");
    };
    assert_eq!(report.date, date(2));
    assert_eq!(report.created, vec!["101", "102"]);

    let tudela = state.store.find_zone("102").await.unwrap().unwrap();
    let records = state.store.records_by_ids(&tudela.records).await.unwrap();
    assert_eq!(records[1].record.new_cases, 2);
    assert_eq!(records[1].record.ia14, 120.0);

    let snapshot = fs::read_to_string(dir.path().join("datos_descargados.csv")).unwrap();
    assert_eq!(snapshot, FEED);
}

#[tokio::test]
async fn test_second_tick_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let state = seeded_state(&dir).await;
    let server = feed_server(200, latin1(FEED)).await;
    let url = format!("{}/datos.csv", server.uri());

    poll_once(&state, &url).await.unwrap();
    let outcome = poll_once(&state, &url).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::AlreadyIngested(date(2)));
    assert_eq!(state.store.all_records().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_failed_fetch_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let state = seeded_state(&dir).await;
    let server = feed_server(503, Vec::new()).await;
    let url = format!("{}/datos.csv", server.uri());

    let result = poll_once(&state, &url).await;

    assert!(matches!(result, Err(AppError::Fetch(_))));
    assert_eq!(state.store.all_records().await.unwrap().len(), 2);
    assert!(!dir.path().join("datos_descargados.csv").exists());
}

#[tokio::test]
async fn test_empty_feed_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = seeded_state(&dir).await;
    let header_only = FEED.lines().next().unwrap().to_string();
    let server = feed_server(200, latin1(&header_only)).await;
    let url = format!("{}/datos.csv", server.uri());

    assert!(matches!(
        poll_once(&state, &url).await,
        Err(AppError::EmptyFeed)
    ));
}

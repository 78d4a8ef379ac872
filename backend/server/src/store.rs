//! # Store
//!
//! Two collections linked by id: daily records, and zones owning an ordered list of record ids.
//!
//! Creating a record and attaching it to its zone are separate writes. A failure between
//! them leaves an orphan record that no zone query returns. A zone holds at most one record
//! per date: `attach_record` refuses a second one.
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
};

use chrono::{NaiveDate, Utc};
use process::DailyRecord;
use tokio::sync::RwLock;

use crate::{
    error::AppError,
    models::{RecordId, StoredRecord, Zone, ZoneSummary, sort_records},
};

pub trait Store: Send + Sync + 'static {
    fn insert_record(
        &self,
        record: &DailyRecord,
    ) -> impl Future<Output = Result<StoredRecord, AppError>> + Send;

    fn insert_records(
        &self,
        records: &[DailyRecord],
    ) -> impl Future<Output = Result<Vec<StoredRecord>, AppError>> + Send;

    /// Every record of every zone, ascending by date.
    fn all_records(&self) -> impl Future<Output = Result<Vec<StoredRecord>, AppError>> + Send;

    /// Ascending by date. Unknown ids are skipped.
    fn records_by_ids(
        &self,
        ids: &[RecordId],
    ) -> impl Future<Output = Result<Vec<StoredRecord>, AppError>> + Send;

    /// Whether any zone has a record on `date`.
    fn any_record_on(&self, date: NaiveDate) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Fails with `Conflict` when the code is taken.
    fn create_zone(
        &self,
        zone: ZoneSummary,
        records: &[StoredRecord],
    ) -> impl Future<Output = Result<Zone, AppError>> + Send;

    fn find_zone(&self, code: &str) -> impl Future<Output = Result<Option<Zone>, AppError>> + Send;

    /// Ascending by name.
    fn list_zones(&self) -> impl Future<Output = Result<Vec<ZoneSummary>, AppError>> + Send;

    fn zone_record_on(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Option<RecordId>, AppError>> + Send;

    /// Appends `record` to the zone. Fails with `Conflict` when the zone already has its date.
    fn attach_record(
        &self,
        code: &str,
        record: &StoredRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

pub(crate) fn validate(record: &DailyRecord) -> Result<(), AppError> {
    record
        .validate()
        .map_err(|e| AppError::Persistence(e.to_string()))
}

pub(crate) fn duplicate_date(code: &str, date: NaiveDate) -> AppError {
    AppError::Conflict(format!("La zona {code} ya tiene un dato para {date}"))
}

pub(crate) fn duplicate_zone(code: &str) -> AppError {
    AppError::Conflict(format!("La zona {code} ya existe"))
}

#[derive(Default)]
struct Collections {
    next_id: RecordId,
    records: HashMap<RecordId, StoredRecord>,
    zones: BTreeMap<String, Zone>,
    zone_dates: HashMap<String, HashMap<NaiveDate, RecordId>>,
}

impl Collections {
    fn insert(&mut self, record: &DailyRecord) -> Result<StoredRecord, AppError> {
        validate(record)?;

        self.next_id += 1;
        let stored = StoredRecord {
            id: self.next_id,
            record: record.clone(),
            created_at: Utc::now(),
        };
        self.records.insert(stored.id, stored.clone());

        Ok(stored)
    }
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn insert_record(&self, record: &DailyRecord) -> Result<StoredRecord, AppError> {
        self.inner.write().await.insert(record)
    }

    async fn insert_records(&self, records: &[DailyRecord]) -> Result<Vec<StoredRecord>, AppError> {
        for record in records {
            validate(record)?;
        }

        let mut inner = self.inner.write().await;
        records.iter().map(|record| inner.insert(record)).collect()
    }

    async fn all_records(&self) -> Result<Vec<StoredRecord>, AppError> {
        let mut records: Vec<StoredRecord> =
            self.inner.read().await.records.values().cloned().collect();
        sort_records(&mut records);

        Ok(records)
    }

    async fn records_by_ids(&self, ids: &[RecordId]) -> Result<Vec<StoredRecord>, AppError> {
        let inner = self.inner.read().await;
        let mut records: Vec<StoredRecord> = ids
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect();
        sort_records(&mut records);

        Ok(records)
    }

    async fn any_record_on(&self, date: NaiveDate) -> Result<bool, AppError> {
        let inner = self.inner.read().await;

        Ok(inner.records.values().any(|stored| stored.record.date == date))
    }

    async fn create_zone(
        &self,
        zone: ZoneSummary,
        records: &[StoredRecord],
    ) -> Result<Zone, AppError> {
        let mut inner = self.inner.write().await;
        if inner.zones.contains_key(&zone.code) {
            return Err(duplicate_zone(&zone.code));
        }

        let dates = records
            .iter()
            .map(|stored| (stored.record.date, stored.id))
            .collect();
        inner.zone_dates.insert(zone.code.clone(), dates);

        let created = Zone {
            summary: zone,
            records: records.iter().map(|stored| stored.id).collect(),
            created_at: Utc::now(),
        };
        inner
            .zones
            .insert(created.summary.code.clone(), created.clone());

        Ok(created)
    }

    async fn find_zone(&self, code: &str) -> Result<Option<Zone>, AppError> {
        Ok(self.inner.read().await.zones.get(code).cloned())
    }

    async fn list_zones(&self) -> Result<Vec<ZoneSummary>, AppError> {
        let mut zones: Vec<ZoneSummary> = self
            .inner
            .read()
            .await
            .zones
            .values()
            .map(|zone| zone.summary.clone())
            .collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(zones)
    }

    async fn zone_record_on(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> Result<Option<RecordId>, AppError> {
        let inner = self.inner.read().await;

        Ok(inner
            .zone_dates
            .get(code)
            .and_then(|dates| dates.get(&date))
            .copied())
    }

    async fn attach_record(&self, code: &str, record: &StoredRecord) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let Collections {
            zones, zone_dates, ..
        } = &mut *inner;

        let zone = zones
            .get_mut(code)
            .ok_or_else(|| AppError::ZoneNotFound(code.to_string()))?;
        let dates = zone_dates.entry(code.to_string()).or_default();
        if dates.contains_key(&record.record.date) {
            return Err(duplicate_date(code, record.record.date));
        }

        dates.insert(record.record.date, record.id);
        zone.records.push(record.id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(day: u32, cumulative: i64) -> DailyRecord {
        DailyRecord {
            new_cases: cumulative,
            cumulative,
            ia7: 0.0,
            ia14: 0.0,
            date: NaiveDate::from_ymd_opt(2020, 10, day).unwrap(),
        }
    }

    fn zone(name: &str, code: &str) -> ZoneSummary {
        ZoneSummary {
            name: name.to_string(),
            code: code.to_string(),
            population: 1_000,
        }
    }

    #[tokio::test]
    async fn test_zone_owns_records() {
        let store = MemoryStore::new();
        let stored = store
            .insert_records(&[record(2, 2), record(1, 1)])
            .await
            .unwrap();
        store.create_zone(zone("Tudela", "102"), &stored).await.unwrap();

        let zone = store.find_zone("102").await.unwrap().unwrap();
        let records = store.records_by_ids(&zone.records).await.unwrap();

        assert_eq!(records[0].record.date.to_string(), "2020-10-01");
        assert_eq!(records[1].record.date.to_string(), "2020-10-02");
        assert_eq!(
            store.zone_record_on("102", records[0].record.date).await.unwrap(),
            Some(records[0].id)
        );
    }

    #[tokio::test]
    async fn test_duplicate_zone_code() {
        let store = MemoryStore::new();
        store.create_zone(zone("A", "1"), &[]).await.unwrap();

        assert!(matches!(
            store.create_zone(zone("B", "1"), &[]).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_refuses_second_record_for_date() {
        let store = MemoryStore::new();
        store.create_zone(zone("A", "1"), &[]).await.unwrap();

        let first = store.insert_record(&record(1, 1)).await.unwrap();
        let second = store.insert_record(&record(1, 2)).await.unwrap();
        store.attach_record("1", &first).await.unwrap();

        assert!(matches!(
            store.attach_record("1", &second).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(store.find_zone("1").await.unwrap().unwrap().records, vec![first.id]);
    }

    #[tokio::test]
    async fn test_rejects_negative_record() {
        let store = MemoryStore::new();
        let mut negative = record(1, 5);
        negative.new_cases = -3;

        assert!(matches!(
            store.insert_record(&negative).await,
            Err(AppError::Persistence(_))
        ));
        assert!(!store.any_record_on(negative.date).await.unwrap());
    }

    #[tokio::test]
    async fn test_zones_sorted_by_name() {
        let store = MemoryStore::new();
        store.create_zone(zone("Tudela", "2"), &[]).await.unwrap();
        store.create_zone(zone("Estella", "3"), &[]).await.unwrap();
        store.create_zone(zone("Pamplona", "1"), &[]).await.unwrap();

        let names: Vec<String> = store
            .list_zones()
            .await
            .unwrap()
            .into_iter()
            .map(|zone| zone.name)
            .collect();

        assert_eq!(names, vec!["Estella", "Pamplona", "Tudela"]);
    }
}

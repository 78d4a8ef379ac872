//! # Redis
//!
//! Document store behind the zones and their daily records.
//!
//! ## Requirements
//!
//! - Tens of zones, a few hundred records each
//! - Lookups by zone code and by (zone, date)
//! - A global "does any record exist for this date" check for the feed poller
//!
//! ## Implementation
//!
//! Keys live under a configurable prefix `p`:
//! - `p:record:next_id`: counter handing out record ids
//! - `p:records`: hash, record id to record JSON
//! - `p:record_dates`: set of canonical dates holding at least one record
//! - `p:zones`: hash, zone code to zone metadata JSON
//! - `p:zone:<code>:records`: list of the zone's record ids in append order
//! - `p:zone:<code>:dates`: hash, canonical date to record id, written with `HSETNX` so a
//!   zone never gets two records for one date
//!
//! A record joins its zone through [`ATTACH_RECORD`], so the date claim and the list entry
//! are written together or not at all.
use chrono::{DateTime, NaiveDate, Utc};
use process::{DailyRecord, utils::canonical_date};
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::{RecordId, StoredRecord, Zone, ZoneSummary, sort_records},
    store::{Store, duplicate_date, duplicate_zone, validate},
};

/// KEYS: zone dates hash, zone records list. ARGV: canonical date, record id.
///
/// Returns 0 when the date is already claimed. The push runs before the claim so a failed
/// push leaves the date free.
const ATTACH_RECORD: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    return 0
end
redis.call('RPUSH', KEYS[2], ARGV[2])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
";

#[derive(Serialize, Deserialize)]
struct ZoneDocument {
    #[serde(flatten)]
    summary: ZoneSummary,

    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, AppError> {
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);

        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager_with_config(config).await?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    fn zone_key(&self, code: &str, suffix: &str) -> String {
        format!("{}:zone:{code}:{suffix}", self.prefix)
    }

    fn decode_records(documents: Vec<String>) -> Result<Vec<StoredRecord>, AppError> {
        let mut records = documents
            .iter()
            .map(|document| serde_json::from_str(document))
            .collect::<Result<Vec<StoredRecord>, _>>()?;
        sort_records(&mut records);

        Ok(records)
    }
}

impl Store for RedisStore {
    async fn insert_record(&self, record: &DailyRecord) -> Result<StoredRecord, AppError> {
        let mut stored = self.insert_records(std::slice::from_ref(record)).await?;

        stored
            .pop()
            .ok_or_else(|| AppError::Persistence("record was not stored".to_string()))
    }

    async fn insert_records(&self, records: &[DailyRecord]) -> Result<Vec<StoredRecord>, AppError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        for record in records {
            validate(record)?;
        }

        let mut connection = self.connection.clone();
        let count = records.len() as u64;
        let last_id: RecordId = connection
            .incr(self.key("record:next_id"), count)
            .await?;

        let created_at = Utc::now();
        let stored: Vec<StoredRecord> = records
            .iter()
            .zip(last_id + 1 - count..)
            .map(|(record, id)| StoredRecord {
                id,
                record: record.clone(),
                created_at,
            })
            .collect();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for record in &stored {
            pipe.hset(self.key("records"), record.id, serde_json::to_string(record)?)
                .ignore()
                .sadd(self.key("record_dates"), canonical_date(record.record.date))
                .ignore();
        }
        pipe.query_async::<()>(&mut connection).await?;

        Ok(stored)
    }

    async fn all_records(&self) -> Result<Vec<StoredRecord>, AppError> {
        let mut connection = self.connection.clone();
        let documents: Vec<String> = connection.hvals(self.key("records")).await?;

        Self::decode_records(documents)
    }

    async fn records_by_ids(&self, ids: &[RecordId]) -> Result<Vec<StoredRecord>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = self.connection.clone();
        let documents: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.key("records"))
            .arg(ids)
            .query_async(&mut connection)
            .await?;

        Self::decode_records(documents.into_iter().flatten().collect())
    }

    async fn any_record_on(&self, date: NaiveDate) -> Result<bool, AppError> {
        let mut connection = self.connection.clone();

        Ok(connection
            .sismember(self.key("record_dates"), canonical_date(date))
            .await?)
    }

    async fn create_zone(
        &self,
        zone: ZoneSummary,
        records: &[StoredRecord],
    ) -> Result<Zone, AppError> {
        let mut connection = self.connection.clone();
        let document = ZoneDocument {
            summary: zone,
            created_at: Utc::now(),
        };

        let created: bool = connection
            .hset_nx(
                self.key("zones"),
                &document.summary.code,
                serde_json::to_string(&document)?,
            )
            .await?;
        if !created {
            return Err(duplicate_zone(&document.summary.code));
        }

        let code = &document.summary.code;
        let ids: Vec<RecordId> = records.iter().map(|stored| stored.id).collect();

        if !ids.is_empty() {
            let mut pipe = redis::pipe();
            pipe.atomic()
                .rpush(self.zone_key(code, "records"), &ids)
                .ignore();
            for stored in records {
                pipe.hset(
                    self.zone_key(code, "dates"),
                    canonical_date(stored.record.date),
                    stored.id,
                )
                .ignore();
            }
            pipe.query_async::<()>(&mut connection).await?;
        }

        Ok(Zone {
            summary: document.summary,
            records: ids,
            created_at: document.created_at,
        })
    }

    async fn find_zone(&self, code: &str) -> Result<Option<Zone>, AppError> {
        let mut connection = self.connection.clone();

        let document: Option<String> = connection.hget(self.key("zones"), code).await?;
        let Some(document) = document else {
            return Ok(None);
        };
        let document: ZoneDocument = serde_json::from_str(&document)?;

        let records: Vec<RecordId> = connection
            .lrange(self.zone_key(code, "records"), 0, -1)
            .await?;

        Ok(Some(Zone {
            summary: document.summary,
            records,
            created_at: document.created_at,
        }))
    }

    async fn list_zones(&self) -> Result<Vec<ZoneSummary>, AppError> {
        let mut connection = self.connection.clone();
        let documents: Vec<String> = connection.hvals(self.key("zones")).await?;

        let mut zones = documents
            .iter()
            .map(|document| serde_json::from_str::<ZoneDocument>(document).map(|doc| doc.summary))
            .collect::<Result<Vec<_>, _>>()?;
        zones.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(zones)
    }

    async fn zone_record_on(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> Result<Option<RecordId>, AppError> {
        let mut connection = self.connection.clone();

        Ok(connection
            .hget(self.zone_key(code, "dates"), canonical_date(date))
            .await?)
    }

    async fn attach_record(&self, code: &str, record: &StoredRecord) -> Result<(), AppError> {
        let mut connection = self.connection.clone();

        let exists: bool = connection.hexists(self.key("zones"), code).await?;
        if !exists {
            return Err(AppError::ZoneNotFound(code.to_string()));
        }

        let attached: bool = Script::new(ATTACH_RECORD)
            .key(self.zone_key(code, "dates"))
            .key(self.zone_key(code, "records"))
            .arg(canonical_date(record.record.date))
            .arg(record.id)
            .invoke_async(&mut connection)
            .await?;
        if !attached {
            return Err(duplicate_date(code, record.record.date));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store(name: &str) -> Option<RedisStore> {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            eprintln!("skipping {name}: REDIS_URL not set");
            return None;
        };
        let prefix = format!("incidence-test-{name}-{}", std::process::id());

        RedisStore::connect(&redis_url, &prefix).await.ok()
    }

    async fn cleanup(store: &RedisStore, code: &str) {
        let mut connection = store.connection.clone();
        let keys = [
            store.key("record:next_id"),
            store.key("records"),
            store.key("record_dates"),
            store.key("zones"),
            store.zone_key(code, "records"),
            store.zone_key(code, "dates"),
        ];
        connection.del::<_, ()>(&keys).await.unwrap();
    }

    fn record(day: u32) -> DailyRecord {
        DailyRecord {
            new_cases: 1,
            cumulative: 1,
            ia7: 10.0,
            ia14: 10.0,
            date: NaiveDate::from_ymd_opt(2020, 10, day).unwrap(),
        }
    }

    fn summary(code: &str) -> ZoneSummary {
        ZoneSummary {
            name: "Pamplona".to_string(),
            code: code.to_string(),
            population: 10_000,
        }
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a local Redis"]
    async fn test_failed_push_leaves_date_unclaimed() {
        let Some(store) = test_store("attach").await else {
            return;
        };
        store.create_zone(summary("101"), &[]).await.unwrap();
        let stored = store.insert_record(&record(1)).await.unwrap();

        // A non-list value under the records key makes RPUSH fail.
        let mut connection = store.connection.clone();
        connection
            .set::<_, _, ()>(store.zone_key("101", "records"), "broken")
            .await
            .unwrap();

        assert!(store.attach_record("101", &stored).await.is_err());
        assert_eq!(store.zone_record_on("101", stored.record.date).await.unwrap(), None);

        connection
            .del::<_, ()>(store.zone_key("101", "records"))
            .await
            .unwrap();
        store.attach_record("101", &stored).await.unwrap();

        let zone = store.find_zone("101").await.unwrap().unwrap();
        assert_eq!(zone.records, vec![stored.id]);
        assert_eq!(
            store.zone_record_on("101", stored.record.date).await.unwrap(),
            Some(stored.id)
        );

        cleanup(&store, "101").await;
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a local Redis"]
    async fn test_attach_same_date_twice() {
        let Some(store) = test_store("duplicate").await else {
            return;
        };
        store.create_zone(summary("102"), &[]).await.unwrap();
        let first = store.insert_record(&record(2)).await.unwrap();
        let second = store.insert_record(&record(2)).await.unwrap();

        store.attach_record("102", &first).await.unwrap();
        let result = store.attach_record("102", &second).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        let zone = store.find_zone("102").await.unwrap().unwrap();
        assert_eq!(zone.records, vec![first.id]);

        cleanup(&store, "102").await;
    }
}

use chrono::{DateTime, Utc};
use process::DailyRecord;
use serde::{Deserialize, Serialize};

pub type RecordId = u64;

/// A daily record as persisted, with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,

    #[serde(flatten)]
    pub record: DailyRecord,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummary {
    #[serde(rename = "nombre")]
    pub name: String,

    pub code: String,

    #[serde(rename = "habitantes")]
    pub population: u64,
}

/// A health zone and the ids of the records it owns, in append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(flatten)]
    pub summary: ZoneSummary,

    #[serde(rename = "datosDiarios")]
    pub records: Vec<RecordId>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Ascending by date, insertion order breaking ties.
pub fn sort_records(records: &mut [StoredRecord]) {
    records.sort_by(|a, b| a.record.date.cmp(&b.record.date).then(a.id.cmp(&b.id)));
}

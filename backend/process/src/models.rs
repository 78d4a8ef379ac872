use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{error::ProcessError, utils::midnight};

/// One zone's figures for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// New cases reported for this date.
    #[serde(rename = "infectadosHoy")]
    pub new_cases: i64,

    /// Running total up to and including this date.
    #[serde(rename = "acumulados")]
    pub cumulative: i64,

    /// Cases over the trailing 7 days per 100,000 inhabitants.
    pub ia7: f64,

    /// Cases over the trailing 14 days per 100,000 inhabitants.
    pub ia14: f64,

    #[serde(rename = "fecha", with = "midnight")]
    pub date: NaiveDate,
}

impl DailyRecord {
    /// Rejects the values a stored record may never hold.
    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.new_cases < 0 {
            return Err(ProcessError::InvalidRecord("new cases cannot be negative"));
        }

        if self.cumulative < 0 {
            return Err(ProcessError::InvalidRecord("cumulative cases cannot be negative"));
        }

        if self.ia7 < 0.0 || self.ia14 < 0.0 {
            return Err(ProcessError::InvalidRecord("incidence cannot be negative"));
        }

        Ok(())
    }
}

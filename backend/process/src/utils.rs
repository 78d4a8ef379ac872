use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ProcessError;

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d 00:00:00";

/// Parses the feed's `DD/MM/YYYY hh:mm` date cell, ignoring everything after the first space.
pub fn parse_source_date(input: &str) -> Result<NaiveDate, ProcessError> {
    let day = input.trim().split(' ').next().unwrap_or_default();

    NaiveDate::parse_from_str(day, "%d/%m/%Y").map_err(|_| ProcessError::InvalidDate(input.to_string()))
}

pub fn canonical_date(date: NaiveDate) -> String {
    date.format(CANONICAL_FORMAT).to_string()
}

/// Accepts the canonical `YYYY-MM-DD 00:00:00`, a bare `YYYY-MM-DD` or the feed's `DD/MM/YYYY ...`.
pub fn parse_request_date(input: &str) -> Result<NaiveDate, ProcessError> {
    let trimmed = input.trim();

    if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(datetime.date());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }

    parse_source_date(trimmed)
}

/// ISO-8859-1 maps every byte to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| byte as char).collect()
}

/// Serde adapter writing dates in the canonical midnight form.
pub mod midnight {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{canonical_date, parse_request_date};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&canonical_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;

        parse_request_date(&raw).map_err(D::Error::custom)
    }
}

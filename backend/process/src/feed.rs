//! Semicolon-delimited case feed published per basic health zone.
//!
//! The feed has one row per zone and day, in ascending date order, with at least a date
//! column (`DD/MM/YYYY hh:mm`), a zone name column and a cumulative case count column.
use std::io::Read;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::{
    error::ProcessError, incidence::derive_record, models::DailyRecord, utils::parse_source_date,
};

pub const DATE_COLUMN: &str = "Fecha";
pub const ZONE_COLUMN: &str = "Zona Básica";
pub const CUMULATIVE_COLUMN: &str = "Casos acumulados";

/// Header names of the columns the importer reads.
#[derive(Debug, Clone)]
pub struct CsvLayout {
    pub date: String,
    pub zone: String,
    pub cumulative: String,
}

impl Default for CsvLayout {
    fn default() -> Self {
        Self {
            date: DATE_COLUMN.to_string(),
            zone: ZONE_COLUMN.to_string(),
            cumulative: CUMULATIVE_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub date: NaiveDate,
    pub zone: String,
    pub cumulative: i64,
}

struct Columns {
    date: usize,
    zone: usize,
    cumulative: usize,
}

impl Columns {
    fn locate(headers: &StringRecord, layout: &CsvLayout) -> Result<Self, ProcessError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim_start_matches('\u{feff}') == name)
                .ok_or_else(|| ProcessError::MissingColumn(name.to_string()))
        };

        Ok(Self {
            date: find(&layout.date)?,
            zone: find(&layout.zone)?,
            cumulative: find(&layout.cumulative)?,
        })
    }
}

pub fn parse_rows<R: Read>(reader: R, layout: &CsvLayout) -> Result<Vec<CsvRow>, ProcessError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let columns = Columns::locate(reader.headers()?, layout)?;
    let mut rows = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let cell = |column: usize| record.get(column).unwrap_or_default();

        rows.push(CsvRow {
            date: parse_source_date(cell(columns.date))?,
            zone: cell(columns.zone).to_string(),
            cumulative: parse_count(cell(columns.cumulative), index + 1)?,
        });
    }

    debug!("Parsed {} feed rows", rows.len());
    Ok(rows)
}

/// Cumulative counts are non-negative; an empty cell reads as zero.
fn parse_count(value: &str, row: usize) -> Result<i64, ProcessError> {
    if value.is_empty() {
        return Ok(0);
    }

    value
        .parse::<i64>()
        .ok()
        .filter(|count| *count >= 0)
        .ok_or_else(|| ProcessError::InvalidCount {
            row,
            value: value.to_string(),
        })
}

/// Rebuilds a zone's full history from the feed, clamping cumulative regressions.
pub fn import_history(
    rows: &[CsvRow],
    zone_name: &str,
    population: u64,
) -> Result<Vec<DailyRecord>, ProcessError> {
    let mut history: Vec<DailyRecord> = Vec::new();

    for row in rows.iter().filter(|row| row.zone == zone_name) {
        let previous = history.last().map_or(0, |record| record.cumulative);
        let cumulative = row.cumulative.max(previous);

        if cumulative != row.cumulative {
            debug!(
                "Clamped {zone_name} on {}: {} -> {cumulative}",
                row.date, row.cumulative
            );
        }

        let record = derive_record(cumulative, &history, population, row.date)?;
        history.push(record);
    }

    Ok(history)
}

/// Date of the final row, taken as the newest date in the feed.
pub fn last_date(rows: &[CsvRow]) -> Option<NaiveDate> {
    rows.last().map(|row| row.date)
}

pub fn find_row<'a>(rows: &'a [CsvRow], zone_name: &str, date: NaiveDate) -> Option<&'a CsvRow> {
    rows.iter().find(|row| row.date == date && row.zone == zone_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "\
Código;Fecha;Código ZBS;Zona Básica;Casos;Casos acumulados
1;01/10/2020 0:00;101;Pamplona;3;3
2;01/10/2020 0:00;102;Tudela;1;1
3;02/10/2020 0:00;101;Pamplona;2;5
4;02/10/2020 0:00;102;Tudela;0;1
5;03/10/2020 0:00;101;Pamplona;0;4
6;03/10/2020 0:00;102;Tudela;4;5
";

    fn rows() -> Vec<CsvRow> {
        parse_rows(FEED.as_bytes(), &CsvLayout::default()).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 10, d).unwrap()
    }

    #[test]
    fn test_parse_rows() {
        let rows = rows();

        assert_eq!(rows.len(), 6);
        assert_eq!(
            rows[2],
            CsvRow {
                date: date(2),
                zone: "Pamplona".to_string(),
                cumulative: 5,
            }
        );
    }

    #[test]
    fn test_missing_column() {
        let result = parse_rows("Fecha;Zona\n01/10/2020;X\n".as_bytes(), &CsvLayout::default());

        assert!(matches!(result, Err(ProcessError::MissingColumn(name)) if name == ZONE_COLUMN));
    }

    #[test]
    fn test_bad_count() {
        let feed = "Fecha;Zona Básica;Casos acumulados\n01/10/2020 0:00;X;many\n";
        let result = parse_rows(feed.as_bytes(), &CsvLayout::default());

        assert!(matches!(result, Err(ProcessError::InvalidCount { row: 1, .. })));
    }

    #[test]
    fn test_negative_count() {
        let feed = "\
Fecha;Zona Básica;Casos acumulados
01/10/2020 0:00;X;4
02/10/2020 0:00;X;-9223372036854775808
";
        let result = parse_rows(feed.as_bytes(), &CsvLayout::default());

        assert!(matches!(
            result,
            Err(ProcessError::InvalidCount { row: 2, value }) if value == "-9223372036854775808"
        ));
    }

    #[test]
    fn test_empty_count_is_zero() {
        let feed = "Fecha;Zona Básica;Casos acumulados\n01/10/2020 0:00;X;\n";
        let rows = parse_rows(feed.as_bytes(), &CsvLayout::default()).unwrap();

        assert_eq!(rows[0].cumulative, 0);
    }

    #[test]
    fn test_custom_layout() {
        let feed = "day;area;total\n01/10/2020 0:00;North;7\n";
        let layout = CsvLayout {
            date: "day".to_string(),
            zone: "area".to_string(),
            cumulative: "total".to_string(),
        };
        let rows = parse_rows(feed.as_bytes(), &layout).unwrap();

        assert_eq!(rows[0].zone, "North");
        assert_eq!(rows[0].cumulative, 7);
    }

    #[test]
    fn test_import_filters_zone() {
        let history = import_history(&rows(), "Tudela", 10_000).unwrap();

        let new_cases: Vec<i64> = history.iter().map(|r| r.new_cases).collect();
        assert_eq!(new_cases, vec![1, 0, 4]);
        assert_eq!(history[2].ia7, 50.0);
        assert_eq!(history[2].date, date(3));
    }

    #[test]
    fn test_import_clamps_regression() {
        let history = import_history(&rows(), "Pamplona", 10_000).unwrap();

        assert_eq!(history[1].cumulative, 5);
        assert_eq!(history[2].cumulative, 5);
        assert_eq!(history[2].new_cases, 0);
    }

    #[test]
    fn test_import_clamp_from_hundred() {
        let rows = vec![
            CsvRow {
                date: date(1),
                zone: "Z".to_string(),
                cumulative: 100,
            },
            CsvRow {
                date: date(2),
                zone: "Z".to_string(),
                cumulative: 90,
            },
        ];
        let history = import_history(&rows, "Z", 1_000).unwrap();

        assert_eq!(history[1].cumulative, 100);
        assert_eq!(history[1].new_cases, 0);
    }

    #[test]
    fn test_import_unknown_zone() {
        assert!(import_history(&rows(), "Estella", 10_000).unwrap().is_empty());
    }

    #[test]
    fn test_last_date_and_find() {
        let rows = rows();

        assert_eq!(last_date(&rows), Some(date(3)));
        assert_eq!(find_row(&rows, "Tudela", date(2)).unwrap().cumulative, 1);
        assert!(find_row(&rows, "Tudela", date(9)).is_none());
        assert_eq!(last_date(&[]), None);
    }
}

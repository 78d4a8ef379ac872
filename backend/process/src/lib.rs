//! # Incidence Processing
//!
//! Pure logic behind the daily figures of each health zone.
//!
//! ## Derived Figures
//!
//! - **New cases**: today's cumulative count minus yesterday's, or the cumulative count itself
//!   for a zone's first day.
//! - **IA7 / IA14**: new cases over the trailing 7 or 14 days (today included) per 100,000
//!   inhabitants. Rates are kept at full `f64` precision, no rounding.
//!
//! ## Feed Import
//!
//! The published feed is a semicolon-delimited CSV in ISO-8859-1 with one row per zone and
//! day. Importing a zone replays its rows in file order. Cumulative counts occasionally go
//! backwards in the feed, so the import clamps each row to at least the previous day's count.
//! Single records derived outside an import are never clamped.
pub mod error;
pub mod feed;
pub mod incidence;
pub mod models;
pub mod utils;

pub use error::ProcessError;
pub use feed::{CsvLayout, CsvRow, find_row, import_history, last_date, parse_rows};
pub use incidence::{derive_record, window_sum};
pub use models::DailyRecord;

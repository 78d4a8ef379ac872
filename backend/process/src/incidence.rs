use chrono::NaiveDate;

use crate::{error::ProcessError, models::DailyRecord};

pub const PER_INHABITANTS: f64 = 100_000.0;

/// Days before today that complete a 7-day window.
pub const WEEK_PRIOR_DAYS: usize = 6;

/// Days before today that complete a 14-day window.
pub const FORTNIGHT_PRIOR_DAYS: usize = 13;

/// Sums new cases over the last `window` records of `prior`, truncating at the start of history.
///
/// Saturates at the bounds of `i64`.
pub fn window_sum(prior: &[DailyRecord], window: usize) -> i64 {
    prior[prior.len().saturating_sub(window)..]
        .iter()
        .fold(0, |sum: i64, record| sum.saturating_add(record.new_cases))
}

/// Builds the record for `date` from today's cumulative count and the zone's history.
///
/// A cumulative count lower than yesterday's yields negative new cases; callers importing
/// bulk history clamp before calling.
pub fn derive_record(
    cumulative_today: i64,
    prior: &[DailyRecord],
    population: u64,
    date: NaiveDate,
) -> Result<DailyRecord, ProcessError> {
    if population == 0 {
        return Err(ProcessError::InvalidPopulation);
    }
    if cumulative_today < 0 {
        return Err(ProcessError::NegativeCount(cumulative_today));
    }

    let new_cases = match prior.last() {
        Some(yesterday) => cumulative_today.checked_sub(yesterday.cumulative),
        None => Some(cumulative_today),
    }
    .ok_or(ProcessError::CountOverflow)?;

    let rolling = |window| {
        window_sum(prior, window)
            .checked_add(new_cases)
            .ok_or(ProcessError::CountOverflow)
    };
    let rolling_7 = rolling(WEEK_PRIOR_DAYS)?;
    let rolling_14 = rolling(FORTNIGHT_PRIOR_DAYS)?;

    Ok(DailyRecord {
        new_cases,
        cumulative: cumulative_today,
        ia7: rate(rolling_7, population),
        ia14: rate(rolling_14, population),
        date,
    })
}

fn rate(cases: i64, population: u64) -> f64 {
    cases as f64 * PER_INHABITANTS / population as f64
}

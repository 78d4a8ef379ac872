use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Population must be greater than zero")]
    InvalidPopulation,

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid case count in row {row}: {value}")]
    InvalidCount { row: usize, value: String },

    #[error("Case count must not be negative: {0}")]
    NegativeCount(i64),

    #[error("Case count out of range")]
    CountOverflow,

    #[error("Missing CSV column: {0}")]
    MissingColumn(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(&'static str),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

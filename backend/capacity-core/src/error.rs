// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

// --- Core Error Handling ---

#[derive(Error, Debug)]
pub enum CapacityError {
    #[error("Month must have the form YYYY-MM: '{0}'")]
    InvalidMonthFormat(String),

    #[error("Invalid ISO week: year={year}, week={week}")]
    InvalidWeek { year: i32, week: u32 },

    #[error("No data found: {0}")]
    NotFound(String),

    #[error("Required columns not recognized in {table} table: {}", missing.join(", "))]
    MissingColumns {
        table: String,
        missing: Vec<String>,
    },

    #[error("Source file for {table} table not found: {path:?}")]
    SourceMissing { table: String, path: PathBuf },

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("CSV processing error")]
    Csv(#[from] csv::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("Lock acquisition failed: {0}")]
    LockPoisoned(String),

    #[error("Unknown source table: '{0}'")]
    UnknownTable(String),
}

pub(crate) fn io_context<E: Into<std::io::Error>, S: Into<String>>(
    source: E,
    context: S,
) -> CapacityError {
    CapacityError::Io {
        source: source.into(),
        context: context.into(),
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Column '{column}' not found in {file}")]
    MissingColumn { file: String, column: String },

    #[error("Invalid quarter: '{value}'")]
    InvalidQuarter { value: String },

    #[error("Invalid date: '{value}'")]
    InvalidDate { value: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BuildResult<T> = Result<T, BuildError>;

//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No data found for {symbol}")]
    NoData { symbol: String },

    #[error("Data provider error: {0}")]
    Provider(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

//! RSI Lab Engine — RSI backtesting and parameter optimization
//!
//! Provides:
//! - Rolling RSI over daily or intraday price bars
//! - Long-only RSI mean-reversion simulator with trade ledger and return curves
//! - Trade statistics and curve metrics
//! - Brute-force grid search (sequential, parallel, and cancellable background runs)
//! - Alpha Vantage client for historical prices

pub mod api;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod optimizer;
pub mod statistics;
pub mod types;

// Re-exports for convenience
pub use api::{AlphaVantageClient, FetchRequest, InMemorySource, Interval, PriceSource, Quote};
pub use engine::BacktestEngine;
pub use error::{EngineError, EngineResult};
pub use indicators::{calculate_rsi, calculate_rsi_with, RsiSmoothing, ZERO_LOSS_RS};
pub use optimizer::{
    optimize, optimize_parallel, optimize_with_grid, run_optimization, OptimizeProgress,
    OptimizeRequest, OptimizeSnapshot, OptimizeStatus, ParamGrid, RsiParamSet, ScoredCombination,
};
pub use types::*;

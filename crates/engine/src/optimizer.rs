//! Exhaustive RSI parameter search
//!
//! Runs a full backtest for every (window, entry, exit) combination of a fixed
//! grid and keeps the one with the highest final cumulative strategy return.
//! Ties go to the combination enumerated first. Three drivers share the same
//! evaluation: sequential `optimize`, rayon-backed `optimize_parallel`, and the
//! cancellable background `run_optimization` that publishes progress.

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{debug, info, warn};

use crate::engine::BacktestEngine;
use crate::indicators::{calculate_rsi, RsiSmoothing};
use crate::types::{Bar, BacktestReport, OptimizationResult, StrategyParams};

pub const WINDOWS: [usize; 10] = [10, 12, 14, 16, 18, 20, 22, 24, 26, 28];
pub const ENTRY_THRESHOLDS: [f64; 5] = [25.0, 30.0, 35.0, 40.0, 45.0];
pub const EXIT_THRESHOLDS: [f64; 9] = [55.0, 60.0, 65.0, 70.0, 75.0, 80.0, 85.0, 90.0, 95.0];

const DEFAULT_TOP_N: usize = 5;

// ============================================================================
// Grid
// ============================================================================

/// One point of the search grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiParamSet {
    pub window: usize,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
}

impl RsiParamSet {
    pub fn to_strategy_params(self) -> StrategyParams {
        StrategyParams {
            window: self.window,
            entry_threshold: self.entry_threshold,
            exit_threshold: self.exit_threshold,
            smoothing: RsiSmoothing::Simple,
        }
    }
}

/// Axes of the search. Enumeration order is window, then entry, then exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamGrid {
    pub windows: Vec<usize>,
    pub entry_thresholds: Vec<f64>,
    pub exit_thresholds: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            windows: WINDOWS.to_vec(),
            entry_thresholds: ENTRY_THRESHOLDS.to_vec(),
            exit_thresholds: EXIT_THRESHOLDS.to_vec(),
        }
    }
}

impl ParamGrid {
    /// Cartesian product, skipping any exit threshold at or below its entry.
    pub fn combinations(&self) -> Vec<RsiParamSet> {
        let mut grid = Vec::with_capacity(
            self.windows.len() * self.entry_thresholds.len() * self.exit_thresholds.len(),
        );
        for &window in &self.windows {
            for &entry in &self.entry_thresholds {
                for &exit in &self.exit_thresholds {
                    if exit <= entry {
                        continue;
                    }
                    grid.push(RsiParamSet {
                        window,
                        entry_threshold: entry,
                        exit_threshold: exit,
                    });
                }
            }
        }
        grid
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Final cumulative strategy return for one combination.
///
/// `None` when the window leaves no defined RSI value on these bars, or the
/// combination itself is invalid.
pub fn evaluate(bars: &[Bar], params: &RsiParamSet) -> Option<f64> {
    if bars.len() <= params.window {
        return None;
    }
    let rsi = calculate_rsi(bars, params.window).ok()?;
    let result = BacktestEngine::simulate(
        bars,
        &rsi,
        params.entry_threshold,
        params.exit_threshold,
    )
    .ok()?;
    Some(result.final_strategy_return())
}

fn to_result(params: &RsiParamSet, best_return: f64) -> OptimizationResult {
    OptimizationResult {
        window: Some(params.window),
        entry_threshold: Some(params.entry_threshold),
        exit_threshold: Some(params.exit_threshold),
        best_return,
    }
}

/// Search the default grid
pub fn optimize(bars: &[Bar]) -> OptimizationResult {
    optimize_with_grid(bars, &ParamGrid::default())
}

pub fn optimize_with_grid(bars: &[Bar], grid: &ParamGrid) -> OptimizationResult {
    let mut best = OptimizationResult::not_found();

    for params in grid.combinations() {
        if let Some(final_return) = evaluate(bars, &params) {
            if final_return > best.best_return {
                best = to_result(&params, final_return);
            }
        }
    }

    best
}

/// Search the default grid across the rayon thread pool
pub fn optimize_parallel(bars: &[Bar]) -> OptimizationResult {
    optimize_parallel_with_grid(bars, &ParamGrid::default())
}

/// Same answer as `optimize_with_grid`: among equal returns the lowest
/// enumeration index wins.
pub fn optimize_parallel_with_grid(bars: &[Bar], grid: &ParamGrid) -> OptimizationResult {
    grid.combinations()
        .par_iter()
        .enumerate()
        .filter_map(|(i, params)| evaluate(bars, params).map(|r| (i, *params, r)))
        .reduce_with(|a, b| {
            if b.2 > a.2 || (b.2 == a.2 && b.0 < a.0) {
                b
            } else {
                a
            }
        })
        .map(|(_, params, r)| to_result(&params, r))
        .unwrap_or_else(OptimizationResult::not_found)
}

// ============================================================================
// Background runner
// ============================================================================

/// Request to start an optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub symbol: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Bar interval such as `1d` or `15min` (default `1d`)
    pub interval: Option<String>,
    /// Number of ranked combinations to keep (default 5)
    pub top_n: Option<usize>,
}

/// One evaluated combination, ranked by final return
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub rank: usize,
    pub params: RsiParamSet,
    pub final_return: f64,
    pub buy_hold_return: f64,
    pub total_trades: u32,
    pub win_probability: Decimal,
    pub total_return: Decimal,
}

impl ScoredCombination {
    fn new(params: RsiParamSet, report: &BacktestReport) -> Self {
        Self {
            rank: 0,
            params,
            final_return: report.result.final_strategy_return(),
            buy_hold_return: report.result.final_buy_hold_return(),
            total_trades: report.statistics.total_trades,
            win_probability: report.statistics.win_probability,
            total_return: report.statistics.total_return,
        }
    }
}

/// Optimization run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeStatus {
    Idle,
    FetchingData,
    Running,
    Complete,
    Cancelled,
    Error,
}

/// Shared progress tracker between API handler and background task
pub struct OptimizeProgress {
    pub status: RwLock<OptimizeStatus>,
    pub total_combinations: AtomicU32,
    pub completed: AtomicU32,
    pub cancelled: AtomicBool,
    pub best: RwLock<OptimizationResult>,
    pub results: RwLock<Vec<ScoredCombination>>,
    pub error_message: RwLock<Option<String>>,
    pub symbol: RwLock<Option<String>>,
}

/// Point-in-time copy of `OptimizeProgress`
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeSnapshot {
    pub status: OptimizeStatus,
    pub symbol: Option<String>,
    pub progress_pct: f32,
    pub completed: u32,
    pub total: u32,
    pub best: OptimizationResult,
    pub results: Vec<ScoredCombination>,
    pub error: Option<String>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl OptimizeProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(OptimizeStatus::Idle),
            total_combinations: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            best: RwLock::new(OptimizationResult::not_found()),
            results: RwLock::new(Vec::new()),
            error_message: RwLock::new(None),
            symbol: RwLock::new(None),
        }
    }

    /// Reset for a new optimization run
    pub fn reset(&self, symbol: &str) {
        *write(&self.status) = OptimizeStatus::FetchingData;
        self.clear_run(symbol);
    }

    /// Claim the tracker for a new run unless one is already in flight.
    ///
    /// The check and the move to `FetchingData` happen under one status write
    /// lock, so of two concurrent callers exactly one gets `true`.
    pub fn try_start(&self, symbol: &str) -> bool {
        let mut status = write(&self.status);
        if matches!(*status, OptimizeStatus::FetchingData | OptimizeStatus::Running) {
            return false;
        }
        *status = OptimizeStatus::FetchingData;
        self.clear_run(symbol);
        true
    }

    fn clear_run(&self, symbol: &str) {
        self.total_combinations.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Relaxed);
        *write(&self.best) = OptimizationResult::not_found();
        *write(&self.results) = Vec::new();
        *write(&self.error_message) = None;
        *write(&self.symbol) = Some(symbol.to_string());
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn fail(&self, message: impl Into<String>) {
        *write(&self.error_message) = Some(message.into());
        *write(&self.status) = OptimizeStatus::Error;
    }

    pub fn status(&self) -> OptimizeStatus {
        *read(&self.status)
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total_combinations.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    /// Check if a run is in flight
    pub fn is_running(&self) -> bool {
        matches!(
            self.status(),
            OptimizeStatus::FetchingData | OptimizeStatus::Running
        )
    }

    pub fn snapshot(&self) -> OptimizeSnapshot {
        OptimizeSnapshot {
            status: self.status(),
            symbol: read(&self.symbol).clone(),
            progress_pct: self.progress_pct(),
            completed: self.completed.load(Ordering::Relaxed),
            total: self.total_combinations.load(Ordering::Relaxed),
            best: *read(&self.best),
            results: read(&self.results).clone(),
            error: read(&self.error_message).clone(),
        }
    }
}

impl Default for OptimizeProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the default grid in the background, publishing progress as it goes.
///
/// Cancellation is honoured between combinations; a cancelled run still
/// publishes the best combination seen so far.
pub async fn run_optimization(
    request: OptimizeRequest,
    bars: Vec<Bar>,
    progress: Arc<OptimizeProgress>,
) {
    let grid = ParamGrid::default().combinations();
    let top_n = request.top_n.unwrap_or(DEFAULT_TOP_N);
    let total = grid.len() as u32;

    progress.total_combinations.store(total, Ordering::Relaxed);
    *write(&progress.status) = OptimizeStatus::Running;

    info!(
        symbol = %request.symbol,
        bars = bars.len(),
        combinations = total,
        "Starting parameter optimization"
    );

    let mut best = OptimizationResult::not_found();
    let mut scored: Vec<ScoredCombination> = Vec::with_capacity(grid.len());
    let mut cancelled = false;

    for (i, params) in grid.iter().enumerate() {
        if progress.cancelled.load(Ordering::Relaxed) {
            warn!(completed = i, "Optimization cancelled");
            cancelled = true;
            break;
        }

        if bars.len() > params.window {
            match BacktestEngine::run(&bars, &params.to_strategy_params()) {
                Ok(report) => {
                    let final_return = report.result.final_strategy_return();
                    if final_return > best.best_return {
                        best = to_result(params, final_return);
                        *write(&progress.best) = best;
                    }
                    scored.push(ScoredCombination::new(*params, &report));
                }
                Err(e) => {
                    debug!(window = params.window, error = %e, "Skipping combination");
                }
            }
        }

        progress.completed.store((i + 1) as u32, Ordering::Relaxed);

        // Yield to runtime every 10 iterations
        if i % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    finalize_results(scored, top_n, cancelled, &progress);
}

fn finalize_results(
    mut scored: Vec<ScoredCombination>,
    top_n: usize,
    cancelled: bool,
    progress: &Arc<OptimizeProgress>,
) {
    // Stable sort keeps enumeration order among ties
    scored.sort_by(|a, b| b.final_return.total_cmp(&a.final_return));

    for (i, s) in scored.iter_mut().enumerate() {
        s.rank = i + 1;
    }
    scored.truncate(top_n);

    let best = *read(&progress.best);
    if best.is_found() {
        info!(
            window = ?best.window,
            entry = ?best.entry_threshold,
            exit = ?best.exit_threshold,
            best_return = best.best_return,
            "Best configuration found"
        );
    } else {
        warn!("No parameter combination could be evaluated");
    }

    *write(&progress.results) = scored;
    *write(&progress.status) = if cancelled {
        OptimizeStatus::Cancelled
    } else {
        OptimizeStatus::Complete
    };

    info!("Optimization complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_bars(prices: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bar::from_close(start + Duration::days(i as i64), p))
            .collect()
    }

    fn random_walk(seed: u64, n: usize) -> Vec<Bar> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = 50.0;
        let prices: Vec<f64> = (0..n)
            .map(|_| {
                price *= 1.0 + rng.gen_range(-0.04..0.04);
                price
            })
            .collect();
        make_bars(&prices)
    }

    fn request() -> OptimizeRequest {
        OptimizeRequest {
            symbol: "SPY".to_string(),
            start_date: None,
            end_date: None,
            interval: None,
            top_n: Some(3),
        }
    }

    #[test]
    fn test_default_grid_generation() {
        let grid = ParamGrid::default().combinations();
        assert_eq!(grid.len(), 10 * 5 * 9); // 450

        for p in &grid {
            assert!(p.exit_threshold > p.entry_threshold);
        }
        assert_eq!(
            grid[0],
            RsiParamSet {
                window: 10,
                entry_threshold: 25.0,
                exit_threshold: 55.0
            }
        );
    }

    #[test]
    fn test_grid_skips_inverted_thresholds() {
        let grid = ParamGrid {
            windows: vec![14],
            entry_thresholds: vec![30.0, 60.0],
            exit_thresholds: vec![50.0, 60.0, 70.0],
        };
        let combos = grid.combinations();
        // (30,50) (30,60) (30,70) (60,70)
        assert_eq!(combos.len(), 4);
        assert!(combos.iter().all(|p| p.exit_threshold > p.entry_threshold));
    }

    #[test]
    fn test_short_series_returns_sentinel() {
        assert!(!optimize(&[]).is_found());

        let bars = make_bars(&[100.0, 101.0, 99.0, 102.0, 98.0, 97.0, 99.0, 100.0, 101.0, 103.0]);
        let result = optimize(&bars);
        assert!(!result.is_found());
        assert_eq!(result.best_return, f64::NEG_INFINITY);
        assert!(!optimize_parallel(&bars).is_found());
    }

    #[test]
    fn test_only_windows_with_defined_rsi_are_evaluated() {
        let prices: Vec<f64> = (0..11).map(|i| 100.0 + (i % 3) as f64).collect();
        let result = optimize(&make_bars(&prices));
        assert!(result.is_found());
        assert_eq!(result.window, Some(10));
    }

    #[test]
    fn test_increasing_series_never_enters() {
        let prices: Vec<f64> = (0..120).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&prices);
        let result = optimize(&bars);

        // RSI sits at the zero-loss sentinel, no entry ever fires, every
        // combination scores 0 and the first grid point wins. Buy-and-hold
        // is strictly better on this series.
        assert_eq!(result.window, Some(10));
        assert_eq!(result.entry_threshold, Some(25.0));
        assert_eq!(result.exit_threshold, Some(55.0));
        assert_eq!(result.best_return, 0.0);

        let report = BacktestEngine::run(&bars, &result.params().unwrap()).unwrap();
        assert!(report.result.final_buy_hold_return() > result.best_return);
    }

    #[test]
    fn test_decreasing_series_prefers_latest_entry() {
        let prices: Vec<f64> = (0..60).map(|i| 200.0 - i as f64 * 2.0).collect();
        let result = optimize(&make_bars(&prices));

        assert_eq!(result.window, Some(28));
        assert_eq!(result.entry_threshold, Some(25.0));
        assert_eq!(result.exit_threshold, Some(55.0));
        assert!(result.best_return < 0.0);
    }

    #[test]
    fn test_best_dominates_every_combination() {
        let bars = random_walk(5, 300);
        let best = optimize(&bars);
        assert!(best.is_found());

        for params in ParamGrid::default().combinations() {
            let r = evaluate(&bars, &params).unwrap();
            assert!(r <= best.best_return);
        }

        let params = RsiParamSet {
            window: best.window.unwrap(),
            entry_threshold: best.entry_threshold.unwrap(),
            exit_threshold: best.exit_threshold.unwrap(),
        };
        assert_eq!(evaluate(&bars, &params), Some(best.best_return));
    }

    #[test]
    fn test_optimize_is_deterministic() {
        let bars = random_walk(9, 250);
        assert_eq!(optimize(&bars), optimize(&bars));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        for seed in [1u64, 2, 3, 4] {
            let bars = random_walk(seed, 200);
            assert_eq!(optimize_parallel(&bars), optimize(&bars), "seed {}", seed);
        }
        // All-tie grid: first combination must still win
        let flat = make_bars(&[42.0; 60]);
        let seq = optimize(&flat);
        assert_eq!(optimize_parallel(&flat), seq);
        assert_eq!(seq.window, Some(10));
        assert_eq!(seq.best_return, 0.0);
    }

    #[tokio::test]
    async fn test_background_run_matches_optimize() {
        let bars = random_walk(21, 200);
        let expected = optimize(&bars);

        let progress = Arc::new(OptimizeProgress::new());
        progress.reset("SPY");
        assert!(progress.is_running());

        run_optimization(request(), bars, progress.clone()).await;

        let snap = progress.snapshot();
        assert_eq!(snap.status, OptimizeStatus::Complete);
        assert_eq!(snap.total, 450);
        assert_eq!(snap.completed, 450);
        assert_eq!(snap.progress_pct, 100.0);
        assert_eq!(snap.best, expected);
        assert_eq!(snap.results.len(), 3);
        assert_eq!(snap.results[0].rank, 1);
        assert_eq!(snap.results[0].final_return, expected.best_return);
        assert_eq!(Some(snap.results[0].params.window), expected.window);
        assert!(snap.results[0].final_return >= snap.results[1].final_return);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_at_boundary() {
        let progress = Arc::new(OptimizeProgress::new());
        progress.reset("SPY");
        progress.cancel();

        run_optimization(request(), random_walk(8, 100), progress.clone()).await;

        let snap = progress.snapshot();
        assert_eq!(snap.status, OptimizeStatus::Cancelled);
        assert_eq!(snap.completed, 0);
        assert!(!snap.best.is_found());
        assert!(snap.results.is_empty());
        assert!(!progress.is_running());
    }

    #[test]
    fn test_try_start_claims_once() {
        let progress = OptimizeProgress::new();
        assert!(progress.try_start("SPY"));
        assert_eq!(progress.status(), OptimizeStatus::FetchingData);
        assert!(!progress.try_start("AAPL"));
        assert_eq!(progress.snapshot().symbol.as_deref(), Some("SPY"));

        progress.fail("boom");
        assert!(progress.try_start("AAPL"));
        assert_eq!(progress.snapshot().error, None);
    }

    #[test]
    fn test_concurrent_try_start_has_one_winner() {
        let progress = Arc::new(OptimizeProgress::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let p = progress.clone();
                std::thread::spawn(move || p.try_start(&format!("SYM{}", i)))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
        assert!(progress.is_running());
    }

    #[test]
    fn test_progress_fail() {
        let progress = OptimizeProgress::new();
        progress.reset("AAPL");
        progress.fail("Failed to fetch data");
        let snap = progress.snapshot();
        assert_eq!(snap.status, OptimizeStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("Failed to fetch data"));
        assert_eq!(snap.symbol.as_deref(), Some("AAPL"));
    }
}

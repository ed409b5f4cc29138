//! RSI Lab — RSI strategy backtesting and optimization
//!
//! Usage:
//!   rsi-lab serve --port 3001                     — Launch the HTTP API
//!   rsi-lab backtest --symbols SPY --window 14    — Backtest one parameter set
//!   rsi-lab optimize --symbols SPY,AAPL           — Grid-search RSI parameters

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    optimize_parallel, run_optimization, AlphaVantageClient, BacktestEngine, BacktestReport, Bar,
    EngineError, FetchRequest, InMemorySource, Interval, OptimizationResult, OptimizeProgress,
    OptimizeRequest, OptimizeStatus, PriceSource, RsiSmoothing, StrategyParams,
};
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_DESCRIBE"));

#[derive(Parser)]
#[command(name = "rsi-lab")]
#[command(about = "RSI mean-reversion backtesting and parameter optimization", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
        /// Serve bars from a JSON file instead of Alpha Vantage
        #[arg(long)]
        input: Option<String>,
    },
    /// Backtest a single parameter set
    Backtest {
        #[command(flatten)]
        data: DataArgs,
        /// RSI lookback window
        #[arg(long, default_value_t = 14)]
        window: usize,
        /// Enter long when RSI falls below this level
        #[arg(long, default_value_t = 30.0)]
        entry: f64,
        /// Exit when RSI rises above this level
        #[arg(long, default_value_t = 70.0)]
        exit: f64,
        /// RSI averaging: simple or exponential
        #[arg(long, default_value = "simple")]
        smoothing: String,
    },
    /// Grid-search window and entry/exit thresholds
    Optimize {
        #[command(flatten)]
        data: DataArgs,
        /// Evaluate the grid across all cores (no progress display)
        #[arg(long)]
        parallel: bool,
        /// Number of ranked combinations to show
        #[arg(long, default_value_t = 5)]
        top_n: usize,
    },
}

#[derive(Args)]
struct DataArgs {
    /// Symbols to process (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "SPY")]
    symbols: Vec<String>,
    /// First calendar date (YYYY-MM-DD), defaults to end date minus --days
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last calendar date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Lookback in days when --start-date is not given
    #[arg(long, default_value_t = 365)]
    days: u32,
    /// Bar interval: 1d, 1m, 5m, 15m, 30m, 60m
    #[arg(long, default_value = "1d")]
    interval: String,
    /// Read bars from a JSON file instead of Alpha Vantage
    #[arg(long)]
    input: Option<String>,
    /// Optional JSON export path
    #[arg(long)]
    export: Option<String>,
}

#[derive(Clone)]
struct AppState {
    source: Arc<dyn PriceSource>,
    quotes: Option<Arc<AlphaVantageClient>>,
    optimize_progress: Arc<OptimizeProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,rsi_lab=debug")
    } else {
        EnvFilter::new("info,engine=info,rsi_lab=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port, input } => {
            cmd_serve(&host, port, input).await?;
        }
        Commands::Backtest {
            data,
            window,
            entry,
            exit,
            smoothing,
        } => {
            let params = StrategyParams {
                window,
                entry_threshold: entry,
                exit_threshold: exit,
                smoothing: smoothing.parse()?,
            };
            cmd_backtest(data, params).await?;
        }
        Commands::Optimize {
            data,
            parallel,
            top_n,
        } => {
            cmd_optimize(data, parallel, top_n).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Fill in missing range ends: end defaults to `today`, start to `days` before end.
fn resolve_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    days: u32,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), EngineError> {
    let end = end.unwrap_or(today);
    let start = match start {
        Some(s) => s,
        None => end
            .checked_sub_signed(Duration::days(days as i64))
            .ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "lookback of {} days before {} is out of range",
                    days, end
                ))
            })?,
    };
    Ok((start, end))
}

/// Days covered by a lookback of `years` calendar years
fn years_to_days(years: u32) -> Result<u32, EngineError> {
    years.checked_mul(365).ok_or_else(|| {
        EngineError::InvalidInput(format!("lookback of {} years is too large", years))
    })
}

fn build_source(input: Option<&str>) -> anyhow::Result<Arc<dyn PriceSource>> {
    match input {
        Some(path) => {
            info!("Reading bars from {}", path);
            Ok(Arc::new(InMemorySource::from_json_file(path)?))
        }
        None => Ok(Arc::new(AlphaVantageClient::from_env()?)),
    }
}

impl DataArgs {
    fn requests(&self) -> anyhow::Result<Vec<FetchRequest>> {
        let interval: Interval = self.interval.parse()?;
        let (start, end) = resolve_range(
            self.start_date,
            self.end_date,
            self.days,
            Utc::now().date_naive(),
        )?;
        Ok(self
            .symbols
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| FetchRequest {
                symbol: s.to_uppercase(),
                interval,
                start_date: Some(start),
                end_date: Some(end),
            })
            .collect())
    }
}

/// JSON body for one backtest: trades, statistics and the per-bar series
fn backtest_json(symbol: &str, bars: &[Bar], report: &BacktestReport) -> serde_json::Value {
    serde_json::json!({
        "symbol": symbol,
        "params": report.params,
        "trades": report.result.trades,
        "statistics": report.statistics,
        "summary": report.summary,
        "historical": report.result.rsi_points(bars),
        "strategy": {
            "strategy_returns": report.result.strategy_returns,
            "cumulative_strategy_returns": report.result.cumulative_strategy_returns,
            "cumulative_buy_hold_returns": report.result.cumulative_buy_hold_returns,
        },
    })
}

fn write_export(path: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    println!("\nResults exported to {}", path);
    Ok(())
}

fn print_report_header() {
    println!(
        "  {:<8} {:>6} {:>7} {:>6} {:>8} {:>11} {:>10} {:>10} {:>8}",
        "Symbol", "Bars", "Trades", "Wins", "Win%", "TradeRet%", "Strategy%", "BuyHold%", "MaxDD%"
    );
    println!("  {}", "-".repeat(84));
}

fn print_report_row(symbol: &str, bars: usize, report: &BacktestReport) {
    let s = &report.statistics;
    let m = &report.summary;
    println!(
        "  {:<8} {:>6} {:>7} {:>6} {:>7}% {:>10}% {:>+9.2}% {:>+9.2}% {:>7.2}%",
        symbol,
        bars,
        s.total_trades,
        s.winning_trades,
        s.win_probability,
        s.total_return,
        m.final_strategy_return * 100.0,
        m.final_buy_hold_return * 100.0,
        m.max_drawdown_pct,
    );
}

// ============================================================================
// Backtest command
// ============================================================================

async fn cmd_backtest(data: DataArgs, params: StrategyParams) -> anyhow::Result<()> {
    println!("\n=== RSI Lab v{} ===", APP_VERSION);
    println!(
        "Window: {} | Entry < {} | Exit > {} | Smoothing: {}\n",
        params.window, params.entry_threshold, params.exit_threshold, params.smoothing
    );

    let source = build_source(data.input.as_deref())?;
    let mut exported = Vec::new();

    print_report_header();
    for request in data.requests()? {
        let bars = match source.fetch_bars(&request).await {
            Ok(b) => b,
            Err(e) => {
                error!(symbol = %request.symbol, "Failed to fetch data: {}", e);
                continue;
            }
        };

        let report = BacktestEngine::run(&bars, &params)?;
        print_report_row(&request.symbol, bars.len(), &report);
        exported.push(backtest_json(&request.symbol, &bars, &report));
    }

    if let Some(path) = data.export {
        write_export(&path, &serde_json::json!({ "results": exported }))?;
    }

    Ok(())
}

// ============================================================================
// Optimize command
// ============================================================================

async fn cmd_optimize(data: DataArgs, parallel: bool, top_n: usize) -> anyhow::Result<()> {
    println!("\n=== RSI Lab v{} ===", APP_VERSION);
    println!(
        "Grid: 10 windows x 5 entry x 9 exit | Mode: {}\n",
        if parallel { "parallel" } else { "sequential" }
    );

    let source = build_source(data.input.as_deref())?;
    let mut exported = Vec::new();

    for request in data.requests()? {
        let bars = match source.fetch_bars(&request).await {
            Ok(b) => b,
            Err(e) => {
                error!(symbol = %request.symbol, "Failed to fetch data: {}", e);
                continue;
            }
        };

        println!("{} ({} bars)", request.symbol, bars.len());

        let (best, ranked) = if parallel {
            (optimize_parallel(&bars), Vec::new())
        } else {
            let progress = optimize_with_progress(&request, &bars, top_n).await?;
            let snap = progress.snapshot();
            if snap.status == OptimizeStatus::Cancelled {
                println!("  Cancelled after {}/{} combinations", snap.completed, snap.total);
            }
            (snap.best, snap.results)
        };

        let Some(params) = best.params() else {
            println!("  No parameter combination could be evaluated (series too short)\n");
            continue;
        };

        print_best(&best);
        for r in &ranked {
            println!(
                "    #{:<3} window {:>2}  entry {:>4}  exit {:>4}  return {:>+8.2}%  trades {:>3}",
                r.rank,
                r.params.window,
                r.params.entry_threshold,
                r.params.exit_threshold,
                r.final_return * 100.0,
                r.total_trades,
            );
        }

        let report = BacktestEngine::run(&bars, &params)?;
        println!();
        print_report_header();
        print_report_row(&request.symbol, bars.len(), &report);
        println!();

        let mut entry = backtest_json(&request.symbol, &bars, &report);
        entry["best_params"] = serde_json::to_value(best)?;
        entry["ranked"] = serde_json::to_value(&ranked)?;
        exported.push(entry);
    }

    if let Some(path) = data.export {
        write_export(&path, &serde_json::json!({ "results": exported }))?;
    }

    Ok(())
}

fn print_best(best: &OptimizationResult) {
    println!(
        "  Best: window {} | entry {} | exit {} | return {:+.2}%",
        best.window.unwrap_or_default(),
        best.entry_threshold.unwrap_or_default(),
        best.exit_threshold.unwrap_or_default(),
        best.best_return * 100.0
    );
}

/// Run the background optimizer with a progress bar; Ctrl+C cancels.
async fn optimize_with_progress(
    request: &FetchRequest,
    bars: &[Bar],
    top_n: usize,
) -> anyhow::Result<Arc<OptimizeProgress>> {
    let progress = Arc::new(OptimizeProgress::new());
    progress.reset(&request.symbol);

    let progress_for_ctrlc = progress.clone();
    let ctrlc = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let optimize_request = OptimizeRequest {
        symbol: request.symbol.clone(),
        start_date: request.start_date,
        end_date: request.end_date,
        interval: Some(request.interval.to_string()),
        top_n: Some(top_n),
    };
    let handle = tokio::spawn(run_optimization(
        optimize_request,
        bars.to_vec(),
        progress.clone(),
    ));

    loop {
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        let pct = progress.progress_pct();

        match progress.status() {
            OptimizeStatus::Running => {
                let bar_len = 30;
                let filled = (pct as usize * bar_len) / 100;
                let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
                print!("\r  [{}] {:.0}%   ", bar, pct);
                std::io::stdout().flush().ok();
            }
            OptimizeStatus::Complete | OptimizeStatus::Cancelled | OptimizeStatus::Error => {
                println!("\r  [{}] {:.0}%   ", "=".repeat(30), pct);
                break;
            }
            _ => {}
        }
    }

    handle.await?;
    ctrlc.abort();
    Ok(progress)
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16, input: Option<String>) -> anyhow::Result<()> {
    info!("RSI Lab v{} starting...", APP_VERSION);

    let (source, quotes): (Arc<dyn PriceSource>, Option<Arc<AlphaVantageClient>>) = match input {
        Some(path) => (build_source(Some(&path))?, None),
        None => {
            let client = Arc::new(AlphaVantageClient::from_env()?);
            let source: Arc<dyn PriceSource> = client.clone();
            (source, Some(client))
        }
    };

    let state = AppState {
        source,
        quotes,
        optimize_progress: Arc::new(OptimizeProgress::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/quote", get(api_quote))
        .route("/fetch-data", get(api_fetch_data))
        .route("/backtest", get(api_backtest))
        .route("/optimize", post(api_start_optimization))
        .route("/optimize/status", get(api_optimize_status))
        .route("/optimize/cancel", post(api_cancel_optimization))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new("dist"))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== RSI Lab v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/quote               - Latest price for a symbol");
    println!("  GET  /api/fetch-data          - Historical bars");
    println!("  GET  /api/backtest            - Backtest one parameter set");
    println!("  POST /api/optimize            - Start parameter optimization");
    println!("  GET  /api/optimize/status     - Poll optimization progress");
    println!("  POST /api/optimize/cancel     - Cancel running optimization");
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn api_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
        })),
    )
}

/// Status code for a failed fetch or engine call
fn error_status(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        Some(EngineError::NoData { .. }) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_interval(raw: Option<&str>) -> Result<Interval, (StatusCode, Json<serde_json::Value>)> {
    raw.map(str::parse::<Interval>)
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(|e: EngineError| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rsi-lab",
        "version": APP_VERSION,
    }))
}

#[derive(Deserialize)]
struct QuoteParams {
    symbol: Option<String>,
}

/// GET /api/quote — latest price
async fn api_quote(State(state): State<AppState>, Query(params): Query<QuoteParams>) -> ApiResult {
    let symbol = params
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Please provide a stock symbol."))?;

    let Some(client) = state.quotes.as_ref() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Quotes need a live Alpha Vantage connection",
        ));
    };

    match client.get_quote(&symbol).await {
        Ok(quote) => Ok(Json(serde_json::json!({
            "success": true,
            "symbol": quote.symbol,
            "price": quote.price,
        }))),
        Err(e) => {
            error!("Quote error: {}", e);
            let status = error_status(&e);
            let message = if status == StatusCode::NOT_FOUND {
                "Stock symbol not found.".to_string()
            } else {
                format!("Failed to fetch stock data: {}", e)
            };
            Err(api_error(status, message))
        }
    }
}

#[derive(Deserialize)]
struct FetchDataParams {
    ticker: Option<String>,
    interval: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

/// GET /api/fetch-data — sorted bars within an inclusive date range
async fn api_fetch_data(
    State(state): State<AppState>,
    Query(params): Query<FetchDataParams>,
) -> ApiResult {
    let ticker = params
        .ticker
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Please provide a ticker."))?;
    let interval = parse_interval(params.interval.as_deref())?;

    let request = FetchRequest {
        symbol: ticker.to_uppercase(),
        interval,
        start_date: params.start_date,
        end_date: params.end_date,
    };

    match state.source.fetch_bars(&request).await {
        Ok(bars) => Ok(Json(serde_json::json!({
            "success": true,
            "symbol": request.symbol,
            "interval": interval.to_string(),
            "count": bars.len(),
            "data": bars,
        }))),
        Err(e) => {
            error!("Fetch error: {}", e);
            Err(api_error(error_status(&e), format!("Failed to fetch data: {}", e)))
        }
    }
}

#[derive(Deserialize)]
struct BacktestParams {
    symbol: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    /// Lookback in years when start_date is not given (default 1)
    years: Option<u32>,
    interval: Option<String>,
    rsi_window: Option<usize>,
    entry_threshold: Option<f64>,
    exit_threshold: Option<f64>,
    smoothing: Option<String>,
}

/// GET /api/backtest — fetch bars and backtest one parameter set
async fn api_backtest(
    State(state): State<AppState>,
    Query(params): Query<BacktestParams>,
) -> ApiResult {
    let symbol = params
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Please provide a stock symbol."))?
        .to_uppercase();
    let interval = parse_interval(params.interval.as_deref())?;

    let defaults = StrategyParams::default();
    let smoothing = match params.smoothing.as_deref() {
        Some(s) => s
            .parse::<RsiSmoothing>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => defaults.smoothing,
    };
    let strategy = StrategyParams {
        window: params.rsi_window.unwrap_or(defaults.window),
        entry_threshold: params.entry_threshold.unwrap_or(defaults.entry_threshold),
        exit_threshold: params.exit_threshold.unwrap_or(defaults.exit_threshold),
        smoothing,
    };

    let years = params.years.unwrap_or(1).max(1);
    let (start, end) = years_to_days(years)
        .and_then(|days| {
            resolve_range(
                params.start_date,
                params.end_date,
                days,
                Utc::now().date_naive(),
            )
        })
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let request = FetchRequest {
        symbol: symbol.clone(),
        interval,
        start_date: Some(start),
        end_date: Some(end),
    };

    let bars = state.source.fetch_bars(&request).await.map_err(|e| {
        error!("Error during backtesting: {}", e);
        let status = error_status(&e);
        let message = if status == StatusCode::NOT_FOUND {
            "No historical data found for this symbol.".to_string()
        } else {
            format!("Failed to perform backtesting: {}", e)
        };
        api_error(status, message)
    })?;

    let report = BacktestEngine::run(&bars, &strategy)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut body = backtest_json(&symbol, &bars, &report);
    body["success"] = serde_json::Value::Bool(true);
    Ok(Json(body))
}

/// POST /api/optimize — Start parameter optimization in background
async fn api_start_optimization(
    State(state): State<AppState>,
    Json(request): Json<OptimizeRequest>,
) -> ApiResult {
    let interval = parse_interval(request.interval.as_deref())?;
    let (start, end) = resolve_range(
        request.start_date,
        request.end_date,
        365,
        Utc::now().date_naive(),
    )
    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let fetch = FetchRequest {
        symbol: request.symbol.to_uppercase(),
        interval,
        start_date: Some(start),
        end_date: Some(end),
    };

    if !state.optimize_progress.try_start(&fetch.symbol) {
        let pct = state.optimize_progress.progress_pct();
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": format!("Optimization already in progress ({:.0}% complete)", pct),
        })));
    }

    info!(symbol = %fetch.symbol, start = %start, end = %end, "Starting parameter optimization");

    let bars = match state.source.fetch_bars(&fetch).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to fetch bars for optimization: {}", e);
            state
                .optimize_progress
                .fail(format!("Failed to fetch data: {}", e));
            return Err(api_error(
                error_status(&e),
                format!("Failed to fetch market data: {}", e),
            ));
        }
    };

    info!(bars = bars.len(), "Bars fetched, spawning optimization task");

    let progress = state.optimize_progress.clone();
    tokio::spawn(async move {
        run_optimization(request, bars, progress).await;
    });

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Optimization started",
        "symbol": fetch.symbol,
    })))
}

/// GET /api/optimize/status — Poll optimization progress
async fn api_optimize_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.optimize_progress.snapshot();
    Json(serde_json::to_value(snapshot).unwrap_or_default())
}

/// POST /api/optimize/cancel — Cancel running optimization
async fn api_cancel_optimization(State(state): State<AppState>) -> Json<serde_json::Value> {
    if !state.optimize_progress.is_running() {
        warn!("Cancel requested with no optimization running");
    }
    state.optimize_progress.cancel();
    info!("Optimization cancel requested via API");
    Json(serde_json::json!({
        "success": true,
        "message": "Cancel requested",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_resolve_range_defaults() {
        let today = date(2024, 6, 30);
        assert_eq!(
            resolve_range(None, None, 30, today).unwrap(),
            (date(2024, 5, 31), today)
        );
        assert_eq!(
            resolve_range(Some(date(2022, 1, 1)), None, 30, today).unwrap(),
            (date(2022, 1, 1), today)
        );
        assert_eq!(
            resolve_range(None, Some(date(2023, 1, 31)), 30, today).unwrap(),
            (date(2023, 1, 1), date(2023, 1, 31))
        );
    }

    #[test]
    fn test_resolve_range_rejects_huge_lookback() {
        let today = date(2024, 6, 30);

        let err = resolve_range(None, None, 300_000 * 365, today).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(resolve_range(None, None, u32::MAX, today).is_err());

        // An explicit start date needs no lookback arithmetic
        assert!(resolve_range(Some(date(2020, 1, 1)), None, u32::MAX, today).is_ok());

        assert_eq!(years_to_days(2).unwrap(), 730);
        assert!(matches!(
            years_to_days(300_000_000),
            Err(EngineError::InvalidInput(_))
        ));

        let err: anyhow::Error = years_to_days(u32::MAX).unwrap_err().into();
        assert_eq!(error_status(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_data_args_reject_huge_days() {
        let args = DataArgs {
            symbols: vec!["SPY".to_string()],
            start_date: None,
            end_date: Some(date(2024, 1, 1)),
            days: 4_000_000_000,
            interval: "1d".to_string(),
            input: None,
            export: None,
        };
        let err = args.requests().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_data_args_build_requests() {
        let args = DataArgs {
            symbols: vec!["spy".to_string(), " ".to_string(), "aapl".to_string()],
            start_date: Some(date(2023, 1, 1)),
            end_date: Some(date(2023, 12, 31)),
            days: 365,
            interval: "15m".to_string(),
            input: None,
            export: None,
        };
        let requests = args.requests().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].symbol, "SPY");
        assert_eq!(requests[1].symbol, "AAPL");
        assert_eq!(requests[0].interval, Interval::Minutes(15));
        assert_eq!(requests[0].start_date, Some(date(2023, 1, 1)));
    }

    #[test]
    fn test_error_status_mapping() {
        let not_found: anyhow::Error = EngineError::NoData {
            symbol: "X".to_string(),
        }
        .into();
        assert_eq!(error_status(&not_found), StatusCode::NOT_FOUND);

        let bad: anyhow::Error = EngineError::InvalidInput("window".to_string()).into();
        assert_eq!(error_status(&bad), StatusCode::BAD_REQUEST);

        let other = anyhow::anyhow!("connection reset");
        assert_eq!(error_status(&other), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_parse_interval_defaults_to_daily() {
        assert_eq!(parse_interval(None).unwrap(), Interval::Daily);
        assert_eq!(parse_interval(Some("5min")).unwrap(), Interval::Minutes(5));
        assert!(parse_interval(Some("2h")).is_err());
    }

    #[test]
    fn test_cli_parses_optimize() {
        let cli = Cli::try_parse_from([
            "rsi-lab",
            "optimize",
            "--symbols",
            "SPY,QQQ",
            "--start-date",
            "2023-01-01",
            "--parallel",
        ])
        .unwrap();
        match cli.command {
            Commands::Optimize { data, parallel, top_n } => {
                assert_eq!(data.symbols, vec!["SPY", "QQQ"]);
                assert_eq!(data.start_date, Some(date(2023, 1, 1)));
                assert!(parallel);
                assert_eq!(top_n, 5);
            }
            _ => panic!("expected optimize command"),
        }
    }
}

//! Relative Strength Index over a price series
//!
//! The default `Simple` variant averages the last `window` gains and losses
//! with a plain mean over a fixed-capacity ring buffer. `Exponential` runs the
//! closes through `ta`'s exponentially smoothed RSI. Both return one value per
//! price delta (`bars.len() - 1` values) and leave the warm-up prefix undefined.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ta::indicators::RelativeStrengthIndex;
use ta::Next;

use crate::error::{EngineError, EngineResult};
use crate::types::{Bar, RsiValue};

/// RS used when the average loss is zero. A flat or strictly rising window
/// therefore reads ~99.0099 rather than 50 or 100.
pub const ZERO_LOSS_RS: f64 = 100.0;

// ============================================================================
// Smoothing variants
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiSmoothing {
    /// Plain mean of the last `window` gains/losses
    #[default]
    Simple,
    /// Exponentially smoothed averages (`ta::indicators::RelativeStrengthIndex`)
    Exponential,
}

impl fmt::Display for RsiSmoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RsiSmoothing::Simple => write!(f, "simple"),
            RsiSmoothing::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for RsiSmoothing {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" | "sma" => Ok(RsiSmoothing::Simple),
            "exponential" | "ema" => Ok(RsiSmoothing::Exponential),
            other => Err(EngineError::InvalidInput(format!(
                "unknown RSI smoothing '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Fixed-capacity sliding buffer
// ============================================================================

/// Ring buffer holding the most recent `capacity` values.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: Vec<f64>,
    next: usize,
    len: usize,
}

impl RollingWindow {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            next: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Push a value, overwriting the oldest once full.
    pub fn push(&mut self, value: f64) {
        let cap = self.buf.len();
        self.buf[self.next] = value;
        self.next = (self.next + 1) % cap;
        self.len = (self.len + 1).min(cap);
    }

    /// Values from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let cap = self.buf.len();
        let start = if self.is_full() { self.next } else { 0 };
        (0..self.len).map(move |k| self.buf[(start + k) % cap])
    }

    /// Sum accumulated oldest to newest
    pub fn sum(&self) -> f64 {
        self.iter().fold(0.0, |acc, v| acc + v)
    }
}

// ============================================================================
// RSI
// ============================================================================

/// Simple rolling RSI. See `calculate_rsi_with`.
pub fn calculate_rsi(bars: &[Bar], window: usize) -> EngineResult<Vec<RsiValue>> {
    calculate_rsi_with(bars, window, RsiSmoothing::Simple)
}

/// Compute one RSI value per price delta.
///
/// Entry `j` of the output belongs to bar `j + 1`. The first `window - 1`
/// entries are `None`, so `bars.len() - window` values are defined once the
/// series is long enough. Empty and single-bar series yield an empty vector.
pub fn calculate_rsi_with(
    bars: &[Bar],
    window: usize,
    smoothing: RsiSmoothing,
) -> EngineResult<Vec<RsiValue>> {
    if window < 1 {
        return Err(EngineError::InvalidInput(
            "RSI window must be at least 1".to_string(),
        ));
    }
    if bars.len() < 2 {
        return Ok(Vec::new());
    }

    match smoothing {
        RsiSmoothing::Simple => Ok(simple_rsi(bars, window)),
        RsiSmoothing::Exponential => exponential_rsi(bars, window),
    }
}

fn simple_rsi(bars: &[Bar], window: usize) -> Vec<RsiValue> {
    let mut gains = RollingWindow::new(window);
    let mut losses = RollingWindow::new(window);
    let divisor = window as f64;

    bars.windows(2)
        .enumerate()
        .map(|(j, pair)| {
            let delta = pair[1].close - pair[0].close;
            gains.push(delta.max(0.0));
            losses.push((-delta).max(0.0));

            if j + 1 < window {
                return None;
            }

            let avg_gain = gains.sum() / divisor;
            let avg_loss = losses.sum() / divisor;
            Some(rsi_from_averages(avg_gain, avg_loss))
        })
        .collect()
}

fn exponential_rsi(bars: &[Bar], window: usize) -> EngineResult<Vec<RsiValue>> {
    let mut rsi = RelativeStrengthIndex::new(window)
        .map_err(|_| EngineError::InvalidInput(format!("invalid RSI window {}", window)))?;

    // Seed with the first close; ta emits a neutral reading for it.
    rsi.next(bars[0].close);

    Ok(bars[1..]
        .iter()
        .enumerate()
        .map(|(j, bar)| {
            let value = rsi.next(bar.close);
            if j + 1 < window {
                None
            } else {
                Some(value)
            }
        })
        .collect())
}

#[inline]
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    let rs = if avg_loss == 0.0 {
        ZERO_LOSS_RS
    } else {
        avg_gain / avg_loss
    };
    100.0 - 100.0 / (1.0 + rs)
}

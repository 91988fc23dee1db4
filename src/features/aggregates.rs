//! Window aggregates over timestamped values

use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Days from `as_of` to `ts` (negative for the past)
pub fn days_between(as_of: DateTime<Utc>, ts: DateTime<Utc>) -> f64 {
    (ts - as_of).num_seconds() as f64 / SECONDS_PER_DAY
}

/// Summary statistics of one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub max: f64,
    /// Least-squares slope per day; `None` below two points or with no time spread
    pub slope: Option<f64>,
}

/// Summarise `(day_offset, value)` points; `None` for an empty window
pub fn summarize(points: &[(f64, f64)]) -> Option<WindowStats> {
    if points.is_empty() {
        return None;
    }

    let count = points.len();
    let sum: f64 = points.iter().map(|&(_, v)| v).sum();
    let max = points
        .iter()
        .map(|&(_, v)| v)
        .fold(f64::NEG_INFINITY, f64::max);

    Some(WindowStats {
        count,
        sum,
        mean: sum / count as f64,
        max,
        slope: linear_slope(points),
    })
}

/// Ordinary least-squares slope of value over time
pub fn linear_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mean_t = points.iter().map(|&(t, _)| t).sum::<f64>() / n;
    let mean_v = points.iter().map(|&(_, v)| v).sum::<f64>() / n;

    let (cov, var) = points.iter().fold((0.0, 0.0), |(cov, var), &(t, v)| {
        let dt = t - mean_t;
        (cov + dt * (v - mean_v), var + dt * dt)
    });

    if var <= f64::EPSILON {
        return None;
    }
    Some(cov / var)
}

/// Index of the first timestamp strictly after `start` in an ascending sequence
pub fn window_start<T>(items: &[T], start: DateTime<Utc>, ts: impl Fn(&T) -> DateTime<Utc>) -> usize {
    items.partition_point(|item| ts(item) <= start)
}

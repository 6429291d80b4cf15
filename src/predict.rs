//! Viewport prediction over the retained pose history.
//!
//! Every strategy is a pure function of the sample store, the current pose and
//! the requested horizon. Regression strategies fit each of the six pose
//! channels independently against the sample timestamps (milliseconds) and
//! evaluate the fitted line at `now + delta`.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::pose::{Pose, PoseSample, PoseSampleStore};

/// Viewport prediction strategy, exactly one active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VpStrategy {
    #[default]
    None,
    LinearPredictor,
    LinearRegression,
    WeightedLinearRegression,
}

impl VpStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VpStrategy::None => "None",
            VpStrategy::LinearPredictor => "LinearPredictor",
            VpStrategy::LinearRegression => "LinearRegression",
            VpStrategy::WeightedLinearRegression => "WeightedLinearRegression",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PredictError {
    #[error("prediction needs {required} pose samples, {available} retained")]
    InsufficientSamples { required: usize, available: usize },
    #[error("regression is degenerate: sample timestamps do not vary")]
    DegenerateRegression,
}

/// Fitted `v = slope * t + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    pub fn at(&self, t: f64) -> f64 {
        self.slope * t + self.intercept
    }
}

/// Running weighted sums for one channel.
#[derive(Debug, Default, Clone, Copy)]
struct Sums {
    w: f64,
    wt: f64,
    wtt: f64,
    wv: f64,
    wtv: f64,
}

impl Sums {
    fn push(&mut self, weight: f64, t: f64, v: f64) {
        self.w += weight;
        self.wt += weight * t;
        self.wtt += weight * t * t;
        self.wv += weight * v;
        self.wtv += weight * t * v;
    }

    fn fit(&self) -> Result<LineFit, PredictError> {
        let denom = self.w * self.wtt - self.wt * self.wt;
        let scale = (self.w * self.wtt).abs();
        if !denom.is_finite() || denom.abs() <= f64::EPSILON * scale {
            return Err(PredictError::DegenerateRegression);
        }
        let slope = (self.w * self.wtv - self.wt * self.wv) / denom;
        let intercept = (self.wv - slope * self.wt) / self.w;
        Ok(LineFit { slope, intercept })
    }
}

fn fit_weighted(points: &[(f64, f64)], weight: impl Fn(usize) -> f64) -> Result<LineFit, PredictError> {
    if points.len() < 2 {
        return Err(PredictError::InsufficientSamples {
            required: 2,
            available: points.len(),
        });
    }
    let mut sums = Sums::default();
    for (i, (t, v)) in points.iter().enumerate() {
        sums.push(weight(i), *t, *v);
    }
    sums.fit()
}

/// Ordinary least squares over `(t, v)` points.
pub fn fit_line(points: &[(f64, f64)]) -> Result<LineFit, PredictError> {
    fit_weighted(points, |_| 1.0)
}

/// Least squares with linearly increasing weights `(i + 1) / n`, oldest first.
pub fn fit_recency_weighted_line(points: &[(f64, f64)]) -> Result<LineFit, PredictError> {
    let n = points.len() as f64;
    fit_weighted(points, |i| (i as f64 + 1.0) / n)
}

/// Predicts the camera pose a short horizon ahead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewportPredictor {
    strategy: VpStrategy,
}

impl ViewportPredictor {
    pub fn new(strategy: VpStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> VpStrategy {
        self.strategy
    }

    /// Predicts the pose at `now_ms + delta_secs`.
    ///
    /// # Errors
    /// [`PredictError::InsufficientSamples`] with fewer than two samples, and
    /// [`PredictError::DegenerateRegression`] when sample timestamps coincide.
    pub fn predict(
        &self,
        store: &PoseSampleStore,
        current: Pose,
        now_ms: f64,
        delta_secs: f64,
    ) -> Result<Pose, PredictError> {
        match self.strategy {
            VpStrategy::None => Ok(current),
            VpStrategy::LinearPredictor => {
                let (second, last) = store.last_two().ok_or(PredictError::InsufficientSamples {
                    required: 2,
                    available: store.len(),
                })?;
                extrapolate(second, last, delta_secs)
            }
            VpStrategy::LinearRegression => regress(store, now_ms + delta_secs * 1000.0, fit_line),
            VpStrategy::WeightedLinearRegression => {
                regress(store, now_ms + delta_secs * 1000.0, fit_recency_weighted_line)
            }
        }
    }

    /// Like [`predict`](Self::predict), but falls back to `current` on failure.
    pub fn predict_or_current(
        &self,
        store: &PoseSampleStore,
        current: Pose,
        now_ms: f64,
        delta_secs: f64,
    ) -> Pose {
        match self.predict(store, current, now_ms, delta_secs) {
            Ok(pose) => pose,
            Err(PredictError::InsufficientSamples { .. }) => current,
            Err(err @ PredictError::DegenerateRegression) => {
                warn!(strategy = self.strategy.as_str(), error = %err, "viewport prediction fell back to current pose");
                current
            }
        }
    }
}

fn extrapolate(second: &PoseSample, last: &PoseSample, delta_secs: f64) -> Result<Pose, PredictError> {
    let dt = last.timestamp_ms - second.timestamp_ms;
    if dt == 0.0 || !dt.is_finite() {
        return Err(PredictError::DegenerateRegression);
    }
    let ahead_ms = delta_secs * 1000.0;
    let a = second.pose.channels();
    let b = last.pose.channels();
    let mut out = [0.0; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        let velocity = (b[i] - a[i]) / dt;
        *slot = b[i] + velocity * ahead_ms;
    }
    Ok(Pose::from_channels(out))
}

fn regress(
    store: &PoseSampleStore,
    target_ms: f64,
    fit: fn(&[(f64, f64)]) -> Result<LineFit, PredictError>,
) -> Result<Pose, PredictError> {
    let samples = store.to_vec();
    if samples.len() < 2 {
        return Err(PredictError::InsufficientSamples {
            required: 2,
            available: samples.len(),
        });
    }
    let mut out = [0.0; 6];
    let mut points = Vec::with_capacity(samples.len());
    for (channel, slot) in out.iter_mut().enumerate() {
        points.clear();
        points.extend(
            samples
                .iter()
                .map(|s| (s.timestamp_ms, s.pose.channels()[channel])),
        );
        *slot = fit(&points)?.at(target_ms);
    }
    Ok(Pose::from_channels(out))
}

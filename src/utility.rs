//! Per-object importance scores for a camera pose.
//!
//! Geometric metrics are computed here; screen-space metrics are delegated to a
//! [`VisibilityOracle`] supplied by the renderer. The metric is always passed
//! explicitly, there is no process-wide selector.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object::TrackedObject;
use crate::pose::Pose;

/// Utility metric used to rank objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetricSelector {
    #[default]
    Distance,
    Surface,
    Visible,
    Potential,
    #[serde(rename = "Visible_Potential")]
    VisiblePotential,
}

impl MetricSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSelector::Distance => "Distance",
            MetricSelector::Surface => "Surface",
            MetricSelector::Visible => "Visible",
            MetricSelector::Potential => "Potential",
            MetricSelector::VisiblePotential => "Visible_Potential",
        }
    }

    /// True for metrics computed in screen space by a [`VisibilityOracle`].
    pub fn requires_oracle(&self) -> bool {
        matches!(
            self,
            MetricSelector::Visible | MetricSelector::Potential | MetricSelector::VisiblePotential
        )
    }
}

/// Renderer-side frustum and projection queries.
pub trait VisibilityOracle: Send + Sync {
    /// Whether any part of `object` falls inside the view frustum of `pose`.
    fn is_visible(&self, object: &TrackedObject, pose: &Pose) -> bool;

    /// On-screen area of `object` seen from `pose`, 0 when not visible.
    fn projected_screen_area(&self, object: &TrackedObject, pose: &Pose) -> f64;

    /// On-screen area if the camera were re-aimed straight at `object`.
    fn potential_screen_area(&self, object: &TrackedObject, pose: &Pose) -> f64 {
        self.projected_screen_area(object, &pose.looking_at(object.position()))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UtilityError {
    #[error("camera and object positions coincide; distance metrics are undefined")]
    CoincidentPositions,
    #[error("metric {} needs a visibility oracle", .0.as_str())]
    OracleRequired(MetricSelector),
}

/// Scores objects under one metric.
#[derive(Clone, Copy)]
pub struct UtilityEvaluator<'a> {
    oracle: Option<&'a dyn VisibilityOracle>,
}

impl<'a> UtilityEvaluator<'a> {
    pub fn new(oracle: Option<&'a dyn VisibilityOracle>) -> Self {
        Self { oracle }
    }

    pub fn geometric() -> Self {
        Self { oracle: None }
    }

    /// Scores `object` from `pose`; higher means more important.
    ///
    /// # Errors
    /// [`UtilityError::CoincidentPositions`] for Distance/Surface at zero range,
    /// [`UtilityError::OracleRequired`] for screen-space metrics without an oracle.
    pub fn score(
        &self,
        metric: MetricSelector,
        object: &TrackedObject,
        pose: &Pose,
    ) -> Result<f64, UtilityError> {
        match metric {
            MetricSelector::Distance => Ok(1.0 / squared_range(object, pose)?),
            MetricSelector::Surface => {
                let scale = object.scale();
                Ok(object.area() * scale * scale / squared_range(object, pose)?)
            }
            MetricSelector::Visible => Ok(self.oracle(metric)?.projected_screen_area(object, pose)),
            MetricSelector::Potential => Ok(self.oracle(metric)?.potential_screen_area(object, pose)),
            MetricSelector::VisiblePotential => {
                let oracle = self.oracle(metric)?;
                let visible = oracle.projected_screen_area(object, pose);
                if visible != 0.0 {
                    Ok(visible)
                } else {
                    Ok(-oracle.potential_screen_area(object, pose).cos())
                }
            }
        }
    }

    fn oracle(&self, metric: MetricSelector) -> Result<&'a dyn VisibilityOracle, UtilityError> {
        self.oracle.ok_or(UtilityError::OracleRequired(metric))
    }
}

fn squared_range(object: &TrackedObject, pose: &Pose) -> Result<f64, UtilityError> {
    let d2 = object.position().distance_squared(pose.position);
    if d2 == 0.0 {
        return Err(UtilityError::CoincidentPositions);
    }
    Ok(d2)
}

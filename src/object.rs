//! Tracked objects and their per-level catalogs.
//!
//! A `TrackedObject` is immutable once built: construction validates that the
//! level catalog is ordered by non-decreasing byte size and quality, so every
//! strategy downstream may assume that upgrading a level never costs negative
//! bytes.
use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier for a tracked object within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// One quality tier of an object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub index: usize,
    pub geometry_bytes: u64,
    pub texture_bytes: u64,
    /// Perceptual quality, higher is better.
    pub quality_score: f64,
}

impl Level {
    pub fn new(index: usize, geometry_bytes: u64, texture_bytes: u64, quality_score: f64) -> Self {
        Self {
            index,
            geometry_bytes,
            texture_bytes,
            quality_score,
        }
    }

    /// Bytes fetched for one segment at this level (geometry + texture).
    pub fn size_bytes(&self) -> u64 {
        self.geometry_bytes.saturating_add(self.texture_bytes)
    }
}

/// Placement of an object in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: DVec3,
    pub rotation: DVec3,
    /// Uniform scale factor.
    pub scale: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DVec3::ZERO,
            scale: 1.0,
        }
    }
}

/// Error produced when an object catalog violates its invariants.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObjectError {
    #[error("object `{0}` has no levels; level 0 must exist")]
    NoLevels(String),
    #[error("object `{name}` lists level {found} at position {expected}")]
    LevelIndexMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("object `{name}` level {level} is smaller than the level below it")]
    SizeDecreases { name: String, level: usize },
    #[error("object `{name}` level {level} has lower quality than the level below it")]
    QualityDecreases { name: String, level: usize },
    #[error("object `{name}` has a non-finite quality score at level {level}")]
    NonFiniteQuality { name: String, level: usize },
    #[error("object `{0}` must have a positive, finite scale")]
    InvalidScale(String),
    #[error("object `{0}` must have at least one frame")]
    NoFrames(String),
}

/// Immutable identity and level catalog of one streamed object.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedObject {
    id: ObjectId,
    name: String,
    levels: Vec<Level>,
    placement: Placement,
    area: f64,
    frame_count: u32,
}

impl TrackedObject {
    /// Builds an object after validating its level catalog.
    ///
    /// # Errors
    /// Returns an [`ObjectError`] when level 0 is missing, indices are not
    /// positional, sizes or qualities decrease, or scale/frame count are invalid.
    pub fn new(
        id: ObjectId,
        name: impl Into<String>,
        levels: Vec<Level>,
        placement: Placement,
        area: f64,
        frame_count: u32,
    ) -> Result<Self, ObjectError> {
        let name = name.into();
        if levels.is_empty() {
            return Err(ObjectError::NoLevels(name));
        }
        for (position, level) in levels.iter().enumerate() {
            if level.index != position {
                return Err(ObjectError::LevelIndexMismatch {
                    name,
                    expected: position,
                    found: level.index,
                });
            }
            if !level.quality_score.is_finite() {
                return Err(ObjectError::NonFiniteQuality {
                    name,
                    level: position,
                });
            }
        }
        for pair in levels.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if upper.size_bytes() < lower.size_bytes() {
                return Err(ObjectError::SizeDecreases {
                    name,
                    level: upper.index,
                });
            }
            if upper.quality_score < lower.quality_score {
                return Err(ObjectError::QualityDecreases {
                    name,
                    level: upper.index,
                });
            }
        }
        if !(placement.scale.is_finite() && placement.scale > 0.0) {
            return Err(ObjectError::InvalidScale(name));
        }
        if frame_count == 0 {
            return Err(ObjectError::NoFrames(name));
        }
        Ok(Self {
            id,
            name,
            levels,
            placement,
            area,
            frame_count,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    /// Total bytes of `index`, if the level exists.
    pub fn level_size(&self, index: usize) -> Option<u64> {
        self.levels.get(index).map(Level::size_bytes)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Highest level index in the catalog.
    pub fn max_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn position(&self) -> DVec3 {
        self.placement.position
    }

    pub fn scale(&self) -> f64 {
        self.placement.scale
    }

    /// Precomputed static surface area, used by the surface metric.
    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }
}

/// Serialized description of an object, as published next to its assets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
    pub id: u32,
    pub name: String,
    pub levels: Vec<Level>,
    pub position: [f64; 3],
    /// Degrees, converted to radians on load.
    #[serde(default)]
    pub rotation_deg: [f64; 3],
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default)]
    pub area: f64,
    pub frame_count: u32,
}

fn unit_scale() -> f64 {
    1.0
}

impl TryFrom<ObjectDescriptor> for TrackedObject {
    type Error = ObjectError;

    fn try_from(desc: ObjectDescriptor) -> Result<Self, Self::Error> {
        let placement = Placement {
            position: DVec3::from_array(desc.position),
            rotation: DVec3::from_array(desc.rotation_deg.map(f64::to_radians)),
            scale: desc.scale,
        };
        TrackedObject::new(
            ObjectId(desc.id),
            desc.name,
            desc.levels,
            placement,
            desc.area,
            desc.frame_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(sizes: &[u64]) -> Vec<Level> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, s)| Level::new(i, *s, 0, i as f64))
            .collect()
    }

    #[test]
    fn rejects_empty_catalog() {
        let err = TrackedObject::new(ObjectId(1), "empty", Vec::new(), Placement::default(), 1.0, 10)
            .unwrap_err();
        assert_eq!(err, ObjectError::NoLevels("empty".into()));
    }

    #[test]
    fn rejects_shrinking_levels() {
        let err = TrackedObject::new(
            ObjectId(1),
            "shrinks",
            levels(&[10, 30, 20]),
            Placement::default(),
            1.0,
            10,
        )
        .unwrap_err();
        assert!(matches!(err, ObjectError::SizeDecreases { level: 2, .. }));
    }

    #[test]
    fn level_size_sums_geometry_and_texture() {
        let obj = TrackedObject::new(
            ObjectId(7),
            "textured",
            vec![Level::new(0, 100, 50, 0.1), Level::new(1, 200, 80, 0.4)],
            Placement::default(),
            2.0,
            300,
        )
        .unwrap();
        assert_eq!(obj.level_size(0), Some(150));
        assert_eq!(obj.level_size(1), Some(280));
        assert_eq!(obj.level_size(2), None);
        assert_eq!(obj.max_level(), 1);
    }

    #[test]
    fn descriptor_converts_degrees() {
        let json = r#"{
            "id": 3,
            "name": "AxeGuy",
            "levels": [{"index": 0, "geometryBytes": 10, "textureBytes": 0, "qualityScore": 0.2}],
            "position": [1.0, 0.0, -2.0],
            "rotationDeg": [0.0, 180.0, 0.0],
            "scale": 0.5,
            "area": 4.0,
            "frameCount": 600
        }"#;
        let desc: ObjectDescriptor = serde_json::from_str(json).unwrap();
        let obj = TrackedObject::try_from(desc).unwrap();
        assert_eq!(obj.id(), ObjectId(3));
        assert!((obj.placement().rotation.y - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(obj.frame_count(), 600);
    }
}

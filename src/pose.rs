//! Camera poses and the fixed-capacity sample store behind viewport prediction.
//!
//! The store keeps roughly one second of history: its capacity equals the
//! target playback frame rate and one sample is recorded per rendered frame.
//! Slots are reused in place, so eviction of the oldest sample is O(1).
use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera position plus pitch/yaw/roll rotation (radians).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: DVec3,
    pub rotation: DVec3,
}

impl Pose {
    pub fn new(position: DVec3, rotation: DVec3) -> Self {
        Self { position, rotation }
    }

    /// The six scalar channels in `x, y, z, pitch, yaw, roll` order.
    pub fn channels(&self) -> [f64; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        ]
    }

    pub fn from_channels(c: [f64; 6]) -> Self {
        Self {
            position: DVec3::new(c[0], c[1], c[2]),
            rotation: DVec3::new(c[3], c[4], c[5]),
        }
    }

    /// Same position, re-aimed so the view direction points at `target`.
    ///
    /// Uses a y-up, +z-forward convention: yaw around y, positive pitch looks
    /// down. Roll is cleared. A target at the camera position keeps the pose.
    pub fn looking_at(&self, target: DVec3) -> Self {
        let dir = target - self.position;
        if dir.length_squared() == 0.0 {
            return *self;
        }
        let horizontal = (dir.x * dir.x + dir.z * dir.z).sqrt();
        let yaw = dir.x.atan2(dir.z);
        let pitch = (-dir.y).atan2(horizontal);
        Self {
            position: self.position,
            rotation: DVec3::new(pitch, yaw, 0.0),
        }
    }
}

/// One camera observation. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub pose: Pose,
    pub timestamp_ms: f64,
}

impl PoseSample {
    pub fn new(pose: Pose, timestamp_ms: f64) -> Self {
        Self { pose, timestamp_ms }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoseStoreError {
    #[error("pose sample store capacity must be at least 1")]
    ZeroCapacity,
}

/// Fixed-capacity ring of pose samples, oldest first on iteration.
#[derive(Debug, Clone)]
pub struct PoseSampleStore {
    slots: Vec<PoseSample>,
    capacity: usize,
    // Index of the oldest sample once the ring is full; 0 until then.
    head: usize,
}

impl PoseSampleStore {
    pub fn new(capacity: usize) -> Result<Self, PoseStoreError> {
        if capacity == 0 {
            return Err(PoseStoreError::ZeroCapacity);
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        })
    }

    /// Appends a sample, overwriting the oldest once capacity is reached.
    pub fn record(&mut self, sample: PoseSample) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Iterates retained samples oldest-first.
    pub fn samples(&self) -> impl Iterator<Item = &PoseSample> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn to_vec(&self) -> Vec<PoseSample> {
        self.samples().copied().collect()
    }

    pub fn latest(&self) -> Option<&PoseSample> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = (self.head + self.slots.len() - 1) % self.slots.len();
        self.slots.get(idx)
    }

    /// The two most recent samples as `(second_last, last)`.
    pub fn last_two(&self) -> Option<(&PoseSample, &PoseSample)> {
        let len = self.slots.len();
        if len < 2 {
            return None;
        }
        let last = (self.head + len - 1) % len;
        let second = (self.head + len - 2) % len;
        Some((&self.slots[second], &self.slots[last]))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}

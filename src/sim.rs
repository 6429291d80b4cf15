//! In-process retrieval and visibility stand-ins for tests and benchmarks.
//!
//! [`SimulatedFetcher`] sleeps on the tokio clock for the time a download of
//! the requested level would take over a fixed-bandwidth link, so sessions can
//! be driven end to end under a paused runtime.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::budget::DownloadTiming;
use crate::object::{ObjectId, TrackedObject};
use crate::playback::{PayloadHandle, Segment};
use crate::pose::Pose;
use crate::session::{FetchError, FetchedSegment, SegmentFetcher};
use crate::utility::VisibilityOracle;

pub struct SimulatedFetcher {
    bandwidth_bytes_per_sec: f64,
    latency: Duration,
    failures: Mutex<HashSet<(ObjectId, u32)>>,
    next_payload: AtomicU64,
}

impl SimulatedFetcher {
    pub fn new(bandwidth_bytes_per_sec: f64, latency: Duration) -> Self {
        Self {
            bandwidth_bytes_per_sec,
            latency,
            failures: Mutex::new(HashSet::new()),
            next_payload: AtomicU64::new(1),
        }
    }

    /// Makes the next fetch of `(object, frame_index)` fail once.
    pub fn fail_once(&self, object: ObjectId, frame_index: u32) {
        self.failures.lock().insert((object, frame_index));
    }

    fn transfer_time(&self, bytes: u64) -> Duration {
        let secs = if self.bandwidth_bytes_per_sec > 0.0 {
            bytes as f64 / self.bandwidth_bytes_per_sec
        } else {
            0.0
        };
        self.latency + Duration::from_secs_f64(secs)
    }
}

#[async_trait]
impl SegmentFetcher for SimulatedFetcher {
    async fn fetch_segment(
        &self,
        object: &TrackedObject,
        frame_index: u32,
        level: usize,
    ) -> Result<FetchedSegment, FetchError> {
        let bytes = object.level_size(level).ok_or(FetchError::UnknownLevel {
            object: object.id(),
            level,
        })?;
        if frame_index == 0 || frame_index > object.frame_count() {
            return Err(FetchError::NotFound {
                object: object.id(),
                frame_index,
            });
        }
        let elapsed = self.transfer_time(bytes);
        tokio::time::sleep(elapsed).await;
        let injected = self.failures.lock().remove(&(object.id(), frame_index));
        if injected {
            return Err(FetchError::Transport(format!("injected failure for {}", object.id())));
        }
        Ok(FetchedSegment {
            segment: Segment {
                object_id: object.id(),
                frame_index,
                level,
                bytes,
                payload: PayloadHandle(self.next_payload.fetch_add(1, Ordering::Relaxed)),
            },
            timing: DownloadTiming {
                bytes,
                transfer_ms: elapsed.as_secs_f64() * 1000.0,
                decode_ms: None,
            },
        })
    }
}

/// Oracle with a fixed visible set and a constant projected area.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    visible: HashSet<ObjectId>,
    area: f64,
}

impl StaticOracle {
    pub fn new(visible: impl IntoIterator<Item = ObjectId>, area: f64) -> Self {
        Self {
            visible: visible.into_iter().collect(),
            area,
        }
    }
}

impl VisibilityOracle for StaticOracle {
    fn is_visible(&self, object: &TrackedObject, _pose: &Pose) -> bool {
        self.visible.contains(&object.id())
    }

    fn projected_screen_area(&self, object: &TrackedObject, pose: &Pose) -> f64 {
        if self.is_visible(object, pose) {
            self.area
        } else {
            0.0
        }
    }
}

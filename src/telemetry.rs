//! Telemetry records for decision cycles, downloads and playback.
//!
//! Every record is `Serialize` so collectors can export JSON lines. The
//! session id ties records from one run together.
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::abr::LevelAssignment;
use crate::budget::DownloadTiming;
use crate::object::ObjectId;
use crate::playback::{PlaybackEvent, PlaybackState};
use crate::pose::Pose;

/// One decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub session_id: Uuid,
    pub segment_no: u32,
    pub at_ms: f64,
    pub strategy: &'static str,
    pub metric: &'static str,
    pub current_pose: Pose,
    /// Absent when the strategy ignores visibility or playback has not started.
    pub predicted_pose: Option<Pose>,
    pub prediction_horizon_secs: Option<f64>,
    pub bandwidth_bytes_per_sec: f64,
    pub byte_budget: f64,
    pub used_bytes: u64,
    pub buffer_secs: f64,
    pub assignments: Vec<LevelAssignment>,
}

/// One completed segment download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub session_id: Uuid,
    pub object_id: ObjectId,
    pub frame_index: u32,
    pub level: usize,
    pub timing: DownloadTiming,
}

/// End-of-session summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub config_id: String,
    pub abr_strategy: &'static str,
    pub vp_strategy: &'static str,
    pub metric: &'static str,
    pub target_fps: u32,
    pub startup_buffer_secs: f64,
    pub resume_buffer_secs: f64,
    pub bola_v: Option<f64>,
    pub bola_gamma: Option<f64>,
    pub segments_retrieved: u32,
    pub bytes_retrieved: u64,
    pub playback: PlaybackState,
    pub playback_duration_ms: Option<f64>,
    pub playback_fps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Decision(DecisionRecord),
    Download(DownloadRecord),
    Playback { session_id: Uuid, event: PlaybackEvent },
    Summary(SessionSummary),
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::Decision(_) => "decision",
            TelemetryEvent::Download(_) => "download",
            TelemetryEvent::Playback { .. } => "playback",
            TelemetryEvent::Summary(_) => "summary",
        }
    }
}

/// Receives telemetry from a session. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TelemetryEvent::Decision(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn playback_events(&self) -> Vec<PlaybackEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TelemetryEvent::Playback { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let events = self.events.lock();
        let mut out = String::new();
        for event in events.iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards events to `tracing`: summaries at info, everything else at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        let kind = event.kind();
        let body = serde_json::to_string(&event).unwrap_or_default();
        match event {
            TelemetryEvent::Summary(_) => info!(target: "dmesh::telemetry", kind, %body),
            _ => debug!(target: "dmesh::telemetry", kind, %body),
        }
    }
}

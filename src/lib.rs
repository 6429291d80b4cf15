//! Viewport-adaptive streaming core for dynamic 3D mesh scenes.
//!
//! Decides, segment by segment, which quality level of every tracked object to
//! download given the bandwidth estimate, the predicted camera viewport and the
//! playback buffer, and plays the fetched segments back frame-synchronously
//! with stall/resume accounting. Rendering, decoding and HTTP transport stay
//! outside the crate behind the [`SegmentFetcher`], [`VisibilityOracle`] and
//! [`FrameSink`] traits.

pub mod abr;
pub mod budget;
pub mod config;
pub mod object;
pub mod playback;
pub mod pose;
pub mod predict;
pub mod session;
pub mod sim;
pub mod telemetry;
pub mod utility;

pub use abr::{AbrDecision, AbrEngine, AbrStrategy, BolaParams, Candidate, LevelAssignment, ReplayTable};
pub use budget::{BudgetSnapshot, NetworkSpeedSampler, ThroughputMonitor};
pub use config::{CompiledConfig, ConfigError, SessionConfig};
pub use object::{Level, ObjectId, Placement, TrackedObject};
pub use playback::{BufferOccupancySnapshot, PlaybackEvent, PlaybackScheduler, Segment, TickOutcome};
pub use pose::{Pose, PoseSample, PoseSampleStore};
pub use predict::{ViewportPredictor, VpStrategy};
pub use session::{
    spawn_playback, FetchError, FetchedSegment, FrameSink, PlaybackHandle, SegmentFetcher, SessionError,
    StreamingSession,
};
pub use telemetry::{MemoryTelemetry, SessionSummary, TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use utility::{MetricSelector, UtilityEvaluator, VisibilityOracle};

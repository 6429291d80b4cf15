//! One streaming session: pose history, decisions, retrieval and playback.
//!
//! The session owns one instance of every component and is shared behind an
//! `Arc` between the retrieval loop and the frame driver. Retrieval is a
//! barrier: one decision per segment, every object's download issued
//! concurrently, and the next segment only planned once all of them resolved.
//! No lock is held across an await point.
pub mod driver;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::abr::{AbrDecision, AbrEngine, AbrStrategy, Candidate};
use crate::budget::{BudgetSnapshot, DownloadTiming, NetworkSpeedSampler, ThroughputMonitor};
use crate::config::{CompiledConfig, ConfigError};
use crate::object::{ObjectDescriptor, ObjectError, ObjectId, TrackedObject};
use crate::playback::{PlaybackError, PlaybackEvent, PlaybackScheduler, Segment, TickOutcome};
use crate::pose::{Pose, PoseSample, PoseSampleStore, PoseStoreError};
use crate::predict::ViewportPredictor;
use crate::telemetry::{DecisionRecord, DownloadRecord, SessionSummary, TelemetryEvent, TelemetrySink};
use crate::utility::{UtilityError, UtilityEvaluator, VisibilityOracle};

pub use driver::{spawn_playback, FrameSink, PlaybackHandle};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{object} has no level {level}")]
    UnknownLevel { object: ObjectId, level: usize },
    #[error("frame {frame_index} of {object} is not available")]
    NotFound { object: ObjectId, frame_index: u32 },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("requested frame {expected_frame} of {expected}, got frame {found_frame} of {found}")]
    Mismatch {
        expected: ObjectId,
        expected_frame: u32,
        found: ObjectId,
        found_frame: u32,
    },
}

/// A downloaded segment and how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSegment {
    pub segment: Segment,
    pub timing: DownloadTiming,
}

/// Retrieval layer: downloads and decodes one object's segment.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    async fn fetch_segment(
        &self,
        object: &TrackedObject,
        frame_index: u32,
        level: usize,
    ) -> Result<FetchedSegment, FetchError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session needs at least one object")]
    NoObjects,
    #[error("object id {0} is used twice")]
    DuplicateObject(ObjectId),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Utility(#[from] UtilityError),
    #[error(transparent)]
    PoseStore(#[from] PoseStoreError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("fetching frame {frame_index} of {object} failed: {source}")]
    Fetch {
        object: ObjectId,
        frame_index: u32,
        #[source]
        source: FetchError,
    },
    #[error("retrieval task failed: {0}")]
    Join(String),
}

#[derive(Debug, Default, Clone, Copy)]
struct RetrievalStats {
    segments: u32,
    bytes: u64,
}

pub struct StreamingSession {
    id: Uuid,
    config: CompiledConfig,
    objects: Vec<Arc<TrackedObject>>,
    oracle: Option<Arc<dyn VisibilityOracle>>,
    telemetry: Arc<dyn TelemetrySink>,
    predictor: ViewportPredictor,
    poses: Mutex<PoseSampleStore>,
    engine: Mutex<AbrEngine>,
    throughput: Mutex<ThroughputMonitor>,
    scheduler: Mutex<PlaybackScheduler>,
    stats: Mutex<RetrievalStats>,
    epoch: Instant,
}

impl StreamingSession {
    /// Builds a session, failing fast on any configuration problem.
    ///
    /// # Errors
    /// * [`SessionError::NoObjects`] / [`SessionError::DuplicateObject`] for a bad object set.
    /// * [`UtilityError::OracleRequired`] when the metric needs a visibility oracle and none is given.
    pub fn new(
        config: CompiledConfig,
        objects: Vec<TrackedObject>,
        oracle: Option<Arc<dyn VisibilityOracle>>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, SessionError> {
        if objects.is_empty() {
            return Err(SessionError::NoObjects);
        }
        let mut seen = HashSet::new();
        for object in &objects {
            if !seen.insert(object.id()) {
                return Err(SessionError::DuplicateObject(object.id()));
            }
        }
        let metric = config.metric();
        if metric.requires_oracle() && oracle.is_none() {
            return Err(UtilityError::OracleRequired(metric).into());
        }

        let fps = config.target_fps();
        let scheduler = PlaybackScheduler::new(
            objects.iter(),
            fps,
            config.startup_buffer_secs(),
            config.resume_buffer_secs(),
        )?;
        let poses = PoseSampleStore::new(fps as usize)?;
        let engine = match config.rng_seed() {
            Some(seed) => AbrEngine::with_seed(config.abr().clone(), seed),
            None => AbrEngine::new(config.abr().clone()),
        };
        let throughput = ThroughputMonitor::new(config.throughput_window(), config.initial_bandwidth_bytes_per_sec());
        let id = Uuid::new_v4();

        info!(
            session = %id,
            config_id = config.config_id(),
            abr = config.abr().as_str(),
            vp = config.vp_strategy().as_str(),
            metric = metric.as_str(),
            objects = objects.len(),
            "streaming session created"
        );

        Ok(Self {
            id,
            predictor: ViewportPredictor::new(config.vp_strategy()),
            config,
            objects: objects.into_iter().map(Arc::new).collect(),
            oracle,
            telemetry,
            poses: Mutex::new(poses),
            engine: Mutex::new(engine),
            throughput: Mutex::new(throughput),
            scheduler: Mutex::new(scheduler),
            stats: Mutex::new(RetrievalStats::default()),
            epoch: Instant::now(),
        })
    }

    /// Like [`new`](Self::new), converting serialized descriptors first.
    pub fn from_descriptors(
        config: CompiledConfig,
        descriptors: Vec<ObjectDescriptor>,
        oracle: Option<Arc<dyn VisibilityOracle>>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, SessionError> {
        let objects = descriptors
            .into_iter()
            .map(TrackedObject::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(config, objects, oracle, telemetry)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.config
    }

    pub fn objects(&self) -> &[Arc<TrackedObject>] {
        &self.objects
    }

    /// Milliseconds since the session was created.
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    /// Frames the session will play.
    pub fn stream_length(&self) -> u32 {
        self.scheduler.lock().stream_length()
    }

    pub fn record_pose(&self, pose: Pose) {
        let sample = PoseSample::new(pose, self.now_ms());
        self.poses.lock().record(sample);
    }

    pub fn record_pose_at(&self, pose: Pose, timestamp_ms: f64) {
        self.poses.lock().record(PoseSample::new(pose, timestamp_ms));
    }

    /// Latest recorded pose, or the origin before any sample.
    pub fn current_pose(&self) -> Pose {
        self.poses.lock().latest().map(|s| s.pose).unwrap_or_default()
    }

    fn utility_of(&self, evaluator: &UtilityEvaluator<'_>, object: &TrackedObject, pose: &Pose) -> f64 {
        match evaluator.score(self.config.metric(), object, pose) {
            Ok(score) => score,
            Err(UtilityError::CoincidentPositions) => {
                warn!(object = object.name(), "camera coincides with object; treating utility as maximal");
                f64::MAX
            }
            Err(err) => {
                warn!(object = object.name(), error = %err, "utility unavailable; using 0");
                0.0
            }
        }
    }

    /// Decides the level of every object for `segment_no` at `now_ms`.
    pub fn plan_segment(&self, segment_no: u32, now_ms: f64) -> AbrDecision {
        let current = self.current_pose();
        let occupancy = self.scheduler.lock().occupancy();
        let mut engine = self.engine.lock();
        let strategy: &AbrStrategy = engine.strategy();

        let horizon = strategy.prediction_horizon_secs(segment_no, &occupancy);
        // Nothing has been rendered to judge visibility against until frame 2.
        let predicted = match horizon {
            Some(h) if occupancy.has_started_after_startup_delay => {
                let poses = self.poses.lock();
                Some(self.predictor.predict_or_current(&poses, current, now_ms, h))
            }
            _ => None,
        };

        let uses_utility = strategy.uses_utility();
        let evaluator = UtilityEvaluator::new(self.oracle.as_deref());
        let candidates: Vec<Candidate<'_>> = self
            .objects
            .iter()
            .map(|object| {
                let visible = match (&predicted, &self.oracle) {
                    (Some(pose), Some(oracle)) => oracle.is_visible(object, pose),
                    _ => true,
                };
                let utility = if uses_utility {
                    self.utility_of(&evaluator, object, &current)
                } else {
                    -1.0
                };
                Candidate::new(object, utility, visible)
            })
            .collect();

        let bandwidth = self.throughput.lock().current_bandwidth_estimate();
        let budget = BudgetSnapshot::for_frame_rate(bandwidth, self.config.target_fps());
        let decision = engine.decide(segment_no, &candidates, &budget, &occupancy);
        drop(engine);

        self.telemetry.record(TelemetryEvent::Decision(DecisionRecord {
            session_id: self.id,
            segment_no,
            at_ms: now_ms,
            strategy: decision.strategy,
            metric: self.config.metric().as_str(),
            current_pose: current,
            predicted_pose: predicted,
            prediction_horizon_secs: horizon,
            bandwidth_bytes_per_sec: bandwidth,
            byte_budget: decision.byte_budget,
            used_bytes: decision.used_bytes,
            buffer_secs: occupancy.occupancy_secs(),
            assignments: decision.assignments.clone(),
        }));
        decision
    }

    fn object(&self, id: ObjectId) -> Option<&Arc<TrackedObject>> {
        self.objects.iter().find(|object| object.id() == id)
    }

    /// Plans `segment_no`, downloads every object's segment concurrently and
    /// buffers them once all downloads have resolved.
    ///
    /// # Errors
    /// A failed download, or a segment for a different object or frame than
    /// requested, fails the whole barrier and nothing is buffered, so the same
    /// segment can be retried.
    pub async fn retrieve_segment<F>(&self, segment_no: u32, fetcher: &Arc<F>) -> Result<AbrDecision, SessionError>
    where
        F: SegmentFetcher + 'static,
    {
        let decision = self.plan_segment(segment_no, self.now_ms());

        let mut downloads = JoinSet::new();
        for assignment in &decision.assignments {
            let Some(object) = self.object(assignment.object_id).cloned() else {
                continue;
            };
            let fetcher = Arc::clone(fetcher);
            let level = assignment.level;
            downloads.spawn(async move {
                let result = fetcher.fetch_segment(&object, segment_no, level).await;
                (object.id(), result)
            });
        }

        let mut fetched = Vec::with_capacity(decision.assignments.len());
        let mut failure = None;
        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok((object, Ok(item)))
                    if item.segment.object_id == object && item.segment.frame_index == segment_no =>
                {
                    fetched.push(item)
                }
                Ok((object, Ok(item))) => {
                    failure.get_or_insert(SessionError::Fetch {
                        object,
                        frame_index: segment_no,
                        source: FetchError::Mismatch {
                            expected: object,
                            expected_frame: segment_no,
                            found: item.segment.object_id,
                            found_frame: item.segment.frame_index,
                        },
                    });
                }
                Ok((object, Err(source))) => {
                    failure.get_or_insert(SessionError::Fetch {
                        object,
                        frame_index: segment_no,
                        source,
                    });
                }
                Err(err) => {
                    failure.get_or_insert(SessionError::Join(err.to_string()));
                }
            }
        }
        if let Some(err) = failure {
            warn!(segment_no, error = %err, "retrieval barrier failed");
            return Err(err);
        }

        self.scheduler
            .lock()
            .push_frame(fetched.iter().map(|f| f.segment.clone()).collect())?;
        let timings: Vec<DownloadTiming> = fetched.iter().map(|f| f.timing).collect();
        let sample = self.throughput.lock().record_barrier(&timings);
        {
            let mut stats = self.stats.lock();
            stats.segments += fetched.len() as u32;
            stats.bytes += timings.iter().map(|t| t.bytes).sum::<u64>();
        }
        for item in fetched {
            self.telemetry.record(TelemetryEvent::Download(DownloadRecord {
                session_id: self.id,
                object_id: item.segment.object_id,
                frame_index: item.segment.frame_index,
                level: item.segment.level,
                timing: item.timing,
            }));
        }
        debug!(segment_no, bandwidth_sample = ?sample, "retrieval barrier complete");
        Ok(decision)
    }

    /// Retrieves every segment in order until the stream or playback ends.
    pub async fn run_retrieval<F>(&self, fetcher: Arc<F>) -> Result<(), SessionError>
    where
        F: SegmentFetcher + 'static,
    {
        let last = self.stream_length();
        for segment_no in 1..=last {
            let ended = self.scheduler.lock().is_ended();
            if ended {
                debug!(segment_no, "playback ended; stopping retrieval");
                break;
            }
            self.retrieve_segment(segment_no, &fetcher).await?;
        }
        Ok(())
    }

    fn forward_playback_events(&self, events: Vec<PlaybackEvent>) {
        for event in events {
            self.telemetry.record(TelemetryEvent::Playback {
                session_id: self.id,
                event,
            });
        }
    }

    pub fn start_playback(&self) -> Result<(), SessionError> {
        let now = self.now_ms();
        let events = {
            let mut scheduler = self.scheduler.lock();
            scheduler.start(now)?;
            scheduler.drain_events()
        };
        self.forward_playback_events(events);
        Ok(())
    }

    /// Advances the scheduler to the current time.
    pub fn tick_playback(&self) -> Result<TickOutcome, SessionError> {
        let now = self.now_ms();
        let (outcome, events) = {
            let mut scheduler = self.scheduler.lock();
            let outcome = scheduler.tick(now);
            (outcome, scheduler.drain_events())
        };
        self.forward_playback_events(events);
        Ok(outcome?)
    }

    pub fn stop_playback(&self) -> Result<(), SessionError> {
        let now = self.now_ms();
        let events = {
            let mut scheduler = self.scheduler.lock();
            scheduler.stop(now)?;
            scheduler.drain_events()
        };
        self.forward_playback_events(events);
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.scheduler.lock().is_ended()
    }

    pub fn summary(&self) -> SessionSummary {
        let playback = *self.scheduler.lock().state();
        let stats = *self.stats.lock();
        let (bola_v, bola_gamma) = match self.config.abr() {
            AbrStrategy::Bola(params) => (Some(params.v), Some(params.gamma)),
            _ => (None, None),
        };
        SessionSummary {
            session_id: self.id,
            config_id: self.config.config_id().to_string(),
            abr_strategy: self.config.abr().as_str(),
            vp_strategy: self.config.vp_strategy().as_str(),
            metric: self.config.metric().as_str(),
            target_fps: self.config.target_fps(),
            startup_buffer_secs: self.config.startup_buffer_secs(),
            resume_buffer_secs: self.config.resume_buffer_secs(),
            bola_v,
            bola_gamma,
            segments_retrieved: stats.segments,
            bytes_retrieved: stats.bytes,
            playback_duration_ms: playback.playback_duration_ms(),
            playback_fps: playback.playback_fps(),
            playback,
        }
    }

    /// Records the summary to telemetry and returns it.
    pub fn finish(&self) -> SessionSummary {
        let summary = self.summary();
        info!(
            session = %self.id,
            frames = summary.playback.frames_rendered,
            stalls = summary.playback.num_stalls,
            startup_delay_ms = summary.playback.startup_delay_ms,
            "streaming session finished"
        );
        self.telemetry.record(TelemetryEvent::Summary(summary.clone()));
        summary
    }
}

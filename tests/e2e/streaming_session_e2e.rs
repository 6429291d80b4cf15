use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dmesh::abr::AbrStrategy;
use dmesh::config::SessionConfig;
use dmesh::object::{Level, ObjectId, Placement, TrackedObject};
use dmesh::playback::{PlaybackEvent, Segment, StallKind};
use dmesh::pose::Pose;
use dmesh::predict::VpStrategy;
use dmesh::session::{
    spawn_playback, FetchError, FetchedSegment, FrameSink, SegmentFetcher, SessionError, StreamingSession,
};
use dmesh::sim::{SimulatedFetcher, StaticOracle};
use dmesh::telemetry::{MemoryTelemetry, TelemetryEvent, TracingTelemetry};
use dmesh::utility::{MetricSelector, VisibilityOracle};
use glam::DVec3;

const FRAMES: u32 = 48;

fn mesh(id: u32, z: f64) -> TrackedObject {
    let levels = (0..4)
        .map(|i| Level::new(i, 8_000 * (i as u64 + 1), 2_000 * (i as u64 + 1), i as f64))
        .collect();
    let placement = Placement {
        position: DVec3::new(0.0, 0.0, z),
        ..Placement::default()
    };
    TrackedObject::new(ObjectId(id), format!("mesh-{id}"), levels, placement, 2.0, FRAMES).unwrap()
}

fn config() -> SessionConfig {
    SessionConfig {
        target_fps: 24,
        startup_buffer_secs: 0.5,
        resume_buffer_secs: 0.25,
        abr: AbrStrategy::Greedy,
        vp_strategy: VpStrategy::LinearRegression,
        metric: MetricSelector::Distance,
        rng_seed: Some(7),
        ..SessionConfig::default()
    }
}

/// Camera dollying sideways, one step per rendered frame.
#[derive(Default)]
struct DollyCamera {
    frames: AtomicU32,
    segments: AtomicU32,
}

impl FrameSink for DollyCamera {
    fn present(&self, frame_no: u32, segments: &[Segment]) -> Option<Pose> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.segments.fetch_add(segments.len() as u32, Ordering::SeqCst);
        let position = DVec3::new(0.05 * f64::from(frame_no), 0.0, 0.0);
        Some(Pose::new(position, DVec3::ZERO))
    }
}

#[tokio::test(start_paused = true)]
async fn session_streams_and_plays_every_frame() -> Result<(), Box<dyn Error>> {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let oracle: Arc<dyn VisibilityOracle> = Arc::new(StaticOracle::new([ObjectId(1)], 1.0));
    let session = Arc::new(StreamingSession::new(
        config().compile()?,
        vec![mesh(1, 3.0), mesh(2, 6.0)],
        Some(oracle),
        telemetry.clone(),
    )?);
    let fetcher = Arc::new(SimulatedFetcher::new(2_000_000.0, Duration::from_millis(5)));
    let camera = Arc::new(DollyCamera::default());

    let retrieval = tokio::spawn({
        let session = Arc::clone(&session);
        let fetcher = Arc::clone(&fetcher);
        async move { session.run_retrieval(fetcher).await }
    });
    let playback = spawn_playback(Arc::clone(&session), camera.clone())?;
    playback.wait().await?;
    retrieval.await??;

    let summary = session.finish();
    assert_eq!(summary.playback.frames_rendered, FRAMES);
    assert_eq!(camera.frames.load(Ordering::SeqCst), FRAMES);
    assert_eq!(camera.segments.load(Ordering::SeqCst), 2 * FRAMES);
    assert_eq!(summary.segments_retrieved, 2 * FRAMES);
    assert!(summary.playback.startup_delay_ms > 0.0);
    assert!(summary.playback.ended_at_ms.is_some());
    assert_eq!(summary.abr_strategy, "Greedy2");
    assert_eq!(summary.vp_strategy, "LinearRegression");

    let decisions = telemetry.decisions();
    assert_eq!(decisions.len(), FRAMES as usize);
    let predicted: Vec<_> = decisions.iter().filter(|d| d.predicted_pose.is_some()).collect();
    assert!(!predicted.is_empty(), "no decision ran after playback started");
    for decision in predicted {
        let hidden = decision
            .assignments
            .iter()
            .find(|a| a.object_id == ObjectId(2))
            .ok_or("missing assignment")?;
        assert!(!hidden.predicted_visible);
        assert_eq!(hidden.level, 0);
    }

    let events = telemetry.snapshot();
    let downloads = events.iter().filter(|e| e.kind() == "download").count();
    assert_eq!(downloads, 2 * FRAMES as usize);
    assert!(matches!(events.last(), Some(TelemetryEvent::Summary(_))));

    let playback_events = telemetry.playback_events();
    assert!(matches!(playback_events.first(), Some(PlaybackEvent::Started { .. })));
    assert!(playback_events
        .iter()
        .any(|e| matches!(e, PlaybackEvent::StallEnded { kind: StallKind::Startup, .. })));
    assert!(matches!(
        playback_events.last(),
        Some(PlaybackEvent::Ended { stopped: false, .. })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_download_leaves_segment_retryable() -> Result<(), Box<dyn Error>> {
    let session = StreamingSession::new(
        config().compile()?,
        vec![mesh(1, 3.0), mesh(2, 6.0)],
        None,
        Arc::new(TracingTelemetry),
    )?;
    let fetcher = Arc::new(SimulatedFetcher::new(1_000_000.0, Duration::from_millis(2)));
    fetcher.fail_once(ObjectId(2), 1);

    match session.retrieve_segment(1, &fetcher).await {
        Err(SessionError::Fetch {
            object, frame_index, ..
        }) => {
            assert_eq!(object, ObjectId(2));
            assert_eq!(frame_index, 1);
        }
        other => panic!("expected a fetch failure, got {other:?}"),
    }
    assert_eq!(session.summary().segments_retrieved, 0);

    let decision = session.retrieve_segment(1, &fetcher).await?;
    assert_eq!(decision.segment_no, 1);
    assert_eq!(session.summary().segments_retrieved, 2);
    Ok(())
}

/// Labels object 2's first segment with the wrong frame.
struct MislabelingFetcher {
    inner: SimulatedFetcher,
    mislabeled: AtomicBool,
}

#[async_trait]
impl SegmentFetcher for MislabelingFetcher {
    async fn fetch_segment(
        &self,
        object: &TrackedObject,
        frame_index: u32,
        level: usize,
    ) -> Result<FetchedSegment, FetchError> {
        let mut fetched = self.inner.fetch_segment(object, frame_index, level).await?;
        if object.id() == ObjectId(2) && !self.mislabeled.swap(true, Ordering::SeqCst) {
            fetched.segment.frame_index += 1;
        }
        Ok(fetched)
    }
}

#[tokio::test(start_paused = true)]
async fn mislabeled_segment_buffers_nothing() -> Result<(), Box<dyn Error>> {
    let session = StreamingSession::new(
        config().compile()?,
        vec![mesh(1, 3.0), mesh(2, 6.0)],
        None,
        Arc::new(MemoryTelemetry::new()),
    )?;
    let fetcher = Arc::new(MislabelingFetcher {
        inner: SimulatedFetcher::new(1_000_000.0, Duration::from_millis(2)),
        mislabeled: AtomicBool::new(false),
    });

    match session.retrieve_segment(1, &fetcher).await {
        Err(SessionError::Fetch {
            object,
            source: FetchError::Mismatch { found_frame, .. },
            ..
        }) => {
            assert_eq!(object, ObjectId(2));
            assert_eq!(found_frame, 2);
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
    assert_eq!(session.summary().segments_retrieved, 0);

    // object 1's segment was not kept, so both frames retrieve in order
    session.retrieve_segment(1, &fetcher).await?;
    session.retrieve_segment(2, &fetcher).await?;
    assert_eq!(session.summary().segments_retrieved, 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stopping_a_starved_session_ends_playback() -> Result<(), Box<dyn Error>> {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let session = Arc::new(StreamingSession::new(
        config().compile()?,
        vec![mesh(1, 3.0)],
        None,
        telemetry.clone(),
    )?);
    let handle = spawn_playback(Arc::clone(&session), Arc::new(DollyCamera::default()))?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!handle.is_finished());

    handle.stop()?;
    assert!(session.is_ended());
    let summary = session.summary();
    assert_eq!(summary.playback.frames_rendered, 0);
    assert_eq!(summary.playback.startup_delay_ms, 0.0);
    assert!(matches!(
        telemetry.playback_events().last(),
        Some(PlaybackEvent::Ended { stopped: true, .. })
    ));
    Ok(())
}

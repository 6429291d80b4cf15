//! Frame driver task that polls the playback scheduler on a tokio interval.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::playback::{Segment, TickOutcome};
use crate::pose::Pose;
use crate::session::{SessionError, StreamingSession};

/// Renderer hook called once per rendered frame.
pub trait FrameSink: Send + Sync {
    /// Presents `segments` as frame `frame_no` and returns the camera pose
    /// observed after rendering, if the renderer tracks one.
    fn present(&self, frame_no: u32, segments: &[Segment]) -> Option<Pose>;
}

/// Handle to a running frame driver.
///
/// # Guarantees
/// * `stop()` aborts the driver task and ends playback; in-flight downloads
///   may still complete but are never rendered.
pub struct PlaybackHandle {
    session: Arc<StreamingSession>,
    task: JoinHandle<()>,
}

impl PlaybackHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Aborts the driver and marks playback ended.
    pub fn stop(self) -> Result<(), SessionError> {
        self.task.abort();
        self.session.stop_playback()
    }

    /// Waits for playback to reach the end of the stream.
    pub async fn wait(self) -> Result<(), SessionError> {
        self.task.await.map_err(|err| SessionError::Join(err.to_string()))
    }
}

/// Starts playback and spawns the frame driver.
///
/// The scheduler is polled four times per frame interval; its own frame clock
/// decides when a frame is actually due.
pub fn spawn_playback(
    session: Arc<StreamingSession>,
    sink: Arc<dyn FrameSink>,
) -> Result<PlaybackHandle, SessionError> {
    session.start_playback()?;
    let frame_ms = 1000.0 / f64::from(session.config().target_fps());
    let poll = Duration::from_secs_f64(frame_ms / 4000.0).max(Duration::from_millis(1));
    let task = tokio::spawn(drive(Arc::clone(&session), sink, poll));
    Ok(PlaybackHandle { session, task })
}

async fn drive(session: Arc<StreamingSession>, sink: Arc<dyn FrameSink>, poll: Duration) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match session.tick_playback() {
            Ok(TickOutcome::Rendered {
                frame_no,
                segments,
                ended,
            }) => {
                if let Some(pose) = sink.present(frame_no, &segments) {
                    session.record_pose(pose);
                }
                if ended {
                    break;
                }
            }
            Ok(TickOutcome::Inactive) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "playback tick failed; stopping driver");
                break;
            }
        }
    }
}

//! Frame-synchronous playback over per-object segment buffers.
//!
//! The scheduler renders a frame only when every object has its segment for
//! that frame; otherwise it stalls and waits until the buffers are deep enough
//! to resume. It is driven by explicit wall-clock timestamps so it can be
//! exercised deterministically, and it records every transition as a
//! [`PlaybackEvent`] for telemetry.
pub mod buffer;
pub mod clock;
pub mod state;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::object::{ObjectId, TrackedObject};

pub use buffer::{BufferError, ObjectBuffer, PayloadHandle, Segment};
pub use clock::FrameClock;
pub use state::{PlaybackEvent, PlaybackPhase, PlaybackState, PlaybackStateError, StallKind};

/// Buffer occupancy captured for one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferOccupancySnapshot {
    pub next_frame_no: u32,
    /// Lowest `buffered_through` across all objects.
    pub min_buffered_through: u32,
    pub target_fps: u32,
    pub has_started_after_startup_delay: bool,
}

impl BufferOccupancySnapshot {
    /// Seconds of playback buffered ahead of the play head.
    pub fn occupancy_secs(&self) -> f64 {
        if self.target_fps == 0 {
            return 0.0;
        }
        f64::from(self.min_buffered_through.saturating_sub(self.next_frame_no)) / f64::from(self.target_fps)
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback needs at least one object")]
    NoObjects,
    #[error("target frame rate must be positive")]
    ZeroFrameRate,
    #[error("no buffer for object {0}")]
    UnknownObject(ObjectId),
    #[error("object {0} appears twice in one frame")]
    DuplicateSegment(ObjectId),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    State(#[from] PlaybackStateError),
}

/// Result of one [`PlaybackScheduler::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not started yet, or already ended.
    Inactive,
    /// The frame clock has not fired.
    NotDue,
    /// Still stalled on `frame_no`; buffers are not deep enough to resume.
    Buffering { frame_no: u32 },
    /// Entered a stall because `frame_no` is missing from some buffer.
    StallStarted { frame_no: u32 },
    /// Rendered `frame_no`; `ended` is set when it was the last frame.
    Rendered {
        frame_no: u32,
        segments: Vec<Segment>,
        ended: bool,
    },
}

pub struct PlaybackScheduler {
    buffers: Vec<ObjectBuffer>,
    stream_length: u32,
    target_fps: u32,
    startup_frames: u32,
    resume_frames: u32,
    clock: FrameClock,
    phase: PlaybackPhase,
    state: PlaybackState,
    last_frame_no: u32,
    events: Vec<PlaybackEvent>,
}

fn seconds_to_frames(secs: f64, fps: u32) -> u32 {
    (secs.max(0.0) * f64::from(fps)).ceil() as u32
}

impl PlaybackScheduler {
    /// Creates one empty buffer per object.
    ///
    /// # Errors
    /// [`PlaybackError::NoObjects`] or [`PlaybackError::ZeroFrameRate`].
    pub fn new<'a>(
        objects: impl IntoIterator<Item = &'a TrackedObject>,
        target_fps: u32,
        startup_buffer_secs: f64,
        resume_buffer_secs: f64,
    ) -> Result<Self, PlaybackError> {
        if target_fps == 0 {
            return Err(PlaybackError::ZeroFrameRate);
        }
        let mut buffers = Vec::new();
        let mut stream_length = u32::MAX;
        for object in objects {
            buffers.push(ObjectBuffer::new(object.id()));
            stream_length = stream_length.min(object.frame_count());
        }
        if buffers.is_empty() {
            return Err(PlaybackError::NoObjects);
        }
        Ok(Self {
            buffers,
            stream_length,
            target_fps,
            startup_frames: seconds_to_frames(startup_buffer_secs, target_fps),
            resume_frames: seconds_to_frames(resume_buffer_secs, target_fps),
            clock: FrameClock::new(target_fps),
            phase: PlaybackPhase::Idle,
            state: PlaybackState::new(),
            last_frame_no: 0,
            events: Vec::new(),
        })
    }

    fn set_phase(&mut self, next: PlaybackPhase) -> Result<(), PlaybackStateError> {
        self.phase = self.phase.transition(next)?;
        Ok(())
    }

    /// Starts the frame clock; the first tick fires immediately.
    pub fn start(&mut self, now_ms: f64) -> Result<(), PlaybackError> {
        self.set_phase(PlaybackPhase::Playing { since_ms: now_ms })?;
        self.last_frame_no = self.stream_length;
        self.state.started_at_ms = Some(now_ms);
        self.clock.reset();
        info!(last_frame_no = self.last_frame_no, "playback started");
        self.events.push(PlaybackEvent::Started {
            at_ms: now_ms,
            last_frame_no: self.last_frame_no,
        });
        Ok(())
    }

    /// Appends a fetched segment to its object's buffer.
    pub fn push_segment(&mut self, segment: Segment) -> Result<(), PlaybackError> {
        let buffer = self
            .buffers
            .iter_mut()
            .find(|b| b.object_id() == segment.object_id)
            .ok_or(PlaybackError::UnknownObject(segment.object_id))?;
        buffer.push(segment)?;
        Ok(())
    }

    /// Appends one frame's segments for several objects, all or nothing.
    ///
    /// # Errors
    /// Nothing is buffered if any segment names an unknown object, repeats an
    /// object, or is rejected by its buffer.
    pub fn push_frame(&mut self, segments: Vec<Segment>) -> Result<(), PlaybackError> {
        let mut targets = Vec::with_capacity(segments.len());
        for segment in &segments {
            let index = self
                .buffers
                .iter()
                .position(|b| b.object_id() == segment.object_id)
                .ok_or(PlaybackError::UnknownObject(segment.object_id))?;
            if targets.contains(&index) {
                return Err(PlaybackError::DuplicateSegment(segment.object_id));
            }
            self.buffers[index].check(segment)?;
            targets.push(index);
        }
        for (index, segment) in targets.into_iter().zip(segments) {
            self.buffers[index].push(segment)?;
        }
        Ok(())
    }

    /// Advances playback to `now_ms`.
    pub fn tick(&mut self, now_ms: f64) -> Result<TickOutcome, PlaybackError> {
        if matches!(self.phase, PlaybackPhase::Idle | PlaybackPhase::Ended { .. }) {
            return Ok(TickOutcome::Inactive);
        }
        if !self.clock.poll(now_ms) {
            return Ok(TickOutcome::NotDue);
        }

        if let PlaybackPhase::Stalled { since_ms, frame_no } = self.phase {
            if !self.is_buffer_sufficient() {
                return Ok(TickOutcome::Buffering { frame_no });
            }
            self.resume(now_ms, since_ms, frame_no)?;
        }

        let frame_no = self.state.next_frame_no;
        if !self.buffers.iter().all(|b| b.contains(frame_no)) {
            self.set_phase(PlaybackPhase::Stalled {
                since_ms: now_ms,
                frame_no,
            })?;
            self.state.is_stalling = true;
            debug!(frame_no, "playback stalled");
            self.events.push(PlaybackEvent::StallStarted { at_ms: now_ms, frame_no });
            return Ok(TickOutcome::StallStarted { frame_no });
        }

        let segments: Vec<Segment> = self.buffers.iter_mut().filter_map(|b| b.take(frame_no)).collect();
        if frame_no == 2 {
            self.state.has_started_after_startup_delay = true;
        }
        self.state.next_frame_no += 1;
        self.state.frames_rendered += 1;
        self.events.push(PlaybackEvent::FrameRendered { at_ms: now_ms, frame_no });

        let ended = self.state.next_frame_no > self.last_frame_no;
        if ended {
            self.finish(now_ms, false)?;
        }
        Ok(TickOutcome::Rendered {
            frame_no,
            segments,
            ended,
        })
    }

    fn resume(&mut self, now_ms: f64, since_ms: f64, frame_no: u32) -> Result<(), PlaybackStateError> {
        self.set_phase(PlaybackPhase::Playing { since_ms: now_ms })?;
        self.state.is_stalling = false;
        let duration_ms = (now_ms - since_ms).max(0.0);
        let kind = if self.state.frames_rendered == 0 {
            self.state.startup_delay_ms += duration_ms;
            StallKind::Startup
        } else {
            self.state.cumulative_stall_ms += duration_ms;
            self.state.num_stalls += 1;
            StallKind::Rebuffer
        };
        debug!(frame_no, duration_ms, ?kind, "playback resumed");
        self.events.push(PlaybackEvent::StallEnded {
            at_ms: now_ms,
            frame_no,
            duration_ms,
            kind,
        });
        Ok(())
    }

    fn finish(&mut self, now_ms: f64, stopped: bool) -> Result<(), PlaybackStateError> {
        self.set_phase(PlaybackPhase::Ended { at_ms: now_ms })?;
        self.state.is_stalling = false;
        self.state.ended_at_ms = Some(now_ms);
        info!(
            frames = self.state.frames_rendered,
            stalls = self.state.num_stalls,
            stopped,
            "playback ended"
        );
        self.events.push(PlaybackEvent::Ended {
            at_ms: now_ms,
            frames_rendered: self.state.frames_rendered,
            stopped,
        });
        Ok(())
    }

    /// Ends playback from any phase that has not ended yet. Idempotent.
    pub fn stop(&mut self, now_ms: f64) -> Result<(), PlaybackError> {
        if self.is_ended() {
            return Ok(());
        }
        self.finish(now_ms, true)?;
        Ok(())
    }

    /// Whether a stalled session may resume.
    ///
    /// End of stream always suffices. Before playback has started after the
    /// startup delay, every object must hold the startup threshold; afterwards
    /// every object must hold the resume threshold beyond the play head. The
    /// frame at the play head must be buffered in either case.
    pub fn is_buffer_sufficient(&self) -> bool {
        let m = self.min_buffered_through();
        if m >= self.last_frame_no {
            return true;
        }
        let next = self.state.next_frame_no;
        if self.state.has_started_after_startup_delay {
            m >= next.saturating_add(self.resume_frames)
        } else {
            m >= self.startup_frames.max(next)
        }
    }

    pub fn min_buffered_through(&self) -> u32 {
        self.buffers
            .iter()
            .map(ObjectBuffer::buffered_through)
            .min()
            .unwrap_or(0)
    }

    pub fn occupancy(&self) -> BufferOccupancySnapshot {
        BufferOccupancySnapshot {
            next_frame_no: self.state.next_frame_no,
            min_buffered_through: self.min_buffered_through(),
            target_fps: self.target_fps,
            has_started_after_startup_delay: self.state.has_started_after_startup_delay,
        }
    }

    pub fn current_buffer_secs(&self) -> f64 {
        self.occupancy().occupancy_secs()
    }

    pub fn current_playback_time_secs(&self) -> f64 {
        f64::from(self.state.next_frame_no - 1) / f64::from(self.target_fps)
    }

    pub fn is_stalling(&self) -> bool {
        self.state.is_stalling
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.phase, PlaybackPhase::Ended { .. })
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Last frame that will be rendered; 0 before `start`.
    pub fn last_frame_no(&self) -> u32 {
        self.last_frame_no
    }

    /// Frames the session will play, known before `start`.
    pub fn stream_length(&self) -> u32 {
        self.stream_length
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }
}

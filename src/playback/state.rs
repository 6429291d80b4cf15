//! Playback phases, counters and the events emitted on every transition.
use serde::Serialize;
use thiserror::Error;

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Playing { since_ms: f64 },
    Stalled { since_ms: f64, frame_no: u32 },
    Ended { at_ms: f64 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal playback transition from {from} to {to}")]
pub struct PlaybackStateError {
    pub from: &'static str,
    pub to: &'static str,
}

impl PlaybackPhase {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Playing { .. } => "playing",
            PlaybackPhase::Stalled { .. } => "stalled",
            PlaybackPhase::Ended { .. } => "ended",
        }
    }

    /// Validates `self -> next`, returning `next` when allowed.
    pub fn transition(self, next: PlaybackPhase) -> Result<PlaybackPhase, PlaybackStateError> {
        use PlaybackPhase::*;
        let allowed = matches!(
            (&self, &next),
            (Idle, Playing { .. })
                | (Playing { .. }, Stalled { .. })
                | (Stalled { .. }, Playing { .. })
                | (Idle | Playing { .. } | Stalled { .. }, Ended { .. })
        );
        if allowed {
            Ok(next)
        } else {
            Err(PlaybackStateError {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

/// Counters owned by the scheduler, serialized into session summaries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PlaybackState {
    pub next_frame_no: u32,
    pub is_stalling: bool,
    pub startup_delay_ms: f64,
    pub cumulative_stall_ms: f64,
    pub num_stalls: u32,
    pub has_started_after_startup_delay: bool,
    pub frames_rendered: u32,
    pub started_at_ms: Option<f64>,
    pub ended_at_ms: Option<f64>,
}

impl PlaybackState {
    pub(crate) fn new() -> Self {
        Self {
            next_frame_no: 1,
            ..Self::default()
        }
    }

    /// Wall time spent rendering, excluding startup delay and stalls.
    pub fn playback_duration_ms(&self) -> Option<f64> {
        let (start, end) = (self.started_at_ms?, self.ended_at_ms?);
        Some((end - start - self.startup_delay_ms - self.cumulative_stall_ms).max(0.0))
    }

    /// Effective rendering rate over [`playback_duration_ms`](Self::playback_duration_ms).
    pub fn playback_fps(&self) -> Option<f64> {
        let duration = self.playback_duration_ms()?;
        if duration > 0.0 {
            Some(f64::from(self.frames_rendered) * 1000.0 / duration)
        } else {
            None
        }
    }
}

/// How a completed stall was accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StallKind {
    Startup,
    Rebuffer,
}

/// Emitted by the scheduler on every phase change and rendered frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Started {
        at_ms: f64,
        last_frame_no: u32,
    },
    StallStarted {
        at_ms: f64,
        frame_no: u32,
    },
    StallEnded {
        at_ms: f64,
        frame_no: u32,
        duration_ms: f64,
        kind: StallKind,
    },
    FrameRendered {
        at_ms: f64,
        frame_no: u32,
    },
    Ended {
        at_ms: f64,
        frames_rendered: u32,
        stopped: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle() {
        let phase = PlaybackPhase::Idle;
        let phase = phase.transition(PlaybackPhase::Playing { since_ms: 0.0 }).unwrap();
        let phase = phase
            .transition(PlaybackPhase::Stalled {
                since_ms: 1.0,
                frame_no: 1,
            })
            .unwrap();
        let phase = phase.transition(PlaybackPhase::Playing { since_ms: 2.0 }).unwrap();
        phase.transition(PlaybackPhase::Ended { at_ms: 3.0 }).unwrap();
    }

    #[test]
    fn rejects_leaving_ended() {
        let err = PlaybackPhase::Ended { at_ms: 0.0 }
            .transition(PlaybackPhase::Playing { since_ms: 1.0 })
            .unwrap_err();
        assert_eq!(err.from, "ended");
        assert_eq!(err.to, "playing");
    }

    #[test]
    fn rejects_stall_before_start() {
        assert!(PlaybackPhase::Idle
            .transition(PlaybackPhase::Stalled {
                since_ms: 0.0,
                frame_no: 1
            })
            .is_err());
    }

    #[test]
    fn playback_duration_excludes_stalls() {
        let state = PlaybackState {
            started_at_ms: Some(0.0),
            ended_at_ms: Some(10_000.0),
            startup_delay_ms: 2_000.0,
            cumulative_stall_ms: 1_000.0,
            frames_rendered: 168,
            ..PlaybackState::new()
        };
        assert_eq!(state.playback_duration_ms(), Some(7_000.0));
        assert!((state.playback_fps().unwrap() - 24.0).abs() < 1e-9);
    }
}

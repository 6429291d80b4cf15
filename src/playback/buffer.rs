//! Per-object segment queues.
//!
//! A buffer accepts segments strictly in frame order starting at frame 1, so
//! its contents are always a consecutive run and `buffered_through` is simply
//! the last appended frame. Rendered frames are popped from the front.
use std::collections::VecDeque;

use serde::Serialize;
use thiserror::Error;

use crate::object::ObjectId;

/// Opaque handle to a decoded payload owned by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PayloadHandle(pub u64);

/// One object's data for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub object_id: ObjectId,
    pub frame_index: u32,
    pub level: usize,
    pub bytes: u64,
    pub payload: PayloadHandle,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("segment for {object} frame {found} arrived out of order; expected frame {expected}")]
    OutOfOrder {
        object: ObjectId,
        expected: u32,
        found: u32,
    },
    #[error("segment for {found} pushed into the buffer of {object}")]
    WrongObject { object: ObjectId, found: ObjectId },
}

#[derive(Debug, Clone)]
pub struct ObjectBuffer {
    object_id: ObjectId,
    segments: VecDeque<Segment>,
    next_expected: u32,
}

impl ObjectBuffer {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            segments: VecDeque::new(),
            next_expected: 1,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Appends the next frame's segment.
    ///
    /// # Errors
    /// [`BufferError::OutOfOrder`] unless `segment.frame_index` is exactly one
    /// past the last appended frame.
    pub fn push(&mut self, segment: Segment) -> Result<(), BufferError> {
        self.check(&segment)?;
        self.segments.push_back(segment);
        self.next_expected += 1;
        Ok(())
    }

    /// Whether [`push`](Self::push) would accept `segment`.
    pub fn check(&self, segment: &Segment) -> Result<(), BufferError> {
        if segment.object_id != self.object_id {
            return Err(BufferError::WrongObject {
                object: self.object_id,
                found: segment.object_id,
            });
        }
        if segment.frame_index != self.next_expected {
            return Err(BufferError::OutOfOrder {
                object: self.object_id,
                expected: self.next_expected,
                found: segment.frame_index,
            });
        }
        Ok(())
    }

    /// Highest frame index appended so far, 0 when nothing has arrived.
    pub fn buffered_through(&self) -> u32 {
        self.next_expected - 1
    }

    pub fn contains(&self, frame_index: u32) -> bool {
        self.segments
            .front()
            .is_some_and(|front| frame_index >= front.frame_index && frame_index <= self.buffered_through())
    }

    /// Removes and returns the segment for `frame_index`, dropping older ones.
    pub fn take(&mut self, frame_index: u32) -> Option<Segment> {
        while self
            .segments
            .front()
            .is_some_and(|front| front.frame_index < frame_index)
        {
            self.segments.pop_front();
        }
        match self.segments.front() {
            Some(front) if front.frame_index == frame_index => self.segments.pop_front(),
            _ => None,
        }
    }

    /// Segments held for frames at or after `next_frame_no`.
    pub fn depth_from(&self, next_frame_no: u32) -> u32 {
        let through = self.buffered_through();
        let first = self
            .segments
            .front()
            .map_or(next_frame_no, |front| front.frame_index.max(next_frame_no));
        if through >= first {
            through - first + 1
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

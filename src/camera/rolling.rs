//! Fixed-capacity circular frame store addressed 1..=N.

use crate::camera::Frame;
use crate::error::CameraError;

/// Write-head bookkeeping shared by every backend, whether the ring lives in this
/// process or inside a frame grabber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStatus {
    /// Number of slots.
    pub capacity: usize,
    /// 1-based index of the most recent write, 0 before the first frame.
    pub head: usize,
    /// Slots holding a frame, saturating at `capacity`.
    pub filled: usize,
}

impl BufferStatus {
    /// Buffer indices ordered oldest to newest.
    ///
    /// Once the ring has wrapped this is `[head+1..=N, 1..=head]`; before that only the
    /// slots written so far are returned.
    pub fn chronological_indices(&self) -> Vec<usize> {
        if self.capacity == 0 || self.head == 0 {
            return Vec::new();
        }
        if self.filled < self.capacity {
            return (1..=self.filled).collect();
        }
        (self.head + 1..=self.capacity).chain(1..=self.head).collect()
    }
}

/// Ring of frames. Pushing past capacity overwrites the oldest slot.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    slots: Vec<Option<Frame>>,
    head: usize,
    filled: usize,
}

impl RollingBuffer {
    /// Create an empty buffer. A zero capacity is raised to one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            head: 0,
            filled: 0,
        }
    }

    /// Store a frame and advance the write head. Returns the slot it landed in.
    pub fn push(&mut self, frame: Frame) -> usize {
        self.head = self.head % self.slots.len() + 1;
        self.slots[self.head - 1] = Some(frame);
        self.filled = (self.filled + 1).min(self.slots.len());
        self.head
    }

    /// Frame at a 1-based slot.
    pub fn get(&self, index: usize) -> Result<&Frame, CameraError> {
        let capacity = self.slots.len();
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or(CameraError::InvalidIndex { index, capacity })
    }

    /// Most recently written frame.
    pub fn latest(&self) -> Option<&Frame> {
        self.get(self.head).ok()
    }

    /// Current write position and fill level.
    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            capacity: self.slots.len(),
            head: self.head,
            filled: self.filled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: u8) -> Frame {
        Frame::filled_u8(1, 1, v)
    }

    #[test]
    fn order_before_first_fill() {
        let mut buf = RollingBuffer::new(5);
        buf.push(frame(1));
        buf.push(frame(2));
        assert_eq!(buf.status().chronological_indices(), vec![1, 2]);
    }

    #[test]
    fn order_after_wrap_starts_past_head() {
        let mut buf = RollingBuffer::new(4);
        for v in 1..=6 {
            buf.push(frame(v));
        }
        let status = buf.status();
        assert_eq!(status.head, 2);
        let order = status.chronological_indices();
        assert_eq!(order, vec![3, 4, 1, 2]);
        let values: Vec<u16> = order
            .iter()
            .map(|&i| buf.get(i).unwrap().get(0, 0).unwrap())
            .collect();
        assert_eq!(values, vec![3, 4, 5, 6]);
    }

    #[test]
    fn head_at_end_yields_natural_order() {
        let status = BufferStatus {
            capacity: 3,
            head: 3,
            filled: 3,
        };
        assert_eq!(status.chronological_indices(), vec![1, 2, 3]);
    }

    #[test]
    fn index_zero_and_past_capacity_are_rejected() {
        let mut buf = RollingBuffer::new(2);
        buf.push(frame(9));
        assert!(buf.get(0).is_err());
        assert!(buf.get(3).is_err());
        assert!(buf.get(2).is_err());
        assert_eq!(buf.latest().unwrap().get(0, 0), Some(9));
    }
}

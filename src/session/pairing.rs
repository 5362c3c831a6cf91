//! Frame pairing buffer
//!
//! Holds the most recent frame from each camera and hands out matched
//! pairs. Each slot keeps only the latest frame, and taking a pair
//! consumes both slots so no frame is composited twice.

use crate::capture::types::{SinkKind, VideoFrame};

#[derive(Debug, Default)]
pub struct PairBuffer {
    back: Option<VideoFrame>,
    front: Option<VideoFrame>,
}

impl PairBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest frame for its stream, replacing any unconsumed one.
    pub fn put(&mut self, kind: SinkKind, frame: VideoFrame) {
        match kind {
            SinkKind::Back => self.back = Some(frame),
            SinkKind::Front => self.front = Some(frame),
            SinkKind::Audio => {
                debug_assert!(false, "audio routed into the pair buffer");
            }
        }
    }

    /// Take a matched (back, front) pair if both slots are filled.
    pub fn take_pair(&mut self) -> Option<(VideoFrame, VideoFrame)> {
        if self.back.is_some() && self.front.is_some() {
            Some((self.back.take()?, self.front.take()?))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.back = None;
        self.front = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::FrameFormat;
    use std::time::Duration;

    fn frame(ms: u64) -> VideoFrame {
        let format = FrameFormat::bgra(2, 2);
        VideoFrame::new(
            format,
            vec![0u8; format.byte_len()],
            Duration::from_millis(ms),
        )
    }

    #[test]
    fn test_no_pair_until_both_streams_arrive() {
        let mut buf = PairBuffer::new();
        buf.put(SinkKind::Back, frame(0));
        assert!(buf.take_pair().is_none());

        buf.put(SinkKind::Front, frame(5));
        let (back, front) = buf.take_pair().unwrap();
        assert_eq!(back.pts, Duration::from_millis(0));
        assert_eq!(front.pts, Duration::from_millis(5));
    }

    #[test]
    fn test_taking_a_pair_consumes_both_slots() {
        let mut buf = PairBuffer::new();
        buf.put(SinkKind::Back, frame(0));
        buf.put(SinkKind::Front, frame(0));
        assert!(buf.take_pair().is_some());
        assert!(buf.take_pair().is_none());

        // One fresh frame is not enough for a second pair
        buf.put(SinkKind::Back, frame(33));
        assert!(buf.take_pair().is_none());
    }

    #[test]
    fn test_newer_frame_replaces_unconsumed_one() {
        let mut buf = PairBuffer::new();
        buf.put(SinkKind::Back, frame(0));
        buf.put(SinkKind::Back, frame(33));
        buf.put(SinkKind::Front, frame(33));

        let (back, _) = buf.take_pair().unwrap();
        assert_eq!(back.pts, Duration::from_millis(33));
    }

    #[test]
    fn test_clear_drops_pending_frames() {
        let mut buf = PairBuffer::new();
        buf.put(SinkKind::Back, frame(0));
        buf.put(SinkKind::Front, frame(0));
        buf.clear();
        assert!(buf.take_pair().is_none());
    }
}

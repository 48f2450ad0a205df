//! Splits a message into frames no larger than the negotiated frame size.

use uuid::Uuid;

use crate::stream::frame::{FrameInfo, FrameType, StreamFrame};

/// Iterator over the frames of one message.
///
/// The first frame carries `first_type` (HEADER for requests, RESPONSE for
/// responses, DATA otherwise); every following frame is DATA. The last frame
/// is marked END. An empty message still yields one END frame.
#[derive(Debug)]
pub struct FrameGenerator {
    stream_id: Uuid,
    data: Vec<u8>,
    chunk_size: usize,
    first_type: FrameType,
    offset: usize,
    done: bool,
}

impl FrameGenerator {
    pub fn new(stream_id: Uuid, data: Vec<u8>, frame_max_size: usize, first_type: FrameType) -> Self {
        Self {
            stream_id,
            data,
            chunk_size: frame_max_size.max(1),
            first_type,
            offset: 0,
            done: false,
        }
    }
}

impl Iterator for FrameGenerator {
    type Item = StreamFrame;

    fn next(&mut self) -> Option<StreamFrame> {
        if self.done {
            return None;
        }

        let frame_type = if self.offset == 0 {
            self.first_type
        } else {
            FrameType::Data
        };
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;

        let info = if self.offset >= self.data.len() {
            self.done = true;
            FrameInfo::End
        } else {
            FrameInfo::Continue
        };

        Some(StreamFrame::new(self.stream_id, frame_type, info, chunk))
    }
}

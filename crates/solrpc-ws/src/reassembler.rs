//! Frame reassembly: turns transport frames into complete text messages.

use thiserror::Error;

use solrpc_core::Frame;

/// Why a message could not be reassembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// The message grew past the configured limit and was discarded.
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    /// The completed message is not valid UTF-8.
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Accumulates frames until the final one of a message arrives.
///
/// The buffer is reset after every completed (or rejected) message, so one
/// bad message never bleeds into the next.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
    max_message_bytes: usize,
    /// Skipping the tail of an oversized message.
    discarding: bool,
}

impl FrameReassembler {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_message_bytes,
            discarding: false,
        }
    }

    /// Feed one frame.
    ///
    /// Returns `Some` when the frame completes a message (or rejects it),
    /// `None` while more frames are needed. Messages with no bytes at all
    /// are skipped.
    pub fn push(&mut self, data: &[u8], is_final: bool) -> Option<Result<String, ReassemblyError>> {
        if self.discarding {
            if is_final {
                self.discarding = false;
            }
            return None;
        }

        if self.buffer.len() + data.len() > self.max_message_bytes {
            self.buffer.clear();
            self.discarding = !is_final;
            return Some(Err(ReassemblyError::TooLarge {
                limit: self.max_message_bytes,
            }));
        }

        self.buffer.extend_from_slice(data);
        if !is_final || self.buffer.is_empty() {
            return None;
        }

        let bytes = std::mem::take(&mut self.buffer);
        Some(String::from_utf8(bytes).map_err(|e| ReassemblyError::InvalidUtf8(e.to_string())))
    }

    /// Feed a [`Frame`].
    pub fn push_frame(&mut self, frame: &Frame) -> Option<Result<String, ReassemblyError>> {
        self.push(&frame.data, frame.is_final)
    }

    /// Bytes buffered for the message in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Lazily reassemble a sequence of frames into messages.
    pub fn messages<I>(self, frames: I) -> Messages<I::IntoIter>
    where
        I: IntoIterator<Item = Frame>,
    {
        Messages {
            reassembler: self,
            frames: frames.into_iter(),
        }
    }
}

/// Iterator returned by [`FrameReassembler::messages`].
pub struct Messages<I> {
    reassembler: FrameReassembler,
    frames: I,
}

impl<I: Iterator<Item = Frame>> Iterator for Messages<I> {
    type Item = Result<String, ReassemblyError>;

    fn next(&mut self) -> Option<Self::Item> {
        for frame in self.frames.by_ref() {
            if let Some(msg) = self.reassembler.push_frame(&frame) {
                return Some(msg);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_message() {
        let mut r = FrameReassembler::new(1024);
        assert_eq!(r.push(b"{\"id\":1}", true), Some(Ok("{\"id\":1}".to_string())));
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn message_across_many_frames_with_empty_ones() {
        let frames = vec![
            Frame::partial(&b"{\"jsonrpc\":"[..]),
            Frame::partial(Vec::new()),
            Frame::partial(&b"\"2.0\",\"id\":1,"[..]),
            Frame::partial(Vec::new()),
            Frame::whole(&b"\"result\":5}"[..]),
            Frame::whole(&b"{\"id\":2,\"result\":true}"[..]),
        ];
        let out: Vec<_> = FrameReassembler::new(1024)
            .messages(frames)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            out,
            vec![
                "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":5}".to_string(),
                "{\"id\":2,\"result\":true}".to_string(),
            ]
        );
    }

    #[test]
    fn empty_final_frame_completes_pending_message() {
        let mut r = FrameReassembler::new(1024);
        assert_eq!(r.push(b"{}", false), None);
        assert_eq!(r.push(b"", true), Some(Ok("{}".to_string())));
        // A lone empty final frame is not a message.
        assert_eq!(r.push(b"", true), None);
    }

    #[test]
    fn oversized_message_is_discarded_whole() {
        let mut r = FrameReassembler::new(8);
        assert_eq!(r.push(b"12345", false), None);
        assert_eq!(
            r.push(b"6789", false),
            Some(Err(ReassemblyError::TooLarge { limit: 8 }))
        );
        assert_eq!(r.push(b"tail", false), None);
        assert_eq!(r.push(b"end", true), None);
        assert_eq!(r.push(b"ok", true), Some(Ok("ok".to_string())));
    }

    #[test]
    fn invalid_utf8_resets_buffer() {
        let mut r = FrameReassembler::new(64);
        assert!(matches!(
            r.push(&[0xff, 0xfe], true),
            Some(Err(ReassemblyError::InvalidUtf8(_)))
        ));
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.push(b"{}", true), Some(Ok("{}".to_string())));
    }

    #[test]
    fn utf8_split_across_frames() {
        let text = "héllo";
        let bytes = text.as_bytes();
        let mut r = FrameReassembler::new(64);
        assert_eq!(r.push(&bytes[..2], false), None);
        assert_eq!(r.push(&bytes[2..], true), Some(Ok(text.to_string())));
    }
}

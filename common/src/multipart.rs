//! `multipart/x-mixed-replace` framing used by MJPEG streams.
//!
//! Each part on the wire looks like:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Content type announced to viewers.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const BOUNDARY: &[u8] = b"--frame\r\n";
const PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const PART_END: &[u8] = b"\r\n";

/// Largest part held while waiting for its terminator.
pub const MAX_PART_BYTES: usize = 8 * 1024 * 1024;

/// Wrap one JPEG in a multipart part.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(BOUNDARY.len() + PART_HEADER.len() + jpeg.len() + PART_END.len());
    buf.put_slice(BOUNDARY);
    buf.put_slice(PART_HEADER);
    buf.put_slice(jpeg);
    buf.put_slice(PART_END);
    buf.freeze()
}

/// Parse state for the incoming multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser that turns arbitrary stream chunks into JPEG parts.
///
/// A part is only emitted once the following boundary has been seen, so the
/// most recent part is held back until the next one starts.
pub struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
    max_part: usize,
}

impl Default for MultipartParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartParser {
    pub fn new() -> Self {
        Self::with_max_part_size(MAX_PART_BYTES)
    }

    /// A part (or header block) longer than `max_part` is discarded and the
    /// parser resyncs on the next boundary.
    pub fn with_max_part_size(max_part: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
            max_part,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete JPEG part, or `None` if more input is needed.
    pub fn next_part(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // A boundary may straddle two chunks.
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let Some(pos) = find_subsequence(&self.buffer, HEADER_END) else {
                        self.discard_if_oversized();
                        return None;
                    };
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.jpeg_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Resume the scan here once more bytes arrive.
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        self.discard_if_oversized();
                        return None;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // The part's own CRLF is not JPEG data.
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    self.state = ParseState::SeekingHeaderEnd;
                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
            }
        }
    }

    fn discard_if_oversized(&mut self) {
        if self.buffer.len() > self.max_part {
            self.buffer.clear();
            self.jpeg_start = 0;
            self.state = ParseState::SeekingBoundary;
        }
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

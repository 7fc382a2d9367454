use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Splits a byte stream into newline delimited lines.
///
/// Bytes after the last newline are kept until more data arrives,
/// so a line split across reads is yielded whole. Invalid UTF-8 is replaced lossily,
/// after the line is complete, so multi-byte characters may straddle reads.
/// A trailing `\r` is dropped.
#[derive(Debug, Default)]
pub struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

fn into_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);

    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LinesCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == b'\n') {
            // The cursor may have skipped ahead, so make the position global.
            let actual_position = self.cursor + position;

            self.cursor = 0;

            let line = src.split_to(actual_position);

            // Discard the newline.
            src.advance(1);

            Ok(Some(into_line(&line)))
        } else {
            // No need to re-read these bytes when more arrive.
            self.cursor = read_to;

            Ok(None)
        }
    }

    /// At the end of the stream, whatever is left counts as the last line.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        self.cursor = 0;

        if src.is_empty() {
            Ok(None)
        } else {
            let rest = src.split();
            Ok(Some(into_line(&rest)))
        }
    }
}

//! Newline-delimited JSON framing.
//!
//! [`LineCodec`] is a `tokio_util` codec used on both sides of the system:
//! the supervisor wraps the engine's stdout/stdin with it, and the hub and
//! client agent use [`decode_frame`] / [`encode_batch`] for WebSocket text
//! frames that may carry several envelopes.
//!
//! Decoding keeps a rolling buffer. Complete lines yield envelopes, the
//! trailing partial line stays buffered until the next chunk. Malformed lines
//! are logged and skipped without ending the stream.

use bytes::{Buf, BufMut, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tracing::warn;

use crate::envelope::Envelope;
use crate::errors::{Result, ShellError};

/// Default cap on a single line (1 MiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Longest snippet of a bad line that is written to the log.
const LOG_SNIPPET_LEN: usize = 200;

/// Encode one envelope as a `\n`-terminated JSON line.
pub fn encode(envelope: &Envelope) -> Result<String> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Encode several envelopes into one frame, one line each.
pub fn encode_batch(envelopes: &[Envelope]) -> Result<String> {
    let mut frame = String::new();
    for envelope in envelopes {
        frame.push_str(&encode(envelope)?);
    }
    Ok(frame)
}

/// Decode a message-aligned frame that holds one or more lines.
///
/// The last line does not need a terminator. Malformed lines are skipped.
pub fn decode_frame(frame: &str) -> Vec<Envelope> {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(frame.as_bytes());
    let mut out = Vec::new();
    while let Ok(Some(envelope)) = codec.decode_eof(&mut buf) {
        out.push(envelope);
    }
    out
}

/// Lazily decode envelopes from a byte stream.
///
/// Each call starts from an empty buffer, so wrapping a fresh reader restarts
/// decoding cleanly. The stream ends on EOF or on an I/O error.
pub fn decode_stream<R>(reader: R) -> impl Stream<Item = Envelope> + Send
where
    R: AsyncRead + Send,
{
    FramedRead::new(reader, LineCodec::new())
        .take_while(|item| {
            if let Err(e) = item {
                warn!(error = %e, "protocol stream read failed");
            }
            futures::future::ready(item.is_ok())
        })
        .filter_map(|item| futures::future::ready(item.ok()))
}

/// Rolling-buffer line codec for [`Envelope`]s.
#[derive(Debug)]
pub struct LineCodec {
    max_line_length: usize,
    /// Bytes of the buffer already scanned for a newline.
    next_index: usize,
    /// Skipping the remainder of an over-long line.
    discarding: bool,
    malformed: u64,
}

impl LineCodec {
    /// Codec with the default line limit.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Codec that discards lines longer than `max_line_length` bytes.
    pub fn with_max_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
            discarding: false,
            malformed: 0,
        }
    }

    /// Number of lines dropped so far because they could not be decoded.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    fn parse_line(&mut self, raw: &[u8]) -> Option<Envelope> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice::<Envelope>(raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                self.malformed += 1;
                let err = ShellError::ProtocolDecode {
                    reason: e.to_string(),
                    line: snippet(raw),
                };
                warn!(error = %err, "dropping malformed protocol line");
                None
            }
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Envelope;
    type Error = ShellError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Envelope>> {
        loop {
            let read_to = buf.len().min(self.max_line_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    if let Some(envelope) = self.parse_line(&line[..end]) {
                        return Ok(Some(envelope));
                    }
                }
                (false, None) if buf.len() > self.max_line_length => {
                    self.discarding = true;
                    self.malformed += 1;
                    warn!(
                        max_line_length = self.max_line_length,
                        "protocol line exceeds limit, discarding"
                    );
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Envelope>> {
        if let Some(envelope) = self.decode(buf)? {
            return Ok(Some(envelope));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            return Ok(None);
        }
        Ok(self.parse_line(&rest))
    }
}

impl Encoder<Envelope> for LineCodec {
    type Error = ShellError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn snippet(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= LOG_SNIPPET_LEN {
        return text.into_owned();
    }
    let mut end = LOG_SNIPPET_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

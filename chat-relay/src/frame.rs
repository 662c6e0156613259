//! Fixed-width wire frame shared by the relay and its peers.
//!
//! ```text
//! [destination:8][source:8][payload:240]
//! ```
//! Ids are left-justified and space padded. The payload is NUL padded up to
//! [`FRAME_SIZE`] on send and right-trimmed of NULs on receive.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Total size of every frame on the wire, agreed by both ends.
pub const FRAME_SIZE: usize = 256;
/// Width of each id field.
pub const ID_WIDTH: usize = 8;
pub const HEADER_SIZE: usize = 2 * ID_WIDTH;
pub const MAX_PAYLOAD: usize = FRAME_SIZE - HEADER_SIZE;
/// Reserved id for traffic to or from the relay itself.
pub const SERVER_ID: &str = "-SERVER-";

const PADDING: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("{field} field is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub destination: String,
    pub source: String,
    pub payload: String,
}

impl Frame {
    pub fn new(
        destination: impl Into<String>,
        source: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            source: source.into(),
            payload: payload.into(),
        }
    }

    pub fn is_from_server(&self) -> bool {
        self.source == SERVER_ID
    }

    /// True when every field is empty, which is what an undersized buffer
    /// decodes to.
    pub fn is_empty(&self) -> bool {
        self.destination.is_empty() && self.source.is_empty() && self.payload.is_empty()
    }

    /// Encodes the frame into exactly [`FRAME_SIZE`] bytes.
    ///
    /// Ids longer than [`ID_WIDTH`] and payloads longer than [`MAX_PAYLOAD`]
    /// are cut at the last character boundary that fits. Nothing reports the
    /// truncation; callers keep payloads within the limit.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [PADDING; FRAME_SIZE];
        write_id(&mut buf[..ID_WIDTH], &self.destination);
        write_id(&mut buf[ID_WIDTH..HEADER_SIZE], &self.source);

        let payload = truncate_to(&self.payload, MAX_PAYLOAD);
        buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload.as_bytes());
        buf
    }

    /// Decodes one frame.
    ///
    /// Input shorter than [`HEADER_SIZE`] is not a frame and decodes to
    /// [`Frame::default`] rather than an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Ok(Self::default());
        }

        let destination = read_id(&bytes[..ID_WIDTH], "destination")?;
        let source = read_id(&bytes[ID_WIDTH..HEADER_SIZE], "source")?;

        let body = &bytes[HEADER_SIZE..];
        let end = body
            .iter()
            .rposition(|byte| *byte != PADDING)
            .map_or(0, |idx| idx + 1);
        let payload = std::str::from_utf8(&body[..end])
            .map_err(|_| FrameError::InvalidUtf8 { field: "payload" })?
            .to_string();

        Ok(Self {
            destination,
            source,
            payload,
        })
    }
}

fn write_id(field: &mut [u8], id: &str) {
    field.fill(b' ');
    let id = truncate_to(id, field.len());
    field[..id.len()].copy_from_slice(id.as_bytes());
}

fn read_id(field: &[u8], name: &'static str) -> Result<String, FrameError> {
    let text = std::str::from_utf8(field).map_err(|_| FrameError::InvalidUtf8 { field: name })?;
    Ok(text
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string())
}

fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Reads exactly one frame.
///
/// Returns `Ok(None)` when the peer closes the stream on a frame boundary.
/// A stream that ends part-way through a frame is an `UnexpectedEof` error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    let mut filled = 0;
    while filled < FRAME_SIZE {
        let bytes = reader.read(&mut buf[filled..]).await?;
        if bytes == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed after {filled} of {FRAME_SIZE} frame bytes"),
            ));
        }
        filled += bytes;
    }

    Frame::decode(&buf).map(Some).map_err(to_io_error)
}

/// Writes one complete frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await
}

fn to_io_error(err: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pads_ids_and_payload() {
        let bytes = Frame::new("bob", "alice", "hi").encode();

        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(&bytes[..8], b"bob     ");
        assert_eq!(&bytes[8..16], b"alice   ");
        assert_eq!(&bytes[16..18], b"hi");
        assert!(bytes[18..].iter().all(|b| *b == 0));
    }

    #[test]
    fn decode_inverts_encode() {
        let frame = Frame::new("bob", "alice", "hello there");
        assert_eq!(Frame::decode(&frame.encode()), Ok(frame));

        let full = Frame::new("12345678", "abcdefgh", "x".repeat(MAX_PAYLOAD));
        assert_eq!(Frame::decode(&full.encode()), Ok(full));
    }

    #[test]
    fn decode_short_input_is_empty_frame() {
        let frame = Frame::decode(b"bob     alice").expect("short input decodes");
        assert!(frame.is_empty());
    }

    #[test]
    fn decode_strips_nul_from_ids() {
        let mut bytes = Frame::new("bob", "alice", "hi").encode();
        bytes[3] = 0;
        bytes[7] = 0;

        let frame = Frame::decode(&bytes).expect("decode");
        assert_eq!(frame.destination, "bob");
        assert!(!frame.source.contains('\0'));
    }

    #[test]
    fn decode_accepts_unpadded_payload() {
        // A 255-byte frame from an older peer still decodes.
        let bytes = Frame::new("bob", "alice", "hi").encode();
        let frame = Frame::decode(&bytes[..FRAME_SIZE - 1]).expect("decode");
        assert_eq!(frame.payload, "hi");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut bytes = Frame::new("bob", "alice", "hi").encode();
        bytes[16] = 0xFF;
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::InvalidUtf8 { field: "payload" })
        );
    }

    #[test]
    fn oversized_fields_are_truncated_on_char_boundary() {
        let frame = Frame::new("longer-than-8", "src", "é".repeat(MAX_PAYLOAD));
        let decoded = Frame::decode(&frame.encode()).expect("decode");

        assert_eq!(decoded.destination, "longer-t");
        assert_eq!(decoded.payload.len(), MAX_PAYLOAD);
        assert!(decoded.payload.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn frames_survive_a_stream() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        let first = Frame::new("bob", "alice", "one");
        let second = Frame::new(SERVER_ID, SERVER_ID, "Online clients: alice, bob");

        let sent = (first.clone(), second.clone());
        let write = tokio::spawn(async move {
            write_frame(&mut writer, &sent.0).await.expect("write first");
            write_frame(&mut writer, &sent.1).await.expect("write second");
        });

        let got_first = read_frame(&mut reader).await.expect("read first");
        let got_second = read_frame(&mut reader).await.expect("read second");
        write.await.expect("writer task");

        assert_eq!(got_first, Some(first));
        assert_eq!(got_second, Some(second));
        assert_eq!(read_frame(&mut reader).await.expect("eof"), None);
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let (mut writer, mut reader) = tokio::io::duplex(1024);
        writer
            .write_all(&Frame::new("bob", "alice", "hi").encode()[..100])
            .await
            .expect("write partial");
        drop(writer);

        let err = read_frame(&mut reader).await.expect_err("partial frame");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

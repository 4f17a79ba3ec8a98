//! `Content-Length` framing for the language-server stdio channel.
//!
//! Pyright's stdio mode exchanges JSON-RPC messages framed as
//! `Content-Length: N\r\n\r\n{json}`. [`FrameReader`] and [`FrameWriter`]
//! handle the framing asynchronously; everything above this layer works
//! with `serde_json::Value` messages.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body. A playground document plus its
/// diagnostics fits comfortably; anything larger is a protocol fault.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages from the analyzer's stdout.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next message. `Ok(None)` means the channel reached EOF
    /// cleanly (the analyzer closed its stdout).
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_content_length().await? else {
            return Ok(None);
        };

        if len > MAX_FRAME_BYTES {
            bail!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
        }

        let mut body = vec![0u8; len];
        self.inner
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        serde_json::from_slice(&body)
            .context("decoding frame body")
            .map(Some)
    }

    /// Consume header lines up to the blank separator and return the
    /// `Content-Length` value. `None` only when EOF hits before the first
    /// header byte; EOF anywhere inside a header block is an error.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut line = String::new();
        let mut mid_frame = false;

        loop {
            line.clear();
            let n = self
                .inner
                .read_line(&mut line)
                .await
                .context("reading frame header")?;

            if n == 0 {
                if mid_frame {
                    bail!("channel closed in the middle of a frame header");
                }
                return Ok(None);
            }
            mid_frame = true;

            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = header_value(trimmed, "Content-Length") {
                length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("bad Content-Length value {value:?}"))?,
                );
            }
            // Content-Type and any future headers are irrelevant here.
        }

        match length {
            Some(len) => Ok(Some(len)),
            None => bail!("frame header block had no Content-Length"),
        }
    }
}

/// Case-insensitive header lookup on a single `Name: value` line.
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim().eq_ignore_ascii_case(name).then_some(value)
}

/// Writes framed JSON-RPC messages to the analyzer's stdin.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Frame and send one message. The header counts bytes, not chars.
    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding frame body")?;
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        self.inner
            .write_all(&frame)
            .await
            .context("writing frame")?;
        self.inner.flush().await.context("flushing frame")
    }
}

// ABOUTME: C1 - reads length-prefixed JPEG frames off the upstream TCP video source
// ABOUTME: Assigns sequence numbers and timestamps the receiver is responsible for (wire has none)

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Maximum payload size per §6.1. A larger declared length is framing
/// corruption, not merely a big frame.
pub const MAX_PAYLOAD_BYTES: u64 = 100 * 1024 * 1024;

const LENGTH_PREFIX_BYTES: usize = 8;

/// An immutable decoded video frame (§3).
///
/// Shared read-only by every downstream consumer via `Arc`; nothing ever
/// mutates a `Frame` after `FrameDecoder` produces it.
#[derive(Debug)]
pub struct Frame {
    pub sequence_number: u64,
    pub wall_time: SystemTime,
    pub relative_time: Duration,
    pub pixels: image::RgbImage,
    pub encoded: Bytes,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Reads the length-prefixed JPEG wire format (§6.1) from a buffered
/// `TcpStream` and produces timestamped, sequence-numbered `Frame`s.
///
/// Mirrors the teacher's `Connection` buffered frame-parsing discipline:
/// accumulate into a `BytesMut`, attempt to parse, read more only when the
/// buffer doesn't yet hold a complete frame.
pub struct FrameDecoder {
    stream: TcpStream,
    buffer: BytesMut,
    pipeline_start: Instant,
    next_sequence: u64,
    pub decode_errors: u64,
}

impl FrameDecoder {
    pub fn new(stream: TcpStream, pipeline_start: Instant) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(64 * 1024),
            pipeline_start,
            next_sequence: 0,
            decode_errors: 0,
        }
    }

    /// Reads and decodes the next frame from the stream.
    ///
    /// Returns `Ok(None)` on a clean EOF (no partial frame buffered).
    /// Malformed JPEG payloads are dropped silently per §4.1/§7: the
    /// function loops internally rather than surfacing a decode error to
    /// the caller, since a bad frame should not stall ingestion.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(payload) = self.try_parse_frame()? {
                let wall_time = SystemTime::now();
                let relative_time = self.pipeline_start.elapsed();
                let sequence_number = self.next_sequence;
                self.next_sequence += 1;

                match image::load_from_memory_with_format(&payload, image::ImageFormat::Jpeg) {
                    Ok(image) => {
                        let pixels = image.to_rgb8();
                        if !crate::image_utils::validate_frame(&pixels) {
                            self.decode_errors += 1;
                            debug!(sequence_number, "dropping frame with invalid dimensions");
                            continue;
                        }
                        return Ok(Some(Frame {
                            sequence_number,
                            wall_time,
                            relative_time,
                            pixels,
                            encoded: payload,
                        }));
                    }
                    Err(err) => {
                        self.decode_errors += 1;
                        debug!(sequence_number, %err, "dropping undecodable frame");
                        continue;
                    }
                }
            }

            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(PipelineError::Framing(
                    "connection closed mid-frame".to_string(),
                ));
            }
        }
    }

    /// Attempts to pull one complete length-prefixed payload out of the
    /// buffer without blocking. Returns `Ok(None)` when more bytes are
    /// needed.
    fn try_parse_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }

        let length = u64::from_le_bytes(self.buffer[..LENGTH_PREFIX_BYTES].try_into().unwrap());
        if length > MAX_PAYLOAD_BYTES {
            warn!(length, "frame length exceeds maximum payload, resetting connection");
            return Err(PipelineError::Framing(format!(
                "declared frame length {length} exceeds max {MAX_PAYLOAD_BYTES}"
            )));
        }

        let total = LENGTH_PREFIX_BYTES + length as usize;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_BYTES);
        let payload = self.buffer.split_to(length as usize).freeze();
        Ok(Some(payload))
    }
}

/// Shorthand used throughout C2+ for a frame shared across consumers.
pub type SharedFrame = Arc<Frame>;

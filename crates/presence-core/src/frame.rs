use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> DecodeReport<T> {
    fn push_frame(&mut self, frame: T) {
        self.frames.push(frame);
    }

    fn push_error(&mut self, error: FrameError) {
        self.errors.push(error);
    }
}

/// Encode one JSON object as a socket text frame.
pub fn encode_text<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

/// Encode one JSON object as a newline-terminated line for stdio.
pub fn encode_line<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let mut encoded = encode_text(value, max_frame_bytes)?.into_bytes();
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Splits a byte stream into lines and decodes each one with
/// [`decode_frame`]. A line that fails to decode is reported in the
/// [`DecodeReport`] and the next line is decoded normally. Blank lines are
/// ignored.
pub struct LineFrameDecoder<T> {
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T> LineFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            buffer: Vec::new(),
            scanned: 0,
            marker: PhantomData,
        }
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<T> Default for LineFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> LineFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        self.buffer.extend_from_slice(chunk);
        let mut report = DecodeReport::default();

        let mut line_start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = self.buffer[cursor..].iter().position(|byte| *byte == b'\n') {
            let line_end = cursor + offset + 1;
            self.decode_line(line_start, line_end, &mut report);
            line_start = line_end;
            cursor = line_end;
        }
        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();

        // A partial line can never become valid once it outgrows the limit.
        if self.buffer.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedBuffer {
                size: self.buffer.len(),
                max: self.max_frame_bytes,
            });
            self.buffer.clear();
            self.scanned = 0;
        }
        report
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        let len = self.buffer.len();
        self.decode_line(0, len, &mut report);
        self.buffer.clear();
        self.scanned = 0;
        report
    }

    fn decode_line(&self, start: usize, end: usize, report: &mut DecodeReport<T>) {
        let line = &self.buffer[start..end];
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match decode_frame(line, self.max_frame_bytes) {
            Ok(frame) => report.push_frame(frame),
            Err(err) => report.push_error(err),
        }
    }
}

use anyhow::Error;
use thiserror::Error;

/// Raw interleaved 8-bit frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Number of bytes a well-formed frame of this size carries.
    pub fn expected_len(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize) * 3
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// OpenCV native channel order.
    Bgr8,
    /// FFmpeg `rgb24` output.
    Rgb8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("no working camera among device indices {tried:?}")]
    NotFound { tried: Vec<i32> },
    #[error(transparent)]
    Other(#[from] Error),
}

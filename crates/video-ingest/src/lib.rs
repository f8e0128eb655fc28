//! Capture devices feeding the explorer's frame sources.
//!
//! Every backend implements [`FrameGrabber`]: one call, one frame or nothing.
//! A missing frame is not an error for callers; it only means the device had
//! nothing to give this cycle (unplugged, still warming up, process died).

mod ffmpeg;
mod types;

#[cfg(feature = "with-opencv")]
mod camera;

#[cfg(feature = "with-opencv")]
pub use camera::OpenCvCamera;
pub use ffmpeg::FfmpegCamera;
pub use types::{CaptureError, Frame, FrameFormat};

use tracing::warn;

/// Highest device index scanned when hunting for a camera.
pub const HUNT_MAX_INDEX: i32 = 4;

/// A capture device that can be polled for its most recent frame.
pub trait FrameGrabber: Send {
    /// Return the newest frame, or `None` when the device has nothing right now.
    fn acquire(&mut self) -> Option<Frame>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

/// Stand-in for a device that failed to open at startup. Always empty.
pub struct UnavailableCamera {
    source: String,
    warned: bool,
}

impl UnavailableCamera {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            warned: false,
        }
    }
}

impl FrameGrabber for UnavailableCamera {
    fn acquire(&mut self) -> Option<Frame> {
        if !self.warned {
            warn!(source = %self.source, "capture device unavailable; frames will not be produced");
            self.warned = true;
        }
        None
    }

    fn describe(&self) -> String {
        format!("unavailable ({})", self.source)
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

/// Device indices to try, in order, when hunting for a camera: the requested
/// one first, then every index up to [`HUNT_MAX_INDEX`], without repeats.
pub fn hunt_order(requested: i32) -> Vec<i32> {
    let mut order = vec![requested];
    for index in 0..=HUNT_MAX_INDEX {
        if !order.contains(&index) {
            order.push(index);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indices_and_device_paths() {
        assert_eq!(parse_device_index("2"), Some(2));
        assert_eq!(parse_device_index("/dev/video3"), Some(3));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://cam.local/stream"), None);
    }

    #[test]
    fn hunt_starts_with_requested_and_skips_duplicates() {
        assert_eq!(hunt_order(0), vec![0, 1, 2, 3, 4]);
        assert_eq!(hunt_order(2), vec![2, 0, 1, 3, 4]);
        assert_eq!(hunt_order(7), vec![7, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn unavailable_camera_never_yields() {
        let mut camera = UnavailableCamera::new("/dev/video9");
        assert!(camera.acquire().is_none());
        assert!(camera.acquire().is_none());
        assert!(camera.describe().contains("/dev/video9"));
    }
}

//! OpenCV-backed camera capture, read synchronously on the caller's thread.

use anyhow::Result;
use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, info};

use crate::{
    FrameGrabber, hunt_order, parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

/// V4L (or any OpenCV backend) camera producing BGR8 frames at `target_size`.
pub struct OpenCvCamera {
    source: String,
    cap: VideoCapture,
    target_size: (i32, i32),
    frame: Mat,
    scratch: Mat,
}

impl OpenCvCamera {
    pub fn open(source: &str, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(source)?;
        configure_camera(&mut cap, target_size);
        Ok(Self::from_capture(source.to_string(), cap, target_size))
    }

    /// Try `requested` and then neighbouring device indices, keeping the first
    /// one that opens and reads a frame.
    pub fn open_hunting(requested: i32, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let tried = hunt_order(requested);
        info!("hunting for a camera in {tried:?}");
        for index in &tried {
            let Ok(mut cap) = VideoCapture::new(*index, videoio::CAP_V4L2) else {
                continue;
            };
            configure_camera(&mut cap, target_size);
            if !cap.is_opened().unwrap_or(false) {
                continue;
            }
            let mut probe = Mat::default();
            if matches!(cap.read(&mut probe), Ok(true)) {
                info!("connected to camera index {index}");
                return Ok(Self::from_capture(index.to_string(), cap, target_size));
            }
            debug!("camera index {index} opened but delivered no frame");
            let _ = cap.release();
        }
        Err(CaptureError::NotFound { tried })
    }

    /// Whether `index` opens and yields a frame.
    pub fn probe(index: i32, target_size: (i32, i32)) -> bool {
        let Ok(mut cap) = VideoCapture::new(index, videoio::CAP_V4L2) else {
            return false;
        };
        configure_camera(&mut cap, target_size);
        let mut probe = Mat::default();
        let ok = cap.is_opened().unwrap_or(false) && matches!(cap.read(&mut probe), Ok(true));
        let _ = cap.release();
        ok
    }

    fn from_capture(source: String, cap: VideoCapture, target_size: (i32, i32)) -> Self {
        Self {
            source,
            cap,
            target_size,
            frame: Mat::default(),
            scratch: Mat::default(),
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if !self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?
        {
            return Ok(None);
        }
        let size = self.frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 {
            return Ok(None);
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Some(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }
}

impl FrameGrabber for OpenCvCamera {
    fn acquire(&mut self) -> Option<Frame> {
        match self.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                debug!("{}: read failed: {err}", self.source);
                None
            }
        }
    }

    fn describe(&self) -> String {
        format!("opencv {}", self.source)
    }
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L2, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => debug!("failed to open device #{index} with backend {backend}: {err}"),
            }
        }
    }

    for backend in [videoio::CAP_V4L2, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => debug!("failed to open {uri} with backend {backend}: {err}"),
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Best-effort capture settings; MJPEG keeps USB bandwidth low enough for two cameras.
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32)) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
}

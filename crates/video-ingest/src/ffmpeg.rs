//! FFmpeg-backed capture: a child `ffmpeg` process decodes the device into raw
//! `rgb24` frames on stdout and a reader thread keeps only the newest ones.

use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use anyhow::anyhow;
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use crate::{
    FrameGrabber, hunt_order, parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

/// Frames buffered between the reader thread and the grabber.
const FRAME_QUEUE: usize = 2;
/// How long `acquire` waits for a frame before reporting an empty cycle.
const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a hunted device gets to prove itself with a first frame.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// Running `ffmpeg` child plus the channel its frames arrive on. Dropping the
/// stream kills the child, which ends the reader thread at EOF.
struct FfmpegStream {
    child: Child,
    frames: Receiver<Result<Frame, CaptureError>>,
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Camera read through an `ffmpeg` subprocess. The process is respawned on the
/// next `acquire` after it dies.
pub struct FfmpegCamera {
    input: String,
    target_size: (i32, i32),
    stream: Option<FfmpegStream>,
}

impl FfmpegCamera {
    /// Start decoding `source` (device index, `/dev/videoN`, file, or URL).
    pub fn open(source: &str, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let input = input_path(source);
        let stream = spawn_stream(&input, target_size)?;
        Ok(Self {
            input,
            target_size,
            stream: Some(stream),
        })
    }

    /// Try `requested` and then neighbouring device indices, keeping the first
    /// one that delivers a frame.
    pub fn open_hunting(requested: i32, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let tried = hunt_order(requested);
        info!("hunting for a camera in {tried:?}");
        for index in &tried {
            let input = format!("/dev/video{index}");
            let stream = match spawn_stream(&input, target_size) {
                Ok(stream) => stream,
                Err(err) => {
                    debug!("{input}: {err}");
                    continue;
                }
            };
            match stream.frames.recv_timeout(FIRST_FRAME_TIMEOUT) {
                Ok(Ok(_)) => {
                    info!("connected to camera index {index}");
                    return Ok(Self {
                        input,
                        target_size,
                        stream: Some(stream),
                    });
                }
                Ok(Err(err)) => debug!("{input}: {err}"),
                Err(_) => debug!("{input}: no frame within {FIRST_FRAME_TIMEOUT:?}"),
            }
        }
        Err(CaptureError::NotFound { tried })
    }

    /// Whether `index` opens and yields a frame.
    pub fn probe(index: i32, target_size: (i32, i32)) -> bool {
        let input = format!("/dev/video{index}");
        match spawn_stream(&input, target_size) {
            Ok(stream) => matches!(stream.frames.recv_timeout(FIRST_FRAME_TIMEOUT), Ok(Ok(_))),
            Err(_) => false,
        }
    }
}

impl FrameGrabber for FfmpegCamera {
    fn acquire(&mut self) -> Option<Frame> {
        let Some(frames) = self.stream.as_ref().map(|stream| stream.frames.clone()) else {
            match spawn_stream(&self.input, self.target_size) {
                Ok(stream) => self.stream = Some(stream),
                Err(err) => debug!("{}: respawn failed: {err}", self.input),
            }
            return None;
        };

        let mut latest = match frames.recv_timeout(ACQUIRE_TIMEOUT) {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                warn!("{}: capture stopped: {err}", self.input);
                self.stream = None;
                return None;
            }
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => {
                self.stream = None;
                return None;
            }
        };
        while let Ok(next) = frames.try_recv() {
            match next {
                Ok(frame) => latest = frame,
                Err(err) => {
                    warn!("{}: capture stopped: {err}", self.input);
                    self.stream = None;
                    break;
                }
            }
        }
        Some(latest)
    }

    fn describe(&self) -> String {
        format!("ffmpeg {}", self.input)
    }
}

fn input_path(source: &str) -> String {
    match parse_device_index(source) {
        Some(index) => format!("/dev/video{index}"),
        None => source.to_string(),
    }
}

fn ffmpeg_args(input: &str, target_size: (i32, i32)) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect();
    if input.starts_with("/dev/video") {
        args.extend([
            "-f".to_string(),
            "video4linux2".to_string(),
            "-video_size".to_string(),
            format!("{}x{}", target_size.0, target_size.1),
        ]);
    } else if input.starts_with("rtsp://") || input.starts_with("rtsps://") {
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    args.extend([
        "-i".to_string(),
        input.to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", target_size.0, target_size.1),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-".to_string(),
    ]);
    args
}

fn spawn_stream(input: &str, target_size: (i32, i32)) -> Result<FfmpegStream, CaptureError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(ffmpeg_args(input, target_size))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|err| CaptureError::Other(err.into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    let (tx, rx) = bounded(FRAME_QUEUE);
    let drain = rx.clone();
    thread::Builder::new()
        .name(format!("ffmpeg-reader {input}"))
        .spawn(move || pump_frames(stdout, target_size, tx, drain))
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(FfmpegStream { child, frames: rx })
}

/// Read fixed-size raw frames until EOF, discarding the oldest queued frame
/// whenever the consumer falls behind.
fn pump_frames(
    mut stdout: impl Read,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
    drain: Receiver<Result<Frame, CaptureError>>,
) {
    let frame_bytes = (target_size.0.max(0) as usize) * (target_size.1.max(0) as usize) * 3;
    let mut buffer = vec![0u8; frame_bytes];

    loop {
        if let Err(err) = stdout.read_exact(&mut buffer) {
            push_latest(&tx, &drain, Err(CaptureError::Other(err.into())));
            break;
        }
        let frame = Frame {
            data: buffer.clone(),
            width: target_size.0,
            height: target_size.1,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Rgb8,
        };
        if !push_latest(&tx, &drain, Ok(frame)) {
            break;
        }
    }
}

/// Queue `item`, evicting the oldest entries while the queue is full. Returns
/// `false` once every receiver is gone.
fn push_latest<T>(tx: &Sender<T>, drain: &Receiver<T>, mut item: T) -> bool {
    loop {
        match tx.try_send(item) {
            Ok(()) => return true,
            Err(TrySendError::Full(rejected)) => {
                let _ = drain.try_recv();
                item = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn device_inputs_use_v4l2_demuxer() {
        let args = ffmpeg_args("/dev/video1", (640, 480));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "video4linux2"));
        assert!(args.windows(2).any(|w| w[0] == "-video_size" && w[1] == "640x480"));
        assert!(args.windows(2).any(|w| w[0] == "-pix_fmt" && w[1] == "rgb24"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn rtsp_inputs_force_tcp() {
        let args = ffmpeg_args("rtsp://10.0.0.2/cam", (320, 240));
        assert!(args.windows(2).any(|w| w[0] == "-rtsp_transport" && w[1] == "tcp"));
        assert!(!args.iter().any(|a| a == "video4linux2"));
    }

    #[test]
    fn numeric_sources_map_to_device_nodes() {
        assert_eq!(input_path("3"), "/dev/video3");
        assert_eq!(input_path("clip.mp4"), "clip.mp4");
    }

    #[test]
    fn pump_keeps_newest_frames_and_reports_eof() {
        let (w, h) = (2, 2);
        let frame_len = (w * h * 3) as usize;
        let mut bytes = Vec::new();
        for value in 1..=4u8 {
            bytes.extend(std::iter::repeat_n(value, frame_len));
        }
        let (tx, rx) = bounded(FRAME_QUEUE);
        pump_frames(Cursor::new(bytes), (w, h), tx, rx.clone());

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), FRAME_QUEUE);
        let last_frame = received
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .last()
            .expect("at least one frame survives");
        assert_eq!(last_frame.data[0], 4);
        assert_eq!(last_frame.format, FrameFormat::Rgb8);
        assert!(received.last().is_some_and(|item| item.is_err()));
    }
}

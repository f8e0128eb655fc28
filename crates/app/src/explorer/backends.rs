//! Construction of the concrete collaborators behind each seam: capture
//! devices, the object detector and the voice.

use anyhow::Result;
use ml_core::ObjectDetector;
use tracing::{error, info};
use video_ingest::{FfmpegCamera, FrameGrabber, UnavailableCamera, parse_device_index};
use voice::{CommandSynthesizer, OllamaGenerator, SpeechSynthesizer, ThoughtGenerator};

use crate::explorer::{
    config::{CaptureBackend, ExplorerConfig},
    state::Camera,
};

#[cfg(feature = "with-tch")]
const DETECTOR_INPUT_SIZE: u32 = 640;

/// Open `camera`. A device that cannot be opened is logged and replaced by one
/// that never yields frames; the loop keeps running and backing off.
pub(crate) fn open_camera(config: &ExplorerConfig, camera: Camera) -> Box<dyn FrameGrabber> {
    let camera_config = &config.cameras[camera];
    let source = camera_config.source.as_str();
    let hunt_from = camera_config
        .hunt
        .then(|| parse_device_index(source))
        .flatten();

    let opened: Result<Box<dyn FrameGrabber>, video_ingest::CaptureError> = match config.backend {
        CaptureBackend::Ffmpeg => match hunt_from {
            Some(index) => FfmpegCamera::open_hunting(index, config.frame_size)
                .map(|grabber| Box::new(grabber) as Box<dyn FrameGrabber>),
            None => FfmpegCamera::open(source, config.frame_size)
                .map(|grabber| Box::new(grabber) as Box<dyn FrameGrabber>),
        },
        CaptureBackend::Opencv => open_opencv(source, hunt_from, config.frame_size),
    };

    match opened {
        Ok(grabber) => {
            info!(%camera, "camera online: {}", grabber.describe());
            grabber
        }
        Err(err) => {
            error!(%camera, "camera failed to open: {err}");
            Box::new(UnavailableCamera::new(source))
        }
    }
}

#[cfg(feature = "with-opencv")]
fn open_opencv(
    source: &str,
    hunt_from: Option<i32>,
    frame_size: (i32, i32),
) -> Result<Box<dyn FrameGrabber>, video_ingest::CaptureError> {
    use video_ingest::OpenCvCamera;
    match hunt_from {
        Some(index) => OpenCvCamera::open_hunting(index, frame_size)
            .map(|grabber| Box::new(grabber) as Box<dyn FrameGrabber>),
        None => OpenCvCamera::open(source, frame_size)
            .map(|grabber| Box::new(grabber) as Box<dyn FrameGrabber>),
    }
}

#[cfg(not(feature = "with-opencv"))]
fn open_opencv(
    source: &str,
    _hunt_from: Option<i32>,
    _frame_size: (i32, i32),
) -> Result<Box<dyn FrameGrabber>, video_ingest::CaptureError> {
    Err(video_ingest::CaptureError::Open {
        uri: format!("{source} (built without `with-opencv`)"),
    })
}

/// Load the TorchScript detector. Failing here is fatal.
#[cfg(feature = "with-tch")]
pub(crate) fn load_detector(config: &ExplorerConfig) -> Result<Box<dyn ObjectDetector>> {
    use anyhow::Context;
    use ml_core::{detector::Detector, tch::Device};

    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    let detector = Detector::new(&config.model_path, device, DETECTOR_INPUT_SIZE)
        .with_context(|| format!("failed to load model {}", config.model_path.display()))?;
    info!("detector loaded on {:?}", detector.device());
    Ok(Box::new(detector))
}

#[cfg(not(feature = "with-tch"))]
pub(crate) fn load_detector(config: &ExplorerConfig) -> Result<Box<dyn ObjectDetector>> {
    anyhow::bail!(
        "cannot load {}: built without `with-tch`; rebuild with --features with-tch",
        config.model_path.display()
    )
}

pub(crate) fn build_voice(
    config: &ExplorerConfig,
) -> Result<(Box<dyn ThoughtGenerator>, Box<dyn SpeechSynthesizer>)> {
    let generator = OllamaGenerator::new(&config.llm_url, &config.llm_model, config.max_thought_words)?;
    let synthesizer = CommandSynthesizer::new(config.tts_command.clone(), config.tts_args.clone());
    info!(
        llm = %config.llm_url,
        model = %config.llm_model,
        tts = %config.tts_command,
        "voice ready"
    );
    Ok((Box::new(generator), Box::new(synthesizer)))
}

/// Try every device index a hunt would consider and report which deliver frames.
pub(crate) fn probe_cameras(backend: CaptureBackend, frame_size: (i32, i32)) -> Vec<(i32, bool)> {
    (0..=video_ingest::HUNT_MAX_INDEX)
        .map(|index| {
            let works = match backend {
                CaptureBackend::Ffmpeg => FfmpegCamera::probe(index, frame_size),
                CaptureBackend::Opencv => probe_opencv(index, frame_size),
            };
            (index, works)
        })
        .collect()
}

#[cfg(feature = "with-opencv")]
fn probe_opencv(index: i32, frame_size: (i32, i32)) -> bool {
    video_ingest::OpenCvCamera::probe(index, frame_size)
}

#[cfg(not(feature = "with-opencv"))]
fn probe_opencv(_index: i32, _frame_size: (i32, i32)) -> bool {
    false
}

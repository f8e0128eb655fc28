use std::{convert::TryFrom, path::Path};

use anyhow::{Result, bail};
use image::{
    Rgb, RgbImage,
    imageops::{self, FilterType},
};
use tch::{self, Device, Kind, Tensor};
use tracing::debug;

use crate::{
    BoundingBox, ObjectDetector, label_for,
    postprocess::{
        Letterbox, RawDetection, decode_anchor_rows, decode_end_to_end_rows, non_max_suppression,
    },
    runtime::load_torch_cuda_runtime,
};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;
const PAD_VALUE: u8 = 114;

/// TorchScript-exported YOLO detector operating on square letterboxed input.
pub struct Detector {
    module: tch::CModule,
    device: Device,
    input_size: u32,
}

impl Detector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(model_path: P, device: Device, input_size: u32) -> Result<Self> {
        if device.is_cuda() {
            load_torch_cuda_runtime();
        }
        let mut module = tch::CModule::load_on_device(model_path, device)?;
        module.set_eval();
        Ok(Self {
            module,
            device,
            input_size,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn letterbox(&self, image: &RgbImage) -> (Letterbox, RgbImage) {
        let letterbox = Letterbox::fit(image.width(), image.height(), self.input_size);
        let (width, height) = letterbox.resized_size();
        let resized = imageops::resize(image, width, height, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(self.input_size, self.input_size, Rgb([PAD_VALUE; 3]));
        imageops::replace(
            &mut canvas,
            &resized,
            letterbox.pad_x.floor() as i64,
            letterbox.pad_y.floor() as i64,
        );
        (letterbox, canvas)
    }

    /// Converts a square RGB canvas into a normalized NCHW tensor.
    fn rgb_to_tensor(&self, canvas: &RgbImage) -> Tensor {
        let side = self.input_size as i64;
        Tensor::from_slice(canvas.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, side, side, 3])
            .permute([0, 3, 1, 2])
            / 255.0
    }

    /// Executes the module and decodes whichever head layout it exports.
    fn infer(&self, input: &Tensor, confidence: f32) -> Result<Vec<RawDetection>> {
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))?;
        let shape = output.size();
        if shape.len() != 3 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[0] != 1 {
            bail!("detector expected batch=1 but received {}", shape[0]);
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0);

        if shape[2] == 6 {
            let rows = Vec::<Vec<f32>>::try_from(&preds.contiguous())?;
            return Ok(decode_end_to_end_rows(&rows, confidence));
        }
        if shape[1] < 5 {
            bail!(
                "detector output requires at least 5 channels (x,y,w,h,score), got {}",
                shape[1]
            );
        }
        let rows = Vec::<Vec<f32>>::try_from(&preds.permute([1, 0]).contiguous())?;
        Ok(non_max_suppression(
            decode_anchor_rows(&rows, confidence),
            NMS_IOU_THRESHOLD,
        ))
    }
}

impl ObjectDetector for Detector {
    fn detect(&self, image: &RgbImage, confidence: f32) -> Result<Vec<BoundingBox>> {
        let (letterbox, canvas) = self.letterbox(image);
        let input = self.rgb_to_tensor(&canvas);
        let raw = self.infer(&input, confidence)?;
        debug!("detector produced {} candidate(s)", raw.len());

        Ok(raw
            .into_iter()
            .take(MAX_DETECTIONS)
            .map(|det| {
                let [x1, y1, x2, y2] = letterbox.to_source(det.bbox);
                BoundingBox::new(x1, y1, x2, y2, label_for(det.class_id))
            })
            .collect())
    }
}

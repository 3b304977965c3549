use anyhow::Context;
use nalgebra::SVector;
use num_traits::cast::ToPrimitive;
use opencv::{
    core::{Mat, Size, CV_32F},
    imgproc,
    prelude::*,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tch::{Device, Kind, Tensor};

use crate::error::{DetectionFailure, Error, Result};
use crate::utils;

/// A single raw detection, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` with `x2 >= x1` and `y2 >= y1`.
    pub xyxy: SVector<f32, 4>,
    pub confidence: f32,
    pub class_id: i64,
}

impl Detection {
    pub fn new(xyxy: SVector<f32, 4>, confidence: f32, class_id: i64) -> Self {
        Self {
            xyxy,
            confidence,
            class_id,
        }
    }

    /// Build from corners, swapping them if given in the wrong order.
    pub fn from_xyxy(xyxy: [f32; 4], confidence: f32, class_id: i64) -> Self {
        let [x1, y1, x2, y2] = xyxy;
        Self::new(
            SVector::from([x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)]),
            confidence,
            class_id,
        )
    }

    pub fn xyxy(&self) -> &SVector<f32, 4> {
        &self.xyxy
    }

    /// Integer pixel corners, truncated the same way OpenCV drawing expects.
    pub fn pixel_corners(&self) -> [i32; 4] {
        let px = |v: f32| v.to_i32().unwrap_or(0);
        [px(self.xyxy[0]), px(self.xyxy[1]), px(self.xyxy[2]), px(self.xyxy[3])]
    }
}

/// Anything that can turn a frame into raw detections.
///
/// Implementations are loaded once and shared; `detect` must not mutate
/// the frame.
pub trait Detect {
    fn detect(&self, frame: &Mat) -> Result<Vec<Detection>>;
}

/// TorchScript export of a YOLOv8-style detector.
///
/// Output layout is `[1, 4 + classes, anchors]`: `cx, cy, w, h` in model
/// input pixels followed by one score per class.
pub struct Detector {
    // forward passes are serialized so the handle can be shared
    model: Mutex<tch::CModule>,
    device: Device,
    input_size: (i64, i64),
    pub conf_threshold: f32,
    pub nms_threshold: f32,
}

impl Detector {
    /// Load a model file onto `device` ("cpu"/"cuda").
    pub fn new(
        model_path: &str,
        device: &str,
        input_size: (i64, i64),
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> anyhow::Result<Self> {
        let device = if device == "cuda" && tch::Cuda::is_available() {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let mut model = tch::CModule::load_on_device(model_path, device)
            .with_context(|| format!("loading detection model {}", model_path))?;
        model.set_eval();
        log::info!("loaded {} on {:?}", model_path, device);

        Ok(Detector {
            model: Mutex::new(model),
            device,
            input_size,
            conf_threshold,
            nms_threshold,
        })
    }

    /// Resize, BGR→RGB, scale to [0, 1], NCHW.
    fn preprocess(&self, frame: &Mat) -> Result<Tensor> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.input_size.0 as i32, self.input_size.1 as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32F, 1.0 / 255.0, 0.0)?;

        let rows = float_mat.rows() as i64;
        let cols = float_mat.cols() as i64;
        let channels = float_mat.channels() as i64;
        let data = float_mat.data_typed::<opencv::core::Vec3f>()?;
        let flat: Vec<f32> = data.iter().flat_map(|px| px.0).collect();

        // HWC -> CHW
        let tensor = Tensor::from_slice(&flat)
            .reshape([rows, cols, channels])
            .permute([2, 0, 1])
            .unsqueeze(0)
            .to_kind(Kind::Float)
            .to_device(self.device);
        Ok(tensor)
    }

    fn inference(&self, input: &Tensor) -> Result<Tensor> {
        let model = self
            .model
            .lock()
            .map_err(|_| DetectionFailure::MalformedOutput("model lock poisoned".into()))?;
        let output = tch::no_grad(|| model.forward_ts(&[input])).map_err(DetectionFailure::from)?;
        Ok(output)
    }

    /// Decode the raw tensor into frame-space detections.
    fn postprocess(&self, output: &Tensor, frame_size: (i32, i32)) -> Result<Vec<Detection>> {
        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(DetectionFailure::MalformedOutput(format!(
                "expected [1, 4 + classes, anchors], got {:?}",
                shape
            ))
            .into());
        }
        let attrs = shape[1] as usize;
        let num_classes = attrs - 4;

        // [anchors, attrs], row-major on the CPU
        let rows = output
            .squeeze_dim(0)
            .transpose(0, 1)
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous();
        let values = Vec::<f32>::try_from(&rows).map_err(DetectionFailure::from)?;

        let (frame_w, frame_h) = (frame_size.0 as f32, frame_size.1 as f32);
        let scale_w = frame_w / self.input_size.0 as f32;
        let scale_h = frame_h / self.input_size.1 as f32;

        let mut candidates = Vec::new();
        for row in values.chunks_exact(attrs) {
            let scores = &row[4..];
            let (class_id, score) = scores
                .iter()
                .copied()
                .enumerate()
                .fold((0usize, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });
            if score < self.conf_threshold {
                continue;
            }

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let x1 = ((cx - w / 2.0) * scale_w).clamp(0.0, frame_w);
            let y1 = ((cy - h / 2.0) * scale_h).clamp(0.0, frame_h);
            let x2 = ((cx + w / 2.0) * scale_w).clamp(0.0, frame_w);
            let y2 = ((cy + h / 2.0) * scale_h).clamp(0.0, frame_h);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            let class_id = class_id.to_i64().unwrap_or(i64::MAX);
            candidates.push(Detection::from_xyxy([x1, y1, x2, y2], score, class_id));
        }
        log::debug!(
            "{} candidates above {:.2} across {} classes",
            candidates.len(),
            self.conf_threshold,
            num_classes
        );

        let keep = utils::nms_per_class(&candidates, self.nms_threshold);
        let detections: Vec<Detection> = keep.into_iter().map(|i| candidates[i].clone()).collect();
        log::debug!("{} detections after NMS", detections.len());
        Ok(detections)
    }
}

impl Detect for Detector {
    fn detect(&self, frame: &Mat) -> Result<Vec<Detection>> {
        let frame_size = (frame.cols(), frame.rows());
        let input = self.preprocess(frame)?;
        let output = self.inference(&input)?;
        self.postprocess(&output, frame_size)
    }
}

/// Bounds every inference call with a deadline.
///
/// The call runs on a helper thread. A call that misses the deadline cannot
/// be cancelled, so it keeps the detector marked busy until it finishes and
/// frames arriving meanwhile time out at once. At most one helper thread and
/// one cloned frame are alive at any time.
pub struct TimeoutDetector<D> {
    inner: Arc<D>,
    timeout: Duration,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the helper finishes, panics included.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<D> TimeoutDetector<D>
where
    D: Detect + Send + Sync + 'static,
{
    pub fn new(inner: Arc<D>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<D> Detect for TimeoutDetector<D>
where
    D: Detect + Send + Sync + 'static,
{
    fn detect(&self, frame: &Mat) -> Result<Vec<Detection>> {
        if self.busy.swap(true, Ordering::AcqRel) {
            log::debug!("previous inference still running, frame not submitted");
            return Err(DetectionFailure::Timeout(self.timeout).into());
        }
        let guard = InFlight(Arc::clone(&self.busy));
        let frame = frame.try_clone()?;
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = inner.detect(&frame);
            drop(guard);
            // receiver may already be gone after a timeout
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(DetectionFailure::Timeout(self.timeout).into()),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::DetectionFailure(
                DetectionFailure::MalformedOutput("inference thread exited without a result".into()),
            )),
        }
    }
}

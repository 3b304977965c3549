use opencv::{
    core::{Mat, CV_8U},
    prelude::*,
};
use std::sync::Arc;

use crate::detection::Detect;
use crate::error::{Error, Result};
use crate::verdict::{ModeState, RetainedDetection, RetentionRule, Summary};
use crate::visualization;

/// Everything one frame produces.
pub struct FrameVerdict {
    /// Copy of the input with boxes and summary text burned in.
    pub annotated: Mat,
    pub summary: Summary,
    /// Detections that passed the filters, in detector order.
    pub retained: Vec<RetainedDetection>,
}

impl FrameVerdict {
    pub fn mode_state(&self) -> ModeState {
        self.summary.mode_state
    }

    pub fn sleeping_count(&self) -> usize {
        self.summary.sleeping_count
    }

    /// Fallback for a frame whose inference failed: unannotated, `Unknown`,
    /// nobody sleeping.
    pub fn passthrough(frame: &Mat) -> Result<Self> {
        Ok(FrameVerdict {
            annotated: frame.try_clone()?,
            summary: Summary::UNKNOWN,
            retained: Vec::new(),
        })
    }
}

/// What became of one frame under the per-frame error policy.
pub enum FrameOutcome {
    Analyzed(FrameVerdict),
    /// Inference failed; the frame passes through unannotated with the
    /// default verdict.
    Fallback(FrameVerdict),
    /// Nothing to show for this frame.
    Skipped(Error),
}

/// Reject rasters the detector and the overlay code cannot handle.
pub fn validate_frame(frame: &Mat) -> Result<()> {
    if frame.empty() {
        return Err(Error::InvalidFrame("frame is empty".into()));
    }
    if frame.dims() != 2 {
        return Err(Error::InvalidFrame(format!("expected 2 dimensions, got {}", frame.dims())));
    }
    if frame.channels() != 3 || frame.depth() != CV_8U {
        return Err(Error::InvalidFrame(format!(
            "expected 8-bit BGR, got {} channel(s) of depth {}",
            frame.channels(),
            frame.depth()
        )));
    }
    Ok(())
}

/// Per-frame detection aggregation.
///
/// Holds a shared, already-loaded detector; each [`analyze`](Self::analyze)
/// call is independent of the previous one.
pub struct FrameAnalyzer<D: ?Sized> {
    detector: Arc<D>,
    rule: RetentionRule,
}

impl<D: Detect + ?Sized> FrameAnalyzer<D> {
    pub fn new(detector: Arc<D>, rule: RetentionRule) -> Self {
        Self { detector, rule }
    }

    /// Detect, filter, reduce and draw.
    ///
    /// The caller's frame is left untouched; annotations go onto a copy
    /// returned in [`FrameVerdict::annotated`].
    pub fn analyze(&self, frame: &Mat) -> Result<FrameVerdict> {
        validate_frame(frame)?;

        let detections = self.detector.detect(frame)?;
        let retained = self.rule.retain(&detections)?;
        let summary = Summary::from_retained(&retained);
        log::debug!(
            "{} raw detections, {} retained, mode {}",
            detections.len(),
            retained.len(),
            summary.mode_state
        );

        let mut annotated = frame.try_clone()?;
        visualization::draw_detections(&mut annotated, &retained)?;
        visualization::draw_summary(&mut annotated, &summary)?;

        Ok(FrameVerdict {
            annotated,
            summary,
            retained,
        })
    }

    /// [`analyze`](Self::analyze), with failures that only concern this
    /// frame folded into a [`FrameOutcome`] so a stream can keep going.
    ///
    /// An unknown class index means model and label table disagree, so the
    /// frame is dropped. Other detector failures fall back to an unannotated
    /// `("Unknown", 0)` frame. Invalid rasters and OpenCV errors drop the frame.
    pub fn analyze_or_fallback(&self, frame: &Mat) -> FrameOutcome {
        let err = match self.analyze(frame) {
            Ok(verdict) => return FrameOutcome::Analyzed(verdict),
            Err(err) => err,
        };
        match err {
            Error::DetectionFailure(failure) if failure.is_fatal_for_frame() => {
                log::error!("frame skipped: {}", failure);
                FrameOutcome::Skipped(failure.into())
            }
            Error::DetectionFailure(failure) => match FrameVerdict::passthrough(frame) {
                Ok(verdict) => {
                    log::warn!("{}, frame shown unannotated", failure);
                    FrameOutcome::Fallback(verdict)
                }
                Err(err) => {
                    log::warn!("frame skipped: {} (after {})", err, failure);
                    FrameOutcome::Skipped(err)
                }
            },
            other => {
                log::warn!("frame skipped: {}", other);
                FrameOutcome::Skipped(other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::error::DetectionFailure;
    use crate::labels::StateClass;
    use opencv::core::{Scalar, Vec3b, CV_32FC3, CV_8UC1, CV_8UC3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const AWAKE: i64 = 0;
    const SLEEPING: i64 = 1;
    const CAR: i64 = 4;

    /// Returns the same detections for every frame.
    struct StubDetector {
        detections: Vec<Detection>,
        calls: AtomicUsize,
    }

    impl StubDetector {
        fn new(detections: Vec<Detection>) -> Arc<Self> {
            Arc::new(Self {
                detections,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Detect for StubDetector {
        fn detect(&self, _frame: &Mat) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    struct FailingDetector;

    impl Detect for FailingDetector {
        fn detect(&self, _frame: &Mat) -> Result<Vec<Detection>> {
            Err(DetectionFailure::MalformedOutput("shape [1, 3]".into()).into())
        }
    }

    fn det(x: f32, class_id: i64, confidence: f32) -> Detection {
        Detection::from_xyxy([x, 100.0, x + 60.0, 200.0], confidence, class_id)
    }

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    /// True if every pixel in rows `0..rows` is black.
    fn top_is_blank(frame: &Mat, rows: i32) -> bool {
        (0..rows).all(|y| (0..frame.cols()).all(|x| frame.at_2d::<Vec3b>(y, x).unwrap().0 == [0, 0, 0]))
    }

    /// Fails every call with the given error.
    struct ErrDetector(fn() -> Error);

    impl Detect for ErrDetector {
        fn detect(&self, _frame: &Mat) -> Result<Vec<Detection>> {
            Err((self.0)())
        }
    }

    fn analyzer(dets: Vec<Detection>) -> FrameAnalyzer<StubDetector> {
        FrameAnalyzer::new(StubDetector::new(dets), RetentionRule::default())
    }

    #[test]
    fn test_three_sleeping_one_car() {
        let dets = vec![
            det(10.0, SLEEPING, 0.95),
            det(100.0, SLEEPING, 0.95),
            det(200.0, CAR, 0.95),
            det(300.0, SLEEPING, 0.95),
        ];
        let verdict = analyzer(dets).analyze(&frame()).unwrap();
        assert_eq!(verdict.mode_state(), ModeState::Known(StateClass::Sleeping));
        assert_eq!(verdict.sleeping_count(), 2);
        assert_eq!(verdict.retained.len(), 4);
    }

    #[test]
    fn test_only_awake_draws_nothing() {
        let dets = vec![det(10.0, AWAKE, 0.99), det(200.0, AWAKE, 0.99)];
        let verdict = analyzer(dets).analyze(&frame()).unwrap();
        assert_eq!(verdict.mode_state(), ModeState::Unknown);
        assert_eq!(verdict.sleeping_count(), 0);
        assert!(verdict.retained.is_empty());
        // summary overlays live in the bottom 120 rows
        assert!(top_is_blank(&verdict.annotated, 360));
    }

    #[test]
    fn test_low_confidence_sleeping_filtered() {
        let verdict = analyzer(vec![det(10.0, SLEEPING, 0.25)]).analyze(&frame()).unwrap();
        assert_eq!(verdict.mode_state(), ModeState::Unknown);
        assert_eq!(verdict.sleeping_count(), 0);
        assert!(top_is_blank(&verdict.annotated, 360));
    }

    #[test]
    fn test_retained_detection_is_drawn() {
        let verdict = analyzer(vec![det(10.0, CAR, 0.8)]).analyze(&frame()).unwrap();
        assert_eq!(verdict.mode_state(), ModeState::Known(StateClass::Car));
        assert!(!top_is_blank(&verdict.annotated, 360));
    }

    #[test]
    fn test_input_frame_left_untouched() {
        let input = frame();
        let verdict = analyzer(vec![det(10.0, SLEEPING, 0.9)]).analyze(&input).unwrap();
        assert!(top_is_blank(&input, input.rows()));
        assert!(!top_is_blank(&verdict.annotated, verdict.annotated.rows()));
    }

    #[test]
    fn test_repeat_analysis_agrees() {
        let dets = vec![det(10.0, CAR, 0.7), det(100.0, SLEEPING, 0.7), det(200.0, SLEEPING, 0.31)];
        let analyzer = analyzer(dets);
        let original = frame();
        let first = analyzer.analyze(&original.try_clone().unwrap()).unwrap();
        let second = analyzer.analyze(&original.try_clone().unwrap()).unwrap();
        assert_eq!(first.summary, second.summary);
        assert_eq!(analyzer.detector.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_class_index_is_detection_failure() {
        let err = analyzer(vec![det(10.0, SLEEPING, 0.9), det(50.0, 5, 0.9)])
            .analyze(&frame())
            .err()
            .unwrap();
        match err {
            Error::DetectionFailure(failure) => {
                assert!(failure.is_fatal_for_frame());
            }
            other => panic!("expected DetectionFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_detector_error_propagates() {
        let analyzer = FrameAnalyzer::new(Arc::new(FailingDetector), RetentionRule::default());
        let err = analyzer.analyze(&frame()).err().unwrap();
        assert!(matches!(err, Error::DetectionFailure(DetectionFailure::MalformedOutput(_))));
    }

    #[test]
    fn test_empty_frame_rejected_before_detection() {
        let analyzer = analyzer(vec![det(10.0, SLEEPING, 0.9)]);
        let err = analyzer.analyze(&Mat::default()).err().unwrap();
        assert!(matches!(err, Error::InvalidFrame(_)));
        assert_eq!(analyzer.detector.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_channel_layout_rejected() {
        let gray = Mat::new_rows_cols_with_default(10, 10, CV_8UC1, Scalar::all(0.0)).unwrap();
        assert!(matches!(validate_frame(&gray), Err(Error::InvalidFrame(_))));
        let float = Mat::new_rows_cols_with_default(10, 10, CV_32FC3, Scalar::all(0.0)).unwrap();
        assert!(matches!(validate_frame(&float), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_passthrough_is_unannotated() {
        let input = frame();
        let verdict = FrameVerdict::passthrough(&input).unwrap();
        assert_eq!(verdict.summary, Summary::UNKNOWN);
        assert!(top_is_blank(&verdict.annotated, verdict.annotated.rows()));
    }

    #[test]
    fn test_outcome_analyzed() {
        match analyzer(vec![det(10.0, SLEEPING, 0.9)]).analyze_or_fallback(&frame()) {
            FrameOutcome::Analyzed(verdict) => assert_eq!(verdict.sleeping_count(), 1),
            _ => panic!("expected an analyzed frame"),
        }
    }

    #[test]
    fn test_outcome_unknown_class_skips_frame() {
        let outcome = analyzer(vec![det(10.0, 7, 0.9)]).analyze_or_fallback(&frame());
        assert!(matches!(
            outcome,
            FrameOutcome::Skipped(Error::DetectionFailure(DetectionFailure::UnknownClass { index: 7, .. }))
        ));
    }

    #[test]
    fn test_outcome_detector_failures_fall_back() {
        let failures: [fn() -> Error; 3] = [
            || DetectionFailure::MalformedOutput("shape [1, 3]".into()).into(),
            || DetectionFailure::Timeout(Duration::from_millis(5)).into(),
            || DetectionFailure::Backend(tch::TchError::Torch("forward failed".into())).into(),
        ];
        for failure in failures {
            let analyzer = FrameAnalyzer::new(Arc::new(ErrDetector(failure)), RetentionRule::default());
            match analyzer.analyze_or_fallback(&frame()) {
                FrameOutcome::Fallback(verdict) => {
                    assert_eq!(verdict.summary, Summary::UNKNOWN);
                    assert!(verdict.retained.is_empty());
                    assert!(top_is_blank(&verdict.annotated, verdict.annotated.rows()));
                }
                _ => panic!("expected a fallback for {}", failure()),
            }
        }
    }

    #[test]
    fn test_outcome_invalid_frame_skipped() {
        let analyzer = analyzer(vec![det(10.0, SLEEPING, 0.9)]);
        let outcome = analyzer.analyze_or_fallback(&Mat::default());
        assert!(matches!(outcome, FrameOutcome::Skipped(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_outcome_opencv_error_skipped() {
        let opencv_error = || Error::OpenCv(opencv::Error::new(opencv::core::StsError, "draw failed"));
        let analyzer = FrameAnalyzer::new(Arc::new(ErrDetector(opencv_error)), RetentionRule::default());
        let outcome = analyzer.analyze_or_fallback(&frame());
        assert!(matches!(outcome, FrameOutcome::Skipped(Error::OpenCv(_))));
    }
}

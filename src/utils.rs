use nalgebra::SVector;
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
};

use crate::detection::Detection;

/// Class-aware non-max suppression; returns indices to keep, best first.
pub fn nms_per_class(detections: &[Detection], iou_thresh: f32) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..detections.len()).collect();
    idxs.sort_by(|&i, &j| detections[j].confidence.total_cmp(&detections[i].confidence));
    let mut keep = Vec::new();
    while let Some(&i) = idxs.first() {
        keep.push(i);
        idxs = idxs
            .into_iter()
            .skip(1)
            .filter(|&j| {
                detections[j].class_id != detections[i].class_id
                    || compute_iou(&detections[i].xyxy, &detections[j].xyxy) <= iou_thresh
            })
            .collect();
    }
    keep
}

/// IoU of two `[x1, y1, x2, y2]` boxes.
pub fn compute_iou(a: &SVector<f32, 4>, b: &SVector<f32, 4>) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let a_area = (a[2] - a[0]) * (a[3] - a[1]);
    let b_area = (b[2] - b[0]) * (b[3] - b[1]);

    let union = a_area + b_area - inter_area;
    if union <= 0.0 {
        return 0.0;
    }
    inter_area / union
}

pub fn draw_box(img: &mut Mat, bbox: [i32; 4], color: Scalar, thickness: i32) -> opencv::Result<()> {
    let rect = Rect::new(bbox[0], bbox[1], bbox[2] - bbox[0], bbox[3] - bbox[1]);
    imgproc::rectangle(img, rect, color, thickness, imgproc::LINE_8, 0)
}

pub fn draw_line(img: &mut Mat, from: (i32, i32), to: (i32, i32), color: Scalar, thickness: i32) -> opencv::Result<()> {
    imgproc::line(
        img,
        Point::new(from.0, from.1),
        Point::new(to.0, to.1),
        color,
        thickness,
        imgproc::LINE_8,
        0,
    )
}

pub fn put_text(
    img: &mut Mat,
    text: &str,
    org: (i32, i32),
    color: Scalar,
    font_scale: f64,
    thickness: i32,
) -> opencv::Result<()> {
    imgproc::put_text(
        img,
        text,
        Point::new(org.0, org.1),
        imgproc::FONT_HERSHEY_PLAIN,
        font_scale,
        color,
        thickness,
        imgproc::LINE_8,
        false,
    )
}

/// Text size for [`put_text`] with the same font settings.
pub fn text_size(text: &str, font_scale: f64, thickness: i32) -> opencv::Result<(i32, i32)> {
    let mut baseline = 0;
    let size = imgproc::get_text_size(text, imgproc::FONT_HERSHEY_PLAIN, font_scale, thickness, &mut baseline)?;
    Ok((size.width, size.height))
}

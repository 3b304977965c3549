use opencv::{
    core::{Mat, Scalar},
    imgproc,
    prelude::*,
};

use crate::utils;
use crate::verdict::{RetainedDetection, Summary};

// BGR
const WHITE: Scalar = Scalar::new(255.0, 255.0, 255.0, 0.0);
const MAGENTA: Scalar = Scalar::new(255.0, 0.0, 255.0, 0.0);
const GREEN: Scalar = Scalar::new(0.0, 255.0, 0.0, 0.0);
const BLUE: Scalar = Scalar::new(255.0, 0.0, 0.0, 0.0);

const CORNER_LENGTH: i32 = 5;
const CORNER_THICKNESS: i32 = 2;
const RECT_THICKNESS: i32 = 1;

const TEXT_SCALE: f64 = 2.0;
const TEXT_THICKNESS: i32 = 2;
const TEXT_PADDING: i32 = 10;

/// Summary lines sit this far above the bottom edge, at x = 50.
const SUMMARY_X: i32 = 50;
const MODE_STATE_OFFSET: i32 = 60;
const SLEEPING_OFFSET: i32 = 20;

/// Thin rectangle with thicker accents on each corner.
pub fn draw_corner_rect(frame: &mut Mat, bbox: [i32; 4], color: Scalar) -> opencv::Result<()> {
    let [x1, y1, x2, y2] = bbox;
    utils::draw_box(frame, bbox, color, RECT_THICKNESS)?;

    let l = CORNER_LENGTH;
    let t = CORNER_THICKNESS;
    for &(cx, cy, dx, dy) in &[(x1, y1, l, l), (x2, y1, -l, l), (x1, y2, l, -l), (x2, y2, -l, -l)] {
        utils::draw_line(frame, (cx, cy), (cx + dx, cy), color, t)?;
        utils::draw_line(frame, (cx, cy), (cx, cy + dy), color, t)?;
    }
    Ok(())
}

/// Text on a filled, padded background; `org` is the text baseline origin.
pub fn draw_text_rect(
    frame: &mut Mat,
    text: &str,
    org: (i32, i32),
    background: Scalar,
    foreground: Scalar,
) -> opencv::Result<()> {
    let (w, h) = utils::text_size(text, TEXT_SCALE, TEXT_THICKNESS)?;
    let (ox, oy) = org;
    let bg = [ox - TEXT_PADDING, oy - h - TEXT_PADDING, ox + w + TEXT_PADDING, oy + TEXT_PADDING];
    utils::draw_box(frame, bg, background, imgproc::FILLED)?;
    utils::put_text(frame, text, org, foreground, TEXT_SCALE, TEXT_THICKNESS)
}

/// Box plus `"{class} {confidence:.2}"` label just above it.
pub fn draw_detection(frame: &mut Mat, retained: &RetainedDetection) -> opencv::Result<()> {
    let corners = retained.detection.pixel_corners();
    draw_corner_rect(frame, corners, WHITE)?;
    draw_text_rect(frame, &retained.label(), (corners[0], corners[1] - 10), MAGENTA, WHITE)
}

pub fn draw_detections(frame: &mut Mat, retained: &[RetainedDetection]) -> opencv::Result<()> {
    for det in retained {
        draw_detection(frame, det)?;
    }
    Ok(())
}

/// Mode state and sleeping count in the bottom-left corner.
pub fn draw_summary(frame: &mut Mat, summary: &Summary) -> opencv::Result<()> {
    let rows = frame.rows();
    draw_text_rect(
        frame,
        &format!("Mode State: {}", summary.mode_state),
        (SUMMARY_X, rows - MODE_STATE_OFFSET),
        GREEN,
        WHITE,
    )?;
    draw_text_rect(
        frame,
        &format!("People Sleeping: {}", summary.sleeping_count),
        (SUMMARY_X, rows - SLEEPING_OFFSET),
        BLUE,
        WHITE,
    )
}

// THEORY:
// Operators watch annotated frames, and alert notifications carry one as
// evidence. The annotation layer draws, on a copy of the frame:
// - every danger zone (yellow, "AREA"),
// - every hazard detection (blue, "BARE"),
// - hazard detections that are inside a zone (red, thicker, "DANGER"),
// - a status banner, plus the alarm text and its running duration while an
//   alert is active.
//
// Drawing is plain pixel writes on an `RgbImage` with clipping, and text uses a
// tiny built-in 5x7 bitmap font. Annotation cannot fail, whatever the frame size
// or box coordinates.

use crate::core_modules::danger::Assessment;
use crate::core_modules::region::Region;
use crate::detector::BoundingBox;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, Rgb, RgbImage};
use std::time::Duration;

pub const ZONE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const HAZARD_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const DANGER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const SAFE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

/// What the banner should say about the stream's alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertStatus {
    pub active: bool,
    pub active_for: Option<Duration>,
}

/// Renders the observability overlay onto a copy of `frame`.
pub fn annotate(
    frame: &RgbImage,
    regions: &[Region],
    assessment: &Assessment,
    status: AlertStatus,
) -> RgbImage {
    let mut canvas = frame.clone();
    let text_scale = text_scale_for(&canvas);

    for zone in regions {
        draw_rect(&mut canvas, zone.xmin, zone.ymin, zone.xmax, zone.ymax, ZONE_COLOR, 2);
        draw_label(&mut canvas, zone.xmin, zone.ymin, "AREA", ZONE_COLOR, text_scale);
    }

    for hazard in &assessment.hazard_boxes {
        let (x1, y1, x2, y2) = pixel_corners(&hazard.bbox);
        draw_rect(&mut canvas, x1, y1, x2, y2, HAZARD_COLOR, 2);
        draw_label(&mut canvas, x1, y1, "BARE", HAZARD_COLOR, text_scale);
    }

    for danger in &assessment.danger_boxes {
        let (x1, y1, x2, y2) = pixel_corners(&danger.bbox);
        draw_rect(&mut canvas, x1, y1, x2, y2, DANGER_COLOR, 3);
        draw_label(&mut canvas, x1, y1, "DANGER", DANGER_COLOR, text_scale);
    }

    let banner_scale = text_scale * 2;
    let line = (GLYPH_HEIGHT + 3) * banner_scale;
    let (status_text, status_color) = if status.active {
        ("STATUS: DANGER", DANGER_COLOR)
    } else {
        ("STATUS: SAFE", SAFE_COLOR)
    };
    draw_text(&mut canvas, 10, 10, status_text, status_color, banner_scale);

    if status.active {
        draw_text(
            &mut canvas,
            10,
            10 + line,
            "ALARM! BARE HANDS DETECTED!",
            DANGER_COLOR,
            text_scale.max(1) + text_scale / 2,
        );
        let seconds = status.active_for.unwrap_or_default().as_secs();
        draw_text(
            &mut canvas,
            10,
            10 + 2 * line,
            &format!("DURATION: {seconds}S"),
            DANGER_COLOR,
            text_scale,
        );
    }

    canvas
}

/// Encodes a frame as JPEG, e.g. for alert attachments.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

fn text_scale_for(frame: &RgbImage) -> i32 {
    // Roughly legible at 480p, grows with resolution.
    ((frame.height() / 360) as i32).max(1)
}

fn pixel_corners(bbox: &BoundingBox) -> (i32, i32, i32, i32) {
    (
        bbox.xmin as i32,
        bbox.ymin as i32,
        bbox.xmax as i32,
        bbox.ymax as i32,
    )
}

fn put(canvas: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_rect(canvas: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let x_lo = x1.max(0);
    let y_lo = y1.max(0);
    let x_hi = x2.min(canvas.width() as i32 - 1);
    let y_hi = y2.min(canvas.height() as i32 - 1);
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            put(canvas, x, y, color);
        }
    }
}

/// Outlines a rectangle with the border growing inward from the given edges.
pub fn draw_rect(
    canvas: &mut RgbImage,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: Rgb<u8>,
    thickness: i32,
) {
    let (x1, x2) = (x1.min(x2), x1.max(x2));
    let (y1, y2) = (y1.min(y2), y1.max(y2));
    let t = thickness.max(1) - 1;
    fill_rect(canvas, x1, y1, x2, (y1 + t).min(y2), color);
    fill_rect(canvas, x1, (y2 - t).max(y1), x2, y2, color);
    fill_rect(canvas, x1, y1, (x1 + t).min(x2), y2, color);
    fill_rect(canvas, (x2 - t).max(x1), y1, x2, y2, color);
}

/// Places a label just above a box, or inside it when there is no room above.
fn draw_label(canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    let height = (GLYPH_HEIGHT + 2) * scale;
    let top = if y - height >= 0 { y - height } else { y + 3 * scale };
    draw_text(canvas, x + scale, top, text, color, scale);
}

/// Renders `text` with the built-in bitmap font. Unknown characters render blank.
pub fn draw_text(canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch.to_ascii_uppercase()) else {
            continue;
        };
        let origin_x = x + i as i32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                    let px = origin_x + col * scale;
                    let py = y + row as i32 * scale;
                    fill_rect(canvas, px, py, px + scale - 1, py + scale - 1, color);
                }
            }
        }
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionBox;

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::new(width, height)
    }

    #[test]
    fn zone_border_is_drawn_in_zone_color() {
        let frame = blank(200, 200);
        let out = annotate(&frame, &[Region::new(50, 60, 150, 160)], &Assessment::default(), AlertStatus::default());
        assert_eq!(*out.get_pixel(100, 60), ZONE_COLOR);
        assert_eq!(*out.get_pixel(50, 100), ZONE_COLOR);
        assert_eq!(*out.get_pixel(100, 110), Rgb([0, 0, 0]));
        // The source frame is untouched.
        assert_eq!(*frame.get_pixel(100, 60), Rgb([0, 0, 0]));
    }

    #[test]
    fn danger_boxes_are_drawn_over_hazards() {
        let frame = blank(200, 200);
        let hand = DetectionBox::new(BoundingBox::new(80.0, 80.0, 120.0, 120.0), "bare", 0.9);
        let assessment = Assessment {
            is_dangerous: true,
            danger_boxes: vec![hand.clone()],
            hazard_boxes: vec![hand],
            ..Assessment::default()
        };
        let out = annotate(&frame, &[], &assessment, AlertStatus::default());
        assert_eq!(*out.get_pixel(100, 80), DANGER_COLOR);
        assert_eq!(*out.get_pixel(82, 100), DANGER_COLOR);
    }

    #[test]
    fn banner_color_follows_alert_state() {
        let frame = blank(320, 240);
        let contains_color = |img: &RgbImage, color: Rgb<u8>| img.pixels().any(|p| *p == color);

        let safe = annotate(&frame, &[], &Assessment::default(), AlertStatus::default());
        assert!(contains_color(&safe, SAFE_COLOR));
        assert!(!contains_color(&safe, DANGER_COLOR));

        let active = AlertStatus {
            active: true,
            active_for: Some(Duration::from_secs(3)),
        };
        let alarmed = annotate(&frame, &[], &Assessment::default(), active);
        assert!(contains_color(&alarmed, DANGER_COLOR));
        assert!(!contains_color(&alarmed, SAFE_COLOR));
    }

    #[test]
    fn drawing_outside_the_frame_is_clipped() {
        let frame = blank(16, 16);
        let hand = DetectionBox::new(BoundingBox::new(-50.0, -50.0, 500.0, 500.0), "bare", 0.9);
        let assessment = Assessment {
            hazard_boxes: vec![hand],
            ..Assessment::default()
        };
        let out = annotate(&frame, &[Region::new(-10, -10, 40, 40)], &assessment, AlertStatus {
            active: true,
            active_for: None,
        });
        assert_eq!(out.dimensions(), (16, 16));
    }

    #[test]
    fn empty_frames_are_tolerated() {
        let out = annotate(&blank(0, 0), &[Region::new(0, 0, 1, 1)], &Assessment::default(), AlertStatus::default());
        assert_eq!(out.dimensions(), (0, 0));
    }

    #[test]
    fn jpeg_encoding_produces_a_jpeg() {
        let bytes = encode_jpeg(&blank(32, 32), 85).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}

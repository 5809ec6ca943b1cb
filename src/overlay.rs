//! Detection overlay rendering.
//!
//! Given the current frame and a list of detections, produce a composited
//! canvas at the frame's native resolution: redraw the frame, then for each
//! detection a hollow rectangle from (x1,y1) to (x2,y2) and a label showing
//! class and confidence as a percentage with one decimal place, positioned
//! just above the box's top-left corner.
//!
//! Rendering is fully stateless and idempotent per call. It always starts
//! from a fresh copy of the frame and never accumulates prior overlays.
//! Box coordinates are clamped into the canvas at draw time; the client does
//! not otherwise validate them.

use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    text::Text,
};
use image::{Rgb, RgbImage};

use crate::detect::Detection;
use crate::frame::Frame;

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: u32 = 2;
/// Label baseline sits this many pixels above the box's top-left corner.
const LABEL_OFFSET: i32 = 5;
/// Lowest baseline that keeps FONT_6X10 glyphs inside the canvas.
const MIN_LABEL_BASELINE: i32 = 8;

/// Composite one frame with its detections into a fresh canvas.
pub fn render(frame: &Frame, detections: &[Detection]) -> RgbImage {
    let mut canvas = frame.image().clone();
    for detection in detections {
        draw_detection(&mut canvas, detection);
    }
    canvas
}

/// Label text: class plus confidence as a percentage with one decimal place.
pub(crate) fn label_text(detection: &Detection) -> String {
    format!(
        "{} ({:.1}%)",
        detection.label,
        detection.confidence * 100.0
    )
}

fn draw_detection(canvas: &mut RgbImage, detection: &Detection) {
    let bbox = &detection.bbox;
    draw_rect(
        canvas,
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2],
        BOX_COLOR,
        BOX_THICKNESS,
    );

    let baseline = ((bbox.y1 as i32) - LABEL_OFFSET).max(MIN_LABEL_BASELINE);
    draw_text(canvas, &label_text(detection), (bbox.x1 as i32, baseline), BOX_COLOR);
}

fn draw_rect(canvas: &mut RgbImage, bbox: [f32; 4], color: [u8; 3], thickness: u32) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    // Normalize inverted corners so the rectangle draws either way.
    let x0 = clamp(bbox[0].min(bbox[2]), w);
    let y0 = clamp(bbox[1].min(bbox[3]), h);
    let x1 = clamp(bbox[0].max(bbox[2]), w);
    let y1 = clamp(bbox[1].max(bbox[3]), h);
    for t in 0..thickness {
        let xx0 = x0 + t;
        let yy0 = y0 + t;
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            canvas.put_pixel(x, yy0, Rgb(color));
            canvas.put_pixel(x, yy1, Rgb(color));
        }
        for y in yy0..=yy1 {
            canvas.put_pixel(xx0, y, Rgb(color));
            canvas.put_pixel(xx1, y, Rgb(color));
        }
    }
}

fn draw_text(canvas: &mut RgbImage, text: &str, pos: (i32, i32), color: [u8; 3]) {
    let style = MonoTextStyle::new(&FONT_6X10, Rgb888::new(color[0], color[1], color[2]));
    let mut target = CanvasDrawTarget { canvas };
    let _ = Text::new(text, Point::new(pos.0, pos.1), style).draw(&mut target);
}

/// Adapter so embedded-graphics text can render onto an `RgbImage`.
struct CanvasDrawTarget<'a> {
    canvas: &'a mut RgbImage,
}

impl OriginDimensions for CanvasDrawTarget<'_> {
    fn size(&self) -> Size {
        Size::new(self.canvas.width(), self.canvas.height())
    }
}

impl DrawTarget for CanvasDrawTarget<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let width = self.canvas.width() as i32;
        let height = self.canvas.height() as i32;
        for Pixel(coord, color) in pixels {
            if coord.x < 0 || coord.y < 0 || coord.x >= width || coord.y >= height {
                continue;
            }
            let pixel = self.canvas.get_pixel_mut(coord.x as u32, coord.y as u32);
            *pixel = Rgb([color.r(), color.g(), color.b()]);
        }
        Ok(())
    }
}

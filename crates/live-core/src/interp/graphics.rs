//! Recording graphics device.
//!
//! Drawing calls append operations to the current plot. A plot is captured
//! as an opaque recording and only rasterized when the host asks for it at a
//! particular size.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Style {
    Points,
    Lines,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlotOp {
    Series { style: Style, points: Vec<(f64, f64)> },
    ABLine { intercept: f64, slope: f64 },
    HLine(f64),
    VLine(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPlot {
    pub xlim: (f64, f64),
    pub ylim: (f64, f64),
    pub title: Option<String>,
    pub ops: Vec<PlotOp>,
}

impl RecordedPlot {
    pub fn new(points: &[(f64, f64)], style: Style, title: Option<String>) -> Self {
        Self {
            xlim: limits(points.iter().map(|p| p.0)),
            ylim: limits(points.iter().map(|p| p.1)),
            title,
            ops: vec![PlotOp::Series { style, points: points.to_vec() }],
        }
    }
}

fn limits(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.04;
    (lo - pad, hi + pad)
}

#[derive(Debug, Default)]
pub struct Device {
    pub current: Option<RecordedPlot>,
    /// Set when the current plot changed since the last snapshot.
    pub dirty: bool,
}

impl Device {
    pub fn start(&mut self, plot: RecordedPlot) {
        self.current = Some(plot);
        self.dirty = true;
    }

    pub fn add(&mut self, op: PlotOp) -> Result<(), String> {
        let plot = self
            .current
            .as_mut()
            .ok_or_else(|| "plot.new has not been called yet".to_string())?;
        plot.ops.push(op);
        self.dirty = true;
        Ok(())
    }

    /// Takes a snapshot of the current plot if it changed.
    pub fn snapshot(&mut self) -> Option<RecordedPlot> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        self.current.clone()
    }
}

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const AXIS: Rgba<u8> = Rgba([90, 90, 90, 255]);

struct Canvas {
    image: RgbaImage,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    xlim: (f64, f64),
    ylim: (f64, f64),
}

impl Canvas {
    fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let px = self.left + (x - self.xlim.0) / (self.xlim.1 - self.xlim.0) * (self.right - self.left);
        let py = self.bottom - (y - self.ylim.0) / (self.ylim.1 - self.ylim.0) * (self.bottom - self.top);
        (px, py)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgba<u8>) {
        let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
        let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn point(&mut self, center: (f64, f64), color: Rgba<u8>) {
        let (cx, cy) = (center.0.round() as i64, center.1.round() as i64);
        for dx in -2i64..=2 {
            for dy in -2i64..=2 {
                if dx * dx + dy * dy <= 5 {
                    self.put(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn data_line(&mut self, a: (f64, f64), b: (f64, f64)) {
        if a.0.is_finite() && a.1.is_finite() && b.0.is_finite() && b.1.is_finite() {
            let (pa, pb) = (self.to_pixel(a.0, a.1), self.to_pixel(b.0, b.1));
            self.line(pa, pb, INK);
        }
    }
}

/// Renders a recorded plot to PNG bytes.
pub fn rasterize(plot: &RecordedPlot, width: u32, height: u32) -> Result<Vec<u8>, String> {
    let width = width.max(16);
    let height = height.max(16);
    let margin_x = (width as f64 * 0.1).max(8.0);
    let margin_y = (height as f64 * 0.1).max(8.0);

    let mut canvas = Canvas {
        image: RgbaImage::from_pixel(width, height, BACKGROUND),
        left: margin_x,
        right: width as f64 - margin_x,
        top: margin_y,
        bottom: height as f64 - margin_y,
        xlim: plot.xlim,
        ylim: plot.ylim,
    };

    let (l, r, t, b) = (canvas.left, canvas.right, canvas.top, canvas.bottom);
    canvas.line((l, t), (r, t), AXIS);
    canvas.line((r, t), (r, b), AXIS);
    canvas.line((r, b), (l, b), AXIS);
    canvas.line((l, b), (l, t), AXIS);

    for op in &plot.ops {
        match op {
            PlotOp::Series { style: Style::Points, points } => {
                for &(x, y) in points.iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
                    let p = canvas.to_pixel(x, y);
                    canvas.point(p, INK);
                }
            }
            PlotOp::Series { style: Style::Lines, points } => {
                for pair in points.windows(2) {
                    canvas.data_line(pair[0], pair[1]);
                }
            }
            PlotOp::ABLine { intercept, slope } => {
                let (x0, x1) = plot.xlim;
                canvas.data_line((x0, intercept + slope * x0), (x1, intercept + slope * x1));
            }
            PlotOp::HLine(h) => canvas.data_line((plot.xlim.0, *h), (plot.xlim.1, *h)),
            PlotOp::VLine(v) => canvas.data_line((*v, plot.ylim.0), (*v, plot.ylim.1)),
        }
    }

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(canvas.image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| format!("failed to encode plot: {}", e))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_to_an_empty_device_fails() {
        let mut device = Device::default();
        let err = device.add(PlotOp::HLine(0.0)).unwrap_err();
        assert_eq!(err, "plot.new has not been called yet");
    }

    #[test]
    fn snapshots_only_when_changed() {
        let mut device = Device::default();
        device.start(RecordedPlot::new(&[(1.0, 1.0), (2.0, 4.0)], Style::Points, None));
        assert!(device.snapshot().is_some());
        assert!(device.snapshot().is_none());
        device.add(PlotOp::ABLine { intercept: 0.0, slope: 1.0 }).unwrap();
        assert_eq!(device.snapshot().map(|p| p.ops.len()), Some(2));
    }

    #[test]
    fn rasterizes_to_png_of_requested_size() {
        let plot = RecordedPlot::new(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.5)], Style::Lines, None);
        let png = rasterize(&plot, 504, 360).unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (504, 360));
    }
}

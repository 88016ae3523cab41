//! Minimal SVG document writer shared by every figure

use std::{fmt::Write as _, fs, path::Path};

use crate::{
    colormap::{ColorScale, Rgb},
    error::Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    #[default]
    Start,
    Middle,
    End,
}
impl Anchor {
    fn as_str(&self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// An SVG document assembled from primitive shapes
#[derive(Debug, Clone)]
pub struct Document {
    width: f64,
    height: f64,
    body: String,
}
impl Document {
    pub fn new(width: f64, height: f64) -> Self {
        let mut doc = Self {
            width,
            height,
            body: String::new(),
        };
        doc.rect(0.0, 0.0, width, height, Some(Rgb::WHITE), None);
        doc
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: Option<Rgb>, stroke: Option<Rgb>) {
        let fill = fill.map_or("none".to_string(), |c| c.to_hex());
        let stroke = stroke.map_or("none".to_string(), |c| c.to_hex());
        let _ = writeln!(
            self.body,
            r#"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{fill}" stroke="{stroke}"/>"#
        );
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: Rgb, width: f64) {
        let _ = writeln!(
            self.body,
            r#"<line x1="{x1:.2}" y1="{y1:.2}" x2="{x2:.2}" y2="{y2:.2}" stroke="{stroke}" stroke-width="{width}"/>"#
        );
    }

    pub fn dashed_line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: Rgb, width: f64) {
        let _ = writeln!(
            self.body,
            r#"<line x1="{x1:.2}" y1="{y1:.2}" x2="{x2:.2}" y2="{y2:.2}" stroke="{stroke}" stroke-width="{width}" stroke-dasharray="4 2"/>"#
        );
    }

    pub fn circle(&mut self, cx: f64, cy: f64, r: f64, fill: Rgb) {
        let _ = writeln!(
            self.body,
            r#"<circle cx="{cx:.2}" cy="{cy:.2}" r="{r:.2}" fill="{fill}" fill-opacity="0.8"/>"#
        );
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], stroke: Rgb, width: f64) {
        let points = points
            .iter()
            .map(|(x, y)| format!("{x:.2},{y:.2}"))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            self.body,
            r#"<polyline points="{points}" fill="none" stroke="{stroke}" stroke-width="{width}"/>"#
        );
    }

    /// Filled polygon with partial opacity, used for confidence bands
    pub fn polygon(&mut self, points: &[(f64, f64)], fill: Rgb, opacity: f64) {
        let points = points
            .iter()
            .map(|(x, y)| format!("{x:.2},{y:.2}"))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            self.body,
            r#"<polygon points="{points}" fill="{fill}" fill-opacity="{opacity}" stroke="none"/>"#
        );
    }

    pub fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: Anchor) {
        let _ = writeln!(
            self.body,
            r#"<text x="{x:.2}" y="{y:.2}" font-family="sans-serif" font-size="{size}" text-anchor="{}">{}</text>"#,
            anchor.as_str(),
            escape(content)
        );
    }

    /// Text rotated by `angle` degrees around its anchor point
    pub fn rotated_text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: Anchor, angle: f64) {
        let _ = writeln!(
            self.body,
            r#"<text x="{x:.2}" y="{y:.2}" font-family="sans-serif" font-size="{size}" text-anchor="{}" transform="rotate({angle} {x:.2} {y:.2})">{}</text>"#,
            anchor.as_str(),
            escape(content)
        );
    }

    /// Opens a translated group; close it with [`Document::end_group`]
    pub fn begin_group(&mut self, dx: f64, dy: f64) {
        let _ = writeln!(self.body, r#"<g transform="translate({dx:.2},{dy:.2})">"#);
    }

    pub fn end_group(&mut self) {
        self.body.push_str("</g>\n");
    }

    /// Vertical colour bar with ticks and an optional title
    pub fn colorbar(&mut self, scale: &ColorScale, x: f64, y: f64, height: f64, title: Option<&str>) {
        let steps = 64;
        let step_height = height / steps as f64;
        for i in 0..steps {
            let t = 1.0 - (i as f64 + 0.5) / steps as f64;
            let value = scale.vmin + t * (scale.vmax - scale.vmin);
            self.rect(x, y + i as f64 * step_height, 16.0, step_height + 0.5, scale.color(value), None);
        }
        self.rect(x, y, 16.0, height, None, Some(Rgb::BLACK));
        for tick in ticks(scale.vmin, scale.vmax, 5) {
            let ty = y + (1.0 - scale.normalize(tick)) * height;
            self.line(x + 16.0, ty, x + 20.0, ty, Rgb::BLACK, 1.0);
            self.text(x + 22.0, ty + 4.0, &format_tick(tick), 10.0, Anchor::Start);
        }
        if let Some(title) = title {
            self.rotated_text(x + 75.0, y + height / 2.0, title, 12.0, Anchor::Middle, 90.0);
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 200);
        let _ = writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        out.push_str(&self.body);
        out.push_str("</svg>\n");
        out
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Evenly spaced axis ticks covering `[lo, hi]`
pub fn ticks(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if !(hi > lo) || n < 2 {
        return vec![lo];
    }
    let step = (hi - lo) / (n - 1) as f64;
    (0..n).map(|i| lo + step * i as f64).collect()
}

/// Compact tick label
pub fn format_tick(value: f64) -> String {
    if value != 0.0 && (value.abs() < 1e-2 || value.abs() >= 1e4) {
        format!("{value:.1e}")
    } else {
        format!("{value:.2}")
    }
}

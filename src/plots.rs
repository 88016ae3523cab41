//! Scatter, bar and box plots of subject level data

use std::cmp::Ordering;

use bon::Builder;
use itertools::Itertools;
use ndarray::{Array1, Array2};

use crate::{
    colormap::Rgb,
    config::Scaling,
    error::{Error, Result},
    math::{arithmetic_mean, ols, quantile, sample_sd, standardize, t_critical},
    svg::{format_tick, ticks, Anchor, Document},
};

const PALETTE: [Rgb; 6] = [
    Rgb(31, 119, 180),
    Rgb(255, 127, 14),
    Rgb(44, 160, 44),
    Rgb(214, 39, 40),
    Rgb(148, 103, 189),
    Rgb(140, 86, 75),
];
const CRIMSON: Rgb = Rgb(220, 20, 60);

/// Maps data coordinates onto a plotting area
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    x_range: (f64, f64),
    y_range: (f64, f64),
}
impl Frame {
    fn new(x_range: (f64, f64), y_range: (f64, f64)) -> Self {
        let pad = |(lo, hi): (f64, f64)| {
            let span = if hi > lo { hi - lo } else { 1.0 };
            (lo - 0.05 * span, hi + 0.05 * span)
        };
        Self {
            left: 70.0,
            top: 40.0,
            width: 400.0,
            height: 300.0,
            x_range: pad(x_range),
            y_range: pad(y_range),
        }
    }

    fn px(&self, x: f64) -> f64 {
        self.left + (x - self.x_range.0) / (self.x_range.1 - self.x_range.0) * self.width
    }

    fn py(&self, y: f64) -> f64 {
        self.top + self.height - (y - self.y_range.0) / (self.y_range.1 - self.y_range.0) * self.height
    }

    fn document(&self) -> Document {
        Document::new(self.left + self.width + 200.0, self.top + self.height + 60.0)
    }

    fn draw_y_axis(&self, doc: &mut Document, label: &str) {
        let bottom = self.top + self.height;
        doc.line(self.left, self.top, self.left, bottom, Rgb::BLACK, 1.0);
        for tick in ticks(self.y_range.0, self.y_range.1, 5) {
            let y = self.py(tick);
            doc.line(self.left - 4.0, y, self.left, y, Rgb::BLACK, 1.0);
            doc.text(self.left - 6.0, y + 4.0, &format_tick(tick), 10.0, Anchor::End);
        }
        doc.rotated_text(16.0, self.top + self.height / 2.0, label, 12.0, Anchor::Middle, -90.0);
    }

    fn draw_x_axis(&self, doc: &mut Document, label: &str) {
        let bottom = self.top + self.height;
        doc.line(self.left, bottom, self.left + self.width, bottom, Rgb::BLACK, 1.0);
        for tick in ticks(self.x_range.0, self.x_range.1, 5) {
            let x = self.px(tick);
            doc.line(x, bottom, x, bottom + 4.0, Rgb::BLACK, 1.0);
            doc.text(x, bottom + 16.0, &format_tick(tick), 10.0, Anchor::Middle);
        }
        doc.text(self.left + self.width / 2.0, bottom + 40.0, label, 12.0, Anchor::Middle);
    }
}

fn finite_range<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> (f64, f64) {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

/// Simple regression `y ~ x` with the 95% confidence band of the fitted mean
#[derive(Debug, Clone)]
pub struct LineFit {
    /// Slope, the correlation coefficient when both variables are standardised
    pub r: f64,
    pub p: f64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// `(x, fitted, lower, upper)` ordered by x
    pub band: Vec<(f64, f64, f64, f64)>,
}
impl LineFit {
    pub fn label(&self) -> String {
        format!("r={:.3}, pval={:.2e}", self.r, self.p)
    }
}

/// Fits `y ~ x` after dropping incomplete pairs and applying the scaling
pub fn fit_line(x: &[f64], y: &[f64], scaling: Scaling) -> Result<LineFit> {
    if x.len() != y.len() {
        return Err(Error::InvalidArgument(format!(
            "x has {} values but y has {}",
            x.len(),
            y.len()
        )));
    }
    let (mut xs, mut ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip();
    if scaling.scale_x() {
        xs = standardize(&xs);
    }
    if scaling.scale_y() {
        ys = standardize(&ys);
    }

    let n = xs.len();
    let mut design = Array2::<f64>::ones((n, 2));
    for (i, v) in xs.iter().enumerate() {
        design[[i, 1]] = *v;
    }
    let fit = ols(design.view(), Array1::from(ys.clone()).view())?;
    let t = t_critical(0.05, fit.df_resid);

    let band = xs
        .iter()
        .copied()
        .sorted_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|v| {
            let row = Array1::from(vec![1.0, v]);
            let fitted = fit.predict(row.view());
            let half = t * fit.mean_se(row.view());
            (v, fitted, fitted - half, fitted + half)
        })
        .collect();
    Ok(LineFit {
        r: fit.params[1],
        p: fit.pvalues[1],
        x: xs,
        y: ys,
        band,
    })
}

#[derive(Debug, Clone, Builder)]
pub struct ScatterOptions {
    #[builder(default)]
    pub scaling: Scaling,
    /// Group of every point; each group gets its own fit
    pub hue: Option<Vec<String>>,
    #[builder(default = "x".to_string())]
    pub xlabel: String,
    #[builder(default = "y".to_string())]
    pub ylabel: String,
    pub title: Option<String>,
    #[builder(default)]
    pub hide_ci: bool,
}

fn axis_label(name: &str, scaled: bool) -> String {
    if scaled {
        format!("standardize({name})")
    } else {
        name.to_string()
    }
}

/// Scatter plot with regression line, confidence band and `r`/`p` legend
pub fn scatter_svg(x: &[f64], y: &[f64], options: &ScatterOptions) -> Result<Document> {
    let groups: Vec<(Option<String>, Vec<usize>)> = match &options.hue {
        Some(hue) => {
            if hue.len() != x.len() {
                return Err(Error::InvalidArgument(
                    "hue must label every point".to_string(),
                ));
            }
            hue.iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), i))
                .into_group_map()
                .into_iter()
                .sorted_by(|a, b| a.0.cmp(&b.0))
                .map(|(h, idx)| (Some(h), idx))
                .collect()
        }
        None => vec![(None, (0..x.len()).collect())],
    };
    let fits = groups
        .iter()
        .map(|(name, idx)| {
            let gx = idx.iter().map(|i| x[*i]).collect::<Vec<_>>();
            let gy = idx.iter().map(|i| y[*i]).collect::<Vec<_>>();
            Ok((name.clone(), fit_line(&gx, &gy, options.scaling)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let x_range = finite_range(fits.iter().flat_map(|(_, f)| f.x.iter()));
    let y_range = finite_range(
        fits.iter()
            .flat_map(|(_, f)| f.y.iter().chain(f.band.iter().flat_map(|b| [&b.2, &b.3]))),
    );
    let frame = Frame::new(x_range, y_range);
    let mut doc = frame.document();

    for (g, (name, fit)) in fits.iter().enumerate() {
        let colour = PALETTE[g % PALETTE.len()];
        if !options.hide_ci {
            let mut band = fit
                .band
                .iter()
                .map(|(v, _, lo, _)| (frame.px(*v), frame.py(*lo)))
                .collect::<Vec<_>>();
            band.extend(fit.band.iter().rev().map(|(v, _, _, hi)| (frame.px(*v), frame.py(*hi))));
            doc.polygon(&band, CRIMSON, 0.1);
        }
        for (a, b) in fit.x.iter().zip(fit.y.iter()) {
            doc.circle(frame.px(*a), frame.py(*b), 3.0, colour);
        }
        let line = fit
            .band
            .iter()
            .map(|(v, fitted, _, _)| (frame.px(*v), frame.py(*fitted)))
            .collect::<Vec<_>>();
        doc.polyline(&line, colour, 2.0);

        let legend_y = frame.top + 14.0 + g as f64 * 32.0;
        let legend_x = frame.left + frame.width + 12.0;
        doc.rect(legend_x, legend_y - 9.0, 10.0, 10.0, Some(colour), None);
        if let Some(name) = name {
            doc.text(legend_x + 14.0, legend_y, name, 11.0, Anchor::Start);
        }
        doc.text(legend_x + 14.0, legend_y + 14.0, &fit.label(), 10.0, Anchor::Start);
    }

    frame.draw_x_axis(&mut doc, &axis_label(&options.xlabel, options.scaling.scale_x()));
    frame.draw_y_axis(&mut doc, &axis_label(&options.ylabel, options.scaling.scale_y()));
    if let Some(title) = &options.title {
        doc.text(frame.left + frame.width / 2.0, 20.0, title, 14.0, Anchor::Middle);
    }
    Ok(doc)
}

/// Mean and standard error of one group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub name: String,
    pub mean: f64,
    pub sem: f64,
    pub n: usize,
}

/// Finite values of each group, groups in first-appearance order
fn grouped(groups: &[String], values: &[f64]) -> Result<Vec<(String, Vec<f64>)>> {
    if groups.len() != values.len() {
        return Err(Error::InvalidArgument(format!(
            "{} groups for {} values",
            groups.len(),
            values.len()
        )));
    }
    let mut out: Vec<(String, Vec<f64>)> = Vec::new();
    for (group, value) in groups.iter().zip(values) {
        let idx = match out.iter().position(|(g, _)| g == group) {
            Some(idx) => idx,
            None => {
                out.push((group.clone(), Vec::new()));
                out.len() - 1
            }
        };
        if value.is_finite() {
            out[idx].1.push(*value);
        }
    }
    Ok(out)
}

pub fn group_summaries(groups: &[String], values: &[f64], order_by_value: bool) -> Result<Vec<GroupSummary>> {
    let mut summaries = grouped(groups, values)?
        .into_iter()
        .map(|(name, v)| GroupSummary {
            mean: arithmetic_mean(&v),
            sem: sample_sd(&v) / (v.len() as f64).sqrt(),
            n: v.len(),
            name,
        })
        .collect::<Vec<_>>();
    if order_by_value {
        summaries.sort_by(|a, b| a.mean.partial_cmp(&b.mean).unwrap_or(Ordering::Equal));
    }
    Ok(summaries)
}

/// Bars of group means with standard error bars
pub fn bar_svg(groups: &[String], values: &[f64], order_by_value: bool, ylabel: &str) -> Result<Document> {
    let summaries = group_summaries(groups, values, order_by_value)?;
    let y_range = finite_range(
        summaries
            .iter()
            .flat_map(|s| [s.mean + s.sem.max(0.0), s.mean - s.sem.max(0.0)])
            .chain([0.0])
            .collect::<Vec<_>>()
            .iter(),
    );
    let frame = Frame::new((0.0, summaries.len() as f64), y_range);
    let mut doc = frame.document();
    let slot = frame.width / summaries.len().max(1) as f64;
    for (i, s) in summaries.iter().enumerate() {
        let x = frame.left + i as f64 * slot;
        let (top, base) = (frame.py(s.mean.max(0.0)), frame.py(s.mean.min(0.0)));
        doc.rect(x + slot * 0.15, top, slot * 0.7, base - top, Some(PALETTE[i % PALETTE.len()]), None);
        if s.sem.is_finite() {
            let cx = x + slot / 2.0;
            doc.line(cx, frame.py(s.mean - s.sem), cx, frame.py(s.mean + s.sem), Rgb::BLACK, 1.5);
        }
        doc.text(x + slot / 2.0, frame.top + frame.height + 16.0, &s.name, 11.0, Anchor::Middle);
    }
    frame.draw_y_axis(&mut doc, ylabel);
    Ok(doc)
}

/// Five number summary with 1.5 IQR whiskers
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStats {
    pub name: String,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub lower_whisker: f64,
    pub upper_whisker: f64,
    pub outliers: Vec<f64>,
}

pub fn box_stats(name: &str, values: &[f64]) -> BoxStats {
    let mut sorted = values.iter().copied().filter(|v| v.is_finite()).collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    let inside = sorted.iter().copied().filter(|v| *v >= lo && *v <= hi);
    BoxStats {
        name: name.to_string(),
        q1,
        median: quantile(&sorted, 0.5),
        q3,
        lower_whisker: inside.clone().next().unwrap_or(q1),
        upper_whisker: inside.last().unwrap_or(q3),
        outliers: sorted.iter().copied().filter(|v| *v < lo || *v > hi).collect(),
    }
}

pub fn box_svg(groups: &[String], values: &[f64], ylabel: &str) -> Result<Document> {
    let stats = grouped(groups, values)?
        .iter()
        .map(|(name, v)| box_stats(name, v))
        .collect::<Vec<_>>();
    let y_range = finite_range(values);
    let frame = Frame::new((0.0, stats.len() as f64), y_range);
    let mut doc = frame.document();
    let slot = frame.width / stats.len().max(1) as f64;
    for (i, s) in stats.iter().enumerate() {
        let x = frame.left + i as f64 * slot;
        let cx = x + slot / 2.0;
        let colour = PALETTE[i % PALETTE.len()];
        doc.line(cx, frame.py(s.lower_whisker), cx, frame.py(s.q1), Rgb::BLACK, 1.0);
        doc.line(cx, frame.py(s.q3), cx, frame.py(s.upper_whisker), Rgb::BLACK, 1.0);
        doc.rect(
            x + slot * 0.2,
            frame.py(s.q3),
            slot * 0.6,
            frame.py(s.q1) - frame.py(s.q3),
            Some(colour),
            Some(Rgb::BLACK),
        );
        doc.line(x + slot * 0.2, frame.py(s.median), x + slot * 0.8, frame.py(s.median), Rgb::GREY, 2.0);
        for o in &s.outliers {
            doc.circle(cx, frame.py(*o), 2.5, Rgb::BLACK);
        }
        doc.text(cx, frame.top + frame.height + 16.0, &s.name, 11.0, Anchor::Middle);
    }
    frame.draw_y_axis(&mut doc, ylabel);
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fit_line_standardised_slope_is_correlation() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, f64::NAN];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0, 1.0];
        let fit = fit_line(&x, &y, Scaling::Both).unwrap();
        assert_eq!(fit.x.len(), 5);
        assert_relative_eq!(fit.r, 1.0, epsilon = 1e-10);
        assert_eq!(fit.band.len(), 5);
        assert!(fit.band.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_fit_line_band_contains_fit() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [0.1, 0.9, 2.2, 2.8, 4.1, 5.0];
        let fit = fit_line(&x, &y, Scaling::None).unwrap();
        assert!(fit.r > 0.9);
        assert!(fit.p < 1e-3);
        for (_, fitted, lo, hi) in &fit.band {
            assert!(lo < fitted && fitted < hi);
        }
        assert!(fit.label().starts_with("r="));
    }

    #[test]
    fn test_scatter_with_hue() {
        let x = [0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 1.1, 1.9, 3.2, 3.0, 2.1, 0.9, 0.2];
        let hue = strings(&["a", "a", "a", "a", "b", "b", "b", "b"]);
        let options = ScatterOptions::builder()
            .hue(hue)
            .xlabel("age".to_string())
            .build();
        let svg = scatter_svg(&x, &y, &options).unwrap().render();
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(svg.contains("standardize(age)"));
    }

    #[test]
    fn test_group_summaries() {
        let groups = strings(&["b", "a", "b", "a"]);
        let summaries = group_summaries(&groups, &[4.0, 1.0, 6.0, 3.0], true).unwrap();
        assert_eq!(summaries[0].name, "a");
        assert_relative_eq!(summaries[0].mean, 2.0);
        assert_relative_eq!(summaries[1].sem, 1.0);
        assert!(bar_svg(&groups, &[4.0, 1.0, 6.0, 3.0], false, "volume").is_ok());
    }

    #[test]
    fn test_box_stats_outliers() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        let stats = box_stats("g", &values);
        assert_relative_eq!(stats.median, 3.5);
        assert_eq!(stats.outliers, vec![100.0]);
        assert_eq!(stats.upper_whisker, 5.0);
        assert_eq!(stats.lower_whisker, 1.0);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(fit_line(&[1.0], &[1.0, 2.0], Scaling::None).is_err());
        assert!(box_svg(&strings(&["a"]), &[1.0, 2.0], "y").is_err());
    }
}

//! Axial, coronal and sagittal slices of a labelled atlas, coloured by region
//! label or by a value per region, with region outlines drawn on top.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    str::FromStr,
};

use bon::Builder;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use tracing::debug;

use crate::{
    atlas::Atlas,
    colormap::{ColorScale, Colormap, Rgb},
    config::ThresholdDirection,
    error::{Error, Result},
    svg::{Anchor, Document},
};

/// Anatomical plane of a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapView {
    Axial,
    Coronal,
    Sagittal,
}
impl MapView {
    pub fn all() -> Vec<MapView> {
        vec![MapView::Axial, MapView::Coronal, MapView::Sagittal]
    }

    /// Parses a list such as `all` or `axial,sagittal`
    pub fn parse_list(s: &str) -> Result<Vec<MapView>> {
        let mut views = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("all") {
                return Ok(Self::all());
            }
            views.push(token.parse()?);
        }
        if views.is_empty() {
            return Err(Error::InvalidArgument("no map view given".to_string()));
        }
        Ok(views)
    }

    /// Orientation letters at the left, top, right and bottom of the rotated slice
    fn orientation_letters(&self) -> [char; 4] {
        match self {
            MapView::Axial => ['L', 'A', 'R', 'P'],
            MapView::Coronal => ['L', 'S', 'R', 'I'],
            MapView::Sagittal => ['P', 'S', 'A', 'I'],
        }
    }
}
impl FromStr for MapView {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "axial" => Ok(MapView::Axial),
            "coronal" => Ok(MapView::Coronal),
            "sagittal" => Ok(MapView::Sagittal),
            other => Err(Error::InvalidArgument(format!("unknown map view {other}"))),
        }
    }
}
impl fmt::Display for MapView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MapView::Axial => "axial",
            MapView::Coronal => "coronal",
            MapView::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Builder)]
pub struct SegmentationOptions {
    #[builder(default = MapView::all())]
    pub views: Vec<MapView>,
    /// Voxel `(x, y, z)` of the sagittal, coronal and axial slices; mid-slices when unset
    pub slice: Option<Vec<usize>>,
    #[builder(default)]
    pub regions_to_hide: Vec<i64>,
    /// Keep drawing the outline of hidden regions
    #[builder(default = true)]
    pub outline_regions_to_hide: bool,
    /// Region names by label, in legend order
    pub label_legend: Option<Vec<(i64, String)>>,
    pub label_legend_colours: Option<BTreeMap<i64, Rgb>>,
    /// Outline the merged legend regions rather than the raw labels
    #[builder(default = true)]
    pub outline_label_legends: bool,
    pub plot_values: Option<BTreeMap<i64, f64>>,
    pub threshold: Option<f64>,
    #[builder(default)]
    pub direction: ThresholdDirection,
    /// Values plotted instead of `plot_values` where the threshold passes
    pub mask: Option<BTreeMap<i64, f64>>,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    #[builder(default)]
    pub colormap: Colormap,
    #[builder(default)]
    pub reversed: bool,
    #[builder(default)]
    pub colorbar: bool,
    pub colorbar_title: Option<String>,
    #[builder(default = true)]
    pub legend: bool,
    #[builder(default = true)]
    pub plot_orientation: bool,
    #[builder(default)]
    pub plot_focus: bool,
    #[builder(default = true)]
    pub remove_background: bool,
    #[builder(default = 0.0)]
    pub background_value: f64,
    #[builder(default = true)]
    pub padding: bool,
    /// Intensity image rather than a parcellation; no outlines are drawn
    #[builder(default)]
    pub t2: bool,
    /// Pixel edge length in the rendered SVG
    #[builder(default = 4.0)]
    pub pixel_size: f64,
}
impl Default for SegmentationOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Segment between two points in display coordinates (column, row)
pub type Edge = [(f64, f64); 2];

/// Unit edges around every set pixel that borders an unset pixel or the image border
///
/// Coordinates are pixel centred, i.e. offset by -0.5.
pub fn get_edges(outline: ArrayView2<bool>) -> Vec<Edge> {
    let (rows, cols) = outline.dim();
    let mut edges = Vec::new();
    for ((r, c), set) in outline.indexed_iter() {
        if !*set {
            continue;
        }
        let (r0, c0) = (r as f64 - 0.5, c as f64 - 0.5);
        let upper_left = (c0, r0);
        let lower_left = (c0, r0 + 1.0);
        let upper_right = (c0 + 1.0, r0);
        let lower_right = (c0 + 1.0, r0 + 1.0);
        if r == 0 || !outline[[r - 1, c]] {
            edges.push([upper_left, upper_right]);
        }
        if r == rows - 1 || !outline[[r + 1, c]] {
            edges.push([lower_left, lower_right]);
        }
        if c == 0 || !outline[[r, c - 1]] {
            edges.push([upper_left, lower_left]);
        }
        if c == cols - 1 || !outline[[r, c + 1]] {
            edges.push([upper_right, lower_right]);
        }
    }
    edges
}

/// Rotates a matrix 90 degrees counter-clockwise
pub fn rot90<T: Clone>(a: ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = a.dim();
    Array2::from_shape_fn((cols, rows), |(i, j)| a[[j, cols - 1 - i]].clone())
}

fn slice_of(volume: &Array3<f64>, view: MapView, index: [usize; 3]) -> Array2<f64> {
    match view {
        MapView::Axial => volume.index_axis(Axis(2), index[2]).to_owned(),
        MapView::Coronal => volume.index_axis(Axis(1), index[1]).to_owned(),
        MapView::Sagittal => volume.index_axis(Axis(0), index[0]).to_owned(),
    }
}

fn label_of(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.round() as i64)
}

fn unique_labels(volume: &Array3<f64>) -> Vec<i64> {
    let mut labels = volume.iter().filter_map(|v| label_of(*v)).collect::<Vec<_>>();
    labels.sort_unstable();
    labels.dedup();
    labels
}

/// One rendered slice
#[derive(Debug, Clone)]
pub struct ViewImage {
    pub view: MapView,
    /// Rotated slice values (labels or plotted values), NaN transparent
    pub values: Array2<f64>,
    /// Rotated colour of every pixel
    pub colours: Array2<Option<Rgb>>,
    pub edges: Vec<Edge>,
    /// Focus cross-hair as (row, column) in display coordinates
    pub focus: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct SegmentationFigure {
    pub views: Vec<ViewImage>,
    pub scale: Option<ColorScale>,
    pub legend: Vec<(String, Rgb)>,
    colorbar_title: Option<String>,
    plot_orientation: bool,
    pixel_size: f64,
}
impl SegmentationFigure {
    pub fn document(&self) -> Document {
        let px = self.pixel_size;
        let margin = 30.0;
        let gap = 20.0;
        let panel_height = self
            .views
            .iter()
            .map(|v| v.values.nrows() as f64 * px)
            .fold(0.0, f64::max);
        let panels_width = self
            .views
            .iter()
            .map(|v| v.values.ncols() as f64 * px + gap)
            .sum::<f64>();
        let colorbar_width = if self.scale.is_some() { 90.0 } else { 0.0 };
        let legend_columns = 6;
        let legend_rows = self.legend.len().div_ceil(legend_columns);
        let legend_height = legend_rows as f64 * 20.0;

        let width = 2.0 * margin + panels_width + colorbar_width;
        let height = 2.0 * margin + panel_height + legend_height;
        let mut doc = Document::new(width, height);

        let mut offset = margin;
        for image in &self.views {
            let (rows, cols) = image.values.dim();
            doc.begin_group(offset, margin);
            for ((r, c), colour) in image.colours.indexed_iter() {
                if let Some(colour) = colour {
                    doc.rect(c as f64 * px, r as f64 * px, px, px, Some(*colour), None);
                }
            }
            for [(x1, y1), (x2, y2)] in &image.edges {
                doc.line(
                    (x1 + 0.5) * px,
                    (y1 + 0.5) * px,
                    (x2 + 0.5) * px,
                    (y2 + 0.5) * px,
                    Rgb::BLACK,
                    1.0,
                );
            }
            if let Some((row, col)) = image.focus {
                let (w, h) = (cols as f64 * px, rows as f64 * px);
                let y = (row + 0.5) * px;
                let x = (col + 0.5) * px;
                doc.dashed_line(0.1 * w, y, 0.9 * w, y, Rgb(255, 215, 0), 1.0);
                doc.dashed_line(x, 0.1 * h, x, 0.9 * h, Rgb(255, 215, 0), 1.0);
            }
            if self.plot_orientation {
                let [left, top, right, bottom] = image.view.orientation_letters();
                let (w, h) = (cols as f64 * px, rows as f64 * px);
                doc.text(0.0, h / 2.0, &left.to_string(), 15.0, Anchor::Start);
                doc.text(w / 2.0, 15.0, &top.to_string(), 15.0, Anchor::Middle);
                doc.text(w, h / 2.0, &right.to_string(), 15.0, Anchor::End);
                doc.text(w / 2.0, h - 2.0, &bottom.to_string(), 15.0, Anchor::Middle);
            }
            doc.end_group();
            offset += cols as f64 * px + gap;
        }

        if let Some(scale) = &self.scale {
            doc.colorbar(scale, offset, margin, panel_height, self.colorbar_title.as_deref());
        }

        for (i, (name, colour)) in self.legend.iter().enumerate() {
            let x = margin + (i % legend_columns) as f64 * (panels_width / legend_columns as f64);
            let y = margin + panel_height + 8.0 + (i / legend_columns) as f64 * 20.0;
            doc.rect(x, y, 12.0, 12.0, Some(*colour), None);
            doc.text(x + 16.0, y + 11.0, name, 11.0, Anchor::Start);
        }
        doc
    }

    pub fn to_svg(&self) -> String {
        self.document().render()
    }

    pub fn write_svg<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.document().write(path)
    }
}

/// Values per region after thresholding and masking; regions without a value map to NaN
fn region_values(labels: &[i64], options: &SegmentationOptions, plot_values: &BTreeMap<i64, f64>) -> HashMap<i64, f64> {
    labels
        .iter()
        .map(|label| {
            let value = plot_values.get(label).copied();
            let plotted = match (options.threshold, value) {
                (_, None) => f64::NAN,
                (None, Some(v)) => v,
                (Some(threshold), Some(v)) if options.direction.passes(v, threshold) => match &options.mask {
                    Some(mask) => mask.get(label).copied().unwrap_or(f64::NAN),
                    None => v,
                },
                (Some(_), Some(_)) => f64::NAN,
            };
            (*label, plotted)
        })
        .collect()
}

/// Resolves one colour per label of the legend, merged labels sharing their name's colour
fn legend_colours(
    legend: &[(i64, String)],
    colours: Option<&BTreeMap<i64, Rgb>>,
    colormap: Colormap,
    reversed: bool,
) -> BTreeMap<i64, Rgb> {
    if let Some(colours) = colours {
        return colours.clone();
    }
    let mut names: Vec<&str> = Vec::new();
    for (_, name) in legend {
        if !names.contains(&name.as_str()) {
            names.push(name);
        }
    }
    let palette = colormap.evenly_spaced(names.len(), reversed);
    legend
        .iter()
        .filter_map(|(label, name)| {
            let idx = names.iter().position(|n| *n == name.as_str())?;
            Some((*label, palette[idx]))
        })
        .collect()
}

/// Builds the slices, colours and outlines of a segmentation figure
pub fn plot_segmentation(atlas: &Atlas, options: &SegmentationOptions) -> Result<SegmentationFigure> {
    if options.colorbar && options.plot_values.is_none() {
        return Err(Error::InvalidArgument(
            "a colour bar needs plot values".to_string(),
        ));
    }
    let [x, y, z] = atlas.shape();
    let max_dim = x.max(y).max(z);
    let pad = if options.padding {
        [(max_dim - x) / 2, (max_dim - y) / 2, (max_dim - z) / 2]
    } else {
        [0, 0, 0]
    };

    let mut volume = Array3::<f64>::from_elem(
        (x + 2 * pad[0], y + 2 * pad[1], z + 2 * pad[2]),
        options.background_value,
    );
    volume
        .slice_mut(s![pad[0]..pad[0] + x, pad[1]..pad[1] + y, pad[2]..pad[2] + z])
        .assign(atlas.data());
    if options.remove_background {
        volume.mapv_inplace(|v| if v <= options.background_value { f64::NAN } else { v });
    }

    let index = match &options.slice {
        Some(slice) if slice.len() != 3 => {
            return Err(Error::InvalidArgument(format!(
                "slice must hold the x, y and z voxel, got {} values",
                slice.len()
            )))
        }
        Some(slice) => [slice[0], slice[1], slice[2]],
        None => [x / 2, y / 2, z / 2],
    };
    if index[0] >= x || index[1] >= y || index[2] >= z {
        return Err(Error::InvalidArgument(format!(
            "slice {index:?} lies outside the atlas of shape {:?}",
            [x, y, z]
        )));
    }
    let index = [index[0] + pad[0], index[1] + pad[1], index[2] + pad[2]];
    let outline_slices = |volume: &Array3<f64>| {
        options
            .views
            .iter()
            .map(|view| slice_of(volume, *view, index))
            .collect::<Vec<_>>()
    };
    let mut outlines = outline_slices(&volume);

    if !options.regions_to_hide.is_empty() {
        volume.mapv_inplace(|v| match label_of(v) {
            Some(label) if options.regions_to_hide.contains(&label) => f64::NAN,
            _ => v,
        });
        if !options.outline_regions_to_hide {
            outlines = outline_slices(&volume);
        }
    }

    let mut label_colours = None;
    if let Some(legend) = &options.label_legend {
        let mut first_label: HashMap<&str, i64> = HashMap::new();
        for (label, name) in legend {
            first_label.entry(name.as_str()).or_insert(*label);
        }
        let merged = legend
            .iter()
            .map(|(label, name)| (*label, first_label[name.as_str()]))
            .collect::<HashMap<_, _>>();
        volume.mapv_inplace(|v| match label_of(v) {
            Some(label) => merged.get(&label).map_or(f64::NAN, |l| *l as f64),
            None => v,
        });
        label_colours = Some(legend_colours(
            legend,
            options.label_legend_colours.as_ref(),
            options.colormap,
            options.reversed,
        ));
        if options.outline_label_legends {
            outlines = outline_slices(&volume);
        }
    } else if let Some(colours) = &options.label_legend_colours {
        label_colours = Some(colours.clone());
    }

    if let Some(plot_values) = &options.plot_values {
        let values = region_values(&unique_labels(&volume), options, plot_values);
        volume.mapv_inplace(|v| match label_of(v) {
            Some(label) => values.get(&label).copied().unwrap_or(f64::NAN),
            None => v,
        });
    }

    let slices = options
        .views
        .iter()
        .map(|view| slice_of(&volume, *view, index))
        .collect::<Vec<_>>();
    let fitted = ColorScale::fitted(
        options.colormap,
        options.reversed,
        slices.iter().flat_map(|s| s.iter()),
    );
    let any_finite = slices.iter().any(|s| s.iter().any(|v| v.is_finite()));
    let scale = ColorScale::new(
        options.colormap,
        options.reversed,
        options.vmin.unwrap_or(fitted.vmin),
        options.vmax.unwrap_or(fitted.vmax),
    );

    let views = options
        .views
        .iter()
        .zip(slices.iter().zip(outlines.iter()))
        .map(|(view, (slice, outline))| {
            let values = rot90(slice.view());
            let colours = values.mapv(|v| match &label_colours {
                Some(colours) => label_of(v).and_then(|l| colours.get(&l).copied()),
                None => scale.color(v),
            });
            let edges = if options.t2 {
                Vec::new()
            } else {
                let rotated = rot90(outline.view());
                let mut labels = rotated.iter().filter_map(|v| label_of(*v)).collect::<Vec<_>>();
                labels.sort_unstable();
                labels.dedup();
                labels
                    .into_iter()
                    .flat_map(|label| get_edges(rotated.mapv(|v| label_of(v) == Some(label)).view()))
                    .collect()
            };
            let focus = options.plot_focus.then(|| {
                // rot90 maps (i, j) to (cols - 1 - j, i)
                let (first, second) = match view {
                    MapView::Axial => (index[0], index[1]),
                    MapView::Coronal => (index[0], index[2]),
                    MapView::Sagittal => (index[1], index[2]),
                };
                let cols = slice.ncols();
                ((cols - 1 - second) as f64, first as f64)
            });
            debug!("{view} slice has {} outline edges", edges.len());
            ViewImage {
                view: *view,
                values,
                colours,
                edges,
                focus,
            }
        })
        .collect::<Vec<_>>();

    let legend = match (&options.label_legend, &label_colours) {
        (Some(legend), Some(colours)) if options.legend => {
            let mut entries: Vec<(String, Rgb)> = Vec::new();
            for (label, name) in legend {
                if entries.iter().any(|(n, _)| n == name) {
                    continue;
                }
                if let Some(colour) = colours.get(label) {
                    entries.push((name.clone(), *colour));
                }
            }
            entries
        }
        _ => Vec::new(),
    };

    Ok(SegmentationFigure {
        views,
        scale: (options.colorbar && any_finite).then_some(scale),
        legend,
        colorbar_title: options.colorbar_title.clone(),
        plot_orientation: options.plot_orientation,
        pixel_size: options.pixel_size,
    })
}

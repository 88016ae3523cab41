//! Labelled brain atlases stored as NIfTI volumes

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use csv::WriterBuilder;
use ndarray::{array, Array2, Array3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// World axis and direction of a voxel axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisOrientation {
    /// 0 = x (L/R), 1 = y (P/A), 2 = z (I/S)
    pub world_axis: usize,
    pub flipped: bool,
}
impl AxisOrientation {
    pub fn code(&self) -> char {
        match (self.world_axis, self.flipped) {
            (0, false) => 'R',
            (0, true) => 'L',
            (1, false) => 'A',
            (1, true) => 'P',
            (2, false) => 'S',
            _ => 'I',
        }
    }
}

/// Centroid of an atlas region
#[derive(Debug, Clone, PartialEq)]
pub struct RoiCoordinate {
    pub label: i64,
    /// Mean voxel index
    pub voxel: [f64; 3],
    /// Scanner coordinate of the mean voxel
    pub scanner: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct Atlas {
    data: Array3<f64>,
    affine: Array2<f64>,
}
impl Atlas {
    /// Loads a `.nii` or `.nii.gz` atlas in the closest RAS orientation
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let object = ReaderOptions::new().read_file(path.as_ref())?;
        let header = object.header().clone();
        let mut volume = object.into_volume().into_ndarray::<f64>()?;
        while volume.ndim() > 3 && volume.shape()[volume.ndim() - 1] == 1 {
            let last = volume.ndim() - 1;
            volume = volume.index_axis_move(Axis(last), 0);
        }
        let data = volume.into_dimensionality::<Ix3>().map_err(|_| {
            Error::InvalidArgument(format!("{} is not a 3D volume", path.as_ref().display()))
        })?;
        let shape = data.dim();
        debug!("Read atlas of shape {:?} from {}", shape, path.as_ref().display());
        let atlas = Self::from_array(data, header_affine(&header))?;
        Ok(atlas.as_closest_canonical())
    }

    /// Builds an atlas from a label volume and its voxel to scanner affine
    pub fn from_array(data: Array3<f64>, affine: Array2<f64>) -> Result<Self> {
        if affine.dim() != (4, 4) {
            return Err(Error::InvalidArgument(format!(
                "affine must be 4x4, got {:?}",
                affine.dim()
            )));
        }
        Ok(Self { data, affine })
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn affine(&self) -> &Array2<f64> {
        &self.affine
    }

    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    /// Orientation of every voxel axis, matching each to its dominant world axis
    pub fn orientation(&self) -> [AxisOrientation; 3] {
        let rotation = self.affine.slice(ndarray::s![..3, ..3]);
        let mut used_world = [false; 3];
        let mut used_voxel = [false; 3];
        let mut result = [AxisOrientation {
            world_axis: 0,
            flipped: false,
        }; 3];
        for _ in 0..3 {
            let mut best = (0, 0, -1.0);
            for w in (0..3).filter(|w| !used_world[*w]) {
                for v in (0..3).filter(|v| !used_voxel[*v]) {
                    let value = rotation[[w, v]].abs();
                    if value > best.2 {
                        best = (w, v, value);
                    }
                }
            }
            let (w, v, _) = best;
            used_world[w] = true;
            used_voxel[v] = true;
            result[v] = AxisOrientation {
                world_axis: w,
                flipped: rotation[[w, v]] < 0.0,
            };
        }
        result
    }

    /// Axis codes such as `['R', 'A', 'S']`
    pub fn axis_codes(&self) -> [char; 3] {
        self.orientation().map(|o| o.code())
    }

    pub fn is_ras(&self) -> bool {
        self.axis_codes() == ['R', 'A', 'S']
    }

    /// Reorders and flips the voxel axes so they run along R, A and S
    pub fn as_closest_canonical(&self) -> Self {
        if self.is_ras() {
            return self.clone();
        }
        let orientation = self.orientation();
        let shape = self.shape();
        let mut permutation = [0usize; 3];
        for (v, o) in orientation.iter().enumerate() {
            permutation[o.world_axis] = v;
        }

        let mut data = self.data.clone().permuted_axes(permutation);
        // maps new voxel indices onto old ones
        let mut transform = Array2::<f64>::zeros((4, 4));
        transform[[3, 3]] = 1.0;
        for (new_axis, &old_axis) in permutation.iter().enumerate() {
            if orientation[old_axis].flipped {
                data.invert_axis(Axis(new_axis));
                transform[[old_axis, new_axis]] = -1.0;
                transform[[old_axis, 3]] = (shape[old_axis] - 1) as f64;
            } else {
                transform[[old_axis, new_axis]] = 1.0;
            }
        }
        let data = data.as_standard_layout().to_owned();
        let affine = self.affine.dot(&transform);
        info!(
            "Reoriented atlas from {:?} to RAS",
            self.axis_codes().iter().collect::<String>()
        );
        Self { data, affine }
    }

    /// Non-zero labels present in the volume, NaN counted as background
    pub fn labels(&self) -> Vec<i64> {
        let mut labels = self
            .data
            .iter()
            .filter(|v| v.is_finite() && **v != 0.0)
            .map(|v| v.round() as i64)
            .collect::<Vec<_>>();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// Mean voxel index and scanner coordinate of every labelled region
    pub fn roi_coordinates(&self) -> Vec<RoiCoordinate> {
        let mut sums: BTreeMap<i64, ([f64; 3], usize)> = BTreeMap::new();
        for ((x, y, z), value) in self.data.indexed_iter() {
            if !value.is_finite() || *value == 0.0 {
                continue;
            }
            let entry = sums.entry(value.round() as i64).or_insert(([0.0; 3], 0));
            entry.0[0] += x as f64;
            entry.0[1] += y as f64;
            entry.0[2] += z as f64;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(label, (sum, count))| {
                let voxel = sum.map(|s| s / count as f64);
                let homogeneous = array![voxel[0], voxel[1], voxel[2], 1.0];
                let world = self.affine.dot(&homogeneous);
                RoiCoordinate {
                    label,
                    voxel,
                    scanner: [world[0], world[1], world[2]],
                }
            })
            .collect()
    }
}

/// Voxel to scanner affine: sform, then qform, then plain voxel scaling
fn header_affine(header: &NiftiHeader) -> Array2<f64> {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let mut affine = Array2::<f64>::eye(4);
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                affine[[r, c]] = f64::from(*v);
            }
        }
        return affine;
    }
    let pixdim = header.pixdim.map(f64::from);
    if header.qform_code > 0 {
        let (b, c, d) = (
            f64::from(header.quatern_b),
            f64::from(header.quatern_c),
            f64::from(header.quatern_d),
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let rotation = array![
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        let scale = [pixdim[1], pixdim[2], pixdim[3] * qfac];
        let offset = [
            f64::from(header.quatern_x),
            f64::from(header.quatern_y),
            f64::from(header.quatern_z),
        ];
        let mut affine = Array2::<f64>::eye(4);
        for r in 0..3 {
            for c in 0..3 {
                affine[[r, c]] = rotation[[r, c]] * scale[c];
            }
            affine[[r, 3]] = offset[r];
        }
        return affine;
    }
    let mut affine = Array2::<f64>::eye(4);
    for i in 0..3 {
        affine[[i, i]] = if pixdim[i + 1] > 0.0 { pixdim[i + 1] } else { 1.0 };
    }
    affine
}

pub fn write_roi_coordinates<P: AsRef<Path>>(rois: &[RoiCoordinate], path: P) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["Label", "X_vox", "Y_vox", "Z_vox", "X_sca", "Y_sca", "Z_sca"])?;
    for roi in rois {
        let mut record = vec![roi.label.to_string()];
        record.extend(roi.voxel.iter().map(f64::to_string));
        record.extend(roi.scanner.iter().map(f64::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Region names of an atlas, in file order
///
/// Each non-empty line is `LABEL NAME`; lines starting with `#` are comments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelLookup {
    pub entries: Vec<(i64, String)>,
}
impl LabelLookup {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let entries = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            .map(|(idx, line)| {
                let mut fields = line.split_whitespace();
                let label = fields.next().and_then(|f| f.parse::<i64>().ok());
                let name = fields.next();
                match (label, name) {
                    (Some(label), Some(name)) => Ok((label, name.to_string())),
                    _ => Err(Error::InvalidTable {
                        line: idx + 1,
                        details: "expected `LABEL NAME`".to_string(),
                    }),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Region name to label, as used to place phenotype results on the atlas
    pub fn by_name(&self) -> HashMap<String, i64> {
        self.entries
            .iter()
            .map(|(label, name)| (name.clone(), *label))
            .collect()
    }
}

//! Reader for PLINK 1 binary filesets (`.bed` + `.bim` + `.fam`)
//!
//! Genotypes are decoded as counts of allele 1 (the first allele column of the
//! `.bim` file), missing calls become NaN.

use std::{
    collections::HashSet,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    utils::{membership_mask, normalize_fid, select_cloned},
};

const BED_MAGIC: [u8; 2] = [0x6c, 0x1b];
const VARIANT_MAJOR: u8 = 0x01;

/// Allele 1 count for each two-bit code
const CODE_TO_DOSAGE: [f64; 4] = [2.0, f64::NAN, 1.0, 0.0];

/// One row of the `.fam` file
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub fid: String,
    pub iid: String,
    pub father: String,
    pub mother: String,
    pub sex: String,
    pub pheno: String,
}

/// One row of the `.bim` file
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub chromosome: String,
    pub sid: String,
    pub cm_position: f64,
    pub bp_position: u64,
    pub allele_1: String,
    pub allele_2: String,
}

/// A fully decoded PLINK fileset
#[derive(Debug, Clone)]
pub struct BedFile {
    pub individuals: Vec<Individual>,
    pub variants: Vec<Variant>,
    /// individuals × variants allele 1 counts
    pub genotype: Array2<f64>,
}
impl BedFile {
    /// Opens a fileset from either its prefix or the path of the `.bed` file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let prefix = fileset_prefix(path.as_ref());
        let individuals = read_fam(&sibling(&prefix, "fam"))?;
        let variants = read_bim(&sibling(&prefix, "bim"))?;
        let bed_path = sibling(&prefix, "bed");
        let genotype = read_bed(&bed_path, individuals.len(), variants.len())?;
        info!(
            "Loaded {} individuals and {} variants from {}",
            individuals.len(),
            variants.len(),
            bed_path.display()
        );
        Ok(Self {
            individuals,
            variants,
            genotype,
        })
    }

    pub fn new(individuals: Vec<Individual>, variants: Vec<Variant>, genotype: Array2<f64>) -> Result<Self> {
        if genotype.dim() != (individuals.len(), variants.len()) {
            return Err(Error::InvalidArgument(format!(
                "genotype matrix is {:?} but there are {} individuals and {} variants",
                genotype.dim(),
                individuals.len(),
                variants.len()
            )));
        }
        Ok(Self {
            individuals,
            variants,
            genotype,
        })
    }

    pub fn n_individuals(&self) -> usize {
        self.individuals.len()
    }

    pub fn n_variants(&self) -> usize {
        self.variants.len()
    }

    pub fn fids(&self) -> Vec<String> {
        self.individuals.iter().map(|i| i.fid.clone()).collect()
    }

    pub fn sids(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.sid.clone()).collect()
    }

    /// Returns a new fileset restricted to the given variants and families
    ///
    /// Variants keep their file order. Families are matched on the part of
    /// the FID before the first `-`, on both sides.
    pub fn extract(&self, snps: Option<&[String]>, fids: Option<&[String]>) -> Self {
        let variant_idx = match snps {
            Some(snps) => {
                let wanted = snps.iter().map(String::as_str).collect::<HashSet<_>>();
                membership_mask(&wanted, &self.sids())
            }
            None => (0..self.n_variants()).collect(),
        };
        let individual_idx = match fids {
            Some(fids) => {
                let wanted = fids.iter().map(|f| normalize_fid(f)).collect::<HashSet<_>>();
                self.individuals
                    .iter()
                    .enumerate()
                    .filter(|(_, ind)| wanted.contains(normalize_fid(&ind.fid)))
                    .map(|(i, _)| i)
                    .collect()
            }
            None => (0..self.n_individuals()).collect::<Vec<_>>(),
        };
        debug!(
            "Extracted {} of {} individuals and {} of {} variants",
            individual_idx.len(),
            self.n_individuals(),
            variant_idx.len(),
            self.n_variants()
        );
        let genotype = self
            .genotype
            .select(Axis(0), &individual_idx)
            .select(Axis(1), &variant_idx);
        Self {
            individuals: select_cloned(&individual_idx, &self.individuals),
            variants: select_cloned(&variant_idx, &self.variants),
            genotype,
        }
    }
}

/// Reads the FID column of a space separated table with a header
pub fn read_fid_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| Error::MissingColumn("FID".to_string()))?;
    let column = header
        .split_whitespace()
        .position(|c| c == "FID")
        .ok_or_else(|| Error::MissingColumn("FID".to_string()))?;
    lines
        .enumerate()
        .map(|(idx, line)| {
            line.split_whitespace()
                .nth(column)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidTable {
                    line: idx + 2,
                    details: "row is shorter than the header".to_string(),
                })
        })
        .collect()
}

fn fileset_prefix(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("bed" | "bim" | "fam") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

fn sibling(prefix: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn split_fields<'a>(path: &Path, line: &'a str, idx: usize, expected: usize) -> Result<Vec<&'a str>> {
    let fields = line.split_whitespace().collect::<Vec<_>>();
    if fields.len() < expected {
        return Err(Error::InvalidBed {
            path: path.to_path_buf(),
            details: format!("line {} has {} fields, expected {expected}", idx + 1, fields.len()),
        });
    }
    Ok(fields)
}

fn read_fam(path: &Path) -> Result<Vec<Individual>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(idx, line)| {
            let f = split_fields(path, line, idx, 6)?;
            Ok(Individual {
                fid: f[0].to_string(),
                iid: f[1].to_string(),
                father: f[2].to_string(),
                mother: f[3].to_string(),
                sex: f[4].to_string(),
                pheno: f[5].to_string(),
            })
        })
        .collect()
}

fn read_bim(path: &Path) -> Result<Vec<Variant>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(idx, line)| {
            let f = split_fields(path, line, idx, 6)?;
            let invalid = |what: &str| Error::InvalidBed {
                path: path.to_path_buf(),
                details: format!("line {}: invalid {what}", idx + 1),
            };
            Ok(Variant {
                chromosome: f[0].to_string(),
                sid: f[1].to_string(),
                cm_position: f[2].parse().map_err(|_| invalid("cM position"))?,
                bp_position: f[3].parse().map_err(|_| invalid("bp position"))?,
                allele_1: f[4].to_string(),
                allele_2: f[5].to_string(),
            })
        })
        .collect()
}

fn read_bed(path: &Path, n_individuals: usize, n_variants: usize) -> Result<Array2<f64>> {
    let bytes = fs::read(path)?;
    let invalid = |details: String| Error::InvalidBed {
        path: path.to_path_buf(),
        details,
    };
    if bytes.len() < 3 || bytes[..2] != BED_MAGIC {
        return Err(invalid("missing magic number".to_string()));
    }
    if bytes[2] != VARIANT_MAJOR {
        return Err(invalid("only variant-major files are supported".to_string()));
    }
    let stride = n_individuals.div_ceil(4);
    let expected = 3 + stride * n_variants;
    if bytes.len() != expected {
        return Err(invalid(format!(
            "expected {expected} bytes for {n_individuals} individuals and {n_variants} variants, found {}",
            bytes.len()
        )));
    }
    let payload = &bytes[3..];
    let columns = (0..n_variants)
        .into_par_iter()
        .map(|j| decode_variant(&payload[j * stride..(j + 1) * stride], n_individuals))
        .collect::<Vec<_>>();

    let mut genotype = Array2::<f64>::zeros((n_individuals, n_variants));
    for (j, column) in columns.into_iter().enumerate() {
        for (i, value) in column.into_iter().enumerate() {
            genotype[[i, j]] = value;
        }
    }
    Ok(genotype)
}

fn decode_variant(block: &[u8], n_individuals: usize) -> Vec<f64> {
    (0..n_individuals)
        .map(|i| {
            let code = (block[i / 4] >> (2 * (i % 4))) & 0b11;
            CODE_TO_DOSAGE[code as usize]
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a fileset of 3 individuals and 2 variants into the directory
    pub(crate) fn write_fileset(dir: &Path) -> PathBuf {
        let prefix = dir.join("toy");
        let mut fam = fs::File::create(sibling(&prefix, "fam")).unwrap();
        writeln!(fam, "F1 I1 0 0 1 -9").unwrap();
        writeln!(fam, "F2-B I2 0 0 2 -9").unwrap();
        writeln!(fam, "F3 I3 0 0 1 -9").unwrap();
        let mut bim = fs::File::create(sibling(&prefix, "bim")).unwrap();
        writeln!(bim, "1\t1:1000\t0\t1000\tA\tG").unwrap();
        writeln!(bim, "2\t2:5000\t0\t5000\tC\tT").unwrap();
        // variant 1: [2, 1, 0]; variant 2: [missing, 0, 2]
        fs::write(sibling(&prefix, "bed"), [0x6c, 0x1b, 0x01, 0x38, 0x0d]).unwrap();
        prefix
    }

    #[test]
    fn test_decode_variant() {
        let decoded = decode_variant(&[0x38], 3);
        assert_eq!(decoded, vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_open_fileset() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = write_fileset(dir.path());
        let bed = BedFile::open(sibling(&prefix, "bed")).unwrap();
        assert_eq!(bed.n_individuals(), 3);
        assert_eq!(bed.n_variants(), 2);
        assert_eq!(bed.variants[1].bp_position, 5000);
        assert_eq!(bed.genotype[[0, 0]], 2.0);
        assert_eq!(bed.genotype[[2, 0]], 0.0);
        assert!(bed.genotype[[0, 1]].is_nan());
        assert_eq!(bed.genotype[[2, 1]], 2.0);
    }

    #[test]
    fn test_open_rejects_truncated_bed() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = write_fileset(dir.path());
        fs::write(sibling(&prefix, "bed"), [0x6c, 0x1b, 0x01, 0x38]).unwrap();
        assert!(matches!(BedFile::open(&prefix), Err(Error::InvalidBed { .. })));
    }

    #[test]
    fn test_extract_variants_and_families() {
        let dir = tempfile::tempdir().unwrap();
        let bed = BedFile::open(write_fileset(dir.path())).unwrap();
        let snps = vec!["2:5000".to_string()];
        let fids = vec!["F2".to_string(), "F3-X".to_string()];
        let extracted = bed.extract(Some(&snps), Some(&fids));
        assert_eq!(extracted.sids(), vec!["2:5000"]);
        assert_eq!(extracted.fids(), vec!["F2-B", "F3"]);
        assert_eq!(extracted.genotype.dim(), (2, 1));
        assert_eq!(extracted.genotype[[1, 0]], 2.0);
    }

    #[test]
    fn test_read_fid_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fids.txt");
        fs::write(&path, "IID FID\nI1 F1\nI2 F2\n").unwrap();
        assert_eq!(read_fid_list(&path).unwrap(), vec!["F1", "F2"]);
    }
}

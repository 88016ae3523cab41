use std::collections::HashMap;

use indicatif::ParallelProgressIterator;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    math::ols,
    plink::{BedFile, Variant},
    results::{AssociationResult, AssociationResults},
    table::Table,
    utils::{normalize_fid, progress_bar, select_cloned},
};

/// Outcome of one `y ~ 1 + covariates + snp` fit
#[derive(Debug, Clone, Copy)]
pub struct VariantFit {
    pub beta: f64,
    pub stat: f64,
    pub p: f64,
    pub n: usize,
}

/// Fits `y ~ 1 + covariates + snp` and returns the statistics of the SNP term
///
/// `rows` selects (possibly repeated) subjects; `None` uses every subject.
/// Subjects with a missing value in any of the variables are dropped.
pub fn fit_variant(
    y: ArrayView1<f64>,
    covariates: ArrayView2<f64>,
    snp: ArrayView1<f64>,
    rows: Option<&[usize]>,
) -> Result<VariantFit> {
    let all_rows;
    let rows = match rows {
        Some(rows) => rows,
        None => {
            all_rows = (0..y.len()).collect::<Vec<_>>();
            &all_rows
        }
    };
    let complete = rows
        .iter()
        .copied()
        .filter(|&i| {
            y[i].is_finite() && snp[i].is_finite() && covariates.row(i).iter().all(|v| v.is_finite())
        })
        .collect::<Vec<_>>();

    let n = complete.len();
    let k = covariates.ncols() + 2;
    let mut design = Array2::<f64>::zeros((n, k));
    let mut response = Array1::<f64>::zeros(n);
    for (r, &i) in complete.iter().enumerate() {
        design[[r, 0]] = 1.0;
        for (c, v) in covariates.row(i).iter().enumerate() {
            design[[r, c + 1]] = *v;
        }
        design[[r, k - 1]] = snp[i];
        response[r] = y[i];
    }

    let fit = ols(design.view(), response.view())?;
    Ok(VariantFit {
        beta: fit.params[k - 1],
        stat: fit.tvalues[k - 1],
        p: fit.pvalues[k - 1],
        n,
    })
}

/// Subjects present in both the genotype fileset and the phenotype table
///
/// Rows follow the table order; genotypes are matched on the family id with
/// any `-suffix` removed.
#[derive(Debug, Clone)]
pub struct AssociationDesign {
    pub fids: Vec<String>,
    pub table: Table,
    pub covariate_names: Vec<String>,
    /// subjects × covariates, without intercept
    pub covariates: Array2<f64>,
    /// subjects × variants allele 1 counts
    pub genotype: Array2<f64>,
    pub variants: Vec<Variant>,
}
impl AssociationDesign {
    pub fn align(bed: &BedFile, table: &Table, covariates: &[String]) -> Result<Self> {
        let mut bed_rows: HashMap<&str, usize> = HashMap::new();
        for (i, individual) in bed.individuals.iter().enumerate() {
            bed_rows.entry(normalize_fid(&individual.fid)).or_insert(i);
        }

        let table_fids = table.fids()?;
        let (table_idx, genotype_idx): (Vec<usize>, Vec<usize>) = table_fids
            .iter()
            .enumerate()
            .filter_map(|(t, fid)| bed_rows.get(normalize_fid(fid)).map(|g| (t, *g)))
            .unzip();
        if table_idx.is_empty() {
            return Err(Error::InvalidArgument(
                "no subject of the table is present in the genotype data".to_string(),
            ));
        }
        if table_idx.len() < table_fids.len() {
            warn!(
                "{} of {} table subjects have no genotype data and are dropped",
                table_fids.len() - table_idx.len(),
                table_fids.len()
            );
        }

        let table = table.select_rows(&table_idx);

        let mut covariate_matrix = Array2::<f64>::zeros((table.len(), covariates.len()));
        for (c, name) in covariates.iter().enumerate() {
            let values = table.numeric(name)?;
            covariate_matrix.column_mut(c).assign(&Array1::from(values));
        }

        Ok(Self {
            fids: select_cloned(&table_idx, &table_fids),
            covariate_names: covariates.to_vec(),
            covariates: covariate_matrix,
            genotype: bed.genotype.select(Axis(0), &genotype_idx),
            variants: bed.variants.clone(),
            table,
        })
    }

    pub fn n_subjects(&self) -> usize {
        self.fids.len()
    }

    pub fn phenotype(&self, name: &str) -> Result<Array1<f64>> {
        Ok(Array1::from(self.table.numeric(name)?))
    }
}

/// Mass univariate linear association between every variant and a phenotype
pub struct MassUnivariate<'a> {
    design: &'a AssociationDesign,
    progress: bool,
}
impl<'a> MassUnivariate<'a> {
    pub fn new(design: &'a AssociationDesign, progress: bool) -> Self {
        Self { design, progress }
    }

    /// Tests every variant against one phenotype
    pub fn run(&self, phenotype: &str) -> Result<AssociationResults> {
        let y = self.design.phenotype(phenotype)?;
        let n_variants = self.design.variants.len();
        let bar = progress_bar(n_variants, self.progress, "association");

        let rows = (0..n_variants)
            .into_par_iter()
            .progress_with(bar)
            .map(|j| self.process_variant(y.view(), j))
            .collect::<Vec<_>>();

        let n_failed = rows.iter().filter(|r| r.p.is_nan()).count();
        if n_failed > 0 {
            warn!("{n_failed} of {n_variants} variants could not be fitted for {phenotype}");
        }
        info!(
            "Tested {n_variants} variants against {phenotype} in {} subjects",
            self.design.n_subjects()
        );
        Ok(AssociationResults::from_vec(rows))
    }

    /// Tests every variant against each phenotype (e.g. one per brain region)
    pub fn run_phenotypes(&self, phenotypes: &[String]) -> Result<AssociationResults> {
        let mut rows = Vec::with_capacity(phenotypes.len() * self.design.variants.len());
        for phenotype in phenotypes {
            let results = self.run(phenotype)?;
            rows.extend(results.rows.into_iter().map(|mut r| {
                r.pheno = Some(phenotype.clone());
                r
            }));
        }
        Ok(AssociationResults::from_vec(rows))
    }

    fn process_variant(&self, y: ArrayView1<f64>, j: usize) -> AssociationResult {
        let variant = &self.design.variants[j];
        let snp = self.design.genotype.column(j);
        match fit_variant(y, self.design.covariates.view(), snp, None) {
            Ok(fit) => AssociationResult::builder()
                .snp(variant.sid.clone())
                .a1(variant.allele_1.clone())
                .chr(variant.chromosome.clone())
                .beta(fit.beta)
                .stat(fit.stat)
                .p(fit.p)
                .n(fit.n)
                .build(),
            Err(err) => {
                warn!("Variant {} could not be fitted: {err}", variant.sid);
                AssociationResult::failed(
                    variant.sid.clone(),
                    variant.allele_1.clone(),
                    variant.chromosome.clone(),
                    0,
                )
            }
        }
    }
}

/// Restricts the fileset to the table's subjects and the listed SNPs, then
/// tests every remaining variant against the phenotype
///
/// Returns the restricted fileset alongside the results.
pub fn mass_univariate_test(
    bed: &BedFile,
    table: &Table,
    covariates: &[String],
    phenotype: &str,
    snps: Option<&[String]>,
    progress: bool,
) -> Result<(BedFile, AssociationResults)> {
    let fids = table.fids()?;
    let extracted = bed.extract(snps, Some(&fids));
    let design = AssociationDesign::align(&extracted, table, covariates)?;
    let results = MassUnivariate::new(&design, progress).run(phenotype)?;
    Ok((extracted, results))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::plink::Individual;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Toy cohort where the first variant drives the phenotype and the second is noise
    pub(crate) fn toy_cohort() -> (BedFile, Table) {
        let n = 12;
        let individuals = (0..n)
            .map(|i| Individual {
                fid: format!("F{i}"),
                iid: format!("I{i}"),
                father: "0".to_string(),
                mother: "0".to_string(),
                sex: "1".to_string(),
                pheno: "-9".to_string(),
            })
            .collect::<Vec<_>>();
        let variants = ["1:100", "1:200", "2:300"]
            .iter()
            .map(|sid| Variant {
                chromosome: sid[..1].to_string(),
                sid: sid.to_string(),
                cm_position: 0.0,
                bp_position: sid[2..].parse().unwrap(),
                allele_1: "A".to_string(),
                allele_2: "G".to_string(),
            })
            .collect::<Vec<_>>();
        let causal = [0., 1., 2., 0., 1., 2., 0., 1., 2., 1., 0., 2.];
        let noise = [1., 0., 1., 2., 0., 1., 2., 1., 0., 0., 2., 1.];
        let mut genotype = Array2::<f64>::zeros((n, 3));
        for i in 0..n {
            genotype[[i, 0]] = causal[i];
            genotype[[i, 1]] = noise[i];
            // monomorphic variant
            genotype[[i, 2]] = 2.0;
        }
        let age = [30., 35., 40., 45., 50., 55., 31., 36., 41., 46., 51., 56.];
        let jitter = [0.1, -0.2, 0.05, 0.0, 0.15, -0.1, -0.05, 0.2, -0.15, 0.1, 0.0, -0.1];
        let rows = (0..n)
            .map(|i| {
                let y = 1.0 + 0.8 * causal[i] + 0.02 * age[i] + jitter[i];
                vec![format!("F{i}"), format!("I{i}"), y.to_string(), age[i].to_string()]
            })
            .collect();
        let table = Table::new(
            vec!["FID".into(), "IID".into(), "WM_sum".into(), "age".into()],
            rows,
        )
        .unwrap();
        (BedFile::new(individuals, variants, genotype).unwrap(), table)
    }

    #[test]
    fn test_fit_variant_recovers_slope() {
        let y = array![1.0, 2.1, 2.9, 4.2, 5.0];
        let snp = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let covariates = Array2::<f64>::zeros((5, 0));
        let fit = fit_variant(y.view(), covariates.view(), snp.view(), None).unwrap();
        assert_relative_eq!(fit.beta, 1.01, epsilon = 1e-10);
        assert_eq!(fit.n, 5);
        assert!(fit.p < 0.001);
    }

    #[test]
    fn test_fit_variant_with_intracranial_volume_scale_covariate() {
        let n = 200;
        let snp = Array1::from_shape_fn(n, |i| ((7 * i) % 3) as f64);
        let icv = Array1::from_shape_fn(n, |i| 1.5e6 + ((13 * i) % 17) as f64 * 2e4);
        let noise = Array1::from_shape_fn(n, |i| (((37 * i) % 11) as f64 - 5.0) * 0.01);
        let y = 0.5 * &snp + 1e-6 * &icv + &noise;
        let covariates = icv.clone().insert_axis(Axis(1));
        let fit = fit_variant(y.view(), covariates.view(), snp.view(), None).unwrap();
        assert_eq!(fit.n, n);
        assert_relative_eq!(fit.beta, 0.5, epsilon = 0.02);
        assert!(fit.p < 1e-10);

        let scaled = (&icv / 1e6).insert_axis(Axis(1));
        let reference = fit_variant(y.view(), scaled.view(), snp.view(), None).unwrap();
        assert_relative_eq!(fit.beta, reference.beta, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_variant_drops_missing() {
        let y = array![1.0, 2.1, f64::NAN, 4.2, 5.0, 5.8];
        let snp = array![0.0, 1.0, 2.0, 3.0, f64::NAN, 5.0];
        let covariates = Array2::<f64>::zeros((6, 0));
        let fit = fit_variant(y.view(), covariates.view(), snp.view(), None).unwrap();
        assert_eq!(fit.n, 4);
    }

    #[test]
    fn test_fit_variant_with_repeated_rows() {
        let y = array![1.0, 2.1, 2.9, 4.2];
        let snp = array![0.0, 1.0, 2.0, 3.0];
        let covariates = Array2::<f64>::zeros((4, 0));
        let fit = fit_variant(y.view(), covariates.view(), snp.view(), Some(&[0, 0, 1, 3, 3])).unwrap();
        assert_eq!(fit.n, 5);
    }

    #[test]
    fn test_mass_univariate_flags_causal_variant() {
        let (bed, table) = toy_cohort();
        let (extracted, results) =
            mass_univariate_test(&bed, &table, &["age".to_string()], "WM_sum", None, false).unwrap();
        assert_eq!(extracted.n_individuals(), 12);
        assert_eq!(results.len(), 3);
        assert_eq!(results.rows[0].snp, "1:100");
        assert_relative_eq!(results.rows[0].beta, 0.8, epsilon = 0.1);
        assert!(results.rows[0].p < 1e-5);
        assert!(results.rows[1].p > results.rows[0].p);
        // the monomorphic variant is collinear with the intercept
        assert!(results.rows[2].p.is_nan());
        assert_eq!(results.best_snps(0.05).snps()[0], "1:100");
    }

    #[test]
    fn test_align_matches_suffixed_fids() {
        let (bed, _) = toy_cohort();
        let renamed = Table::new(
            vec!["FID".into(), "IID".into(), "WM_sum".into(), "age".into()],
            (0..2)
                .map(|i| vec![format!("F{i}-scan"), format!("I{i}"), "1.0".to_string(), "30".to_string()])
                .collect(),
        )
        .unwrap();
        let design = AssociationDesign::align(&bed, &renamed, &["age".to_string()]).unwrap();
        assert_eq!(design.n_subjects(), 2);
        assert_eq!(design.genotype.dim(), (2, 3));
        assert_eq!(design.genotype[[1, 0]], 1.0);
    }

    #[test]
    fn test_run_phenotypes_labels_rows() {
        let (bed, table) = toy_cohort();
        let design = AssociationDesign::align(&bed, &table, &[]).unwrap();
        let results = MassUnivariate::new(&design, false)
            .run_phenotypes(&["WM_sum".to_string(), "age".to_string()])
            .unwrap();
        assert_eq!(results.len(), 6);
        assert_eq!(results.rows[3].pheno.as_deref(), Some("age"));
    }
}

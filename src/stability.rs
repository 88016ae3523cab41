use std::{cmp::Ordering, path::Path};

use csv::WriterBuilder;
use indicatif::ParallelProgressIterator;
use rand::{seq::IteratorRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    config::{ResampleScheme, StabilityConfig},
    error::{Error, Result},
    math::{arithmetic_mean, quantile, sample_sd},
    regression::{fit_variant, AssociationDesign},
    utils::{index_mask, progress_bar},
};

/// Stability summary of one association across resamples
#[derive(Debug, Clone)]
pub struct StabilityResult {
    pub snp: String,
    pub beta: f64,
    pub p: f64,
    /// Fraction of successful refits with `p <= alpha`
    pub selection_frequency: f64,
    /// Fraction of successful refits whose beta has the full-sample sign
    pub sign_consistency: f64,
    pub beta_mean: f64,
    pub beta_sd: f64,
    pub beta_lower: f64,
    pub beta_upper: f64,
    pub n_resamples: usize,
    pub n_failed: usize,
    pub stable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StabilityResults {
    pub rows: Vec<StabilityResult>,
}
impl StabilityResults {
    pub fn stable_snps(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter(|r| r.stable)
            .map(|r| r.snp.clone())
            .collect()
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        writer.write_record([
            "SNP",
            "BETA",
            "P",
            "SELECTION_FREQ",
            "SIGN_CONSISTENCY",
            "BETA_MEAN",
            "BETA_SD",
            "BETA_LOWER",
            "BETA_UPPER",
            "N_RESAMPLES",
            "N_FAILED",
            "STABLE",
        ])?;
        for r in &self.rows {
            writer.write_record([
                r.snp.clone(),
                r.beta.to_string(),
                r.p.to_string(),
                r.selection_frequency.to_string(),
                r.sign_consistency.to_string(),
                r.beta_mean.to_string(),
                r.beta_sd.to_string(),
                r.beta_lower.to_string(),
                r.beta_upper.to_string(),
                r.n_resamples.to_string(),
                r.n_failed.to_string(),
                r.stable.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn pprint(&self) {
        println!("SNP\tBeta\tP\tSelection Freq\tSign Consistency\tBeta 2.5%\tBeta 97.5%\tStable");
        for r in &self.rows {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.snp,
                r.beta,
                r.p,
                r.selection_frequency,
                r.sign_consistency,
                r.beta_lower,
                r.beta_upper,
                r.stable
            );
        }
    }
}

/// Resampling based robustness check of significant associations
///
/// Every variant of a run is refitted on the same resampled subject sets, so
/// the frequencies are comparable across variants and reproducible for a seed.
pub struct StabilityTest<'a> {
    design: &'a AssociationDesign,
    config: StabilityConfig,
    progress: bool,
}
impl<'a> StabilityTest<'a> {
    pub fn new(design: &'a AssociationDesign, config: StabilityConfig, progress: bool) -> Self {
        Self {
            design,
            config,
            progress,
        }
    }

    pub fn run(&self, phenotype: &str, snps: &[String]) -> Result<StabilityResults> {
        if let ResampleScheme::Subsample { fraction } = self.config.scheme {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::InvalidArgument(format!(
                    "subsample fraction must be in (0, 1], got {fraction}"
                )));
            }
        }
        let y = self.design.phenotype(phenotype)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed as u64);
        let resamples = self.draw_resamples(self.design.n_subjects(), &mut rng);

        let sids = self
            .design
            .variants
            .iter()
            .map(|v| v.sid.clone())
            .collect::<Vec<_>>();
        let columns = snps
            .iter()
            .filter_map(|snp| match index_mask(snp, &sids).first() {
                Some(j) => Some((snp.as_str(), *j)),
                None => {
                    warn!("Variant {snp} is not in the genotype data and is skipped");
                    None
                }
            })
            .collect::<Vec<_>>();

        let bar = progress_bar(columns.len(), self.progress, "stability");
        let mut rows = columns
            .into_par_iter()
            .progress_with(bar)
            .filter_map(|(snp, j)| self.process_variant(&y, snp, j, &resamples))
            .collect::<Vec<_>>();

        rows.sort_by(|a, b| {
            b.selection_frequency
                .partial_cmp(&a.selection_frequency)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.snp.cmp(&b.snp))
        });
        info!(
            "{} of {} variants are stable over {} resamples",
            rows.iter().filter(|r| r.stable).count(),
            rows.len(),
            self.config.n_resamples
        );
        Ok(StabilityResults { rows })
    }

    /// Draws the subject indices of every resample
    fn draw_resamples(&self, n: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<usize>> {
        let size = self.config.scheme.draw_size(n);
        (0..self.config.n_resamples)
            .map(|_| match self.config.scheme {
                ResampleScheme::Bootstrap => (0..size).map(|_| rng.gen_range(0..n)).collect(),
                ResampleScheme::Subsample { .. } => (0..n).choose_multiple(rng, size),
            })
            .collect()
    }

    fn process_variant(
        &self,
        y: &ndarray::Array1<f64>,
        snp: &str,
        j: usize,
        resamples: &[Vec<usize>],
    ) -> Option<StabilityResult> {
        let covariates = self.design.covariates.view();
        let genotype = self.design.genotype.column(j);
        let full = match fit_variant(y.view(), covariates, genotype, None) {
            Ok(fit) => fit,
            Err(err) => {
                warn!("Variant {snp} could not be fitted on the full sample: {err}");
                return None;
            }
        };

        let fits = resamples
            .iter()
            .filter_map(|rows| fit_variant(y.view(), covariates, genotype, Some(rows)).ok())
            .filter(|fit| fit.beta.is_finite() && fit.p.is_finite())
            .collect::<Vec<_>>();
        let n_failed = resamples.len() - fits.len();
        if fits.is_empty() {
            warn!("Variant {snp} could not be fitted on any resample");
            return None;
        }

        let n_ok = fits.len() as f64;
        let selected = fits.iter().filter(|f| f.p <= self.config.alpha).count() as f64;
        let same_sign = fits
            .iter()
            .filter(|f| f.beta.signum() == full.beta.signum())
            .count() as f64;
        let mut betas = fits.iter().map(|f| f.beta).collect::<Vec<_>>();
        betas.sort_unstable_by(|a, b| a.total_cmp(b));

        let selection_frequency = selected / n_ok;
        Some(StabilityResult {
            snp: snp.to_string(),
            beta: full.beta,
            p: full.p,
            selection_frequency,
            sign_consistency: same_sign / n_ok,
            beta_mean: arithmetic_mean(&betas),
            beta_sd: sample_sd(&betas),
            beta_lower: quantile(&betas, 0.025),
            beta_upper: quantile(&betas, 0.975),
            n_resamples: resamples.len(),
            n_failed,
            stable: selection_frequency >= self.config.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::tests::toy_cohort;

    fn design() -> AssociationDesign {
        let (bed, table) = toy_cohort();
        AssociationDesign::align(&bed, &table, &["age".to_string()]).unwrap()
    }

    fn snps() -> Vec<String> {
        vec!["1:100".to_string(), "1:200".to_string()]
    }

    #[test]
    fn test_causal_variant_is_stable() {
        let design = design();
        let config = StabilityConfig::builder().n_resamples(200).seed(42).build();
        let results = StabilityTest::new(&design, config, false)
            .run("WM_sum", &snps())
            .unwrap();
        assert_eq!(results.rows.len(), 2);
        let causal = &results.rows[0];
        assert_eq!(causal.snp, "1:100");
        assert!(causal.selection_frequency > 0.9);
        assert!(causal.sign_consistency > 0.95);
        assert!(causal.beta_lower < causal.beta && causal.beta < causal.beta_upper);
        assert!(causal.stable);
        assert!(results.rows[1].selection_frequency < causal.selection_frequency);
        assert_eq!(results.stable_snps()[0], "1:100");
    }

    #[test]
    fn test_same_seed_reproduces() {
        let design = design();
        let config = StabilityConfig::builder()
            .n_resamples(50)
            .seed(7)
            .scheme(ResampleScheme::Subsample { fraction: 0.75 })
            .build();
        let first = StabilityTest::new(&design, config.clone(), false)
            .run("WM_sum", &snps())
            .unwrap();
        let second = StabilityTest::new(&design, config, false)
            .run("WM_sum", &snps())
            .unwrap();
        for (a, b) in first.rows.iter().zip(second.rows.iter()) {
            assert_eq!(a.snp, b.snp);
            assert_eq!(a.selection_frequency, b.selection_frequency);
            assert_eq!(a.beta_mean, b.beta_mean);
        }
    }

    #[test]
    fn test_rejects_subsample_fraction_outside_unit_interval() {
        let design = design();
        for fraction in [0.0, 5.0, f64::NAN] {
            let config = StabilityConfig::builder()
                .n_resamples(5)
                .scheme(ResampleScheme::Subsample { fraction })
                .build();
            let result = StabilityTest::new(&design, config, false).run("WM_sum", &snps());
            assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_unknown_and_degenerate_variants_are_skipped() {
        let design = design();
        let config = StabilityConfig::builder().n_resamples(10).build();
        let results = StabilityTest::new(&design, config, false)
            .run("WM_sum", &["rs_missing".to_string(), "2:300".to_string()])
            .unwrap();
        assert!(results.rows.is_empty());
    }
}

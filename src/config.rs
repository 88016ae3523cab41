use adjustp::{adjust, Procedure};
use bon::Builder;

/// Multiple comparison correction applied to a family of p-values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionConfig {
    Identity,
    Fdr,
    Bonferroni,
}
impl CorrectionConfig {
    /// Adjusts the p-values, leaving non-finite entries untouched.
    ///
    /// Non-finite p-values (failed fits) are excluded from the family size.
    pub fn transform(&self, pvalues: &[f64]) -> Vec<f64> {
        let finite = pvalues
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let family = finite.iter().map(|i| pvalues[*i]).collect::<Vec<_>>();
        let adjusted = match self {
            CorrectionConfig::Identity => family,
            CorrectionConfig::Fdr if family.is_empty() => family,
            CorrectionConfig::Bonferroni if family.is_empty() => family,
            CorrectionConfig::Fdr => adjust(&family, Procedure::BenjaminiHochberg),
            CorrectionConfig::Bonferroni => adjust(&family, Procedure::Bonferroni),
        };
        let mut output = vec![f64::NAN; pvalues.len()];
        for (idx, p) in finite.into_iter().zip(adjusted) {
            output[idx] = p.min(1.0);
        }
        output
    }
}

/// Which side of a threshold passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdDirection {
    #[default]
    Greater,
    Lower,
}
impl ThresholdDirection {
    pub fn passes(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdDirection::Greater => value > threshold,
            ThresholdDirection::Lower => value < threshold,
        }
    }
}

/// Standardisation applied before fitting a simple regression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scaling {
    #[default]
    Both,
    X,
    Y,
    None,
}
impl Scaling {
    pub fn scale_x(&self) -> bool {
        matches!(self, Scaling::Both | Scaling::X)
    }
    pub fn scale_y(&self) -> bool {
        matches!(self, Scaling::Both | Scaling::Y)
    }
}

/// How subjects are redrawn for each stability resample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResampleScheme {
    /// n draws with replacement
    Bootstrap,
    /// `fraction * n` draws without replacement
    Subsample { fraction: f64 },
}
impl ResampleScheme {
    pub fn draw_size(&self, n: usize) -> usize {
        match self {
            ResampleScheme::Bootstrap => n,
            ResampleScheme::Subsample { fraction } => {
                ((n as f64 * fraction).round() as usize).clamp(1, n)
            }
        }
    }
}

/// Configuration of the stability resampling
#[derive(Debug, Clone, Builder)]
pub struct StabilityConfig {
    #[builder(default = 1000)]
    pub n_resamples: usize,
    /// Significance level a resample must reach to count as a selection
    #[builder(default = 0.05)]
    pub alpha: f64,
    /// Minimum selection frequency for an association to be called stable
    #[builder(default = 0.8)]
    pub threshold: f64,
    #[builder(default = ResampleScheme::Bootstrap)]
    pub scheme: ResampleScheme,
    #[builder(default = 0)]
    pub seed: usize,
}
impl Default for StabilityConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_identity() {
        let pvalues = vec![0.01, 0.2, 0.5];
        assert_eq!(CorrectionConfig::Identity.transform(&pvalues), pvalues);
    }

    #[test]
    fn test_transform_bonferroni() {
        let adjusted = CorrectionConfig::Bonferroni.transform(&[0.01, 0.2, 0.5]);
        assert_relative_eq!(adjusted[0], 0.03);
        assert_relative_eq!(adjusted[1], 0.6);
        assert_relative_eq!(adjusted[2], 1.0);
    }

    #[test]
    fn test_transform_fdr() {
        let adjusted = CorrectionConfig::Fdr.transform(&[0.01, 0.04, 0.03]);
        assert_relative_eq!(adjusted[0], 0.03);
        assert_relative_eq!(adjusted[1], 0.04);
        assert_relative_eq!(adjusted[2], 0.04);
    }

    #[test]
    fn test_transform_skips_nan() {
        let adjusted = CorrectionConfig::Bonferroni.transform(&[0.01, f64::NAN, 0.02]);
        assert_relative_eq!(adjusted[0], 0.02);
        assert!(adjusted[1].is_nan());
        assert_relative_eq!(adjusted[2], 0.04);
    }

    #[test]
    fn test_threshold_direction() {
        assert!(ThresholdDirection::Greater.passes(2.0, 1.0));
        assert!(!ThresholdDirection::Greater.passes(1.0, 1.0));
        assert!(ThresholdDirection::Lower.passes(0.01, 0.05));
    }

    #[test]
    fn test_draw_size() {
        assert_eq!(ResampleScheme::Bootstrap.draw_size(10), 10);
        assert_eq!(ResampleScheme::Subsample { fraction: 0.5 }.draw_size(10), 5);
        assert_eq!(ResampleScheme::Subsample { fraction: 0.01 }.draw_size(10), 1);
    }

    #[test]
    fn test_stability_defaults() {
        let config = StabilityConfig::default();
        assert_eq!(config.n_resamples, 1000);
        assert_eq!(config.scheme, ResampleScheme::Bootstrap);
        assert_relative_eq!(config.alpha, 0.05);
    }
}

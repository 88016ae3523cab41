use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use statrs::distribution::{ContinuousCDF, Discrete, Hypergeometric, StudentsT};

use crate::error::{Error, Result};

/// Pivot size, relative to the column's own sum of squares, treated as singular
const SINGULAR_TOLERANCE: f64 = 1e-10;

pub fn arithmetic_mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample variance (n - 1 denominator)
pub fn sample_variance(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let mean = arithmetic_mean(x);
    x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (x.len() - 1) as f64
}

pub fn sample_sd(x: &[f64]) -> f64 {
    sample_variance(x).sqrt()
}

/// Z-scores with the population standard deviation, as a standard scaler does
pub fn standardize(x: &[f64]) -> Vec<f64> {
    let mean = arithmetic_mean(x);
    let sd = (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / x.len() as f64).sqrt();
    if sd == 0.0 || !sd.is_finite() {
        return x.iter().map(|v| v - mean).collect();
    }
    x.iter().map(|v| (v - mean) / sd).collect()
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

pub fn neg_log10(p: f64) -> f64 {
    -p.log10()
}

/// Two-sided p-value of a t statistic
pub fn t_test_pvalue(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Two-sided critical value of the t distribution at level `alpha`
pub fn t_critical(alpha: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => dist.inverse_cdf(1.0 - alpha / 2.0),
        Err(_) => f64::NAN,
    }
}

/// P(X >= x) for a hypergeometric draw
///
/// Summing the upper tail keeps precision for very small p-values.
pub fn hypergeometric_upper_tail(x: u64, population: u64, successes: u64, draws: u64) -> f64 {
    let draws = draws.min(population);
    let successes = successes.min(population);
    let Ok(dist) = Hypergeometric::new(population, successes, draws) else {
        return f64::NAN;
    };
    let max = successes.min(draws);
    if x > max {
        return 0.0;
    }
    (x..=max).map(|k| dist.pmf(k)).sum::<f64>().min(1.0)
}

/// Ordinary least squares fit
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub params: Array1<f64>,
    pub std_errors: Array1<f64>,
    pub tvalues: Array1<f64>,
    pub pvalues: Array1<f64>,
    pub df_resid: f64,
    pub sigma2: f64,
    /// (X'X)^-1, used for prediction intervals
    pub xtx_inv: Array2<f64>,
}
impl OlsFit {
    /// Standard error of the fitted mean at a design row
    pub fn mean_se(&self, row: ArrayView1<f64>) -> f64 {
        let v = self.xtx_inv.dot(&row);
        (row.dot(&v) * self.sigma2).sqrt()
    }

    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        row.dot(&self.params)
    }
}

/// Fits `y = X b` by solving the normal equations with a Cholesky factorisation
///
/// The design is expected to already contain the intercept column. A column
/// whose residual sum of squares, after the preceding columns, is negligible
/// relative to its own sum of squares makes the design singular.
pub fn ols(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<OlsFit> {
    let (n, k) = x.dim();
    if n != y.len() {
        return Err(Error::InvalidArgument(format!(
            "design has {n} rows but response has {} values",
            y.len()
        )));
    }
    if n <= k {
        return Err(Error::Singular);
    }
    let xtx = x.t().dot(&x);
    let xty = x.t().dot(&y);

    let cholesky = DMatrix::from_fn(k, k, |i, j| xtx[[i, j]])
        .cholesky()
        .ok_or(Error::Singular)?;
    let lower = cholesky.l_dirty();
    for j in 0..k {
        let pivot = lower[(j, j)].powi(2);
        if !pivot.is_finite() || pivot <= SINGULAR_TOLERANCE * xtx[[j, j]] {
            return Err(Error::Singular);
        }
    }
    let solution = cholesky.solve(&DVector::from_iterator(k, xty.iter().copied()));
    let inverse = cholesky.inverse();
    let params = Array1::from_iter(solution.iter().copied());
    let xtx_inv = Array2::from_shape_fn((k, k), |(i, j)| inverse[(i, j)]);

    let residuals = &y - &x.dot(&params);
    let df_resid = (n - k) as f64;
    let sigma2 = residuals.dot(&residuals) / df_resid;

    let std_errors = xtx_inv.diag().mapv(|v| (v * sigma2).sqrt());
    let tvalues = &params / &std_errors;
    let pvalues = tvalues.mapv(|t| t_test_pvalue(t, df_resid));

    Ok(OlsFit {
        params,
        std_errors,
        tvalues,
        pvalues,
        df_resid,
        sigma2,
        xtx_inv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_arithmetic_mean() {
        let x = vec![1., 2., 3.];
        assert_relative_eq!(arithmetic_mean(&x), 2.0);
    }

    #[test]
    fn test_sample_variance() {
        assert_relative_eq!(sample_variance(&[1., 2., 3., 4.]), 1.6666666666666667);
        assert!(sample_variance(&[1.]).is_nan());
    }

    #[test]
    fn test_standardize() {
        let z = standardize(&[1., 2., 3.]);
        assert_relative_eq!(z[0], -1.224744871391589, epsilon = 1e-12);
        assert_relative_eq!(z[1], 0.0);
        assert_relative_eq!(z[2], 1.224744871391589, epsilon = 1e-12);
    }

    #[test]
    fn test_quantile() {
        let sorted = vec![1., 2., 3., 4., 5.];
        assert_relative_eq!(quantile(&sorted, 0.5), 3.0);
        assert_relative_eq!(quantile(&sorted, 0.25), 2.0);
        assert_relative_eq!(quantile(&sorted, 0.1), 1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_t_test_pvalue() {
        // t = 2.228 is the 97.5% quantile at 10 degrees of freedom
        assert_relative_eq!(t_test_pvalue(2.228138851986, 10.0), 0.05, epsilon = 1e-6);
        assert_relative_eq!(t_test_pvalue(0.0, 10.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hypergeometric_upper_tail() {
        // population 20, 5 successes, 4 draws: P(X >= 2)
        let p = hypergeometric_upper_tail(2, 20, 5, 4);
        assert_relative_eq!(p, 0.24871001031991744, epsilon = 1e-10);
        assert_relative_eq!(hypergeometric_upper_tail(0, 20, 5, 4), 1.0, epsilon = 1e-12);
        assert_relative_eq!(hypergeometric_upper_tail(5, 20, 5, 4), 0.0);
    }

    #[test]
    fn test_ols_exact_line() {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.]];
        let y = array![1.0, 3.1, 4.9, 7.0];
        let fit = ols(x.view(), y.view()).unwrap();
        assert_relative_eq!(fit.params[0], 1.03, epsilon = 1e-10);
        assert_relative_eq!(fit.params[1], 1.98, epsilon = 1e-10);
        assert_relative_eq!(fit.df_resid, 2.0);
        assert!(fit.pvalues[1] < 0.01);
    }

    #[test]
    fn test_ols_singular() {
        let x = array![[1., 2.], [1., 2.], [1., 2.]];
        let y = array![1.0, 2.0, 3.0];
        assert!(matches!(ols(x.view(), y.view()), Err(Error::Singular)));
    }

    #[test]
    fn test_ols_inverse_matches_design() {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.]];
        let y = array![1.0, 3.1, 4.9, 7.0];
        let fit = ols(x.view(), y.view()).unwrap();
        let identity = x.t().dot(&x).dot(&fit.xtx_inv);
        assert_relative_eq!(identity[[0, 0]], 1.0, epsilon = 1e-10);
        assert_relative_eq!(identity[[0, 1]], 0.0, epsilon = 1e-10);
        assert_relative_eq!(identity[[1, 1]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_ols_collinear_with_intercept() {
        let x = array![[1., 2., 0.], [1., 2., 1.], [1., 2., 2.], [1., 2., 3.], [1., 2., 5.]];
        let y = array![1.0, 2.0, 3.0, 4.1, 6.0];
        assert!(matches!(ols(x.view(), y.view()), Err(Error::Singular)));
    }
}

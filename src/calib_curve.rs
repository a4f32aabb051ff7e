//! Radiocarbon calibration curves and the per-date calibration density.
//!
//! A [`CalibCurve`] maps calendar age (cal yr BP) to the expected
//! radiocarbon age and its error. [`CalibCurve::d_cal`] turns one
//! reservoir-corrected radiocarbon measurement into a discrete density
//! over calendar age, which is the prior for that date before sampling.

use itertools::izip;
use statrs::distribution::{Continuous, Normal};
use thiserror::Error;
use tracing::debug;

use crate::math::{interp, linspace, normalize};

/// Densities at or below this value are dropped from the calibrated support.
pub const DEFAULT_CUTOFF: f64 = 0.001;

/// Minimum number of support points that must survive the cutoff.
/// With fewer the density is resampled on a regular grid instead.
const MIN_SUPPORT: usize = 6;
const RESAMPLE_POINTS: usize = 50;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibError {
    #[error("Student-t parameters must satisfy t_b == t_a + 1, got t_a={t_a}, t_b={t_b}")]
    StudentTParams { t_a: f64, t_b: f64 },
    #[error("calibration curve columns differ in length: {column} has {found}, expected {expected}")]
    ColumnLength {
        column: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("calibration curve needs at least two points")]
    TooShort,
    #[error("calibration curve calendar ages must be strictly increasing (index {0})")]
    NotAscending(usize),
    #[error("calendar age {theta} lies outside the curve range [{min}, {max}]")]
    OutOfRange { theta: f64, min: f64, max: f64 },
    #[error("calibration density is not finite for rcmean={rcmean}, w2={w2}")]
    DegenerateDensity { rcmean: f64, w2: f64 },
    #[error("{param} has {found} values but there are {expected} dates")]
    Broadcast {
        param: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Distribution of the measurement error around the curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorModel {
    /// Gaussian error with variance `error² + w2`.
    Normal,
    /// The two-parameter Student-t kernel of Christen and Pérez (2009).
    /// Heavier tailed than `Normal`, and the default.
    StudentT { t_a: f64, t_b: f64 },
}

impl Default for ErrorModel {
    fn default() -> Self {
        ErrorModel::StudentT { t_a: 3., t_b: 4. }
    }
}

impl ErrorModel {
    /// Pick the model from the raw flag and t parameters used in run configurations.
    ///
    /// The t parameters must be consistent even when `normal` is set.
    pub fn from_parts(normal: bool, t_a: f64, t_b: f64) -> Result<Self, CalibError> {
        check_student_t(t_a, t_b)?;
        Ok(if normal {
            ErrorModel::Normal
        } else {
            ErrorModel::StudentT { t_a, t_b }
        })
    }

    pub fn validate(&self) -> Result<(), CalibError> {
        match *self {
            ErrorModel::Normal => Ok(()),
            ErrorModel::StudentT { t_a, t_b } => check_student_t(t_a, t_b),
        }
    }
}

/// The only place the `t_b == t_a + 1` relationship is checked.
pub(crate) fn check_student_t(t_a: f64, t_b: f64) -> Result<(), CalibError> {
    if (t_b - (t_a + 1.)).abs() > 1e-9 || !t_a.is_finite() {
        return Err(CalibError::StudentTParams { t_a, t_b });
    }
    Ok(())
}

/// Expected radiocarbon age and error at one calendar age.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub c14age: f64,
    pub error: f64,
}

/// Discrete calibrated density of one date.
///
/// Calendar ages are ascending and the densities sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedDensity {
    calbp: Vec<f64>,
    density: Vec<f64>,
}

impl CalibratedDensity {
    pub fn calbp(&self) -> &[f64] {
        &self.calbp
    }

    pub fn density(&self) -> &[f64] {
        &self.density
    }

    pub fn len(&self) -> usize {
        self.calbp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calbp.is_empty()
    }

    /// `(calendar age, density)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.calbp.iter().copied().zip(self.density.iter().copied())
    }

    /// Density-weighted mean calendar age.
    pub fn mean(&self) -> f64 {
        self.iter().map(|(age, p)| age * p).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibCurve {
    calbp: Vec<f64>,
    c14age: Vec<f64>,
    error: Vec<f64>,
    delta14c: Vec<f64>,
    sigma: Vec<f64>,
}

impl CalibCurve {
    /// Build a curve from its columns. `delta14c` and `sigma` default to zeros.
    pub fn new(
        calbp: Vec<f64>,
        c14age: Vec<f64>,
        error: Vec<f64>,
        delta14c: Option<Vec<f64>>,
        sigma: Option<Vec<f64>>,
    ) -> Result<Self, CalibError> {
        let n = calbp.len();
        let delta14c = delta14c.unwrap_or_else(|| vec![0.; n]);
        let sigma = sigma.unwrap_or_else(|| vec![0.; n]);
        for (column, len) in [
            ("c14age", c14age.len()),
            ("error", error.len()),
            ("delta14c", delta14c.len()),
            ("sigma", sigma.len()),
        ] {
            if len != n {
                return Err(CalibError::ColumnLength {
                    column,
                    expected: n,
                    found: len,
                });
            }
        }
        if n < 2 {
            return Err(CalibError::TooShort);
        }
        if let Some(idx) = calbp.windows(2).position(|w| w[0] >= w[1]) {
            return Err(CalibError::NotAscending(idx + 1));
        }
        Ok(Self {
            calbp,
            c14age,
            error,
            delta14c,
            sigma,
        })
    }

    /// A curve that leaves ages uncalibrated: radiocarbon age equals
    /// calendar age with zero curve error, on a regular grid.
    pub fn identity(min: f64, max: f64, step: f64) -> Result<Self, CalibError> {
        let calbp = crate::math::arange(min, max + step, step);
        let n = calbp.len();
        Self::new(calbp.clone(), calbp, vec![0.; n], None, None)
    }

    pub fn calbp(&self) -> &[f64] {
        &self.calbp
    }

    pub fn c14age(&self) -> &[f64] {
        &self.c14age
    }

    pub fn error(&self) -> &[f64] {
        &self.error
    }

    pub fn delta14c(&self) -> &[f64] {
        &self.delta14c
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    pub fn len(&self) -> usize {
        self.calbp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calbp.is_empty()
    }

    /// Calendar age range covered by the curve.
    pub fn range(&self) -> (f64, f64) {
        (self.calbp[0], self.calbp[self.calbp.len() - 1])
    }

    /// Calibrate one date.
    ///
    /// `rcmean` is the reservoir-corrected radiocarbon age, `w2` the
    /// measurement variance including the reservoir uncertainty. The
    /// density is evaluated at every curve point and normalized. Points
    /// with density above `cutoff` form the support and are normalized
    /// again. If five or fewer points survive, the full density is instead
    /// interpolated onto 50 regularly spaced calendar ages over the whole
    /// curve and normalized.
    pub fn d_cal(
        &self,
        rcmean: f64,
        w2: f64,
        model: ErrorModel,
        cutoff: f64,
    ) -> Result<CalibratedDensity, CalibError> {
        model.validate()?;

        let mut density = match model {
            ErrorModel::Normal => izip!(&self.c14age, &self.error)
                .map(|(&c14age, &error)| {
                    let std = (error * error + w2).sqrt();
                    Normal::new(rcmean, std)
                        .map(|dist| dist.pdf(c14age))
                        .map_err(|_| CalibError::DegenerateDensity { rcmean, w2 })
                })
                .collect::<Result<Vec<_>, _>>()?,
            ErrorModel::StudentT { t_a, t_b } => izip!(&self.c14age, &self.error)
                .map(|(&c14age, &error)| {
                    let diff = rcmean - c14age;
                    (t_b + diff * diff / (2. * (error * error + w2))).powf(-(t_a + 0.5))
                })
                .collect(),
        };

        let total = normalize(&mut density);
        if !total.is_finite() || total <= 0. || density.iter().any(|p| !p.is_finite()) {
            return Err(CalibError::DegenerateDensity { rcmean, w2 });
        }

        let (calbp, mut kept): (Vec<f64>, Vec<f64>) = izip!(&self.calbp, &density)
            .filter(|(_, &p)| p > cutoff)
            .map(|(&age, &p)| (age, p))
            .unzip();

        if kept.len() >= MIN_SUPPORT {
            normalize(&mut kept);
            return Ok(CalibratedDensity {
                calbp,
                density: kept,
            });
        }

        debug!(
            rcmean,
            w2,
            surviving = kept.len(),
            "too few points above cutoff, resampling calibrated density"
        );
        let (min, max) = self.range();
        let grid = linspace(min, max, RESAMPLE_POINTS);
        let mut resampled: Vec<f64> = grid
            .iter()
            .map(|&age| interp(age, &self.calbp, &density))
            .collect();
        let total = normalize(&mut resampled);
        if !total.is_finite() || total <= 0. {
            return Err(CalibError::DegenerateDensity { rcmean, w2 });
        }
        Ok(CalibratedDensity {
            calbp: grid,
            density: resampled,
        })
    }

    /// Expected radiocarbon age and error at calendar age `theta`,
    /// linearly interpolated between the bracketing curve points.
    pub fn c14age_from_age(&self, theta: f64) -> Result<CurvePoint, CalibError> {
        let (min, max) = self.range();
        if !(min..=max).contains(&theta) {
            return Err(CalibError::OutOfRange { theta, min, max });
        }
        let idx = self.calbp.partition_point(|&age| age < theta);
        if idx == 0 {
            return Ok(CurvePoint {
                c14age: self.c14age[0],
                error: self.error[0],
            });
        }
        let (x0, x1) = (self.calbp[idx - 1], self.calbp[idx]);
        let t = (theta - x0) / (x1 - x0);
        let lerp = |col: &[f64]| col[idx - 1] + t * (col[idx] - col[idx - 1]);
        Ok(CurvePoint {
            c14age: lerp(&self.c14age),
            error: lerp(&self.error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn mini_curve() -> CalibCurve {
        CalibCurve::new(
            vec![1., 2., 3.],
            vec![3., 2., 1.],
            vec![21., 22., 23.],
            None,
            None,
        )
        .unwrap()
    }

    fn small_curve() -> CalibCurve {
        CalibCurve::new(
            (1..7).map(f64::from).collect(),
            (1..7).rev().map(f64::from).collect(),
            (21..27).map(f64::from).collect(),
            None,
            None,
        )
        .unwrap()
    }

    fn assert_tail(density: &CalibratedDensity, goal: &[[f64; 2]]) {
        let n = density.len();
        let tail = &goal[..];
        for (k, row) in tail.iter().enumerate() {
            let i = n - tail.len() + k;
            assert_abs_diff_eq!(density.calbp()[i], row[0], epsilon = 1e-6);
            assert_abs_diff_eq!(density.density()[i], row[1], epsilon = 1e-7);
        }
    }

    #[test]
    fn d_cal_normal_reference_values() {
        let mini = mini_curve()
            .d_cal(5., 2., ErrorModel::Normal, DEFAULT_CUTOFF)
            .unwrap();
        assert_eq!(mini.len(), 50);
        assert_tail(&mini, &[[2.959184, 0.01904568], [3.0, 0.01900584]]);

        let small = small_curve()
            .d_cal(5., 2., ErrorModel::Normal, DEFAULT_CUTOFF)
            .unwrap();
        assert_eq!(small.len(), 6);
        assert_tail(
            &small,
            &[[4., 0.1624059], [5., 0.1553523], [6., 0.1487062]],
        );
    }

    #[test]
    fn d_cal_student_t_reference_values() {
        let model = ErrorModel::default();
        let mini = mini_curve().d_cal(5., 2., model, 0.1).unwrap();
        assert_tail(&mini, &[[2.959184, 0.01990764], [3.0, 0.01990352]]);

        let small = small_curve().d_cal(5., 2., model, 0.1).unwrap();
        assert_tail(
            &small,
            &[[4., 0.1667562], [5., 0.1662155], [6., 0.1655462]],
        );
    }

    #[test]
    fn d_cal_rejects_bad_student_t() {
        let err = mini_curve()
            .d_cal(5., 2., ErrorModel::StudentT { t_a: 3., t_b: 5. }, 0.001)
            .unwrap_err();
        assert_eq!(err, CalibError::StudentTParams { t_a: 3., t_b: 5. });
    }

    #[test]
    fn from_parts_checks_t_in_normal_mode() {
        assert_eq!(
            ErrorModel::from_parts(true, 3., 9.),
            Err(CalibError::StudentTParams { t_a: 3., t_b: 9. })
        );
        assert_eq!(ErrorModel::from_parts(true, 3., 4.), Ok(ErrorModel::Normal));
        assert_eq!(
            ErrorModel::from_parts(false, 3., 4.),
            Ok(ErrorModel::StudentT { t_a: 3., t_b: 4. })
        );
    }

    #[test]
    fn student_t_has_heavier_tails_than_normal() {
        let calbp: Vec<f64> = (0..201).map(f64::from).collect();
        let curve =
            CalibCurve::new(calbp.clone(), calbp.clone(), vec![0.; 201], None, None).unwrap();
        let normal = curve.d_cal(100., 100., ErrorModel::Normal, 0.).unwrap();
        let student = curve.d_cal(100., 100., ErrorModel::default(), 0.).unwrap();
        let at = |d: &CalibratedDensity, age: f64| {
            d.iter().find(|&(a, _)| a == age).map(|(_, p)| p).unwrap()
        };
        assert!(at(&student, 100.) < at(&normal, 100.));
        assert!(at(&student, 160.) > at(&normal, 160.));
    }

    #[test]
    fn cutoff_branch_is_renormalized() {
        let calbp: Vec<f64> = (0..101).map(f64::from).collect();
        let curve = CalibCurve::new(calbp.clone(), calbp, vec![0.; 101], None, None).unwrap();
        let density = curve.d_cal(50., 4., ErrorModel::default(), 0.001).unwrap();
        assert!(density.len() > 5 && density.len() < 101);
        assert_abs_diff_eq!(density.density().iter().sum::<f64>(), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(density.mean(), 50., epsilon = 1e-9);
    }

    #[test]
    fn c14age_from_age_interpolates() {
        let curve = small_curve();
        let point = curve.c14age_from_age(2.5).unwrap();
        assert_abs_diff_eq!(point.c14age, 4.5, epsilon = 1e-12);
        assert_abs_diff_eq!(point.error, 22.5, epsilon = 1e-12);
        assert_eq!(
            curve.c14age_from_age(1.).unwrap(),
            CurvePoint {
                c14age: 6.,
                error: 21.
            }
        );
        assert!(matches!(
            curve.c14age_from_age(0.5),
            Err(CalibError::OutOfRange { .. })
        ));
    }

    #[test]
    fn curve_validation() {
        assert_eq!(
            CalibCurve::new(vec![1., 2.], vec![1.], vec![1., 1.], None, None).unwrap_err(),
            CalibError::ColumnLength {
                column: "c14age",
                expected: 2,
                found: 1
            }
        );
        assert_eq!(
            CalibCurve::new(vec![1., 1.], vec![1., 1.], vec![1., 1.], None, None).unwrap_err(),
            CalibError::NotAscending(1)
        );
        let identity = CalibCurve::identity(-10., 10., 1.).unwrap();
        assert_eq!(identity.len(), 21);
        assert_eq!(identity.range(), (-10., 10.));
    }

    proptest! {
        #[test]
        fn d_cal_sums_to_one(
            rcmean in 0f64..60.,
            w2 in 0.5f64..400.,
            cutoff in 0f64..0.2,
            normal in any::<bool>(),
        ) {
            let calbp: Vec<f64> = (0..61).map(f64::from).collect();
            let error: Vec<f64> = (0..61).map(|i| 1. + i as f64 / 10.).collect();
            let curve = CalibCurve::new(calbp.clone(), calbp, error, None, None).unwrap();
            let model = if normal { ErrorModel::Normal } else { ErrorModel::default() };
            let density = curve.d_cal(rcmean, w2, model, cutoff).unwrap();
            let total: f64 = density.density().iter().sum();
            prop_assert!((total - 1.).abs() < 1e-9);
            prop_assert!(density.calbp().windows(2).all(|w| w[0] < w[1]));
        }
    }
}

//! Calibration of every date in a core.

use itertools::izip;
use tracing::debug;

use crate::{
    calib_curve::{
        check_student_t, CalibCurve, CalibError, CalibratedDensity, ErrorModel, DEFAULT_CUTOFF,
    },
    records::ChronRecord,
};

/// A per-date option: one value shared by all dates, or one value per date.
#[derive(Debug, Clone, PartialEq)]
pub enum PerSample<T> {
    One(T),
    Each(Vec<T>),
}

impl<T: Clone> PerSample<T> {
    /// Expand to exactly `n` values.
    ///
    /// A single value is repeated; a list must already have length `n`
    /// (a list of length one is treated like a single value).
    pub fn resolve(&self, n: usize, param: &'static str) -> Result<Vec<T>, CalibError> {
        match self {
            PerSample::One(value) => Ok(vec![value.clone(); n]),
            PerSample::Each(values) if values.len() == 1 => Ok(vec![values[0].clone(); n]),
            PerSample::Each(values) if values.len() == n => Ok(values.clone()),
            PerSample::Each(values) => Err(CalibError::Broadcast {
                param,
                expected: n,
                found: values.len(),
            }),
        }
    }
}

impl<T> From<T> for PerSample<T> {
    fn from(value: T) -> Self {
        PerSample::One(value)
    }
}

/// Options for [`calibrate_dates`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOptions {
    pub d_r: PerSample<f64>,
    pub d_std: PerSample<f64>,
    pub t_a: PerSample<f64>,
    pub t_b: PerSample<f64>,
    pub cutoff: PerSample<f64>,
    pub normal: PerSample<bool>,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            d_r: PerSample::One(0.),
            d_std: PerSample::One(0.),
            t_a: PerSample::One(3.),
            t_b: PerSample::One(4.),
            cutoff: PerSample::One(DEFAULT_CUTOFF),
            normal: PerSample::One(false),
        }
    }
}

/// Calibrated densities of a core, in the order of its dates.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedDates {
    pub depth: Vec<f64>,
    pub densities: Vec<CalibratedDensity>,
}

/// Calibrate every date of `chron`.
///
/// For date `i` the radiocarbon mean is `age - d_r` and the variance
/// `error² + d_std²`. All per-date options and the curve list are
/// expanded and checked before any date is calibrated.
pub fn calibrate_dates(
    chron: &ChronRecord,
    curves: PerSample<&CalibCurve>,
    options: &CalibrationOptions,
) -> Result<CalibratedDates, CalibError> {
    let n = chron.len();
    let curves = curves.resolve(n, "calib_curve")?;
    let d_r = options.d_r.resolve(n, "d_r")?;
    let d_std = options.d_std.resolve(n, "d_std")?;
    let t_a = options.t_a.resolve(n, "t_a")?;
    let t_b = options.t_b.resolve(n, "t_b")?;
    let cutoff = options.cutoff.resolve(n, "cutoff")?;
    let normal = options.normal.resolve(n, "normal")?;
    for (&t_a, &t_b) in t_a.iter().zip(&t_b) {
        check_student_t(t_a, t_b)?;
    }

    let models = izip!(&normal, &t_a, &t_b)
        .map(|(&normal, &t_a, &t_b)| ErrorModel::from_parts(normal, t_a, t_b))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(dates = n, "calibrating core dates");
    let densities = izip!(
        chron.age(),
        chron.error(),
        curves,
        d_r,
        d_std,
        models,
        cutoff
    )
    .map(|(&age, &error, curve, d_r, d_std, model, cutoff)| {
        let rcmean = age - d_r;
        let w2 = error * error + d_std * d_std;
        curve.d_cal(rcmean, w2, model, cutoff)
    })
    .collect::<Result<Vec<_>, _>>()?;

    Ok(CalibratedDates {
        depth: chron.depth().to_vec(),
        densities,
    })
}

use thiserror::Error;

use crate::{
    calib_curve::{check_student_t, CalibError, DEFAULT_CUTOFF},
    calibrate::PerSample,
    curves::CurveName,
    math::linspace,
};

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("at least two depth segments are needed, got {0}")]
    TooFewSegments(usize),
    #[error("depth_max ({max}) must exceed depth_min ({min})")]
    DepthRange { min: f64, max: f64 },
    #[error("maxyr ({max}) must exceed minyr ({min})")]
    YearRange { min: f64, max: f64 },
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("mem_mean must lie strictly between 0 and 1, got {0}")]
    MemoryMean(f64),
    #[error(transparent)]
    Calibration(#[from] CalibError),
}

/// Configuration of one sampler run.
///
/// Field names follow the Bacon run options. Per-date options are either
/// shared by every date or given once per date.
#[derive(Debug, Clone, PartialEq)]
pub struct McmcSettings {
    /// Shallowest modelled depth (cm).
    pub depth_min: f64,
    /// Deepest modelled depth (cm).
    pub depth_max: f64,
    /// Number of fixed-width depth segments.
    pub k: usize,
    /// Calibration curve per date.
    pub cc: PerSample<CurveName>,
    /// Reservoir offset.
    pub d_r: PerSample<f64>,
    /// Reservoir offset standard deviation.
    pub d_std: PerSample<f64>,
    pub t_a: PerSample<f64>,
    pub t_b: PerSample<f64>,
    /// Use a normal instead of a Student-t date error model.
    pub normal: bool,
    /// Calibrated densities at or below this value are dropped.
    pub cutoff: f64,
    /// Youngest allowed calendar age.
    pub minyr: f64,
    /// Oldest allowed calendar age.
    pub maxyr: f64,
    /// Initial guesses for the head age.
    pub th01: f64,
    pub th02: f64,
    /// Gamma prior on accumulation rate (yr/cm).
    pub acc_mean: f64,
    pub acc_shape: f64,
    /// Beta prior on memory.
    pub mem_strength: f64,
    pub mem_mean: f64,
}

impl Default for McmcSettings {
    fn default() -> Self {
        Self {
            depth_min: 1.5,
            depth_max: 99.5,
            k: 20,
            cc: PerSample::One(CurveName::IntCal13),
            d_r: PerSample::One(0.),
            d_std: PerSample::One(0.),
            t_a: PerSample::One(3.),
            t_b: PerSample::One(4.),
            normal: false,
            cutoff: DEFAULT_CUTOFF,
            minyr: -1000.,
            maxyr: 1e6,
            th01: 4147.,
            th02: 4145.,
            acc_mean: 20.,
            acc_shape: 1.5,
            mem_strength: 4.,
            mem_mean: 0.7,
        }
    }
}

impl McmcSettings {
    /// Check the configuration for a core with `n_dates` dates.
    pub fn validate(&self, n_dates: usize) -> Result<(), SettingsError> {
        if self.k < 2 {
            return Err(SettingsError::TooFewSegments(self.k));
        }
        if !(self.depth_max > self.depth_min) {
            return Err(SettingsError::DepthRange {
                min: self.depth_min,
                max: self.depth_max,
            });
        }
        if !(self.maxyr > self.minyr) {
            return Err(SettingsError::YearRange {
                min: self.minyr,
                max: self.maxyr,
            });
        }
        for (name, value) in [
            ("acc_mean", self.acc_mean),
            ("acc_shape", self.acc_shape),
            ("mem_strength", self.mem_strength),
        ] {
            if !(value > 0.) {
                return Err(SettingsError::NotPositive { name, value });
            }
        }
        if !(self.mem_mean > 0. && self.mem_mean < 1.) {
            return Err(SettingsError::MemoryMean(self.mem_mean));
        }

        self.cc.resolve(n_dates, "cc")?;
        self.d_r.resolve(n_dates, "d_r")?;
        self.d_std.resolve(n_dates, "d_std")?;
        let t_a = self.t_a.resolve(n_dates, "t_a")?;
        let t_b = self.t_b.resolve(n_dates, "t_b")?;
        for (&t_a, &t_b) in t_a.iter().zip(t_b.iter()) {
            check_student_t(t_a, t_b)?;
        }
        Ok(())
    }

    /// The `k` segment boundaries, evenly spaced over the depth range.
    pub fn depth_segments(&self) -> Vec<f64> {
        linspace(self.depth_min, self.depth_max, self.k)
    }

    /// Segment thickness (cm).
    pub fn thick(&self) -> f64 {
        (self.depth_max - self.depth_min) / self.k as f64
    }

    /// Gamma prior rate parameter for accumulation rates.
    pub fn acc_rate(&self) -> f64 {
        self.acc_shape / self.acc_mean
    }

    /// Beta prior `(alpha, beta)` for memory.
    pub fn mem_params(&self) -> (f64, f64) {
        (
            self.mem_strength * self.mem_mean,
            self.mem_strength * (1. - self.mem_mean),
        )
    }
}

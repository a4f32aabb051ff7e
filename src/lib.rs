//! Radiocarbon calibration and Bayesian age-depth modelling of sediment
//! cores.
//!
//! Dates are calibrated against a [`CalibCurve`], an [`EnsembleSampler`]
//! fits piecewise-constant accumulation rates to them, and
//! [`AgeDepthModel`] turns the sampled ensemble into ages at any depth,
//! which can then be attached to proxy measurements with
//! [`AgeDepthModel::date`].

pub(crate) mod age_depth;
pub(crate) mod calib_curve;
pub(crate) mod calibrate;
pub(crate) mod curves;
pub(crate) mod math;
pub(crate) mod mcmc;
pub(crate) mod records;
pub(crate) mod sampler;
pub(crate) mod settings;

pub use age_depth::{integrate_age, AgeDepthError, AgeDepthModel, DateHow, DEFAULT_BURNIN};
pub use calib_curve::{
    CalibCurve, CalibError, CalibratedDensity, CurvePoint, ErrorModel, DEFAULT_CUTOFF,
};
pub use calibrate::{calibrate_dates, CalibratedDates, CalibrationOptions, PerSample};
pub use curves::{read_14c, CurveLoader, CurveName, CurveRegistry};
pub use math::{arange, interp, linspace, median, percentile};
pub use mcmc::{EnsembleDraw, McmcError, McmcResults, RawEnsemble};
pub use records::{
    read_chron, read_proxy, ChronRecord, DatedAge, DatedProxyRecord, DatedSample, LongRow,
    ProxyRecord, RecordError,
};
pub use sampler::{read_bacon_output, EnsembleSampler, PriorDensity, PriorSampler, ReplaySampler};
pub use settings::{McmcSettings, SettingsError};

//! Age-depth reconstruction from a sampler ensemble.
//!
//! Each ensemble member describes the core as a head age plus a constant
//! accumulation rate (yr/cm) for each of `K` fixed-width depth segments.
//! The calendar age at a depth is the head age plus the rates integrated
//! from the core top down to that depth. Deposition is taken to be
//! continuous; there is no representation of a hiatus.

use faer::Mat;
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    calibrate::CalibratedDates,
    curves::CurveRegistry,
    math::{arange, percentile_of_sorted},
    mcmc::McmcResults,
    records::{ChronRecord, DatedAge, DatedProxyRecord, ProxyRecord, RecordError},
    sampler::{EnsembleSampler, PriorDensity},
    settings::McmcSettings,
};

/// Burn-in applied by [`AgeDepthModel::new`].
pub const DEFAULT_BURNIN: usize = 200;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AgeDepthError {
    #[error("the age-depth model needs to be fit first")]
    NeedsFit,
    #[error("depth {depth} lies above the top of the modelled core at {top}")]
    DepthAboveCore { depth: f64, top: f64 },
    #[error("the ensemble has no members")]
    EmptyEnsemble,
    #[error("the ensemble has no depth segments")]
    NoSegments,
    #[error("segment thickness must be positive and finite, got {0}")]
    Thickness(f64),
    #[error("percentile {0} is outside [0, 100]")]
    InvalidPercentile(f64),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Sampler(#[from] anyhow::Error),
}

/// Integrate accumulation rates from the core top at `c0` down to `d`.
///
/// `headage` holds one head age per ensemble member and `sediment_rate`
/// one series per segment, aligned with `headage`. Segments are `thick`
/// deep. Below the deepest segment the last segment's rate is continued
/// linearly; ages there are extrapolated and should be read with less
/// confidence. Returns one age per ensemble member.
pub fn integrate_age(
    headage: &[f64],
    sediment_rate: &[Vec<f64>],
    thick: f64,
    c0: f64,
    d: f64,
) -> Result<Vec<f64>, AgeDepthError> {
    if !(d >= c0) {
        return Err(AgeDepthError::DepthAboveCore { depth: d, top: c0 });
    }
    if !(thick > 0. && thick.is_finite()) {
        return Err(AgeDepthError::Thickness(thick));
    }
    let Some(last) = sediment_rate.len().checked_sub(1) else {
        return Err(AgeDepthError::NoSegments);
    };
    debug_assert!(sediment_rate.iter().all(|s| s.len() == headage.len()));

    let i = ((d - c0) / thick).floor() as usize;
    let mut age = headage.to_vec();

    let full = i.min(last + 1);
    for rates in &sediment_rate[..full] {
        for (age, &rate) in age.iter_mut().zip(rates) {
            *age += rate * thick;
        }
    }
    let beyond = (i - full) as f64;
    if beyond > 0. {
        for (age, &rate) in age.iter_mut().zip(&sediment_rate[last]) {
            *age += rate * thick * beyond;
        }
    }

    let ci = c0 + i as f64 * thick;
    debug_assert!(ci <= d + 1e-9 * thick);
    let partial = (d - ci).max(0.);
    for (age, &rate) in age.iter_mut().zip(&sediment_rate[i.min(last)]) {
        *age += rate * partial;
    }
    Ok(age)
}

/// How [`AgeDepthModel::date`] summarizes the ensemble at each depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateHow {
    /// The ensemble median.
    Median,
    /// `n` ensemble members drawn with replacement. The same members are
    /// used for every depth, which keeps the ages of one draw consistent
    /// down the core.
    Ensemble(usize),
}

#[derive(Debug)]
struct Fitted {
    mcmc: McmcResults,
    thick: f64,
    depth: Vec<f64>,
    age_ensemble: Mat<f64>,
}

/// Bayesian age-depth model of one core.
///
/// Created unfit; [`AgeDepthModel::fit`] runs the sampler and builds the
/// age ensemble on a 1 cm grid. Every derived quantity returns
/// [`AgeDepthError::NeedsFit`] until then.
#[derive(Debug)]
pub struct AgeDepthModel<S> {
    chron: ChronRecord,
    sampler: S,
    settings: McmcSettings,
    burnin: usize,
    fitted: Option<Fitted>,
}

impl<S: EnsembleSampler> AgeDepthModel<S> {
    pub fn new(chron: ChronRecord, sampler: S, settings: McmcSettings) -> Self {
        Self {
            chron,
            sampler,
            settings,
            burnin: DEFAULT_BURNIN,
            fitted: None,
        }
    }

    /// Set the number of leading iterations discarded on the next fit.
    pub fn with_burnin(mut self, burnin: usize) -> Self {
        self.burnin = burnin;
        self
    }

    pub fn chron(&self) -> &ChronRecord {
        &self.chron
    }

    pub fn settings(&self) -> &McmcSettings {
        &self.settings
    }

    pub fn burnin(&self) -> usize {
        self.burnin
    }

    pub fn is_fit(&self) -> bool {
        self.fitted.is_some()
    }

    /// Run the sampler, drop burn-in and compute the age ensemble.
    ///
    /// Fitting again replaces the previous result.
    pub fn fit(&mut self) -> Result<(), AgeDepthError> {
        let mut mcmc = McmcResults::from_sampler(&self.sampler, &self.chron, &self.settings)?;
        mcmc.burnin(self.burnin);

        let segments = mcmc.depth_segments();
        if segments.is_empty() {
            return Err(AgeDepthError::NoSegments);
        }
        let dmin = segments.iter().copied().fold(f64::INFINITY, f64::min);
        let dmax = segments.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let thick = (dmax - dmin) / segments.len() as f64;
        let depth = arange(dmin, dmax + 1., 1.);

        let rows = depth
            .par_iter()
            .map(|&d| integrate_age(mcmc.headage(), mcmc.sediment_rate(), thick, dmin, d))
            .collect::<Result<Vec<_>, _>>()?;
        let age_ensemble = Mat::from_fn(depth.len(), mcmc.n_members(), |i, j| rows[i][j]);

        if mcmc.n_members() == 0 {
            warn!("age-depth model fit with an empty ensemble");
        }
        info!(
            members = mcmc.n_members(),
            depths = depth.len(),
            thick,
            "age-depth model fit"
        );
        self.fitted = Some(Fitted {
            mcmc,
            thick,
            depth,
            age_ensemble,
        });
        Ok(())
    }

    fn fitted(&self) -> Result<&Fitted, AgeDepthError> {
        self.fitted.as_ref().ok_or(AgeDepthError::NeedsFit)
    }

    /// Sampler output retained after burn-in.
    pub fn mcmc_results(&self) -> Result<&McmcResults, AgeDepthError> {
        Ok(&self.fitted()?.mcmc)
    }

    /// Segment thickness (cm).
    pub fn thick(&self) -> Result<f64, AgeDepthError> {
        Ok(self.fitted()?.thick)
    }

    /// The 1 cm depth grid the age ensemble is evaluated on.
    pub fn depth(&self) -> Result<&[f64], AgeDepthError> {
        Ok(&self.fitted()?.depth)
    }

    /// Ages with one row per grid depth and one column per ensemble member.
    pub fn age_ensemble(&self) -> Result<&Mat<f64>, AgeDepthError> {
        let ensemble = &self.fitted()?.age_ensemble;
        if ensemble.ncols() == 0 {
            return Err(AgeDepthError::EmptyEnsemble);
        }
        Ok(ensemble)
    }

    /// Calendar age of every ensemble member at depth `d`.
    pub fn age_at_depth(&self, d: f64) -> Result<Vec<f64>, AgeDepthError> {
        let fitted = self.fitted()?;
        if fitted.mcmc.n_members() == 0 {
            return Err(AgeDepthError::EmptyEnsemble);
        }
        let c0 = fitted.depth.first().copied().ok_or(AgeDepthError::NoSegments)?;
        integrate_age(
            fitted.mcmc.headage(),
            fitted.mcmc.sediment_rate(),
            fitted.thick,
            c0,
            d,
        )
    }

    /// Ensemble median age at each grid depth.
    pub fn age_median(&self) -> Result<Vec<f64>, AgeDepthError> {
        self.age_percentile(50.)
    }

    /// Ensemble percentile `p` (0 to 100) of age at each grid depth.
    pub fn age_percentile(&self, p: f64) -> Result<Vec<f64>, AgeDepthError> {
        if !(0. ..=100.).contains(&p) {
            return Err(AgeDepthError::InvalidPercentile(p));
        }
        let ensemble = self.age_ensemble()?;
        Ok((0..ensemble.nrows())
            .map(|i| {
                let mut row: Vec<f64> = (0..ensemble.ncols()).map(|j| ensemble[(i, j)]).collect();
                row.sort_by(f64::total_cmp);
                percentile_of_sorted(&row, p)
            })
            .collect())
    }

    /// The 2.5 and 97.5 percentile envelopes.
    pub fn conf_interv(&self) -> Result<(Vec<f64>, Vec<f64>), AgeDepthError> {
        Ok((self.age_percentile(2.5)?, self.age_percentile(97.5)?))
    }

    /// Assign calendar ages to the samples of a proxy record.
    pub fn date<R: Rng + ?Sized>(
        &self,
        proxy: &ProxyRecord,
        how: DateHow,
        rng: &mut R,
    ) -> Result<DatedProxyRecord, AgeDepthError> {
        let fitted = self.fitted()?;
        let members = fitted.mcmc.n_members();
        if members == 0 {
            return Err(AgeDepthError::EmptyEnsemble);
        }
        let segments = fitted.mcmc.depth_segments();
        let bottom = segments.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let below = proxy.depth().iter().filter(|&&d| d > bottom).count();
        if below > 0 {
            warn!(
                samples = below,
                bottom, "proxy samples below the deepest segment use extrapolated ages"
            );
        }

        let selected: Option<Vec<usize>> = match how {
            DateHow::Median => None,
            DateHow::Ensemble(n) => Some((0..n).map(|_| rng.random_range(0..members)).collect()),
        };

        let ages = proxy
            .depth()
            .iter()
            .map(|&d| {
                let mut ages = self.age_at_depth(d)?;
                Ok(match &selected {
                    None => {
                        ages.sort_by(f64::total_cmp);
                        DatedAge::Median(percentile_of_sorted(&ages, 50.))
                    }
                    Some(idx) => DatedAge::Ensemble(idx.iter().map(|&i| ages[i]).collect()),
                })
            })
            .collect::<Result<Vec<_>, AgeDepthError>>()?;
        Ok(DatedProxyRecord::new(proxy.clone(), ages)?)
    }

    /// Calibrated date densities the sampler is configured with.
    pub fn prior_dates(&self, curves: &CurveRegistry) -> Result<CalibratedDates, AgeDepthError> {
        Ok(self
            .sampler
            .prior_dates(&self.chron, &self.settings, curves)?)
    }

    /// Prior density of the segment accumulation rate.
    pub fn prior_sediment_rate(&self) -> Result<PriorDensity, AgeDepthError> {
        Ok(self.sampler.prior_sediment_rate(&self.settings)?)
    }

    /// Prior density of the memory parameter.
    pub fn prior_sediment_memory(&self) -> Result<PriorDensity, AgeDepthError> {
        Ok(self.sampler.prior_sediment_memory(&self.settings)?)
    }
}

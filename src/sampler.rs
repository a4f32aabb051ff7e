//! The boundary to the ensemble sampler.
//!
//! The Markov chain sampler that fits accumulation rates to the dates is an
//! external collaborator. Anything that can produce aligned per-iteration
//! head ages, segment rates, memory and objective values implements
//! [`EnsembleSampler`]. The prior densities the sampler was configured with
//! are exposed through the same trait so that prior and posterior can be
//! compared side by side.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution, Gamma};
use statrs::distribution::{Beta as BetaDensity, Continuous, Gamma as GammaDensity};
use tracing::debug;

use crate::{
    calib_curve::CalibCurve,
    calibrate::{calibrate_dates, CalibratedDates, CalibrationOptions, PerSample},
    curves::{CurveName, CurveRegistry},
    math::linspace,
    mcmc::{EnsembleDraw, RawEnsemble},
    records::ChronRecord,
    settings::McmcSettings,
};

/// Number of grid points the prior densities are evaluated on.
const PRIOR_GRID_POINTS: usize = 100;

/// A prior density evaluated on a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorDensity {
    pub x: Vec<f64>,
    pub density: Vec<f64>,
}

/// Source of the posterior ensemble for one core.
pub trait EnsembleSampler {
    /// Run the sampler. Iterations must be returned in the order they were
    /// drawn, burn-in included.
    fn run(&self, chron: &ChronRecord, settings: &McmcSettings) -> Result<RawEnsemble>;

    /// Calibrated date densities the sampler uses as its date likelihood.
    fn prior_dates(
        &self,
        chron: &ChronRecord,
        settings: &McmcSettings,
        curves: &CurveRegistry,
    ) -> Result<CalibratedDates> {
        settings.validate(chron.len())?;
        let names = settings.cc.resolve(chron.len(), "cc")?;
        let mut loaded: HashMap<CurveName, Arc<CalibCurve>> = HashMap::new();
        for &name in names.iter().unique() {
            loaded.insert(name, curves.fetch(name)?);
        }
        let per_date: Vec<&CalibCurve> = names.iter().map(|name| loaded[name].as_ref()).collect();

        let options = CalibrationOptions {
            d_r: settings.d_r.clone(),
            d_std: settings.d_std.clone(),
            t_a: settings.t_a.clone(),
            t_b: settings.t_b.clone(),
            cutoff: PerSample::One(settings.cutoff),
            normal: PerSample::One(settings.normal),
        };
        Ok(calibrate_dates(chron, PerSample::Each(per_date), &options)?)
    }

    /// Gamma prior on accumulation rate, on `[0, 6 * acc_mean]`.
    fn prior_sediment_rate(&self, settings: &McmcSettings) -> Result<PriorDensity> {
        let dist = GammaDensity::new(settings.acc_shape, settings.acc_rate())
            .context("Invalid accumulation rate prior")?;
        let x = linspace(0., 6. * settings.acc_mean, PRIOR_GRID_POINTS);
        let density = x.iter().map(|&x| dist.pdf(x)).collect();
        Ok(PriorDensity { x, density })
    }

    /// Beta prior on memory, on `[0, 1]`.
    fn prior_sediment_memory(&self, settings: &McmcSettings) -> Result<PriorDensity> {
        let (alpha, beta) = settings.mem_params();
        let dist = BetaDensity::new(alpha, beta).context("Invalid memory prior")?;
        let x = linspace(0., 1., PRIOR_GRID_POINTS);
        let density = x.iter().map(|&x| dist.pdf(x)).collect();
        Ok(PriorDensity { x, density })
    }
}

impl<S: EnsembleSampler + ?Sized> EnsembleSampler for &S {
    fn run(&self, chron: &ChronRecord, settings: &McmcSettings) -> Result<RawEnsemble> {
        (**self).run(chron, settings)
    }

    fn prior_dates(
        &self,
        chron: &ChronRecord,
        settings: &McmcSettings,
        curves: &CurveRegistry,
    ) -> Result<CalibratedDates> {
        (**self).prior_dates(chron, settings, curves)
    }

    fn prior_sediment_rate(&self, settings: &McmcSettings) -> Result<PriorDensity> {
        (**self).prior_sediment_rate(settings)
    }

    fn prior_sediment_memory(&self, settings: &McmcSettings) -> Result<PriorDensity> {
        (**self).prior_sediment_memory(settings)
    }
}

/// Replays an ensemble produced elsewhere, for example by a Bacon run.
#[derive(Debug, Clone)]
pub struct ReplaySampler {
    ensemble: RawEnsemble,
}

impl ReplaySampler {
    pub fn new(ensemble: RawEnsemble) -> Self {
        Self { ensemble }
    }

    /// Load a Bacon `.out` file with `k` segments.
    pub fn from_bacon_output<P: AsRef<Path>>(path: P, k: usize) -> Result<Self> {
        Ok(Self::new(read_bacon_output(path, k)?))
    }
}

impl EnsembleSampler for ReplaySampler {
    fn run(&self, _chron: &ChronRecord, settings: &McmcSettings) -> Result<RawEnsemble> {
        if self.ensemble.n_segments() != settings.k {
            bail!(
                "Stored ensemble has {} segments but the settings ask for {}",
                self.ensemble.n_segments(),
                settings.k
            );
        }
        Ok(self.ensemble.clone())
    }
}

/// Read a Bacon `.out` file: one whitespace separated row per iteration
/// holding the head age, `k` accumulation rates, memory and objective.
pub fn read_bacon_output<P: AsRef<Path>>(path: P, k: usize) -> Result<RawEnsemble> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read sampler output {}", path.display()))?;
    parse_bacon_output(&text, k).with_context(|| format!("Invalid sampler output {}", path.display()))
}

pub(crate) fn parse_bacon_output(text: &str, k: usize) -> Result<RawEnsemble> {
    let width = k + 3;
    let draws = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(row, line)| {
            let values = line
                .split_whitespace()
                .map(|field| {
                    field
                        .parse::<f64>()
                        .with_context(|| format!("Could not parse '{}' on line {}", field, row + 1))
                })
                .collect::<Result<Vec<_>>>()?;
            if values.len() != width {
                bail!(
                    "Line {} has {} values, expected {}",
                    row + 1,
                    values.len(),
                    width
                );
            }
            Ok(EnsembleDraw {
                headage: values[0],
                sediment_rate: values[1..=k].to_vec(),
                sediment_memory: values[k + 1],
                objective: values[k + 2],
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RawEnsemble::from_draws(k, draws)?)
}

/// Draws ensembles from the prior alone.
///
/// Head ages are uniform between `th01` and `th02`, memory `R` follows the
/// beta prior and segment rates follow the autoregressive gamma prior,
/// built from the deepest segment upwards as
/// `x[j] = w * x[j + 1] + (1 - w) * alpha[j]` with `w = R^thick`.
/// The objective is the negative log prior density of the draw.
#[derive(Debug, Clone, Copy)]
pub struct PriorSampler {
    pub iterations: usize,
    pub seed: u64,
}

impl Default for PriorSampler {
    fn default() -> Self {
        Self {
            iterations: 2000,
            seed: 42,
        }
    }
}

impl EnsembleSampler for PriorSampler {
    fn run(&self, _chron: &ChronRecord, settings: &McmcSettings) -> Result<RawEnsemble> {
        if settings.k == 0 {
            bail!("The prior needs at least one depth segment");
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let alpha_dist = Gamma::new(settings.acc_shape, 1. / settings.acc_rate())
            .context("Invalid accumulation rate prior")?;
        let (mem_a, mem_b) = settings.mem_params();
        let memory_dist = Beta::new(mem_a, mem_b).context("Invalid memory prior")?;
        let alpha_density = GammaDensity::new(settings.acc_shape, settings.acc_rate())
            .context("Invalid accumulation rate prior")?;
        let memory_density = BetaDensity::new(mem_a, mem_b).context("Invalid memory prior")?;

        let (lo, hi) = if settings.th01 <= settings.th02 {
            (settings.th01, settings.th02)
        } else {
            (settings.th02, settings.th01)
        };
        let thick = settings.thick();
        let k = settings.k;

        debug!(iterations = self.iterations, segments = k, "drawing prior ensemble");
        let draws = (0..self.iterations).map(|_| {
            let headage = if lo == hi {
                lo
            } else {
                rng.random_range(lo..=hi)
            };
            let memory: f64 = memory_dist.sample(&mut rng);
            let w = memory.powf(thick);
            let alpha = (0..k).map(|_| alpha_dist.sample(&mut rng)).collect_vec();

            let mut rates = vec![0f64; k];
            rates[k - 1] = alpha[k - 1];
            for j in (0..k - 1).rev() {
                rates[j] = w * rates[j + 1] + (1. - w) * alpha[j];
            }

            let log_prior = memory_density.ln_pdf(memory)
                + alpha.iter().map(|&a| alpha_density.ln_pdf(a)).sum::<f64>();
            EnsembleDraw {
                headage,
                sediment_rate: rates,
                sediment_memory: memory,
                objective: -log_prior,
            }
        });
        Ok(RawEnsemble::from_draws(k, draws)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    struct NoRun;

    impl EnsembleSampler for NoRun {
        fn run(&self, _chron: &ChronRecord, _settings: &McmcSettings) -> Result<RawEnsemble> {
            bail!("not a real sampler")
        }
    }

    fn mean_std(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn sediment_rate_prior() {
        let prior = NoRun.prior_sediment_rate(&McmcSettings::default()).unwrap();
        assert_eq!(prior.x.len(), 100);
        assert_eq!(prior.x[99], 120.);
        let (mean, std) = mean_std(&prior.density);
        assert_abs_diff_eq!(mean, 0.008194080517375957, epsilon = 1e-3);
        assert_abs_diff_eq!(std, 0.01172658825323754, epsilon = 1e-3);
    }

    #[test]
    fn sediment_memory_prior() {
        let prior = NoRun.prior_sediment_memory(&McmcSettings::default()).unwrap();
        assert_eq!(prior.x.len(), 100);
        let (mean, std) = mean_std(&prior.density);
        assert_abs_diff_eq!(mean, 0.98457848264590286, epsilon = 1e-3);
        assert_abs_diff_eq!(std, 0.71613816177236256, epsilon = 1e-3);
    }

    #[test]
    fn prior_dates_uses_registry() {
        let mut curves = CurveRegistry::new();
        curves.register(CurveName::IntCal13, || Ok(CalibCurve::identity(0., 200., 1.)?));
        curves.register(CurveName::Marine13, || {
            Ok(CalibCurve::new(
                (0..201).map(f64::from).collect(),
                (0..201).map(|v| f64::from(v) - 30.).collect(),
                vec![0.; 201],
                None,
                None,
            )?)
        });
        let chron = ChronRecord::new(
            vec!["a".into(), "b".into()],
            vec![50., 50.],
            vec![1., 1.],
            vec![1.5, 9.5],
        )
        .unwrap();
        let settings = McmcSettings {
            cc: PerSample::Each(vec![CurveName::IntCal13, CurveName::Marine13]),
            ..Default::default()
        };
        let dates = NoRun.prior_dates(&chron, &settings, &curves).unwrap();
        assert_eq!(dates.depth, vec![1.5, 9.5]);
        assert_abs_diff_eq!(dates.densities[0].mean(), 50., epsilon = 0.5);
        assert_abs_diff_eq!(dates.densities[1].mean(), 80., epsilon = 0.5);

        let missing = McmcSettings {
            cc: PerSample::One(CurveName::SHCal13),
            ..Default::default()
        };
        assert!(NoRun.prior_dates(&chron, &missing, &curves).is_err());
    }

    #[test]
    fn parses_bacon_output() {
        let text = "4147.2 10.5 11.0 0.7 220.1\n\n4150.0 12.0 13.5 0.6 218.4\n";
        let ensemble = parse_bacon_output(text, 2).unwrap();
        assert_eq!(ensemble.n_iterations(), 2);
        assert_eq!(ensemble.n_segments(), 2);

        assert!(parse_bacon_output("1 2 3 4\n", 2).is_err());
        assert!(parse_bacon_output("1 2 x 4 5\n", 2).is_err());
    }

    #[test]
    fn replay_checks_segment_count() {
        let ensemble = parse_bacon_output("4147.2 10.5 11.0 0.7 220.1\n", 2).unwrap();
        let sampler = ReplaySampler::new(ensemble.clone());
        let chron = ChronRecord::default();
        let settings = McmcSettings {
            k: 2,
            ..Default::default()
        };
        assert_eq!(sampler.run(&chron, &settings).unwrap(), ensemble);
        assert!(sampler.run(&chron, &McmcSettings::default()).is_err());
    }

    #[test]
    fn prior_sampler_is_reproducible() {
        let settings = McmcSettings::default();
        let chron = ChronRecord::default();
        let sampler = PriorSampler {
            iterations: 500,
            seed: 7,
        };
        let first = sampler.run(&chron, &settings).unwrap();
        let second = sampler.run(&chron, &settings).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.n_iterations(), 500);
        assert_eq!(first.n_segments(), 20);

        let results =
            crate::mcmc::McmcResults::new(first, settings.depth_segments()).unwrap();
        assert!(results
            .headage()
            .iter()
            .all(|&theta| (4145. ..=4147.).contains(&theta)));
        assert!(results
            .sediment_rate()
            .iter()
            .flatten()
            .all(|&rate| rate > 0.));
        assert!(results
            .sediment_memory()
            .iter()
            .all(|&mem| (0. ..=1.).contains(&mem)));
        assert!(results.objective().iter().all(|obj| obj.is_finite()));

        let (mean_rate, _) = mean_std(&results.sediment_rate()[19]);
        assert!(mean_rate > 10. && mean_rate < 30., "mean rate {}", mean_rate);
    }
}

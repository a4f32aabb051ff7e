//! Sampler output and its post-processing.

use anyhow::Context;
use thiserror::Error;
use tracing::{info, warn};

use crate::{records::ChronRecord, sampler::EnsembleSampler, settings::McmcSettings};

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McmcError {
    #[error("series {series} has {found} iterations, expected {expected}")]
    Misaligned {
        series: String,
        expected: usize,
        found: usize,
    },
    #[error("ensemble has {found} rate series but the depth grid has {expected} segments")]
    SegmentCount { expected: usize, found: usize },
    #[error("an ensemble needs at least one depth segment")]
    NoSegments,
}

/// One sampler iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleDraw {
    pub headage: f64,
    /// Accumulation rate (yr/cm) of each depth segment, top down.
    pub sediment_rate: Vec<f64>,
    pub sediment_memory: f64,
    pub objective: f64,
}

/// Aligned per-iteration series returned by a sampler, in iteration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnsemble {
    headage: Vec<f64>,
    sediment_rate: Vec<Vec<f64>>,
    sediment_memory: Vec<f64>,
    objective: Vec<f64>,
}

fn check_aligned(series: &str, expected: usize, found: usize) -> Result<(), McmcError> {
    if expected != found {
        return Err(McmcError::Misaligned {
            series: series.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

impl RawEnsemble {
    /// `sediment_rate` holds one series per depth segment.
    pub fn new(
        headage: Vec<f64>,
        sediment_rate: Vec<Vec<f64>>,
        sediment_memory: Vec<f64>,
        objective: Vec<f64>,
    ) -> Result<Self, McmcError> {
        if sediment_rate.is_empty() {
            return Err(McmcError::NoSegments);
        }
        let n = objective.len();
        check_aligned("headage", n, headage.len())?;
        check_aligned("sediment_memory", n, sediment_memory.len())?;
        for (segment, rates) in sediment_rate.iter().enumerate() {
            check_aligned(&format!("sediment_rate[{}]", segment), n, rates.len())?;
        }
        Ok(Self {
            headage,
            sediment_rate,
            sediment_memory,
            objective,
        })
    }

    /// Collect draws with `k` segments each.
    pub fn from_draws<I>(k: usize, draws: I) -> Result<Self, McmcError>
    where
        I: IntoIterator<Item = EnsembleDraw>,
    {
        if k == 0 {
            return Err(McmcError::NoSegments);
        }
        let mut headage = Vec::new();
        let mut sediment_rate = vec![Vec::new(); k];
        let mut sediment_memory = Vec::new();
        let mut objective = Vec::new();
        for draw in draws {
            if draw.sediment_rate.len() != k {
                return Err(McmcError::SegmentCount {
                    expected: k,
                    found: draw.sediment_rate.len(),
                });
            }
            headage.push(draw.headage);
            for (series, rate) in sediment_rate.iter_mut().zip(draw.sediment_rate) {
                series.push(rate);
            }
            sediment_memory.push(draw.sediment_memory);
            objective.push(draw.objective);
        }
        Ok(Self {
            headage,
            sediment_rate,
            sediment_memory,
            objective,
        })
    }

    pub fn n_iterations(&self) -> usize {
        self.objective.len()
    }

    pub fn n_segments(&self) -> usize {
        self.sediment_rate.len()
    }
}

/// Retained sampler output for one core.
#[derive(Debug, Clone, PartialEq)]
pub struct McmcResults {
    headage: Vec<f64>,
    sediment_rate: Vec<Vec<f64>>,
    sediment_memory: Vec<f64>,
    objective: Vec<f64>,
    depth_segments: Vec<f64>,
}

impl McmcResults {
    pub fn new(ensemble: RawEnsemble, depth_segments: Vec<f64>) -> Result<Self, McmcError> {
        if ensemble.n_segments() != depth_segments.len() {
            return Err(McmcError::SegmentCount {
                expected: depth_segments.len(),
                found: ensemble.n_segments(),
            });
        }
        let RawEnsemble {
            headage,
            sediment_rate,
            sediment_memory,
            objective,
        } = ensemble;
        Ok(Self {
            headage,
            sediment_rate,
            sediment_memory,
            objective,
            depth_segments,
        })
    }

    /// Run `sampler` for `chron` and collect its output.
    pub fn from_sampler<S: EnsembleSampler + ?Sized>(
        sampler: &S,
        chron: &ChronRecord,
        settings: &McmcSettings,
    ) -> anyhow::Result<Self> {
        settings
            .validate(chron.len())
            .context("Invalid sampler settings")?;
        let ensemble = sampler
            .run(chron, settings)
            .context("Ensemble sampler failed")?;
        info!(
            iterations = ensemble.n_iterations(),
            segments = ensemble.n_segments(),
            "sampler run finished"
        );
        Ok(Self::new(ensemble, settings.depth_segments())?)
    }

    /// Drop the first `n` iterations from every series.
    ///
    /// Repeated calls accumulate. Dropping at least as many iterations as
    /// remain leaves an empty ensemble.
    pub fn burnin(&mut self, n: usize) {
        let n = n.min(self.n_members());
        self.headage.drain(..n);
        for series in self.sediment_rate.iter_mut() {
            series.drain(..n);
        }
        self.sediment_memory.drain(..n);
        self.objective.drain(..n);
        if self.objective.is_empty() {
            warn!(burnin = n, "burn-in removed every ensemble member");
        } else {
            info!(burnin = n, remaining = self.n_members(), "burn-in applied");
        }
    }

    /// Number of retained iterations.
    pub fn n_members(&self) -> usize {
        self.objective.len()
    }

    pub fn n_segments(&self) -> usize {
        self.sediment_rate.len()
    }

    pub fn headage(&self) -> &[f64] {
        &self.headage
    }

    /// One series per depth segment, top down.
    pub fn sediment_rate(&self) -> &[Vec<f64>] {
        &self.sediment_rate
    }

    pub fn sediment_memory(&self) -> &[f64] {
        &self.sediment_memory
    }

    pub fn objective(&self) -> &[f64] {
        &self.objective
    }

    /// Segment boundaries the rates refer to.
    pub fn depth_segments(&self) -> &[f64] {
        &self.depth_segments
    }

    pub fn draw(&self, member: usize) -> Option<EnsembleDraw> {
        if member >= self.n_members() {
            return None;
        }
        Some(EnsembleDraw {
            headage: self.headage[member],
            sediment_rate: self.sediment_rate.iter().map(|s| s[member]).collect(),
            sediment_memory: self.sediment_memory[member],
            objective: self.objective[member],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn results(n: usize) -> McmcResults {
        let draws = (0..n).map(|i| EnsembleDraw {
            headage: 4000. + i as f64,
            sediment_rate: vec![10. + i as f64, 20. + i as f64],
            sediment_memory: 0.5,
            objective: -(i as f64),
        });
        let ensemble = RawEnsemble::from_draws(2, draws).unwrap();
        McmcResults::new(ensemble, vec![0., 10.]).unwrap()
    }

    #[test]
    fn burnin_is_cumulative() {
        let mut results = results(300);
        assert_eq!(results.n_members(), 300);
        results.burnin(100);
        assert_eq!(results.n_members(), 200);
        results.burnin(50);
        assert_eq!(results.n_members(), 150);
        assert_eq!(results.headage()[0], 4150.);
        assert_eq!(results.sediment_rate()[0][0], 160.);
        assert_eq!(results.sediment_rate()[1][0], 170.);
        assert_eq!(results.objective()[0], -150.);
        assert_eq!(results.sediment_memory().len(), 150);
    }

    #[test]
    fn burnin_past_end_empties() {
        let mut results = results(10);
        results.burnin(25);
        assert_eq!(results.n_members(), 0);
        assert!(results.sediment_rate().iter().all(Vec::is_empty));
        assert_eq!(results.draw(0), None);
    }

    #[test]
    fn draws_round_trip() {
        let results = results(3);
        assert_eq!(
            results.draw(2),
            Some(EnsembleDraw {
                headage: 4002.,
                sediment_rate: vec![12., 22.],
                sediment_memory: 0.5,
                objective: -2.,
            })
        );
    }

    #[test]
    fn misaligned_series_are_rejected() {
        let err = RawEnsemble::new(
            vec![1., 2.],
            vec![vec![1., 2.], vec![1.]],
            vec![0.5, 0.5],
            vec![0., 0.],
        )
        .unwrap_err();
        assert_eq!(
            err,
            McmcError::Misaligned {
                series: "sediment_rate[1]".into(),
                expected: 2,
                found: 1
            }
        );

        let ensemble = RawEnsemble::new(vec![1.], vec![vec![1.]], vec![0.5], vec![0.]).unwrap();
        assert_eq!(
            McmcResults::new(ensemble, vec![0., 1.]).unwrap_err(),
            McmcError::SegmentCount {
                expected: 2,
                found: 1
            }
        );
    }
}

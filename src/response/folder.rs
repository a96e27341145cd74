//! Folding model flux into expected counts.
//!
//! For photon flux `f` per energy bin, effective area `A`, redistribution `M`
//! and exposure `t`:
//!
//! `μ = t · M · (A ⊙ f)`
//!
//! Binning consistency is checked once, when the folder is built; folding
//! itself only re-checks the flux length. Negative expected counts (possible
//! with negative-valued models) are passed through untouched: the statistic
//! decides how to penalize them.

use std::sync::Arc;

use crate::domain::Observation;
use crate::error::{FitError, Result};
use crate::response::{ChannelMap, Response};
use crate::stats::{BinnedBackground, BinnedSpectrum};

#[derive(Debug, Clone)]
pub struct ResponseFolder {
    response: Arc<Response>,
    observation: Arc<Observation>,
    channels: ChannelMap,
    background_counts: Option<Vec<f64>>,
}

impl ResponseFolder {
    pub fn new(response: Arc<Response>, observation: Arc<Observation>) -> Result<Self> {
        if response.n_channels() != observation.n_channels() {
            return Err(FitError::shape(
                "response channels vs observed channels",
                response.n_channels(),
                observation.n_channels(),
            ));
        }
        let channels = ChannelMap::new(
            observation.n_channels(),
            observation.grouping(),
            observation.quality(),
        );
        let background_counts = observation.background().map(|b| {
            let scale = b.scale_for(observation.exposure());
            b.counts().iter().map(|c| c * scale).collect()
        });
        Ok(ResponseFolder {
            response,
            observation,
            channels,
            background_counts,
        })
    }

    /// Check that a model grid matches the response's photon energy bins.
    pub fn check_grid(&self, model_edges: &[f64]) -> Result<()> {
        let edges = self.response.energy_edges();
        if model_edges.len() != edges.len() {
            return Err(FitError::shape("model energy edges", edges.len(), model_edges.len()));
        }
        if let Some(i) = model_edges
            .iter()
            .zip(edges)
            .position(|(a, b)| (a - b).abs() > 1e-9 * b.abs().max(1.0))
        {
            return Err(FitError::InvalidConfig(format!(
                "model energy edge {i} ({}) differs from response edge ({})",
                model_edges[i], edges[i]
            )));
        }
        Ok(())
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    pub fn energy_edges(&self) -> &[f64] {
        self.response.energy_edges()
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.channels
    }

    /// Expected source counts per (ungrouped) channel.
    pub fn fold(&self, flux: &[f64]) -> Result<Vec<f64>> {
        let exposure = self.observation.exposure();
        let mut counts = self.response.apply(flux)?;
        for c in counts.iter_mut() {
            *c *= exposure;
        }
        Ok(counts)
    }

    /// Expected source counts plus the scaled observed background.
    pub fn fold_with_background(&self, flux: &[f64]) -> Result<Vec<f64>> {
        let mut counts = self.fold(flux)?;
        if let Some(bkg) = &self.background_counts {
            for (c, b) in counts.iter_mut().zip(bkg) {
                *c += b;
            }
        }
        Ok(counts)
    }

    /// Apply grouping and the quality mask.
    pub fn reduce(&self, per_channel: &[f64]) -> Vec<f64> {
        self.channels.reduce(per_channel)
    }

    /// Grouped, masked observed data as consumed by the statistic.
    pub fn binned_spectrum(&self) -> BinnedSpectrum {
        let obs = &self.observation;
        let background = obs.background().map(|b| {
            let errors = b.errors().map(|e| self.channels.reduce_errors(e));
            BinnedBackground {
                counts: self.channels.reduce(b.counts()),
                errors,
                scale: b.scale_for(obs.exposure()),
            }
        });
        BinnedSpectrum {
            counts: self.channels.reduce(obs.counts()),
            errors: obs.errors().map(|e| self.channels.reduce_errors(e)),
            background,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Background;
    use crate::math::log_edges;
    use crate::models::Component;
    use crate::response::ChannelGrouping;

    fn identity_folder(counts: Vec<f64>, exposure: f64) -> (ResponseFolder, Vec<f64>, Vec<f64>) {
        let edges = log_edges(0.5, 10.0, 20);
        let area: Vec<f64> = (0..20).map(|i| 100.0 + 5.0 * i as f64).collect();
        let response = Arc::new(Response::diagonal(edges.clone(), area.clone()).unwrap());
        let obs = Arc::new(Observation::new(counts, exposure).unwrap());
        (ResponseFolder::new(response, obs).unwrap(), edges, area)
    }

    #[test]
    fn identity_fold_is_flux_times_area_times_exposure() {
        let (folder, edges, area) = identity_folder(vec![0.0; 20], 1000.0);
        let model = Component::power_law().compile().unwrap();
        let flux = model.evaluate(&edges, &[1.7, 0.02]).unwrap();
        let counts = folder.fold(&flux).unwrap();
        for i in 0..20 {
            assert_eq!(counts[i], flux[i] * area[i] * 1000.0, "channel {i}");
        }
    }

    #[test]
    fn zero_flux_folds_to_background_only() {
        let edges = log_edges(1.0, 5.0, 4);
        let response = Arc::new(Response::diagonal(edges, vec![1.0; 4]).unwrap());
        let bkg = Background::new(vec![2.0, 4.0, 0.0, 8.0], 2000.0, 0.5).unwrap();
        let obs = Observation::new(vec![1.0; 4], 1000.0)
            .unwrap()
            .with_background(bkg)
            .unwrap();
        let folder = ResponseFolder::new(response, Arc::new(obs)).unwrap();

        assert_eq!(folder.fold(&[0.0; 4]).unwrap(), vec![0.0; 4]);
        assert_eq!(folder.fold_with_background(&[0.0; 4]).unwrap(), vec![0.5, 1.0, 0.0, 2.0]);
    }

    #[test]
    fn channel_count_mismatch_fails_fast() {
        let edges = log_edges(1.0, 5.0, 4);
        let response = Arc::new(Response::diagonal(edges, vec![1.0; 4]).unwrap());
        let obs = Arc::new(Observation::new(vec![1.0; 5], 10.0).unwrap());
        let err = ResponseFolder::new(response, obs).unwrap_err();
        assert!(matches!(err, FitError::ShapeMismatch { expected: 4, found: 5, .. }));
    }

    #[test]
    fn grouping_reduces_model_and_data_alike() {
        let edges = log_edges(1.0, 5.0, 4);
        let response = Arc::new(Response::diagonal(edges, vec![1.0; 4]).unwrap());
        let grouping = ChannelGrouping::from_flags(&[1, -1, 1, -1]).unwrap();
        let obs = Observation::new(vec![1.0, 2.0, 3.0, 4.0], 1.0)
            .unwrap()
            .with_grouping(grouping)
            .unwrap();
        let folder = ResponseFolder::new(response, Arc::new(obs)).unwrap();
        let model = folder.reduce(&folder.fold(&[1.0, 1.0, 1.0, 1.0]).unwrap());
        assert_eq!(model, vec![2.0, 2.0]);
        assert_eq!(folder.binned_spectrum().counts, vec![3.0, 7.0]);
    }

    #[test]
    fn mismatched_model_grid_is_rejected() {
        let (folder, edges, _) = identity_folder(vec![0.0; 20], 1.0);
        assert!(folder.check_grid(&edges).is_ok());
        assert!(folder.check_grid(&edges[1..]).is_err());
    }
}

//! Observed spectra.
//!
//! An [`Observation`] is built once and never mutated afterwards. Builders
//! validate each piece as it is attached:
//!
//! - counts and errors are finite and non-negative, one per channel
//! - exposures are strictly positive
//! - background, grouping and quality mask cover the same channels

use crate::error::{FitError, Result};
use crate::response::ChannelGrouping;

/// Background spectrum measured in a separate region or observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    counts: Vec<f64>,
    exposure: f64,
    errors: Option<Vec<f64>>,
    area_ratio: f64,
}

impl Background {
    /// `area_ratio` is the source-to-background extraction area ratio
    /// (`BACKSCAL_src / BACKSCAL_bkg`).
    pub fn new(counts: Vec<f64>, exposure: f64, area_ratio: f64) -> Result<Self> {
        check_values("background counts", &counts)?;
        check_positive("background exposure", exposure)?;
        check_positive("background area ratio", area_ratio)?;
        Ok(Background {
            counts,
            exposure,
            errors: None,
            area_ratio,
        })
    }

    pub fn with_errors(mut self, errors: Vec<f64>) -> Result<Self> {
        check_len("background errors", self.counts.len(), errors.len())?;
        check_values("background errors", &errors)?;
        self.errors = Some(errors);
        Ok(self)
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn errors(&self) -> Option<&[f64]> {
        self.errors.as_deref()
    }

    pub fn area_ratio(&self) -> f64 {
        self.area_ratio
    }

    /// Factor turning background counts into expected counts in the source
    /// region: `(t_src / t_bkg) · area_ratio`.
    pub fn scale_for(&self, source_exposure: f64) -> f64 {
        source_exposure / self.exposure * self.area_ratio
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    counts: Vec<f64>,
    exposure: f64,
    errors: Option<Vec<f64>>,
    background: Option<Background>,
    grouping: Option<ChannelGrouping>,
    quality: Option<Vec<bool>>,
}

impl Observation {
    pub fn new(counts: Vec<f64>, exposure: f64) -> Result<Self> {
        if counts.is_empty() {
            return Err(FitError::InvalidConfig("observation has no channels".into()));
        }
        check_values("counts", &counts)?;
        check_positive("exposure", exposure)?;
        Ok(Observation {
            counts,
            exposure,
            errors: None,
            background: None,
            grouping: None,
            quality: None,
        })
    }

    /// Statistical errors per channel (used by χ²).
    pub fn with_errors(mut self, errors: Vec<f64>) -> Result<Self> {
        check_len("errors", self.counts.len(), errors.len())?;
        check_values("errors", &errors)?;
        self.errors = Some(errors);
        Ok(self)
    }

    pub fn with_background(mut self, background: Background) -> Result<Self> {
        check_len("background channels", self.counts.len(), background.counts.len())?;
        self.background = Some(background);
        Ok(self)
    }

    pub fn with_grouping(mut self, grouping: ChannelGrouping) -> Result<Self> {
        check_len("grouping channels", self.counts.len(), grouping.n_channels())?;
        self.grouping = Some(grouping);
        Ok(self)
    }

    /// Per-channel quality (`true` = good). Bad channels are excluded from
    /// the fit.
    pub fn with_quality(mut self, good: Vec<bool>) -> Result<Self> {
        check_len("quality mask", self.counts.len(), good.len())?;
        if !good.iter().any(|&g| g) {
            return Err(FitError::InvalidConfig("quality mask excludes every channel".into()));
        }
        self.quality = Some(good);
        Ok(self)
    }

    pub fn n_channels(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn errors(&self) -> Option<&[f64]> {
        self.errors.as_deref()
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    pub fn grouping(&self) -> Option<&ChannelGrouping> {
        self.grouping.as_ref()
    }

    pub fn quality(&self) -> Option<&[bool]> {
        self.quality.as_deref()
    }

    pub fn total_counts(&self) -> f64 {
        self.counts.iter().sum()
    }
}

fn check_values(what: &str, values: &[f64]) -> Result<()> {
    if let Some((i, v)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(FitError::InvalidConfig(format!(
            "{what}[{i}] = {v}: values must be finite and non-negative"
        )));
    }
    Ok(())
}

fn check_positive(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FitError::InvalidConfig(format!("{what} must be > 0, got {value}")))
    }
}

fn check_len(what: &str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(FitError::shape(what, expected, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_counts_and_bad_exposure() {
        assert!(Observation::new(vec![1.0, -1.0], 10.0).is_err());
        assert!(Observation::new(vec![1.0, 2.0], 0.0).is_err());
        assert!(Observation::new(vec![], 1.0).is_err());
    }

    #[test]
    fn attachments_must_cover_all_channels() {
        let obs = Observation::new(vec![1.0, 2.0, 3.0], 100.0).unwrap();
        let bkg = Background::new(vec![0.0, 1.0], 200.0, 1.0).unwrap();
        let err = obs.clone().with_background(bkg).unwrap_err();
        assert!(matches!(err, FitError::ShapeMismatch { expected: 3, found: 2, .. }), "{err}");
        assert!(obs.with_quality(vec![false, false, false]).is_err());
    }

    #[test]
    fn background_scale_combines_exposure_and_area() {
        let bkg = Background::new(vec![4.0], 2000.0, 0.25).unwrap();
        assert!((bkg.scale_for(1000.0) - 0.125).abs() < 1e-15);
    }
}

//! Channel grouping.
//!
//! Groups are contiguous channel ranges whose counts are summed before the
//! statistic is computed. The same reduction is applied to model counts,
//! observed counts and background, so binning never changes the model.

use std::ops::Range;

use crate::error::{FitError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGrouping {
    groups: Vec<Range<usize>>,
    n_channels: usize,
}

impl ChannelGrouping {
    /// One group per channel.
    pub fn identity(n_channels: usize) -> Self {
        ChannelGrouping {
            groups: (0..n_channels).map(|i| i..i + 1).collect(),
            n_channels,
        }
    }

    /// From OGIP-style flags: `1` starts a new group, `-1` continues the
    /// current one. `0` (no grouping information) is treated as a start.
    pub fn from_flags(flags: &[i8]) -> Result<Self> {
        let mut groups: Vec<Range<usize>> = Vec::new();
        for (i, &flag) in flags.iter().enumerate() {
            match flag {
                -1 => match groups.last_mut() {
                    Some(last) => last.end = i + 1,
                    None => {
                        return Err(FitError::InvalidConfig(
                            "grouping flags must not start with a continuation (-1)".into(),
                        ));
                    }
                },
                0 | 1 => groups.push(i..i + 1),
                other => {
                    return Err(FitError::InvalidConfig(format!(
                        "invalid grouping flag {other} at channel {i}"
                    )));
                }
            }
        }
        Ok(ChannelGrouping {
            groups,
            n_channels: flags.len(),
        })
    }

    /// Group contiguous channels until each group holds at least `min_counts`.
    ///
    /// A trailing remainder below the threshold is merged into the previous
    /// group.
    pub fn min_counts(counts: &[f64], min_counts: f64) -> Self {
        let mut groups: Vec<Range<usize>> = Vec::new();
        let mut start = 0;
        let mut acc = 0.0;
        for (i, &c) in counts.iter().enumerate() {
            acc += c;
            if acc >= min_counts {
                groups.push(start..i + 1);
                start = i + 1;
                acc = 0.0;
            }
        }
        if start < counts.len() {
            match groups.last_mut() {
                Some(last) => last.end = counts.len(),
                None => groups.push(0..counts.len()),
            }
        }
        ChannelGrouping {
            groups,
            n_channels: counts.len(),
        }
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }
}

/// Grouping combined with a quality mask: for each retained bin, the good
/// channels it sums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    bins: Vec<Vec<usize>>,
    n_channels: usize,
}

impl ChannelMap {
    pub fn new(n_channels: usize, grouping: Option<&ChannelGrouping>, good: Option<&[bool]>) -> Self {
        let identity;
        let grouping = match grouping {
            Some(g) => g,
            None => {
                identity = ChannelGrouping::identity(n_channels);
                &identity
            }
        };
        let is_good = |c: usize| good.map(|g| g[c]).unwrap_or(true);
        let bins = grouping
            .groups()
            .iter()
            .map(|r| r.clone().filter(|&c| is_good(c)).collect::<Vec<_>>())
            .filter(|b| !b.is_empty())
            .collect();
        ChannelMap { bins, n_channels }
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Sum per-channel values into bins.
    pub fn reduce(&self, per_channel: &[f64]) -> Vec<f64> {
        self.bins
            .iter()
            .map(|b| b.iter().map(|&c| per_channel[c]).sum())
            .collect()
    }

    /// Combine per-channel errors in quadrature.
    pub fn reduce_errors(&self, errors: &[f64]) -> Vec<f64> {
        self.bins
            .iter()
            .map(|b| b.iter().map(|&c| errors[c] * errors[c]).sum::<f64>().sqrt())
            .collect()
    }
}

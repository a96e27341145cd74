//! External parameter layout of a compiled model.
//!
//! The layout fixes, once per compiled model:
//!
//! - the resolved parameter order: every distinct parameter of the model, with
//!   link inputs placed before the linked parameter so a single forward pass
//!   resolves all values
//! - the external (free) vector: the non-frozen, non-linked parameters, in
//!   pre-order of the components that carry them, followed by free link
//!   inputs that belong to no component
//! - a label per parameter, `<component label>.<param name>`
//!
//! Optimizers and samplers only ever see the free vector; `resolve` expands it
//! into the full value list that component evaluation consumes.

use std::collections::HashMap;

use crate::error::{FitError, Result};
use crate::models::Component;
use crate::params::{Param, ParamId};

#[derive(Debug, Clone)]
pub struct ParameterLayout {
    params: Vec<Param>,
    labels: Vec<String>,
    free: Vec<usize>,
    /// Free-vector slot of each resolved parameter.
    slot: Vec<Option<usize>>,
    index: HashMap<ParamId, usize>,
}

impl ParameterLayout {
    /// Build the layout for labelled components in pre-order.
    pub fn build(components: &[(String, Component)]) -> Self {
        let mut preferred: HashMap<ParamId, String> = HashMap::new();
        for (label, comp) in components {
            for p in comp.params() {
                preferred
                    .entry(p.id())
                    .or_insert_with(|| format!("{label}.{}", p.name()));
            }
        }

        let mut layout = ParameterLayout {
            params: Vec::new(),
            labels: Vec::new(),
            free: Vec::new(),
            slot: Vec::new(),
            index: HashMap::new(),
        };
        let mut used: HashMap<String, usize> = HashMap::new();
        for (_, comp) in components {
            for p in comp.params() {
                layout.insert(p, &preferred, &mut used);
            }
        }

        // Resolve order puts link inputs first; the free vector keeps
        // component pre-order instead.
        let component_order = components
            .iter()
            .flat_map(|(_, comp)| comp.params())
            .filter_map(|p| layout.index.get(&p.id()).copied());
        let mut slot = vec![None; layout.params.len()];
        let mut free = Vec::new();
        for i in component_order.chain(0..layout.params.len()) {
            if layout.params[i].is_free() && slot[i].is_none() {
                slot[i] = Some(free.len());
                free.push(i);
            }
        }
        layout.free = free;
        layout.slot = slot;
        layout
    }

    fn insert(
        &mut self,
        p: &Param,
        preferred: &HashMap<ParamId, String>,
        used: &mut HashMap<String, usize>,
    ) {
        if self.index.contains_key(&p.id()) {
            return;
        }
        if let Some(link) = p.link() {
            for input in link.references() {
                self.insert(&input, preferred, used);
            }
        }
        let base = preferred
            .get(&p.id())
            .cloned()
            .unwrap_or_else(|| p.name().to_string());
        let count = used.entry(base.clone()).or_insert(0);
        *count += 1;
        let label = if *count == 1 {
            base
        } else {
            format!("{base}_{count}")
        };
        self.index.insert(p.id(), self.params.len());
        self.params.push(p.clone());
        self.labels.push(label);
    }

    /// Number of resolved parameters (free, frozen and linked).
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Dimension of the external parameter vector.
    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn free_params(&self) -> impl Iterator<Item = &Param> + '_ {
        self.free.iter().map(|&i| &self.params[i])
    }

    pub fn free_labels(&self) -> Vec<String> {
        self.free.iter().map(|&i| self.labels[i].clone()).collect()
    }

    pub fn free_bounds(&self) -> Vec<(f64, f64)> {
        self.free_params().map(Param::bounds).collect()
    }

    /// Position of `p` in the resolved value list.
    pub fn position(&self, p: &Param) -> Option<usize> {
        self.index.get(&p.id()).copied()
    }

    /// Defaults of the free parameters.
    pub fn initial_vector(&self) -> Vec<f64> {
        self.free_params().map(Param::default_value).collect()
    }

    /// Expand a free vector into values for every parameter in layout order.
    pub fn resolve(&self, theta: &[f64]) -> Result<Vec<f64>> {
        self.check_len(theta)?;
        let mut values = Vec::with_capacity(self.params.len());
        for (p, slot) in self.params.iter().zip(&self.slot) {
            let v = if let Some(link) = p.link() {
                link.eval(&|input: &Param| {
                    self.position(input)
                        .and_then(|i| values.get(i).copied())
                        .unwrap_or(f64::NAN)
                })
            } else {
                match slot {
                    Some(k) => theta[*k],
                    None => p.default_value(),
                }
            };
            values.push(v);
        }
        Ok(values)
    }

    /// Extract the free vector from resolved values (inverse of `resolve`).
    pub fn flatten(&self, resolved: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| resolved[i]).collect()
    }

    /// Free-vector index of the parameter labelled `label`.
    pub fn free_index(&self, label: &str) -> Result<usize> {
        self.free
            .iter()
            .position(|&i| self.labels[i] == label)
            .ok_or_else(|| {
                FitError::InvalidModel(format!(
                    "no free parameter '{label}' (free parameters: {:?})",
                    self.free_labels()
                ))
            })
    }

    /// Sum of the free parameters' log prior densities.
    pub fn ln_prior(&self, theta: &[f64]) -> f64 {
        self.free_params()
            .zip(theta)
            .map(|(p, &x)| p.ln_prior(x))
            .sum()
    }

    /// Map a point of the unit hypercube to a free vector.
    pub fn prior_transform(&self, u: &[f64]) -> Vec<f64> {
        self.free_params()
            .zip(u)
            .map(|(p, &ui)| p.prior_transform(ui))
            .collect()
    }

    /// Whether every free parameter has a proper prior (required by samplers).
    pub fn check_proper_priors(&self) -> Result<()> {
        for (p, label) in self.free_params().zip(self.free_labels()) {
            if !p.prior().is_proper(p.bounds()) {
                return Err(FitError::InvalidConfig(format!(
                    "parameter '{label}' has an improper prior; sampling needs finite bounds"
                )));
            }
        }
        Ok(())
    }

    fn check_len(&self, theta: &[f64]) -> Result<()> {
        if theta.len() != self.free.len() {
            return Err(FitError::ParameterCountMismatch {
                expected: self.free.len(),
                found: theta.len(),
            });
        }
        Ok(())
    }
}

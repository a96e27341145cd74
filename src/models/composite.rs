//! Composite models.
//!
//! Models are built with ordinary operators and compiled once before use:
//!
//! ```ignore
//! let model = Component::power_law_abs() * (Component::power_law() + Component::gaussian());
//! let compiled = model.compile()?;
//! let flux = compiled.evaluate(&edges, &compiled.initial_vector())?;
//! ```
//!
//! Operand rules:
//! - `a + b` requires both operands additive
//! - `a * b` rejects `additive * additive`; the product is additive if either
//!   operand is
//! - a convolution component is applied with `kernel.apply(model)` and may not
//!   appear as a bare operand
//! - each additive component is normalized by at most one `PhotonFlux`
//!
//! Building the tree never fails; [`Model::compile`] validates it and fixes the
//! parameter layout, component labels and display name.

use std::collections::{HashMap, HashSet};
use std::ops::{Add, Mul};

use crate::error::{FitError, Result};
use crate::math::is_valid_grid;
use crate::models::{Component, ComponentId, ComponentKind, ParameterLayout};

#[derive(Debug, Clone)]
pub enum Model {
    Component(Component),
    Add(Box<Model>, Box<Model>),
    Mul(Box<Model>, Box<Model>),
    Convolve { kernel: Component, inner: Box<Model> },
}

impl From<Component> for Model {
    fn from(c: Component) -> Self {
        Model::Component(c)
    }
}

impl Component {
    /// Compile a single-component model.
    pub fn compile(&self) -> Result<CompiledModel> {
        Model::Component(self.clone()).compile()
    }
}

impl<R: Into<Model>> Add<R> for Model {
    type Output = Model;
    fn add(self, rhs: R) -> Model {
        Model::Add(Box::new(self), Box::new(rhs.into()))
    }
}

impl<R: Into<Model>> Add<R> for Component {
    type Output = Model;
    fn add(self, rhs: R) -> Model {
        Model::Add(Box::new(self.into()), Box::new(rhs.into()))
    }
}

impl<R: Into<Model>> Mul<R> for Model {
    type Output = Model;
    fn mul(self, rhs: R) -> Model {
        Model::Mul(Box::new(self), Box::new(rhs.into()))
    }
}

impl<R: Into<Model>> Mul<R> for Component {
    type Output = Model;
    fn mul(self, rhs: R) -> Model {
        Model::Mul(Box::new(self.into()), Box::new(rhs.into()))
    }
}

impl Model {
    /// Kind of the (validated) expression.
    pub fn kind(&self) -> Result<ComponentKind> {
        match self {
            Model::Component(c) => match c.kind() {
                ComponentKind::Convolution => Err(FitError::InvalidModel(format!(
                    "convolution component {} must be applied to a model",
                    c.name()
                ))),
                kind => Ok(kind),
            },
            Model::Add(a, b) => {
                let (ka, kb) = (a.kind()?, b.kind()?);
                if ka == ComponentKind::Additive && kb == ComponentKind::Additive {
                    Ok(ComponentKind::Additive)
                } else {
                    Err(FitError::InvalidModel(format!(
                        "'+' needs additive operands, got {ka:?} + {kb:?}"
                    )))
                }
            }
            Model::Mul(a, b) => {
                let (ka, kb) = (a.kind()?, b.kind()?);
                match (ka, kb) {
                    (ComponentKind::Additive, ComponentKind::Additive) => Err(
                        FitError::InvalidModel("additive * additive is not allowed".into()),
                    ),
                    (ComponentKind::Additive, _) | (_, ComponentKind::Additive) => {
                        Ok(ComponentKind::Additive)
                    }
                    _ => Ok(ComponentKind::Multiplicative),
                }
            }
            Model::Convolve { kernel, inner } => {
                let inner_kind = inner.kind()?;
                if kernel.kind() != ComponentKind::Convolution {
                    return Err(FitError::InvalidModel(format!(
                        "{} is not a convolution component",
                        kernel.name()
                    )));
                }
                if matches!(kernel.shape(), crate::models::Shape::PhotonFlux { .. })
                    && inner_kind != ComponentKind::Additive
                {
                    return Err(FitError::InvalidModel(
                        "PhotonFlux must be applied to an additive model".into(),
                    ));
                }
                Ok(inner_kind)
            }
        }
    }

    /// Validate the tree and fix its parameter layout.
    pub fn compile(&self) -> Result<CompiledModel> {
        let kind = self.kind()?;
        self.check_photon_flux(&mut HashSet::new())?;

        let mut seen: HashMap<ComponentId, usize> = HashMap::new();
        let mut ordered: Vec<Component> = Vec::new();
        let root = self.lower(&mut seen, &mut ordered);

        let mut name_counts: HashMap<String, usize> = HashMap::new();
        let labelled: Vec<(String, Component)> = ordered
            .into_iter()
            .map(|c| {
                let n = name_counts.entry(c.name().to_string()).or_insert(0);
                *n += 1;
                let label = if *n == 1 {
                    c.name().to_string()
                } else {
                    format!("{}_{n}", c.name())
                };
                (label, c)
            })
            .collect();

        let layout = ParameterLayout::build(&labelled);
        let mut components = Vec::with_capacity(labelled.len());
        for (label, component) in labelled {
            let slots = component
                .params()
                .iter()
                .map(|p| {
                    layout.position(p).ok_or_else(|| {
                        FitError::InvalidModel(format!("parameter {} missing from layout", p.name()))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            components.push(CompiledComponent {
                component,
                label,
                slots,
            });
        }

        let name = display_name(&root, &components);
        tracing::debug!(model = %name, n_free = layout.n_free(), "compiled model");
        Ok(CompiledModel {
            name,
            kind,
            root,
            components,
            layout,
        })
    }

    /// Reject a component reached by more than one photon-flux normalization.
    fn check_photon_flux(&self, normed: &mut HashSet<ComponentId>) -> Result<()> {
        match self {
            Model::Component(_) => Ok(()),
            Model::Add(a, b) | Model::Mul(a, b) => {
                a.check_photon_flux(normed)?;
                b.check_photon_flux(normed)
            }
            Model::Convolve { kernel, inner } => {
                inner.check_photon_flux(normed)?;
                if !matches!(kernel.shape(), crate::models::Shape::PhotonFlux { .. }) {
                    return Ok(());
                }
                let mut leaves = Vec::new();
                inner.additive_leaves(&mut leaves);
                let mut here = HashSet::new();
                for c in leaves {
                    if here.insert(c.id()) && !normed.insert(c.id()) {
                        return Err(FitError::InvalidModel(format!(
                            "{} is normalized by PhotonFlux more than once",
                            c.name()
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn additive_leaves<'a>(&'a self, out: &mut Vec<&'a Component>) {
        match self {
            Model::Component(c) => {
                if c.kind() == ComponentKind::Additive {
                    out.push(c);
                }
            }
            Model::Add(a, b) | Model::Mul(a, b) => {
                a.additive_leaves(out);
                b.additive_leaves(out);
            }
            Model::Convolve { inner, .. } => inner.additive_leaves(out),
        }
    }

    fn lower(&self, seen: &mut HashMap<ComponentId, usize>, ordered: &mut Vec<Component>) -> Node {
        match self {
            Model::Component(c) => Node::Leaf(slot(c, seen, ordered)),
            Model::Convolve { kernel, inner } => {
                let k = slot(kernel, seen, ordered);
                Node::Convolve(k, Box::new(inner.lower(seen, ordered)))
            }
            Model::Add(a, b) => {
                let left = a.lower(seen, ordered);
                Node::Add(Box::new(left), Box::new(b.lower(seen, ordered)))
            }
            Model::Mul(a, b) => {
                let left = a.lower(seen, ordered);
                Node::Mul(Box::new(left), Box::new(b.lower(seen, ordered)))
            }
        }
    }
}

/// Index of `c` among the distinct components, registering it on first sight.
fn slot(c: &Component, seen: &mut HashMap<ComponentId, usize>, ordered: &mut Vec<Component>) -> usize {
    *seen.entry(c.id()).or_insert_with(|| {
        ordered.push(c.clone());
        ordered.len() - 1
    })
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(usize),
    Add(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Convolve(usize, Box<Node>),
}

#[derive(Debug, Clone)]
struct CompiledComponent {
    component: Component,
    label: String,
    slots: Vec<usize>,
}

/// A validated model with a fixed parameter layout.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    name: String,
    kind: ComponentKind,
    root: Node,
    components: Vec<CompiledComponent>,
    layout: ParameterLayout,
}

impl CompiledModel {
    /// Display name, e.g. `PowerLawAbs * (PowerLaw + PowerLaw_2)`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn n_free(&self) -> usize {
        self.layout.n_free()
    }

    /// Labels of the free parameters, in external-vector order.
    pub fn param_names(&self) -> Vec<String> {
        self.layout.free_labels()
    }

    pub fn initial_vector(&self) -> Vec<f64> {
        self.layout.initial_vector()
    }

    /// All parameter values (free, frozen and linked) in layout order.
    pub fn resolve(&self, theta: &[f64]) -> Result<Vec<f64>> {
        self.layout.resolve(theta)
    }

    /// `(label, value)` for every parameter of the model.
    pub fn named_values(&self, theta: &[f64]) -> Result<Vec<(String, f64)>> {
        let resolved = self.layout.resolve(theta)?;
        Ok(self
            .layout
            .labels()
            .iter()
            .cloned()
            .zip(resolved)
            .collect())
    }

    /// Flux per bin on `edges` for the free vector `theta`.
    pub fn evaluate(&self, edges: &[f64], theta: &[f64]) -> Result<Vec<f64>> {
        if !is_valid_grid(edges) {
            return Err(FitError::InvalidConfig(
                "energy grid must hold at least two finite, strictly increasing edges".into(),
            ));
        }
        let resolved = self.layout.resolve(theta)?;
        self.eval_node(&self.root, edges, &resolved)
    }

    fn eval_node(&self, node: &Node, edges: &[f64], resolved: &[f64]) -> Result<Vec<f64>> {
        let n = edges.len() - 1;
        let out = match node {
            Node::Leaf(i) => {
                let c = &self.components[*i];
                c.component.evaluate(edges, &self.values(c, resolved))
            }
            Node::Add(a, b) => {
                let x = self.eval_node(a, edges, resolved)?;
                let y = self.eval_node(b, edges, resolved)?;
                combine(x, &y, "sum operand", |l, r| l + r)?
            }
            Node::Mul(a, b) => {
                let x = self.eval_node(a, edges, resolved)?;
                let y = self.eval_node(b, edges, resolved)?;
                combine(x, &y, "product operand", |l, r| l * r)?
            }
            Node::Convolve(k, inner) => {
                let c = &self.components[*k];
                let eval_inner = |grid: &[f64]| self.eval_node(inner, grid, resolved);
                c.component
                    .shape()
                    .convolve(edges, &self.values(c, resolved), &eval_inner)?
            }
        };
        if out.len() != n {
            return Err(FitError::shape("component output", n, out.len()));
        }
        Ok(out)
    }

    fn values(&self, c: &CompiledComponent, resolved: &[f64]) -> Vec<f64> {
        c.slots.iter().map(|&s| resolved[s]).collect()
    }
}

fn combine(mut x: Vec<f64>, y: &[f64], context: &str, op: impl Fn(f64, f64) -> f64) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(FitError::shape(context, x.len(), y.len()));
    }
    for (l, &r) in x.iter_mut().zip(y) {
        *l = op(*l, r);
    }
    Ok(x)
}

fn display_name(node: &Node, components: &[CompiledComponent]) -> String {
    match node {
        Node::Leaf(i) => components[*i].label.clone(),
        Node::Add(a, b) => format!(
            "{} + {}",
            display_name(a, components),
            display_name(b, components)
        ),
        Node::Mul(a, b) => format!(
            "{} * {}",
            factor_name(a, components),
            factor_name(b, components)
        ),
        Node::Convolve(k, inner) => {
            format!("{}({})", components[*k].label, display_name(inner, components))
        }
    }
}

fn factor_name(node: &Node, components: &[CompiledComponent]) -> String {
    match node {
        Node::Add(..) => format!("({})", display_name(node, components)),
        _ => display_name(node, components),
    }
}

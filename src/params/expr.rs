//! Deterministic parameter links.
//!
//! `ParamExpr` is a small arithmetic tree over parameters and constants, built
//! with the usual operators:
//!
//! ```ignore
//! let k2 = Param::linked("K2", 0.5 * &k1);
//! let e2 = Param::linked("E2", &e1 + 1.2);
//! ```
//!
//! A link can only reference parameters that already exist, so links always
//! form a DAG.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use crate::params::Param;

#[derive(Debug, Clone)]
pub enum ParamExpr {
    Ref(Param),
    Const(f64),
    Add(Box<ParamExpr>, Box<ParamExpr>),
    Sub(Box<ParamExpr>, Box<ParamExpr>),
    Mul(Box<ParamExpr>, Box<ParamExpr>),
    Div(Box<ParamExpr>, Box<ParamExpr>),
}

impl ParamExpr {
    /// Evaluate with `value_of` supplying the value of every referenced
    /// parameter.
    pub fn eval<F: Fn(&Param) -> f64>(&self, value_of: &F) -> f64 {
        match self {
            ParamExpr::Ref(p) => value_of(p),
            ParamExpr::Const(c) => *c,
            ParamExpr::Add(a, b) => a.eval(value_of) + b.eval(value_of),
            ParamExpr::Sub(a, b) => a.eval(value_of) - b.eval(value_of),
            ParamExpr::Mul(a, b) => a.eval(value_of) * b.eval(value_of),
            ParamExpr::Div(a, b) => a.eval(value_of) / b.eval(value_of),
        }
    }

    /// Referenced parameters, left to right (may contain repeats).
    pub fn references(&self) -> Vec<Param> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<Param>) {
        match self {
            ParamExpr::Ref(p) => out.push(p.clone()),
            ParamExpr::Const(_) => {}
            ParamExpr::Add(a, b)
            | ParamExpr::Sub(a, b)
            | ParamExpr::Mul(a, b)
            | ParamExpr::Div(a, b) => {
                a.collect(out);
                b.collect(out);
            }
        }
    }
}

impl fmt::Display for ParamExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamExpr::Ref(p) => write!(f, "{}", p.name()),
            ParamExpr::Const(c) => write!(f, "{c}"),
            ParamExpr::Add(a, b) => write!(f, "({a} + {b})"),
            ParamExpr::Sub(a, b) => write!(f, "({a} - {b})"),
            ParamExpr::Mul(a, b) => write!(f, "{a} * {b}"),
            ParamExpr::Div(a, b) => write!(f, "{a} / {b}"),
        }
    }
}

impl From<Param> for ParamExpr {
    fn from(p: Param) -> Self {
        ParamExpr::Ref(p)
    }
}

impl From<&Param> for ParamExpr {
    fn from(p: &Param) -> Self {
        ParamExpr::Ref(p.clone())
    }
}

impl From<f64> for ParamExpr {
    fn from(c: f64) -> Self {
        ParamExpr::Const(c)
    }
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<ParamExpr>> $trait<R> for ParamExpr {
            type Output = ParamExpr;
            fn $method(self, rhs: R) -> ParamExpr {
                ParamExpr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }

        impl<R: Into<ParamExpr>> $trait<R> for &Param {
            type Output = ParamExpr;
            fn $method(self, rhs: R) -> ParamExpr {
                ParamExpr::$variant(Box::new(self.into()), Box::new(rhs.into()))
            }
        }

        impl $trait<&Param> for f64 {
            type Output = ParamExpr;
            fn $method(self, rhs: &Param) -> ParamExpr {
                ParamExpr::$variant(Box::new(self.into()), Box::new(rhs.into()))
            }
        }
    };
}

expr_binop!(Add, add, Add);
expr_binop!(Sub, sub, Sub);
expr_binop!(Mul, mul, Mul);
expr_binop!(Div, div, Div);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_build_and_evaluate() {
        let a = Param::new("a", 2.0, (0.0, 10.0)).unwrap();
        let b = Param::new("b", 4.0, (0.0, 10.0)).unwrap();
        let expr = (&a + &b) * 0.5 - 1.0;
        let v = expr.eval(&|p: &Param| p.default_value());
        assert_eq!(v, 2.0);

        let ratio = 3.0 * &a / &b;
        assert_eq!(ratio.eval(&|p: &Param| p.default_value()), 1.5);
    }

    #[test]
    fn references_are_listed_in_order() {
        let a = Param::new("a", 1.0, (0.0, 10.0)).unwrap();
        let b = Param::new("b", 1.0, (0.0, 10.0)).unwrap();
        let refs = (&b * &a + &b).references();
        let names: Vec<&str> = refs.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["b", "a", "b"]);
    }

    #[test]
    fn display_is_readable() {
        let a = Param::new("kT", 1.0, (0.1, 10.0)).unwrap();
        assert_eq!((&a + 1.0).to_string(), "(kT + 1)");
    }
}

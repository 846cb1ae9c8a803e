//! Derived parameter algebra.
//!
//! Composition functions build a new `Parameter` whose read hook applies a
//! forward transform to a source cell, and whose write hook applies the
//! inverse, so setting the derived cell sets the source consistently. The
//! forward/inverse pairs live in one explicit table (`ScalarOp`) so each law
//! is testable on its own.
//!
//! Combining two live cells (`combine`) has no canonical inverse, so the
//! result is a read-only measurement.

use crate::error::{Error, Result};
use crate::parameter::{Bounds, Kind, Parameter};

/// A transform of one cell by a scalar constant `k`. Every variant is
/// invertible for the constants `transform` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    /// y = x + k
    Add,
    /// y = x - k
    SubConst,
    /// y = k - x
    ConstSub,
    /// y = k * x
    Mul,
    /// y = x / k
    DivConst,
    /// y = k / x
    ConstDiv,
    /// y = x^k
    Pow,
}

impl ScalarOp {
    pub fn forward(self, x: f64, k: f64) -> f64 {
        match self {
            ScalarOp::Add => x + k,
            ScalarOp::SubConst => x - k,
            ScalarOp::ConstSub => k - x,
            ScalarOp::Mul => k * x,
            ScalarOp::DivConst => x / k,
            ScalarOp::ConstDiv => k / x,
            ScalarOp::Pow => x.powf(k),
        }
    }

    /// Solve `forward(x, k) = y` for x.
    pub fn inverse(self, y: f64, k: f64) -> f64 {
        match self {
            ScalarOp::Add => y - k,
            ScalarOp::SubConst => y + k,
            ScalarOp::ConstSub => k - y,
            ScalarOp::Mul => y / k,
            ScalarOp::DivConst => y * k,
            ScalarOp::ConstDiv => k / y,
            ScalarOp::Pow => (y.ln() / k).exp(),
        }
    }

    /// Human-readable composite name for diagnostics and wire messages.
    pub fn label(self, name: &str, k: f64) -> String {
        match self {
            ScalarOp::Add => format!("{name}+{k}"),
            ScalarOp::SubConst => format!("{name}-{k}"),
            ScalarOp::ConstSub => format!("{k}-{name}"),
            ScalarOp::Mul => format!("{k}*{name}"),
            ScalarOp::DivConst => format!("{name}/{k}"),
            ScalarOp::ConstDiv => format!("{k}/{name}"),
            ScalarOp::Pow => format!("{name}^{k}"),
        }
    }

    /// Whether the forward transform flips the ordering of an interval,
    /// in which case the derived bounds swap low and high.
    fn order_reversing(self, k: f64) -> bool {
        match self {
            ScalarOp::Add | ScalarOp::SubConst => false,
            ScalarOp::ConstSub | ScalarOp::ConstDiv => true,
            ScalarOp::Mul | ScalarOp::DivConst | ScalarOp::Pow => k < 0.0,
        }
    }

    /// Ops that lose invertibility at k = 0.
    fn requires_nonzero(self) -> bool {
        matches!(
            self,
            ScalarOp::Mul | ScalarOp::DivConst | ScalarOp::ConstDiv | ScalarOp::Pow
        )
    }
}

/// Pointwise combination of two live cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

/// Derive `-x`. Writing the result negates back into the source.
pub fn negate(p: &Parameter) -> Parameter {
    let name = format!("-{}", p.name());
    let src_read = p.clone();
    let src_write = p.clone();
    Parameter::builder(&name)
        .kind(p.kind())
        .bounds(p.bounds().map(|x| -x).swapped())
        .read_hook(move || src_read.read().map(|x| -x))
        .write_hook(move |y| src_write.write(-y))
        .build()
}

/// Derive a new cell from `p` under `op` with constant `k`.
///
/// The derived cell's bounds are the image of the source bounds under the
/// forward transform (sides swapped for order-reversing ops). Its write
/// path routes the inverse through the source's own `write`, so source
/// bounds, hooks, and callbacks still apply.
///
/// Fails with `InvalidOperand` for a non-finite constant, or for a zero
/// constant under an op that cannot invert it. No cell is created on
/// failure.
pub fn transform(p: &Parameter, op: ScalarOp, k: f64) -> Result<Parameter> {
    if !k.is_finite() {
        return Err(Error::InvalidOperand(format!(
            "constant {k} is not a finite scalar"
        )));
    }
    if op.requires_nonzero() && k == 0.0 {
        return Err(Error::InvalidOperand(format!(
            "{op:?} with constant 0 has no inverse"
        )));
    }
    let name = op.label(&p.name(), k);
    let mapped = p.bounds().map(|x| op.forward(x, k));
    let bounds = if op.order_reversing(k) {
        mapped.swapped()
    } else {
        mapped
    };
    let src_read = p.clone();
    let src_write = p.clone();
    Ok(Parameter::builder(&name)
        .kind(p.kind())
        .bounds(bounds)
        .read_hook(move || src_read.read().map(|x| op.forward(x, k)))
        .write_hook(move |y| src_write.write(op.inverse(y, k)))
        .build())
}

/// `k * p`.
pub fn scale(p: &Parameter, k: f64) -> Result<Parameter> {
    transform(p, ScalarOp::Mul, k)
}

/// `p + k`.
pub fn offset(p: &Parameter, k: f64) -> Result<Parameter> {
    transform(p, ScalarOp::Add, k)
}

/// `p ^ n`.
pub fn power(p: &Parameter, n: f64) -> Result<Parameter> {
    transform(p, ScalarOp::Pow, n)
}

/// Combine two live cells. No joint inverse exists when both operands can
/// vary, so the result is a read-only measurement with unconstrained
/// bounds; every write fails with `ReadOnly`.
pub fn combine(a: &Parameter, b: &Parameter, op: BinaryOp) -> Parameter {
    let name = format!("{}{}{}", a.name(), op.symbol(), b.name());
    let lhs = a.clone();
    let rhs = b.clone();
    Parameter::builder(&name)
        .kind(Kind::Measurement)
        .bounds(Bounds::unconstrained())
        .read_hook(move || Ok(op.apply(lhs.read()?, rhs.read()?)))
        .build()
}

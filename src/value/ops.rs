//! Arithmetic, comparison, and reduction operations over [`Value`] (§4.1).

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::{Distribution, Scalar, ScalarKind, Value, ValueContext, VirtualKind};
use crate::error::{JoshResult, ValueError};
use crate::units::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Neq,
    Gt,
    Gteq,
    Lt,
    Lteq,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Abs,
    Log10,
    Ln,
    Ceil,
    Floor,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    Std,
    Min,
    Max,
    Count,
}

fn numeric_binop(op: BinOp, a: Decimal, b: Decimal) -> JoshResult<Decimal> {
    Ok(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => {
            let base = a.to_f64().ok_or_else(|| ValueError::NumericConversion(a.to_string()))?;
            let exp = b.to_f64().ok_or_else(|| ValueError::NumericConversion(b.to_string()))?;
            Decimal::from_f64_retain(base.powf(exp)).ok_or_else(|| ValueError::NumericConversion("pow".into()))?
        }
        _ => unreachable!("comparison/logical ops handled separately"),
    })
}

fn comparison(op: BinOp, a: Decimal, b: Decimal) -> bool {
    match op {
        BinOp::Eq => a == b,
        BinOp::Neq => a != b,
        BinOp::Gt => a > b,
        BinOp::Gteq => a >= b,
        BinOp::Lt => a < b,
        BinOp::Lteq => a <= b,
        _ => unreachable!(),
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(op, BinOp::Eq | BinOp::Neq | BinOp::Gt | BinOp::Gteq | BinOp::Lt | BinOp::Lteq)
}

fn is_logical(op: BinOp) -> bool {
    matches!(op, BinOp::And | BinOp::Or | BinOp::Xor)
}

fn logical(op: BinOp, a: bool, b: bool) -> bool {
    match op {
        BinOp::And => a && b,
        BinOp::Or => a || b,
        BinOp::Xor => a ^ b,
        _ => unreachable!(),
    }
}

/// Converts `rhs` into `lhs`'s units (§4.1: "cross-unit arithmetic triggers
/// conversion on the right operand to the left's units").
fn align_units(lhs: &Scalar, rhs: &Scalar, ctx: &ValueContext) -> JoshResult<Decimal> {
    if lhs.unit.is_empty() || rhs.unit.is_empty() || lhs.unit == rhs.unit {
        return rhs.as_decimal();
    }
    ctx.graph.convert(&rhs.unit, &lhs.unit, rhs.as_decimal()?).map_err(|_| {
        ValueError::UnitMismatch {
            lhs: lhs.unit.to_string(),
            rhs: rhs.unit.to_string(),
        }
        .into()
    })
}

fn scalar_binop(op: BinOp, lhs: &Scalar, rhs: &Scalar, ctx: &ValueContext) -> JoshResult<Scalar> {
    if is_logical(op) {
        return Ok(Scalar::boolean(logical(op, lhs.as_bool()?, rhs.as_bool()?)));
    }
    let rhs_value = align_units(lhs, rhs, ctx)?;
    let lhs_value = lhs.as_decimal()?;
    if is_comparison(op) {
        return Ok(Scalar::boolean(comparison(op, lhs_value, rhs_value)));
    }
    let result = numeric_binop(op, lhs_value, rhs_value)?;
    Ok(Scalar::decimal(result, lhs.unit.clone()))
}

/// Closed-form affine transforms of a virtual distribution by a scalar,
/// used when the op is linear (add/sub/mul/div); everything else falls back
/// to materializing the distribution at the configured sample size.
fn affine_virtual(op: BinOp, kind: &VirtualKind, c: Decimal) -> Option<VirtualKind> {
    match (op, kind) {
        (BinOp::Add, VirtualKind::Uniform { lo, hi }) => Some(VirtualKind::Uniform { lo: lo + c, hi: hi + c }),
        (BinOp::Add, VirtualKind::Normal { mean, std }) => Some(VirtualKind::Normal { mean: mean + c, std: *std }),
        (BinOp::Sub, VirtualKind::Uniform { lo, hi }) => Some(VirtualKind::Uniform { lo: lo - c, hi: hi - c }),
        (BinOp::Sub, VirtualKind::Normal { mean, std }) => Some(VirtualKind::Normal { mean: mean - c, std: *std }),
        (BinOp::Mul, VirtualKind::Uniform { lo, hi }) if c >= Decimal::ZERO => {
            Some(VirtualKind::Uniform { lo: lo * c, hi: hi * c })
        }
        (BinOp::Mul, VirtualKind::Normal { mean, std }) => Some(VirtualKind::Normal {
            mean: mean * c,
            std: (std * c).abs(),
        }),
        (BinOp::Div, VirtualKind::Uniform { lo, hi }) if c != Decimal::ZERO && c > Decimal::ZERO => {
            Some(VirtualKind::Uniform { lo: lo / c, hi: hi / c })
        }
        (BinOp::Div, VirtualKind::Normal { mean, std }) if c != Decimal::ZERO => Some(VirtualKind::Normal {
            mean: mean / c,
            std: (std / c).abs(),
        }),
        _ => None,
    }
}

fn distribution_scalar_binop(
    op: BinOp,
    dist: &Distribution,
    scalar: &Scalar,
    dist_is_lhs: bool,
    ctx: &mut ValueContext,
) -> JoshResult<Distribution> {
    match dist {
        Distribution::Virtual { kind, unit } => {
            if dist_is_lhs {
                if let Some(c) = scalar_unit_adjusted(unit, scalar, ctx)? {
                    if let Some(new_kind) = affine_virtual(op, kind, c) {
                        return Ok(Distribution::Virtual { kind: new_kind, unit: unit.clone() });
                    }
                }
            }
            // Fall back: materialize, then combine elementwise.
            let values = dist.to_realized(ctx.sample_size, &mut *ctx.rng.borrow_mut())?;
            let realized = Distribution::Realized { values, unit: unit.clone() };
            distribution_scalar_binop(op, &realized, scalar, dist_is_lhs, ctx)
        }
        Distribution::Realized { values, unit } => {
            let out = values
                .iter()
                .map(|v| {
                    if dist_is_lhs {
                        scalar_binop(op, v, scalar, ctx)
                    } else {
                        scalar_binop(op, scalar, v, ctx)
                    }
                })
                .collect::<JoshResult<Vec<_>>>()?;
            let unit = out.first().map(|s| s.unit.clone()).unwrap_or_else(|| unit.clone());
            Ok(Distribution::Realized { values: out, unit })
        }
    }
}

fn scalar_unit_adjusted(unit: &Unit, scalar: &Scalar, ctx: &ValueContext) -> JoshResult<Option<Decimal>> {
    if scalar.unit.is_empty() || unit.is_empty() || &scalar.unit == unit {
        return Ok(Some(scalar.as_decimal()?));
    }
    match ctx.graph.convert(&scalar.unit, unit, scalar.as_decimal()?) {
        Ok(v) => Ok(Some(v)),
        Err(_) => Ok(None),
    }
}

fn distribution_binop(op: BinOp, a: &Distribution, b: &Distribution, ctx: &mut ValueContext) -> JoshResult<Distribution> {
    let a_values = a.to_realized(ctx.sample_size, &mut *ctx.rng.borrow_mut())?;
    let b_values = match (a.len_if_realized(), b.len_if_realized()) {
        (Some(n), None) => b.sample(n, true, &mut *ctx.rng.borrow_mut())?,
        _ => b.to_realized(a_values.len().max(ctx.sample_size), &mut *ctx.rng.borrow_mut())?,
    };
    if a_values.len() != b_values.len() {
        return Err(ValueError::SizeMismatch {
            a: a_values.len(),
            b: b_values.len(),
        }
        .into());
    }
    let out = a_values
        .iter()
        .zip(b_values.iter())
        .map(|(x, y)| scalar_binop(op, x, y, ctx))
        .collect::<JoshResult<Vec<_>>>()?;
    let unit = out.first().map(|s| s.unit.clone()).unwrap_or_else(|| a.unit().clone());
    Ok(Distribution::Realized { values: out, unit })
}

impl Value {
    pub fn binary_op(&self, op: BinOp, other: &Value, ctx: &mut ValueContext) -> JoshResult<Value> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(scalar_binop(op, a, b, ctx)?)),
            (Value::Distribution(d), Value::Scalar(s)) => {
                Ok(Value::Distribution(distribution_scalar_binop(op, d, s, true, ctx)?))
            }
            (Value::Scalar(s), Value::Distribution(d)) => {
                Ok(Value::Distribution(distribution_scalar_binop(op, d, s, false, ctx)?))
            }
            (Value::Distribution(a), Value::Distribution(b)) => Ok(Value::Distribution(distribution_binop(op, a, b, ctx)?)),
            (a, b) => Err(ValueError::TypeMismatch {
                expected: "scalar or distribution".into(),
                found: format!("{} / {}", a.type_name(), b.type_name()),
            }
            .into()),
        }
    }

    pub fn unary_op(&self, op: UnaryOp) -> JoshResult<Value> {
        match self {
            Value::Scalar(s) => Ok(Value::Scalar(scalar_unary(op, s)?)),
            Value::Distribution(Distribution::Realized { values, unit }) => {
                let out = values.iter().map(|v| scalar_unary(op, v)).collect::<JoshResult<Vec<_>>>()?;
                Ok(Value::Distribution(Distribution::Realized { values: out, unit: unit.clone() }))
            }
            other => Err(ValueError::TypeMismatch {
                expected: "scalar or realized distribution".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }

    pub fn reduce(&self, reduction: Reduction, ctx: &mut ValueContext) -> JoshResult<Value> {
        if let Value::EntityRefs(refs) = self {
            return match reduction {
                Reduction::Count => Ok(Value::Scalar(Scalar::count(refs.len() as i64))),
                _ => Err(ValueError::TypeMismatch {
                    expected: "distribution".into(),
                    found: "entity_refs".into(),
                }
                .into()),
            };
        }
        let dist = self.as_distribution()?;
        let values = dist.to_realized(ctx.sample_size, &mut *ctx.rng.borrow_mut())?;
        if values.is_empty() && !matches!(reduction, Reduction::Count) {
            return Err(ValueError::EmptyReduction.into());
        }
        let unit = dist.unit().clone();
        if let Reduction::Count = reduction {
            return Ok(Value::Scalar(Scalar::count(values.len() as i64)));
        }
        let decs = values.iter().map(|s| s.as_decimal()).collect::<JoshResult<Vec<_>>>()?;
        let n = Decimal::from(decs.len() as i64);
        let result = match reduction {
            Reduction::Sum => decs.iter().sum(),
            Reduction::Mean => decs.iter().sum::<Decimal>() / n,
            Reduction::Min => *decs.iter().min().expect("checked non-empty above"),
            Reduction::Max => *decs.iter().max().expect("checked non-empty above"),
            Reduction::Std => {
                if decs.len() < 2 {
                    return Err(ValueError::SampleSize {
                        requested: 2,
                        available: decs.len(),
                    }
                    .into());
                }
                let mean = decs.iter().sum::<Decimal>() / n;
                let sq_sum: Decimal = decs.iter().map(|v| (*v - mean) * (*v - mean)).sum();
                let variance = sq_sum / (n - Decimal::ONE);
                let variance_f = variance.to_f64().ok_or_else(|| ValueError::NumericConversion(variance.to_string()))?;
                Decimal::from_f64_retain(variance_f.sqrt()).ok_or_else(|| ValueError::NumericConversion("std".into()))?
            }
            Reduction::Count => unreachable!(),
        };
        Ok(Value::Scalar(Scalar::decimal(result, unit)))
    }
}

fn scalar_unary(op: UnaryOp, s: &Scalar) -> JoshResult<Scalar> {
    let v = s.as_decimal()?;
    let result = match op {
        UnaryOp::Abs => v.abs(),
        UnaryOp::Ceil => v.ceil(),
        UnaryOp::Floor => v.floor(),
        UnaryOp::Round => v.round(),
        UnaryOp::Log10 => {
            let f = v.to_f64().ok_or_else(|| ValueError::NumericConversion(v.to_string()))?;
            Decimal::from_f64_retain(f.log10()).ok_or_else(|| ValueError::NumericConversion("log10".into()))?
        }
        UnaryOp::Ln => {
            let f = v.to_f64().ok_or_else(|| ValueError::NumericConversion(v.to_string()))?;
            Decimal::from_f64_retain(f.ln()).ok_or_else(|| ValueError::NumericConversion("ln".into()))?
        }
    };
    Ok(Scalar::decimal(result, s.unit.clone()))
}

impl ScalarKind {
    pub(crate) fn is_numeric(&self) -> bool {
        matches!(self, ScalarKind::Decimal(_) | ScalarKind::Int(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ConversionGraph;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;
    use std::cell::RefCell;

    fn ctx<'a>(graph: &'a ConversionGraph, rng: &'a RefCell<StdRng>) -> ValueContext<'a> {
        ValueContext {
            graph,
            rng,
            sample_size: 100,
        }
    }

    #[test]
    fn unit_mismatch_without_conversion_path_errors() {
        let graph = ConversionGraph::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        let mut c = ctx(&graph, &rng);
        let a = Value::Scalar(Scalar::decimal(dec!(1), Unit::base("m")));
        let b = Value::Scalar(Scalar::decimal(dec!(1), Unit::base("s")));
        assert!(a.binary_op(BinOp::Add, &b, &mut c).is_err());
    }

    #[test]
    fn add_preserves_lhs_units() {
        let graph = ConversionGraph::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        let mut c = ctx(&graph, &rng);
        let a = Value::Scalar(Scalar::decimal(dec!(1), Unit::base("year")));
        let b = Value::Scalar(Scalar::decimal(dec!(1), Unit::base("year")));
        let sum = a.binary_op(BinOp::Add, &b, &mut c).unwrap();
        assert_eq!(sum, Value::Scalar(Scalar::decimal(dec!(2), Unit::base("year"))));
    }

    #[test]
    fn mean_of_nine_scalars() {
        let graph = ConversionGraph::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        let mut c = ctx(&graph, &rng);
        let values = (0..9).map(|i| Scalar::decimal(Decimal::from(i), Unit::base("m"))).collect();
        let dist = Value::Distribution(Distribution::realized(values, Unit::base("m")));
        let sum = dist.reduce(Reduction::Sum, &mut c).unwrap();
        assert_eq!(sum, Value::Scalar(Scalar::decimal(dec!(36), Unit::base("m"))));
    }
}

//! Value engine (C1): scalars with units, realized/virtual distributions,
//! arithmetic broadcast, reductions, sampling and the `map` family.

use std::cell::RefCell;

use rand::Rng;
use rand_distr::Distribution as _;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{JoshResult, ValueError};
use crate::units::{ConversionGraph, Unit};

mod map;
mod ops;

pub use map::MapMethod;
pub use ops::{BinOp, Reduction, UnaryOp};

/// The scalar payload: decimal, integer, boolean, or string.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarKind {
    Decimal(Decimal),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl ScalarKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarKind::Decimal(_) => "decimal",
            ScalarKind::Int(_) => "int",
            ScalarKind::Bool(_) => "bool",
            ScalarKind::Str(_) => "str",
        }
    }

    fn as_decimal(&self) -> JoshResult<Decimal> {
        match self {
            ScalarKind::Decimal(d) => Ok(*d),
            ScalarKind::Int(i) => Ok(Decimal::from(*i)),
            other => Err(ValueError::TypeMismatch {
                expected: "numeric".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }
}

/// A numeric/boolean/string value tagged with units (§3 invariant (a): every
/// scalar carries units, even counts and booleans).
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub unit: Unit,
}

impl Scalar {
    pub fn decimal(value: Decimal, unit: Unit) -> Self {
        Scalar {
            kind: ScalarKind::Decimal(value),
            unit,
        }
    }

    pub fn int(value: i64, unit: Unit) -> Self {
        Scalar {
            kind: ScalarKind::Int(value),
            unit,
        }
    }

    pub fn count(value: i64) -> Self {
        Scalar::int(value, Unit::base("count"))
    }

    pub fn boolean(value: bool) -> Self {
        Scalar {
            kind: ScalarKind::Bool(value),
            unit: Unit::empty(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Scalar {
            kind: ScalarKind::Str(value.into()),
            unit: Unit::empty(),
        }
    }

    pub fn as_decimal(&self) -> JoshResult<Decimal> {
        self.kind.as_decimal()
    }

    pub fn as_bool(&self) -> JoshResult<bool> {
        match &self.kind {
            ScalarKind::Bool(b) => Ok(*b),
            other => Err(ValueError::TypeMismatch {
                expected: "bool".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }

    /// Converts `self` into `target` units via `graph`, or rewrites the tag in
    /// place when `force` is set (§4.1: `cast(force=true)` does not rescale).
    pub fn cast(&self, target: &Unit, graph: &ConversionGraph, force: bool) -> JoshResult<Scalar> {
        if force {
            return Ok(Scalar {
                kind: self.kind.clone(),
                unit: target.clone(),
            });
        }
        let value = self.as_decimal()?;
        let converted = graph.convert(&self.unit, target, value)?;
        Ok(Scalar::decimal(converted, target.clone()))
    }
}

/// A parameterized, unsampled distribution. Draws occur only through an
/// explicit RNG (§3 invariant (c)).
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualKind {
    Uniform { lo: Decimal, hi: Decimal },
    Normal { mean: Decimal, std: Decimal },
}

/// Either a finite ordered sequence of scalars sharing a unit (*realized*) or
/// a parameterized law (*virtual*).
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Realized { values: Vec<Scalar>, unit: Unit },
    Virtual { kind: VirtualKind, unit: Unit },
}

impl Distribution {
    pub fn realized(values: Vec<Scalar>, unit: Unit) -> Self {
        Distribution::Realized { values, unit }
    }

    pub fn uniform(lo: Decimal, hi: Decimal, unit: Unit) -> Self {
        Distribution::Virtual {
            kind: VirtualKind::Uniform { lo, hi },
            unit,
        }
    }

    pub fn normal(mean: Decimal, std: Decimal, unit: Unit) -> Self {
        Distribution::Virtual {
            kind: VirtualKind::Normal { mean, std },
            unit,
        }
    }

    pub fn unit(&self) -> &Unit {
        match self {
            Distribution::Realized { unit, .. } => unit,
            Distribution::Virtual { unit, .. } => unit,
        }
    }

    pub fn len_if_realized(&self) -> Option<usize> {
        match self {
            Distribution::Realized { values, .. } => Some(values.len()),
            Distribution::Virtual { .. } => None,
        }
    }

    /// Draws one sample from a virtual distribution's law; panics-free, never
    /// called for a realized distribution (callers branch on the variant).
    fn draw_one(kind: &VirtualKind, unit: &Unit, rng: &mut impl Rng) -> JoshResult<Scalar> {
        let value = match kind {
            VirtualKind::Uniform { lo, hi } => {
                let lo_f = lo.to_f64().ok_or_else(|| ValueError::NumericConversion(lo.to_string()))?;
                let hi_f = hi.to_f64().ok_or_else(|| ValueError::NumericConversion(hi.to_string()))?;
                let d = rand_distr::Uniform::new_inclusive(lo_f, hi_f)
                    .map_err(|e| ValueError::NumericConversion(e.to_string()))?;
                Decimal::from_f64_retain(d.sample(rng)).ok_or(ValueError::NumericConversion("uniform draw".into()))?
            }
            VirtualKind::Normal { mean, std } => {
                let mean_f = mean.to_f64().ok_or_else(|| ValueError::NumericConversion(mean.to_string()))?;
                let std_f = std.to_f64().ok_or_else(|| ValueError::NumericConversion(std.to_string()))?;
                let d = rand_distr::Normal::new(mean_f, std_f).map_err(|e| ValueError::NumericConversion(e.to_string()))?;
                Decimal::from_f64_retain(d.sample(rng)).ok_or(ValueError::NumericConversion("normal draw".into()))?
            }
        };
        Ok(Scalar::decimal(value, unit.clone()))
    }

    /// Materializes `n` independent draws. For an already-realized
    /// distribution, `with_replacement` controls whether elements repeat.
    pub fn sample(&self, n: usize, with_replacement: bool, rng: &mut impl Rng) -> JoshResult<Vec<Scalar>> {
        match self {
            Distribution::Realized { values, .. } => {
                if with_replacement {
                    Ok((0..n).map(|_| values[rng.random_range(0..values.len())].clone()).collect())
                } else {
                    if n > values.len() {
                        return Err(ValueError::SampleSize {
                            requested: n,
                            available: values.len(),
                        }
                        .into());
                    }
                    let mut idx: Vec<usize> = (0..values.len()).collect();
                    // Fisher-Yates partial shuffle, deterministic given `rng`.
                    for i in 0..n {
                        let j = rng.random_range(i..idx.len());
                        idx.swap(i, j);
                    }
                    Ok(idx[..n].iter().map(|&i| values[i].clone()).collect())
                }
            }
            Distribution::Virtual { kind, unit } => (0..n).map(|_| Distribution::draw_one(kind, unit, rng)).collect(),
        }
    }

    /// Materializes a distribution to a concrete `Vec<Scalar>` at `size`
    /// elements when virtual, or returns the realized values unchanged.
    pub fn to_realized(&self, size: usize, rng: &mut impl Rng) -> JoshResult<Vec<Scalar>> {
        match self {
            Distribution::Realized { values, .. } => Ok(values.clone()),
            Distribution::Virtual { .. } => self.sample(size, true, rng),
        }
    }

    pub fn concat(&self, other: &Distribution) -> JoshResult<Distribution> {
        match (self, other) {
            (Distribution::Realized { values: a, unit }, Distribution::Realized { values: b, .. }) => {
                let mut values = a.clone();
                values.extend(b.clone());
                Ok(Distribution::Realized {
                    values,
                    unit: unit.clone(),
                })
            }
            _ => Err(ValueError::TypeMismatch {
                expected: "realized distribution".into(),
                found: "virtual distribution".into(),
            }
            .into()),
        }
    }

    pub fn bound(&self, lower: Option<Decimal>, upper: Option<Decimal>) -> JoshResult<Distribution> {
        match self {
            Distribution::Realized { values, unit } => {
                let clamped = values
                    .iter()
                    .map(|s| {
                        let mut v = s.as_decimal()?;
                        if let Some(lo) = lower {
                            v = v.max(lo);
                        }
                        if let Some(hi) = upper {
                            v = v.min(hi);
                        }
                        Ok(Scalar::decimal(v, s.unit.clone()))
                    })
                    .collect::<JoshResult<Vec<_>>>()?;
                Ok(Distribution::Realized {
                    values: clamped,
                    unit: unit.clone(),
                })
            }
            Distribution::Virtual { kind, unit } => match kind {
                VirtualKind::Uniform { lo, hi } => {
                    let new_lo = lower.map(|l| l.max(*lo)).unwrap_or(*lo);
                    let new_hi = upper.map(|h| h.min(*hi)).unwrap_or(*hi);
                    Ok(Distribution::uniform(new_lo, new_hi, unit.clone()))
                }
                VirtualKind::Normal { .. } => Err(ValueError::TypeMismatch {
                    expected: "boundable distribution".into(),
                    found: "normal virtual distribution".into(),
                }
                .into()),
            },
        }
    }
}

/// The expression machine's operand type: a `Scalar`, a `Distribution`, a
/// single entity reference, or the realized collection of references
/// `create_entity` and child discovery traffic in (§4.2, §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Distribution(Distribution),
    EntityRef(crate::entity::EntityRef),
    EntityRefs(Vec<crate::entity::EntityRef>),
}

impl Value {
    pub fn unit(&self) -> Unit {
        match self {
            Value::Scalar(s) => s.unit.clone(),
            Value::Distribution(d) => d.unit().clone(),
            Value::EntityRef(_) | Value::EntityRefs(_) => Unit::empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Distribution(_) => "distribution",
            Value::EntityRef(_) => "entity_ref",
            Value::EntityRefs(_) => "entity_refs",
        }
    }

    pub fn as_entity_refs(&self) -> JoshResult<&[crate::entity::EntityRef]> {
        match self {
            Value::EntityRefs(refs) => Ok(refs),
            other => Err(ValueError::TypeMismatch {
                expected: "entity_refs".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }

    pub fn as_scalar(&self) -> JoshResult<&Scalar> {
        match self {
            Value::Scalar(s) => Ok(s),
            other => Err(ValueError::TypeMismatch {
                expected: "scalar".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }

    pub fn as_distribution(&self) -> JoshResult<&Distribution> {
        match self {
            Value::Distribution(d) => Ok(d),
            other => Err(ValueError::TypeMismatch {
                expected: "distribution".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }

    pub fn cast(&self, target: &Unit, graph: &ConversionGraph, force: bool) -> JoshResult<Value> {
        match self {
            Value::Scalar(s) => Ok(Value::Scalar(s.cast(target, graph, force)?)),
            Value::Distribution(Distribution::Realized { values, .. }) => {
                let out = values.iter().map(|v| v.cast(target, graph, force)).collect::<JoshResult<Vec<_>>>()?;
                Ok(Value::Distribution(Distribution::Realized {
                    values: out,
                    unit: target.clone(),
                }))
            }
            other => Err(ValueError::TypeMismatch {
                expected: "scalar or realized distribution".into(),
                found: other.type_name().into(),
            }
            .into()),
        }
    }

    pub fn concat(&self, other: &Value) -> JoshResult<Value> {
        Ok(Value::Distribution(self.as_distribution()?.concat(other.as_distribution()?)?))
    }

    pub fn bound(&self, lower: Option<Decimal>, upper: Option<Decimal>) -> JoshResult<Value> {
        Ok(Value::Distribution(self.as_distribution()?.bound(lower, upper)?))
    }

    pub fn sample(&self, n: usize, with_replacement: bool, rng: &mut impl Rng) -> JoshResult<Value> {
        let values = self.as_distribution()?.sample(n, with_replacement, rng)?;
        let unit = self.as_distribution()?.unit().clone();
        Ok(Value::Distribution(Distribution::Realized { values, unit }))
    }

    pub fn map(
        &self,
        from_lo: Decimal,
        from_hi: Decimal,
        to_lo: Decimal,
        to_hi: Decimal,
        method: map::MapMethod,
        steep: bool,
    ) -> JoshResult<Value> {
        let s = self.as_scalar()?;
        let operand = s.as_decimal()?;
        let mapped = map::map_value(operand, from_lo, from_hi, to_lo, to_hi, method, steep)?;
        Ok(Value::Scalar(Scalar::decimal(mapped, s.unit.clone())))
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<Distribution> for Value {
    fn from(d: Distribution) -> Self {
        Value::Distribution(d)
    }
}

/// Bundles the context every value-engine operation needs: the unit
/// conversion graph, a source of randomness for any operation that must
/// materialize a virtual distribution, and the simulation's configured
/// sampling size for reductions over virtual distributions (§4.1).
///
/// `rng` sits behind a `RefCell` rather than a bare `&mut` so the scheduler
/// can hand the same context to a resolver that recursively resolves other
/// attributes (each borrowing the RNG briefly and sequentially) without
/// threading a second exclusive borrow through every recursive call (§5:
/// "within a replicate: single-threaded cooperative" — access is never
/// actually concurrent, only re-entrant).
pub struct ValueContext<'a> {
    pub graph: &'a ConversionGraph,
    pub rng: &'a RefCell<rand::rngs::StdRng>,
    pub sample_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    #[test]
    fn scalar_carries_unit_even_for_count() {
        let c = Scalar::count(3);
        assert_eq!(c.unit, Unit::base("count"));
    }

    #[test]
    fn sample_without_replacement_rejects_oversized_request() {
        let d = Distribution::realized(vec![Scalar::count(1), Scalar::count(2)], Unit::base("count"));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(d.sample(3, false, &mut rng).is_err());
    }

    #[test]
    fn virtual_materializes_to_requested_size() {
        let d = Distribution::uniform(dec!(0), dec!(1), Unit::empty());
        let mut rng = StdRng::seed_from_u64(42);
        let realized = d.to_realized(5, &mut rng).unwrap();
        assert_eq!(realized.len(), 5);
    }
}

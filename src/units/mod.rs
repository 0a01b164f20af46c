//! Unit algebra (C1): an ordered multiset of base-unit symbols with rational
//! exponents, plus a directed conversion graph searched by BFS.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::{JoshResult, ValueError};
use crate::sorted_vec_map::SortedVecMap;

/// A rational exponent `num/den`, kept reduced and with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Exponent {
    num: i32,
    den: i32,
}

impl Exponent {
    pub fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "exponent denominator must be non-zero");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1);
        Exponent {
            num: num / g as i32,
            den: den / g as i32,
        }
    }

    pub fn whole(n: i32) -> Self {
        Exponent::new(n, 1)
    }

    fn neg(self) -> Self {
        Exponent::new(-self.num, self.den)
    }

    fn add(self, other: Self) -> Self {
        Exponent::new(self.num * other.den + other.num * self.den, self.den * other.den)
    }

    fn is_zero(self) -> bool {
        self.num == 0
    }
}

impl Default for Exponent {
    fn default() -> Self {
        Exponent { num: 0, den: 1 }
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Ordered multiset of base-unit symbols with rational exponents. `Unit::EMPTY`
/// (no symbols) is dimensionless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Unit {
    symbols: SortedVecMap<String, Exponent>,
}

impl Unit {
    pub fn empty() -> Self {
        Unit::default()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn base(symbol: impl Into<String>) -> Self {
        let mut symbols = SortedVecMap::new();
        symbols.insert(symbol.into(), Exponent::whole(1));
        Unit { symbols }
    }

    pub fn with_exponent(symbol: impl Into<String>, num: i32, den: i32) -> Self {
        let mut symbols = SortedVecMap::new();
        symbols.insert(symbol.into(), Exponent::new(num, den));
        Unit { symbols }
    }

    /// Combines exponents from both units (addition), dropping zero exponents.
    pub fn mul(&self, other: &Unit) -> Unit {
        let mut symbols = self.symbols.clone();
        for (sym, exp) in other.symbols.iter() {
            let entry = symbols.entry(sym.clone()).or_insert(Exponent::whole(0));
            *entry = entry.add(*exp);
        }
        symbols.retain(|_, e| !e.is_zero());
        Unit { symbols }
    }

    pub fn div(&self, other: &Unit) -> Unit {
        let negated = other.pow(Exponent::new(-1, 1));
        self.mul(&negated)
    }

    pub fn pow(&self, exp: Exponent) -> Unit {
        let mut symbols = SortedVecMap::new();
        for (sym, e) in self.symbols.iter() {
            let combined = Exponent::new(e.num * exp.num, e.den * exp.den);
            if !combined.is_zero() {
                symbols.insert(sym.clone(), combined);
            }
        }
        Unit { symbols }
    }

    pub fn symbol_repr(&self) -> String {
        if self.symbols.is_empty() {
            return "1".to_string();
        }
        self.symbols
            .iter()
            .map(|(s, e)| {
                if e.den == 1 {
                    if e.num == 1 {
                        s.clone()
                    } else {
                        format!("{s}^{}", e.num)
                    }
                } else {
                    format!("{s}^({}/{})", e.num, e.den)
                }
            })
            .collect::<Vec<_>>()
            .join("\u{b7}")
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol_repr())
    }
}

type ConvertFn = Arc<dyn Fn(Decimal) -> Decimal + Send + Sync>;

#[derive(Clone)]
struct Edge {
    to: Unit,
    forward: ConvertFn,
    backward: ConvertFn,
}

/// Directed conversion graph between declared units. Edges are inserted in
/// pairs (forward/backward) so BFS can walk either direction; `convert`
/// searches breadth-first for the shortest chain of declared edges.
#[derive(Clone, Default)]
pub struct ConversionGraph {
    edges: Vec<(Unit, Edge)>,
}

impl ConversionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a linear conversion `to = from * scale` (and its inverse).
    pub fn declare_linear(&mut self, from: Unit, to: Unit, scale: Decimal) {
        if scale.is_zero() {
            return;
        }
        let fwd_scale = scale;
        let bwd_scale = Decimal::ONE / scale;
        self.edges.push((
            from.clone(),
            Edge {
                to: to.clone(),
                forward: Arc::new(move |v| v * fwd_scale),
                backward: Arc::new(move |v| v * bwd_scale),
            },
        ));
        self.edges.push((
            to,
            Edge {
                to: from,
                forward: Arc::new(move |v| v * bwd_scale),
                backward: Arc::new(move |v| v * fwd_scale),
            },
        ));
    }

    fn neighbors(&self, unit: &Unit) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter_map(move |(from, e)| if from == unit { Some(e) } else { None })
    }

    /// BFS for a conversion path `from -> to`. Returns `Ok(value)` converted,
    /// or the overall scale as identity when `from == to`.
    pub fn convert(&self, from: &Unit, to: &Unit, value: Decimal) -> JoshResult<Decimal> {
        if from == to {
            return Ok(value);
        }
        use std::collections::{HashMap, VecDeque};
        let mut visited: HashMap<Unit, (Unit, ConvertFn)> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.clone());
        visited.insert(from.clone(), (from.clone(), Arc::new(|v| v)));
        while let Some(cur) = queue.pop_front() {
            if &cur == to {
                break;
            }
            for edge in self.neighbors(&cur) {
                if !visited.contains_key(&edge.to) {
                    visited.insert(edge.to.clone(), (cur.clone(), edge.forward.clone()));
                    queue.push_back(edge.to.clone());
                }
            }
        }
        if !visited.contains_key(to) {
            return Err(ValueError::NoConversionPath {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        // Walk the path back from `to` to `from`, composing each step's edge fn.
        let mut chain = Vec::new();
        let mut cursor = to.clone();
        while &cursor != from {
            let (prev, f) = visited.get(&cursor).expect("visited during BFS").clone();
            chain.push(f);
            cursor = prev;
        }
        chain.reverse();
        let mut v = value;
        for f in chain {
            v = f(v);
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn meter_to_hectare_roundtrip() {
        let m2 = Unit::with_exponent("m", 2, 1);
        let ha = Unit::base("ha");
        let mut graph = ConversionGraph::new();
        graph.declare_linear(ha.clone(), m2.clone(), dec!(10000));
        let converted = graph.convert(&ha, &m2, dec!(1)).unwrap();
        assert_eq!(converted, dec!(10000));
        let back = graph.convert(&m2, &ha, converted).unwrap();
        assert_eq!(back, dec!(1));
    }

    #[test]
    fn no_path_is_an_error() {
        let m = Unit::base("m");
        let s = Unit::base("s");
        let graph = ConversionGraph::new();
        assert!(graph.convert(&m, &s, dec!(1)).is_err());
    }

    #[test]
    fn unit_mul_cancels_inverse_exponents() {
        let m = Unit::base("m");
        let per_m = m.pow(Exponent::new(-1, 1));
        let combined = m.mul(&per_m);
        assert!(combined.is_empty());
    }
}

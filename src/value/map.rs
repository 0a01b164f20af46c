//! The `map` family (§4.1): linear/sigmoid/quadratic interpolation of a
//! scalar from one domain into another.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use strum_macros::EnumString;

use crate::error::{JoshResult, ValueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MapMethod {
    Linear,
    Sigmoid,
    Quadratic,
}

/// Maps `operand` from `[from_lo, from_hi]` into `[to_lo, to_hi]`. `steep`
/// governs `sigmoid`'s direction (true = increasing) and `quadratic`'s vertex
/// placement (true = vertex maps to `to_hi`).
pub fn map_value(
    operand: Decimal,
    from_lo: Decimal,
    from_hi: Decimal,
    to_lo: Decimal,
    to_hi: Decimal,
    method: MapMethod,
    steep: bool,
) -> JoshResult<Decimal> {
    if from_lo == from_hi {
        return Err(ValueError::DegenerateDomain.into());
    }
    let t = (operand - from_lo) / (from_hi - from_lo);
    let result = match method {
        MapMethod::Linear => to_lo + t * (to_hi - to_lo),
        MapMethod::Sigmoid => {
            let t_f = t.to_f64().ok_or_else(|| ValueError::NumericConversion(t.to_string()))?;
            // Centered logistic over the unit interval, steepness fixed so
            // the domain edges map close to (but not past) the range edges.
            let centered = (t_f - 0.5) * 10.0;
            let mut s = 1.0 / (1.0 + (-centered).exp());
            if !steep {
                s = 1.0 - s;
            }
            let s_dec = Decimal::from_f64_retain(s).ok_or_else(|| ValueError::NumericConversion("sigmoid".into()))?;
            to_lo + s_dec * (to_hi - to_lo)
        }
        MapMethod::Quadratic => {
            let centered = t - Decimal::new(5, 1); // t - 0.5
            let parabola = Decimal::ONE - Decimal::new(4, 0) * centered * centered;
            if steep {
                to_lo + parabola * (to_hi - to_lo)
            } else {
                to_hi - parabola * (to_hi - to_lo)
            }
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn linear_interpolates_without_clamping() {
        let r = map_value(dec!(15), dec!(0), dec!(10), dec!(0), dec!(100), MapMethod::Linear, true).unwrap();
        assert_eq!(r, dec!(150));
    }

    #[test]
    fn quadratic_vertex_hits_the_requested_edge() {
        let mid = map_value(dec!(5), dec!(0), dec!(10), dec!(0), dec!(100), MapMethod::Quadratic, true).unwrap();
        assert_eq!(mid, dec!(100));
        let mid_lo = map_value(dec!(5), dec!(0), dec!(10), dec!(0), dec!(100), MapMethod::Quadratic, false).unwrap();
        assert_eq!(mid_lo, dec!(0));
    }
}

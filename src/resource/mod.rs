//! External resources (C7) and the `.jshd` precomputed-grid codec (C12).

mod codec;

pub use codec::JshdGrid;

use crate::error::JoshResult;
use crate::units::Unit;
use crate::value::{Distribution, Scalar};

/// A read-only precomputed grid exposing `values_at` (§4.7). Missing
/// coverage (a timestep outside range) returns the configured default.
pub struct ExternalResource {
    pub grid: JshdGrid,
}

impl ExternalResource {
    pub fn new(grid: JshdGrid) -> Self {
        ExternalResource { grid }
    }

    /// Single cell lookup at `(step, row, col)`; out-of-range steps fall back
    /// to the grid's configured default rather than erroring (§4.7).
    pub fn value_at_cell(&self, step: i64, row: u32, col: u32) -> Scalar {
        let raw = self.grid.get(step, row, col).unwrap_or(self.grid.default);
        Scalar::decimal(
            rust_decimal::Decimal::from_f64_retain(raw).unwrap_or_default(),
            Unit::base(&self.grid.units),
        )
    }

    /// Full-extent read at one timestep, row-major, as a realized
    /// distribution (used by the round-trip property test, §8 property 8).
    pub fn values_at_step(&self, step: i64) -> JoshResult<Distribution> {
        let unit = Unit::base(&self.grid.units);
        let mut values = Vec::with_capacity((self.grid.rows * self.grid.cols) as usize);
        for row in 0..self.grid.rows {
            for col in 0..self.grid.cols {
                values.push(self.value_at_cell(step, row, col));
            }
        }
        Ok(Distribution::realized(values, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_step_falls_back_to_default() {
        let grid = JshdGrid {
            units: "mm".to_string(),
            min_step: 0,
            max_step: 0,
            rows: 1,
            cols: 1,
            default: -1000.0,
            data: vec![5.0],
        };
        let resource = ExternalResource::new(grid);
        let v = resource.value_at_cell(99, 0, 0);
        assert_eq!(v.as_decimal().unwrap(), rust_decimal::Decimal::from(-1000));
    }
}

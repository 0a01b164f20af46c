//! Spatial layer (C6): grid geometry, haversine distance, and radial queries
//! against a read-only index over the prior snapshot.

use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::error::{JoshResult, SpatialError};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }

    /// Great-circle distance in meters (WGS84 equirectangular default
    /// projection's reference distance, §4.6).
    pub fn haversine_distance_m(&self, other: &LatLon) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_M * c
    }
}

/// A rectangular lattice of patches over lat/lon corners at a fixed cell
/// size in meters (§4.6). Row 0 is the northernmost row, col 0 westernmost.
#[derive(Debug, Clone)]
pub struct GridGeometry {
    pub sw: LatLon,
    pub ne: LatLon,
    pub cell_size_m: f64,
    pub rows: u32,
    pub cols: u32,
}

impl GridGeometry {
    pub fn new(sw: LatLon, ne: LatLon, cell_size_m: f64) -> JoshResult<Self> {
        if cell_size_m <= 0.0 {
            return Err(SpatialError::NegativeRadius(cell_size_m).into());
        }
        let lat_span_m = sw.haversine_distance_m(&LatLon::new(ne.lat, sw.lon));
        let lon_span_m = sw.haversine_distance_m(&LatLon::new(sw.lat, ne.lon));
        let rows = (lat_span_m / cell_size_m).ceil().max(1.0) as u32;
        let cols = (lon_span_m / cell_size_m).ceil().max(1.0) as u32;
        Ok(GridGeometry {
            sw,
            ne,
            cell_size_m,
            rows,
            cols,
        })
    }

    /// Center of cell `(row, col)`, row 0 = north edge.
    pub fn cell_center(&self, row: u32, col: u32) -> JoshResult<LatLon> {
        if row >= self.rows || col >= self.cols {
            return Err(SpatialError::OutOfBounds {
                lat: f64::from(row),
                lon: f64::from(col),
            }
            .into());
        }
        let lat_step = (self.ne.lat - self.sw.lat) / self.rows as f64;
        let lon_step = (self.ne.lon - self.sw.lon) / self.cols as f64;
        let lat = self.ne.lat - lat_step * (row as f64 + 0.5);
        let lon = self.sw.lon + lon_step * (col as f64 + 0.5);
        Ok(LatLon::new(lat, lon))
    }
}

/// A read-only index of patch positions, rebuilt once per timestep at
/// `freeze_prior` (§4.6: "queries always target the prior snapshot").
#[derive(Default)]
pub struct PriorPatchIndex {
    entries: Vec<(LatLon, EntityRef)>,
}

impl PriorPatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&mut self, patches: impl IntoIterator<Item = (LatLon, EntityRef)>) {
        self.entries = patches.into_iter().collect();
    }

    /// Returns every patch whose cell center lies within `radius_m` of
    /// `center`, in index-insertion order (deterministic).
    pub fn radial_query(&self, center: LatLon, radius_m: f64) -> JoshResult<Vec<EntityRef>> {
        if radius_m < 0.0 {
            return Err(SpatialError::NegativeRadius(radius_m).into());
        }
        Ok(self
            .entries
            .iter()
            .filter(|(pos, _)| center.haversine_distance_m(pos) <= radius_m)
            .map(|(_, e)| *e)
            .collect())
    }
}

//! The export task record (§6): `core -> writer` payload, already projected
//! into string-keyed attributes so every writer serializes it uniformly.

use crate::entity::EntityKind;
use crate::sorted_vec_map::SortedVecMap;
use crate::spatial::LatLon;

#[derive(Debug, Clone)]
pub struct ExportTask {
    pub entity_kind: EntityKind,
    pub attributes: SortedVecMap<String, String>,
    pub step: u64,
    pub replicate: u32,
    pub geometry: Option<LatLon>,
}

impl ExportTask {
    pub fn new(entity_kind: EntityKind, step: u64, replicate: u32) -> Self {
        ExportTask {
            entity_kind,
            attributes: SortedVecMap::new(),
            step,
            replicate,
            geometry: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_geometry(mut self, geometry: LatLon) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

//! Binary reader/writer for the `.jshd` precomputed-grid format (§6):
//! `{magic:"JSHD", version:u32, units_len:u32, units_bytes, min_step:i64,
//! max_step:i64, rows:u32, cols:u32, default:f64}` header, then a row-major
//! `f64[(max_step-min_step+1) x rows x cols]` body. Little-endian throughout.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{JoshResult, ResourceError};

const MAGIC: &[u8; 4] = b"JSHD";
const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct JshdGrid {
    pub units: String,
    pub min_step: i64,
    pub max_step: i64,
    pub rows: u32,
    pub cols: u32,
    pub default: f64,
    /// Row-major `[step][row][col]`, flattened: `(max_step - min_step + 1) *
    /// rows * cols` elements.
    pub data: Vec<f64>,
}

impl JshdGrid {
    pub fn step_count(&self) -> usize {
        (self.max_step - self.min_step + 1).max(0) as usize
    }

    fn cell_index(&self, step: i64, row: u32, col: u32) -> Option<usize> {
        if step < self.min_step || step > self.max_step || row >= self.rows || col >= self.cols {
            return None;
        }
        let step_idx = (step - self.min_step) as usize;
        let plane = (self.rows * self.cols) as usize;
        Some(step_idx * plane + row as usize * self.cols as usize + col as usize)
    }

    pub fn get(&self, step: i64, row: u32, col: u32) -> Option<f64> {
        self.cell_index(step, row, col).and_then(|i| self.data.get(i).copied())
    }

    pub fn write_to(&self, mut w: impl Write) -> JoshResult<()> {
        w.write_all(MAGIC).map_err(ResourceError::Io)?;
        w.write_u32::<LittleEndian>(VERSION).map_err(ResourceError::Io)?;
        let units_bytes = self.units.as_bytes();
        w.write_u32::<LittleEndian>(units_bytes.len() as u32).map_err(ResourceError::Io)?;
        w.write_all(units_bytes).map_err(ResourceError::Io)?;
        w.write_i64::<LittleEndian>(self.min_step).map_err(ResourceError::Io)?;
        w.write_i64::<LittleEndian>(self.max_step).map_err(ResourceError::Io)?;
        w.write_u32::<LittleEndian>(self.rows).map_err(ResourceError::Io)?;
        w.write_u32::<LittleEndian>(self.cols).map_err(ResourceError::Io)?;
        w.write_f64::<LittleEndian>(self.default).map_err(ResourceError::Io)?;
        let expected = self.step_count() * (self.rows * self.cols) as usize;
        if self.data.len() != expected {
            return Err(ResourceError::SizeMismatch {
                expected,
                found: self.data.len(),
            }
            .into());
        }
        for v in &self.data {
            w.write_f64::<LittleEndian>(*v).map_err(ResourceError::Io)?;
        }
        Ok(())
    }

    pub fn read_from(mut r: impl Read) -> JoshResult<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(ResourceError::Io)?;
        if &magic != MAGIC {
            return Err(ResourceError::BadMagic.into());
        }
        let version = r.read_u32::<LittleEndian>().map_err(ResourceError::Io)?;
        if version != VERSION {
            return Err(ResourceError::UnsupportedVersion(version).into());
        }
        let units_len = r.read_u32::<LittleEndian>().map_err(ResourceError::Io)? as usize;
        let mut units_bytes = vec![0u8; units_len];
        r.read_exact(&mut units_bytes).map_err(ResourceError::Io)?;
        let units = String::from_utf8_lossy(&units_bytes).into_owned();
        let min_step = r.read_i64::<LittleEndian>().map_err(ResourceError::Io)?;
        let max_step = r.read_i64::<LittleEndian>().map_err(ResourceError::Io)?;
        let rows = r.read_u32::<LittleEndian>().map_err(ResourceError::Io)?;
        let cols = r.read_u32::<LittleEndian>().map_err(ResourceError::Io)?;
        let default = r.read_f64::<LittleEndian>().map_err(ResourceError::Io)?;
        let step_count = (max_step - min_step + 1).max(0) as usize;
        let expected = step_count * (rows * cols) as usize;
        let mut data = Vec::with_capacity(expected);
        for _ in 0..expected {
            data.push(r.read_f64::<LittleEndian>().map_err(ResourceError::Io)?);
        }
        Ok(JshdGrid {
            units,
            min_step,
            max_step,
            rows,
            cols,
            default,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_byte_identical() {
        let grid = JshdGrid {
            units: "mm".to_string(),
            min_step: 0,
            max_step: 1,
            rows: 2,
            cols: 2,
            default: -1000.0,
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        };
        let mut buf = Vec::new();
        grid.write_to(&mut buf).unwrap();
        let decoded = JshdGrid::read_from(&buf[..]).unwrap();
        assert_eq!(grid, decoded);

        let mut buf2 = Vec::new();
        decoded.write_to(&mut buf2).unwrap();
        assert_eq!(buf, buf2, "serialize/deserialize/serialize must be byte-identical");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = [0u8; 8];
        assert!(JshdGrid::read_from(&bytes[..]).is_err());
    }
}

//! Raster store seam - band storage keyed by name and optional month

mod directory;

pub use directory::DirectoryRasterStore;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::YearMonth;

/// No-data sentinel shared by every band.
pub const NODATA: f64 = -9999.0;

pub fn is_nodata(value: f64) -> bool {
    !value.is_finite() || (value - NODATA).abs() < 1e-6
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("band '{0}' not found")]
    Missing(String),

    #[error("band '{name}' is {actual_width}x{actual_height}, expected {width}x{height}")]
    ShapeMismatch {
        name: String,
        width: usize,
        height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("band io error for '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("band '{0}' could not be decoded: {1}")]
    Decode(String, #[source] serde_json::Error),
}

/// Band data whose length does not match its declared shape.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("band data holds {actual} values for a {width}x{height} grid")]
pub struct BandShapeError {
    pub width: usize,
    pub height: usize,
    pub actual: usize,
}

/// A single-layer grid of values in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BandData")]
pub struct Band {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

/// Undecoded form of [`Band`]; its length is checked before it becomes one.
#[derive(Deserialize)]
struct BandData {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl TryFrom<BandData> for Band {
    type Error = BandShapeError;

    fn try_from(raw: BandData) -> Result<Self, Self::Error> {
        Band::try_new(raw.width, raw.height, raw.data)
    }
}

impl Band {
    /// Builds a band from data the caller produced for this shape.
    ///
    /// # Panics
    /// If `data.len() != width * height`. Use [`Band::try_new`] for external data.
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Self {
        assert_eq!(width * height, data.len(), "band data does not match shape");
        Self {
            width,
            height,
            data,
        }
    }

    pub fn try_new(width: usize, height: usize, data: Vec<f64>) -> Result<Self, BandShapeError> {
        if width.checked_mul(height) != Some(data.len()) {
            return Err(BandShapeError {
                width,
                height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_values(self) -> Vec<f64> {
        self.data
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.data.get(index).copied()
    }

    pub fn has_shape(&self, width: usize, height: usize) -> bool {
        self.width == width && self.height == height && self.data.len() == width * height
    }
}

/// Storage collaborator for every grid the simulation reads or writes.
/// Static layers use `month = None`.
pub trait RasterStore {
    fn read_band(&self, name: &str, month: Option<YearMonth>) -> Result<Band, RasterError>;

    fn write_band(
        &mut self,
        name: &str,
        month: Option<YearMonth>,
        band: &Band,
    ) -> Result<(), RasterError>;

    fn has_band(&self, name: &str, month: Option<YearMonth>) -> bool;

    fn read_band_with_shape(
        &self,
        name: &str,
        month: Option<YearMonth>,
        width: usize,
        height: usize,
    ) -> Result<Band, RasterError> {
        let band = self.read_band(name, month)?;
        if !band.has_shape(width, height) {
            return Err(RasterError::ShapeMismatch {
                name: band_key(name, month),
                width,
                height,
                actual_width: band.width(),
                actual_height: band.height(),
            });
        }
        Ok(band)
    }
}

pub fn band_key(name: &str, month: Option<YearMonth>) -> String {
    match month {
        Some(month) => format!("{name}_{:04}_{:02}", month.year(), month.month()),
        None => name.to_string(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRasterStore {
    bands: HashMap<(String, Option<YearMonth>), Band>,
}

impl MemoryRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Months for which a band with this name has been written, sorted.
    pub fn months_of(&self, name: &str) -> Vec<YearMonth> {
        let mut months: Vec<YearMonth> = self
            .bands
            .keys()
            .filter(|(n, _)| n == name)
            .filter_map(|(_, m)| *m)
            .collect();
        months.sort();
        months
    }
}

impl RasterStore for MemoryRasterStore {
    fn read_band(&self, name: &str, month: Option<YearMonth>) -> Result<Band, RasterError> {
        self.bands
            .get(&(name.to_string(), month))
            .cloned()
            .ok_or_else(|| RasterError::Missing(band_key(name, month)))
    }

    fn write_band(
        &mut self,
        name: &str,
        month: Option<YearMonth>,
        band: &Band,
    ) -> Result<(), RasterError> {
        self.bands.insert((name.to_string(), month), band.clone());
        Ok(())
    }

    fn has_band(&self, name: &str, month: Option<YearMonth>) -> bool {
        self.bands.contains_key(&(name.to_string(), month))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_keys_by_month() {
        let mut store = MemoryRasterStore::new();
        let jan = YearMonth::new(2016, 1).unwrap();
        let feb = YearMonth::new(2016, 2).unwrap();
        store
            .write_band("precip", Some(jan), &Band::filled(2, 2, 10.0))
            .unwrap();
        store
            .write_band("precip", Some(feb), &Band::filled(2, 2, 20.0))
            .unwrap();

        assert!(store.has_band("precip", Some(jan)));
        assert!(!store.has_band("precip", None));
        assert_eq!(store.read_band("precip", Some(feb)).unwrap().get(3), Some(20.0));
        assert_eq!(store.months_of("precip"), vec![jan, feb]);
        assert!(matches!(
            store.read_band("tmin", Some(jan)),
            Err(RasterError::Missing(_))
        ));
    }

    #[test]
    fn shape_check_reports_mismatch() {
        let mut store = MemoryRasterStore::new();
        store
            .write_band("soil_sand", None, &Band::filled(3, 2, 0.4))
            .unwrap();
        let err = store
            .read_band_with_shape("soil_sand", None, 2, 2)
            .unwrap_err();
        assert!(matches!(err, RasterError::ShapeMismatch { .. }));
    }

    #[test]
    fn mismatched_length_is_rejected() {
        let err = Band::try_new(2, 2, vec![1.0; 3]).unwrap_err();
        assert_eq!(err.actual, 3);
        assert!(Band::try_new(3, 1, vec![1.0, NODATA, 3.0]).is_ok());

        let short: Result<Band, _> =
            serde_json::from_str(r#"{"width":2,"height":1,"data":[50.0]}"#);
        assert!(short.is_err());
    }
}

//! Monthly climate drivers and the synthetic climatology generator.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::YearMonth;
use crate::error::ModelError;
use crate::raster::{Band, RasterError, RasterStore, NODATA};

pub const PRECIP_BAND: &str = "precip";
pub const TMIN_BAND: &str = "tmin";
pub const TMAX_BAND: &str = "tmax";

/// One pixel's climate for one month: total precipitation (mm) and mean daily
/// minimum and maximum temperature (C).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyClimate {
    pub precip: f64,
    pub tmin: f64,
    pub tmax: f64,
}

impl MonthlyClimate {
    pub fn tmean(&self) -> f64 {
        (self.tmin + self.tmax) / 2.0
    }

    pub fn range(&self) -> f64 {
        self.tmax - self.tmin
    }

    /// True when any driver carries the no-data sentinel. Non-finite values
    /// are not no-data here; they are rejected as domain errors.
    pub fn is_nodata(&self) -> bool {
        [self.precip, self.tmin, self.tmax]
            .iter()
            .any(|v| (v - NODATA).abs() < 1e-6)
    }
}

/// The three climate bands of one month.
#[derive(Debug, Clone)]
pub struct ClimateBands {
    precip: Band,
    tmin: Band,
    tmax: Band,
}

impl ClimateBands {
    pub fn read(
        store: &impl RasterStore,
        month: YearMonth,
        width: usize,
        height: usize,
    ) -> Result<Self, ModelError> {
        let read = |name: &str| {
            store
                .read_band_with_shape(name, Some(month), width, height)
                .map_err(|err| match err {
                    RasterError::Missing(_) | RasterError::ShapeMismatch { .. } => {
                        ModelError::Configuration(format!("climate for {month}: {err}"))
                    }
                    other => ModelError::Raster(other),
                })
        };
        Ok(Self {
            precip: read(PRECIP_BAND)?,
            tmin: read(TMIN_BAND)?,
            tmax: read(TMAX_BAND)?,
        })
    }

    pub fn at(&self, i: usize) -> MonthlyClimate {
        MonthlyClimate {
            precip: self.precip.values()[i],
            tmin: self.tmin.values()[i],
            tmax: self.tmax.values()[i],
        }
    }
}

/// Long-term monthly means, January first. With `jitter > 0` each pixel-month
/// is perturbed by a seeded draw so repeated runs stay reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Climatology {
    pub precip: [f64; 12],
    pub tmin: [f64; 12],
    pub tmax: [f64; 12],
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Climatology {
    pub fn uniform(precip: f64, tmin: f64, tmax: f64) -> Self {
        Self {
            precip: [precip; 12],
            tmin: [tmin; 12],
            tmax: [tmax; 12],
            jitter: 0.0,
            seed: 0,
        }
    }

    /// Writes `precip`, `tmin` and `tmax` bands for every month in `start..end`.
    pub fn write_bands(
        &self,
        store: &mut impl RasterStore,
        width: usize,
        height: usize,
        start: YearMonth,
        end: YearMonth,
    ) -> Result<(), RasterError> {
        let len = width * height;
        for offset in 0..start.months_until(end) {
            let month = start.add_months(offset);
            let m = month.month() as usize - 1;
            let mut rng = month_rng(self.seed, month);
            let mut precip = Vec::with_capacity(len);
            let mut tmin = Vec::with_capacity(len);
            let mut tmax = Vec::with_capacity(len);
            for _ in 0..len {
                let (scale, shift) = if self.jitter > 0.0 {
                    let j = self.jitter;
                    (rng.gen_range(1.0 - j..1.0 + j), rng.gen_range(-j..j) * 5.0)
                } else {
                    (1.0, 0.0)
                };
                precip.push((self.precip[m] * scale).max(0.0));
                tmin.push(self.tmin[m] + shift);
                tmax.push(self.tmax[m] + shift);
            }
            store.write_band(PRECIP_BAND, Some(month), &Band::new(width, height, precip))?;
            store.write_band(TMIN_BAND, Some(month), &Band::new(width, height, tmin))?;
            store.write_band(TMAX_BAND, Some(month), &Band::new(width, height, tmax))?;
        }
        Ok(())
    }
}

fn month_rng(seed: u64, month: YearMonth) -> ChaCha8Rng {
    let mut mixed = seed;
    mixed = mixed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    mixed ^= (month.year() as u64).wrapping_mul(1103515245);
    mixed = mixed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    mixed ^= (month.month() as u64).wrapping_mul(69069);
    ChaCha8Rng::seed_from_u64(mixed)
}

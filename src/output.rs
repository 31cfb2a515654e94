//! Monthly output bands, month summaries and the run summary document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::YearMonth;
use crate::raster::{Band, RasterError, RasterStore, NODATA};
use crate::state::{PixelStatus, STATUS_BAND};

pub const FORAGE_BIOMASS: &str = "forage_biomass";
pub const FORAGE_PROTEIN: &str = "forage_protein";
pub const FORAGE_INTAKE: &str = "forage_intake";
pub const OFFTAKE: &str = "offtake";
pub const DIET_SUFFICIENCY: &str = "diet_sufficiency";

pub const MONTHLY_BANDS: [&str; 6] = [
    FORAGE_BIOMASS,
    FORAGE_PROTEIN,
    FORAGE_INTAKE,
    OFFTAKE,
    DIET_SUFFICIENCY,
    STATUS_BAND,
];

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// One pixel's results for one month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyRecord {
    /// kg ha-1, live plus standing dead.
    pub forage_biomass: f64,
    /// Crude protein fraction of the forage.
    pub forage_protein: f64,
    /// kg DM animal-1 day-1
    pub forage_intake: f64,
    /// kg ha-1
    pub offtake: f64,
    /// `None` where no herd grazes the pixel.
    pub diet_sufficiency: Option<f64>,
    /// Net production (g m-2).
    pub production: f64,
    /// Decomposition respiration (g m-2).
    pub respiration: f64,
    /// Fraction of live aboveground biomass removed by last month's offtake.
    pub grazing_intensity: f64,
    pub status: PixelStatus,
}

impl MonthlyRecord {
    pub fn empty(status: PixelStatus) -> Self {
        Self {
            forage_biomass: 0.0,
            forage_protein: 0.0,
            forage_intake: 0.0,
            offtake: 0.0,
            diet_sufficiency: None,
            production: 0.0,
            respiration: 0.0,
            grazing_intensity: 0.0,
            status,
        }
    }

    fn band_value(&self, band: &str) -> f64 {
        if band == STATUS_BAND {
            return self.status.code();
        }
        if self.status.is_excluded() {
            return NODATA;
        }
        match band {
            FORAGE_BIOMASS => self.forage_biomass,
            FORAGE_PROTEIN => self.forage_protein,
            FORAGE_INTAKE => self.forage_intake,
            OFFTAKE => self.offtake,
            DIET_SUFFICIENCY => self.diet_sufficiency.unwrap_or(NODATA),
            _ => NODATA,
        }
    }
}

pub fn write_monthly(
    store: &mut impl RasterStore,
    width: usize,
    height: usize,
    month: YearMonth,
    records: &[MonthlyRecord],
) -> Result<(), RasterError> {
    for band in MONTHLY_BANDS {
        let data = records.iter().map(|r| r.band_value(band)).collect();
        store.write_band(band, Some(month), &Band::new(width, height, data))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub month: YearMonth,
    pub simulated_pixels: usize,
    pub flagged_pixels: usize,
    pub invalid_pixels: usize,
    pub mean_forage_biomass: Option<f64>,
    pub mean_diet_sufficiency: Option<f64>,
    /// Sum of offtake over simulated pixels (kg ha-1).
    pub total_offtake: f64,
    /// Sums over simulated pixels (g m-2).
    pub total_production: f64,
    pub total_respiration: f64,
    /// Mean removal fraction over pixels grazed at the start of the month.
    pub mean_grazing_intensity: Option<f64>,
    pub duration_ms: f64,
}

impl MonthSummary {
    pub fn from_records(month: YearMonth, records: &[MonthlyRecord], duration_ms: f64) -> Self {
        let simulated: Vec<&MonthlyRecord> =
            records.iter().filter(|r| !r.status.is_excluded()).collect();
        let mean = |values: Vec<f64>| {
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };
        Self {
            month,
            simulated_pixels: simulated.len(),
            flagged_pixels: records
                .iter()
                .filter(|r| {
                    matches!(
                        r.status,
                        PixelStatus::ClampedInput | PixelStatus::DomainInput
                    )
                })
                .count(),
            invalid_pixels: records
                .iter()
                .filter(|r| r.status == PixelStatus::Invalid)
                .count(),
            mean_forage_biomass: mean(simulated.iter().map(|r| r.forage_biomass).collect()),
            mean_diet_sufficiency: mean(
                simulated.iter().filter_map(|r| r.diet_sufficiency).collect(),
            ),
            total_offtake: simulated.iter().map(|r| r.offtake).sum(),
            total_production: simulated.iter().map(|r| r.production).sum(),
            total_respiration: simulated.iter().map(|r| r.respiration).sum(),
            mean_grazing_intensity: mean(
                simulated
                    .iter()
                    .map(|r| r.grazing_intensity)
                    .filter(|i| *i > 0.0)
                    .collect(),
            ),
            duration_ms,
        }
    }
}

/// Written next to the output bands at the end of a CLI run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenario: String,
    pub start_month: YearMonth,
    pub end_month: YearMonth,
    pub final_state: String,
    pub runner: String,
    pub width: usize,
    pub height: usize,
    pub nodata_pixels: usize,
    pub invalid_pixels: usize,
    pub total_duration_ms: f64,
    pub months: Vec<MonthSummary>,
}

impl RunSummary {
    pub fn write(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let path = dir.join(RUN_SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write run summary {}", path.display()))?;
        Ok(path)
    }
}

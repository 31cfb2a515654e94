//! Environmental limitation factors and the monthly water balance.

use std::f64::consts::PI;

use crate::params::{DecompositionParams, PlantParams, SiteParams};
use crate::state::SoilProperties;

/// Lowest daily potential evapotranspiration (mm day-1) returned by [`potential_evapotranspiration`].
const MIN_DAILY_PET: f64 = 0.5;

/// Generalised Poisson density of mean temperature, 1 at the optimum and 0 at
/// or above the maximum.
pub fn temperature_factor(tmean: f64, plant: &PlantParams) -> f64 {
    let frac = (plant.temperature_maximum - tmean)
        / (plant.temperature_maximum - plant.temperature_optimum);
    if frac <= 0.0 {
        return 0.0;
    }
    let a = plant.temperature_shape_left;
    let b = plant.temperature_shape_right;
    let value = (a / b * (1.0 - frac.powf(b))).exp() * frac.powf(a);
    value.clamp(0.0, 1.0)
}

/// Linacre (1977) potential evapotranspiration for the month (mm).
/// The month's diurnal range stands in for both range terms.
pub fn potential_evapotranspiration(
    tmean: f64,
    temperature_range: f64,
    site: &SiteParams,
    days: u32,
) -> f64 {
    let elevation = site.elevation_m;
    let range = temperature_range.max(0.0);
    let dew_depression =
        0.0023 * elevation + 0.37 * tmean + 0.53 * range + 0.35 * range - 10.9;
    let tm = tmean + 0.006 * elevation;
    let daily = (700.0 * tm / (100.0 - site.latitude_deg.abs()) + 15.0 * dew_depression)
        / (80.0 - tmean);
    daily.max(MIN_DAILY_PET) * days as f64
}

/// Volumetric field capacity and wilting point from texture (Gupta & Larson 1979).
pub fn water_retention(soil: &SoilProperties, organic_matter_pct: f64) -> (f64, f64) {
    let (sand, silt, clay) = (soil.sand * 100.0, soil.silt * 100.0, soil.clay * 100.0);
    let om = organic_matter_pct;
    let bd = soil.bulk_density;
    let field = 0.003075 * sand + 0.005886 * silt + 0.008039 * clay + 0.002208 * om
        - 0.1434 * bd;
    let wilt = -0.000059 * sand + 0.001142 * silt + 0.005766 * clay + 0.002228 * om
        + 0.02671 * bd;
    let field = field.clamp(0.0, 1.0);
    (field, wilt.clamp(0.0, field))
}

/// Century `pprdwc` ramp of the water-supply to demand ratio.
pub fn moisture_factor(ratio: f64, water_capacity: f64, plant: &PlantParams) -> f64 {
    let intercept = plant.moisture_intercept + plant.moisture_capacity_slope * water_capacity;
    let full = plant.moisture_full_ratio;
    if full <= intercept {
        return if ratio >= full { 1.0 } else { 0.0 };
    }
    let slope = 1.0 / (full - intercept);
    (1.0 + slope * (ratio - full)).clamp(0.0, 1.0)
}

pub fn shading_factor(standing_dead: f64, plant: &PlantParams) -> f64 {
    let k = plant.standing_dead_shading;
    if k <= 0.0 {
        return 1.0;
    }
    k / (k + standing_dead.max(0.0))
}

/// Century arctangent temperature effect on decomposition, normalised to 1 at
/// the reference temperature.
pub fn decomposition_temperature(tmean: f64, decomposition: &DecompositionParams) -> f64 {
    let tcalc = |t: f64| {
        decomposition.temperature_offset
            + decomposition.temperature_span / PI
                * (PI * decomposition.temperature_steepness
                    * (t - decomposition.temperature_midpoint))
                    .atan()
    };
    let normaliser = tcalc(decomposition.temperature_reference);
    (tcalc(tmean) / normaliser).max(0.01)
}

pub fn decomposition_moisture(ratio: f64) -> f64 {
    1.0 / (1.0 + 30.0 * (-8.5 * ratio.max(0.0)).exp())
}

/// Result of routing one month's precipitation through the single-layer bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterBalance {
    pub pet: f64,
    /// `(soil water + precipitation) / PET`.
    pub ratio: f64,
    pub aet: f64,
    pub drainage: f64,
    pub soil_water: f64,
    /// Plant-available capacity as a volumetric fraction.
    pub water_capacity: f64,
}

pub fn water_balance(
    soil_water: f64,
    precip: f64,
    pet: f64,
    soil: &SoilProperties,
    site: &SiteParams,
) -> WaterBalance {
    let (field, wilt) = water_retention(soil, site.soil_organic_matter_pct);
    let water_capacity = field - wilt;
    let capacity_mm = water_capacity * soil.depth_cm * 10.0;
    let supply = soil_water.max(0.0) + precip;
    let ratio = supply / pet;
    let aet = supply.min(pet);
    let remaining = supply - aet;
    let drainage = (remaining - capacity_mm).max(0.0);
    WaterBalance {
        pet,
        ratio,
        aet,
        drainage,
        soil_water: remaining - drainage,
        water_capacity,
    }
}

//! Monthly Century plant-soil step for a single pixel.

pub mod decomposition;
pub mod limits;
pub mod production;

use crate::climate::MonthlyClimate;
use crate::error::PixelError;
use crate::params::{ModelParams, SiteParams};
use crate::state::{PixelState, Pool, SoilProperties};

pub const MIN_TEMPERATURE: f64 = -60.0;
pub const MAX_TEMPERATURE: f64 = 60.0;

/// Fluxes of one pixel-month, enough to close the mass and N budgets:
/// `mass' + respiration = mass + production` and
/// `N' + n_losses = N + n_inputs`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GrowthReport {
    pub potential_production: f64,
    pub production: f64,
    pub respiration: f64,
    pub deposition: f64,
    pub fixation: f64,
    pub volatilization: f64,
    pub leaching: f64,
    pub gross_mineralization: f64,
    pub immobilization: f64,
    pub n_uptake: f64,
    pub pet: f64,
    pub aet: f64,
    pub drainage: f64,
    pub defac: f64,
    /// Climate had to be clamped into range this month.
    pub clamped_input: bool,
}

impl GrowthReport {
    pub fn n_inputs(&self) -> f64 {
        self.deposition + self.fixation
    }

    pub fn n_losses(&self) -> f64 {
        self.volatilization + self.leaching
    }
}

/// Validates climate, clamping it into range when allowed. Returns the values
/// to use and whether anything was clamped.
pub fn check_climate(
    climate: &MonthlyClimate,
    clamp: bool,
) -> Result<(MonthlyClimate, bool), PixelError> {
    let MonthlyClimate { precip, tmin, tmax } = *climate;
    if !precip.is_finite() || !tmin.is_finite() || !tmax.is_finite() {
        return Err(PixelError::DomainInput(format!(
            "non-finite climate: precip {precip}, tmin {tmin}, tmax {tmax}"
        )));
    }
    let temperature_ok = |t: f64| (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t);
    let valid = precip >= 0.0 && temperature_ok(tmin) && temperature_ok(tmax) && tmin <= tmax;
    if valid {
        return Ok((*climate, false));
    }
    if !clamp {
        return Err(PixelError::DomainInput(format!(
            "precip {precip}, tmin {tmin}, tmax {tmax}"
        )));
    }
    let mut tmin = tmin.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    let mut tmax = tmax.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    if tmin > tmax {
        let mid = (tmin + tmax) / 2.0;
        tmin = mid;
        tmax = mid;
    }
    Ok((
        MonthlyClimate {
            precip: precip.max(0.0),
            tmin,
            tmax,
        },
        true,
    ))
}

/// Advances one pixel by one month. On error the pixel may be partly updated;
/// callers work on a copy and discard it.
pub fn grow(
    pixel: &mut PixelState,
    climate: &MonthlyClimate,
    soil: &SoilProperties,
    site: &SiteParams,
    days: u32,
    params: &ModelParams,
    clamp_climate: bool,
) -> Result<GrowthReport, PixelError> {
    let (climate, clamped_input) = check_climate(climate, clamp_climate)?;
    let plant = &params.plant;
    let tmean = climate.tmean();

    let pet = limits::potential_evapotranspiration(tmean, climate.range(), site, days);
    let water = limits::water_balance(pixel.soil_water, climate.precip, pet, soil, site);
    pixel.soil_water = water.soil_water;

    let defac = limits::decomposition_temperature(tmean, &params.decomposition)
        * limits::decomposition_moisture(water.ratio);
    let flux = decomposition::decompose(pixel, defac, soil, &params.decomposition);

    let deposition = site.n_deposition_intercept / 12.0 + site.n_deposition_per_cm * climate.precip / 10.0;
    pixel.mineral_n += deposition;

    let moisture = limits::moisture_factor(water.ratio, water.water_capacity, plant);
    let limitation = limits::temperature_factor(tmean, plant)
        * moisture
        * limits::shading_factor(pixel.mass(Pool::StandingDead), plant);
    let growth = production::produce(pixel, limitation, soil, plant);
    production::relax_root_shoot(pixel, moisture, growth.n_factor, plant);
    production::senesce(pixel, tmean, moisture, plant);

    let volatilization =
        (site.volatilization_fraction * flux.gross_mineralization).min(pixel.mineral_n.max(0.0));
    pixel.mineral_n -= volatilization;
    let leach_fraction = ((site.leach_intercept + site.leach_sand_slope * soil.sand)
        * (water.drainage / site.leach_saturation_drainage_mm).min(1.0))
    .clamp(0.0, 1.0);
    let leaching = pixel.mineral_n.max(0.0) * leach_fraction;
    pixel.mineral_n -= leaching;

    pixel.check_invariants(plant)?;

    Ok(GrowthReport {
        potential_production: growth.potential,
        production: growth.actual,
        respiration: flux.respiration,
        deposition,
        fixation: growth.fixation,
        volatilization,
        leaching,
        gross_mineralization: flux.gross_mineralization,
        immobilization: flux.immobilization,
        n_uptake: growth.n_uptake,
        pet,
        aet: water.aet,
        drainage: water.drainage,
        defac,
        clamped_input,
    })
}

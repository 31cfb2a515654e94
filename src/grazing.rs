use serde::{Deserialize, Serialize};

use crate::error::PixelError;
use crate::params::PlantParams;
use crate::state::{PixelState, Pool};

const OFFTAKE_TOLERANCE: f64 = 1e-9;

/// Production response of the sward to the fraction of live biomass removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrazingResponse {
    None,
    Linear,
    /// `1 + b f - c f^2` (Holland et al. 1992); small removals stimulate regrowth.
    Quadratic,
}

impl GrazingResponse {
    pub fn production_factor(self, fraction_removed: f64, plant: &PlantParams) -> f64 {
        let f = fraction_removed.clamp(0.0, 1.0);
        let factor = match self {
            GrazingResponse::None => return 1.0,
            GrazingResponse::Linear => 1.0 - plant.grazing_linear_slope * f,
            GrazingResponse::Quadratic => {
                1.0 + plant.grazing_quadratic_b * f - plant.grazing_quadratic_c * f * f
            }
        };
        factor.max(plant.grazing_production_floor)
    }

    pub fn root_shoot_factor(self, fraction_removed: f64, plant: &PlantParams) -> f64 {
        match self {
            GrazingResponse::None => 1.0,
            GrazingResponse::Linear | GrazingResponse::Quadratic => {
                (1.0 - plant.grazing_root_shoot_slope * fraction_removed.clamp(0.0, 1.0)).max(0.0)
            }
        }
    }
}

/// Forage removed from one pixel in one month (g m-2).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offtake {
    pub live: f64,
    pub standing_dead: f64,
}

impl Offtake {
    pub fn total(&self) -> f64 {
        self.live + self.standing_dead
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GrazingEffect {
    /// Fraction of pre-grazing live aboveground biomass removed.
    pub intensity: f64,
    pub removed_mass: f64,
    pub removed_n: f64,
    pub returned_mass: f64,
    pub returned_n: f64,
}

/// Applies last month's offtake to the pixel ahead of this month's growth.
pub fn apply_offtake(
    pixel: &mut PixelState,
    offtake: &Offtake,
    plant: &PlantParams,
) -> Result<GrazingEffect, PixelError> {
    let live_before = pixel.mass(Pool::AboveLive);
    let live_fraction = removal_fraction(offtake.live, live_before, Pool::AboveLive)?;
    let dead_fraction = removal_fraction(
        offtake.standing_dead,
        pixel.mass(Pool::StandingDead),
        Pool::StandingDead,
    )?;

    let (live_mass, live_n) = pixel.take_fraction(Pool::AboveLive, live_fraction);
    let (dead_mass, dead_n) = pixel.take_fraction(Pool::StandingDead, dead_fraction);
    let removed_mass = live_mass + dead_mass;
    let removed_n = live_n + dead_n;

    let returned_n = removed_n * plant.excreta_n_return;
    let fecal_n = returned_n * plant.fecal_n_share;
    let fecal_mass = removed_mass * plant.fecal_mass_return;
    pixel.add(Pool::MetabolicLitter, fecal_mass, fecal_n);
    pixel.mineral_n += returned_n - fecal_n;

    let response = plant.grazing_response;
    pixel.root_shoot = plant.clamp_root_shoot(
        pixel.root_shoot * response.root_shoot_factor(live_fraction, plant),
    );
    pixel.grazing_multiplier = response.production_factor(live_fraction, plant);

    Ok(GrazingEffect {
        intensity: live_fraction,
        removed_mass,
        removed_n,
        returned_mass: fecal_mass,
        returned_n,
    })
}

fn removal_fraction(requested: f64, available: f64, pool: Pool) -> Result<f64, PixelError> {
    if !requested.is_finite() || requested < 0.0 {
        return Err(PixelError::InvariantViolation(format!(
            "offtake from {} is {requested}",
            pool.name()
        )));
    }
    if requested == 0.0 {
        return Ok(0.0);
    }
    if requested > available * (1.0 + OFFTAKE_TOLERANCE) + OFFTAKE_TOLERANCE {
        return Err(PixelError::InvariantViolation(format!(
            "offtake {requested:.4} exceeds {} pool {available:.4}",
            pool.name()
        )));
    }
    Ok((requested / available).min(1.0))
}

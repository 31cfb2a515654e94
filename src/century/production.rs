//! Plant production, N uptake, allocation and senescence.

use super::decomposition::add_litter;
use crate::params::PlantParams;
use crate::state::{PixelState, Pool, SoilProperties};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Production {
    pub potential: f64,
    pub actual: f64,
    pub n_uptake: f64,
    /// Symbiotically fixed N taken up this month.
    pub fixation: f64,
    /// Ratio of N-limited to potential production, capped at 1.
    pub n_factor: f64,
}

/// Grows the live pools for one month. `limitation` is the product of the
/// temperature, moisture and shading factors.
pub fn produce(
    pixel: &mut PixelState,
    limitation: f64,
    soil: &SoilProperties,
    plant: &PlantParams,
) -> Production {
    let potential =
        (plant.max_production * limitation * pixel.grazing_multiplier.max(0.0)).max(0.0);

    let above_share = 1.0 / (1.0 + pixel.root_shoot);
    let below_share = 1.0 - above_share;
    let w_min = above_share * plant.above_n_min + below_share * plant.below_n_min;
    let w_max = above_share * plant.above_n_max + below_share * plant.below_n_max;

    let fixation_supply = soil.proportion_legume * plant.legume_fixation * potential;
    let mineral_supply = pixel.mineral_n.max(0.0) * plant.n_uptake_fraction;
    let supply = mineral_supply + fixation_supply;

    let n_limited = supply / w_min;
    let actual = potential.min(n_limited);
    let n_factor = if potential > 0.0 {
        (n_limited / potential).min(1.0)
    } else {
        1.0
    };
    if actual <= 0.0 {
        return Production {
            potential,
            n_factor,
            ..Production::default()
        };
    }

    let wanted = supply.min(actual * w_max);
    let theta = if w_max > w_min {
        ((wanted - actual * w_min) / (actual * (w_max - w_min))).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let above_mass = actual * above_share;
    let below_mass = actual - above_mass;
    let above_n = above_mass * (plant.above_n_min + theta * (plant.above_n_max - plant.above_n_min));
    let below_n = below_mass * (plant.below_n_min + theta * (plant.below_n_max - plant.below_n_min));
    let uptake = above_n + below_n;

    let fixation = fixation_supply.min(uptake);
    pixel.mineral_n = (pixel.mineral_n - (uptake - fixation)).max(0.0);
    pixel.add(Pool::AboveLive, above_mass, above_n);
    pixel.add(Pool::BelowLive, below_mass, below_n);

    Production {
        potential,
        actual,
        n_uptake: uptake,
        fixation,
        n_factor,
    }
}

/// Moves root:shoot a step toward its stress target: more allocation below
/// ground the scarcer water or nitrogen.
pub fn relax_root_shoot(pixel: &mut PixelState, moisture: f64, n_factor: f64, plant: &PlantParams) {
    let stress = 1.0 - moisture.min(n_factor).clamp(0.0, 1.0);
    let target = plant.root_shoot_min + (plant.root_shoot_max - plant.root_shoot_min) * stress;
    let next = pixel.root_shoot + plant.root_shoot_relaxation * (target - pixel.root_shoot);
    pixel.root_shoot = plant.clamp_root_shoot(next);
}

/// Shoot death, standing dead fall and root turnover for the month.
pub fn senesce(pixel: &mut PixelState, tmean: f64, moisture: f64, plant: &PlantParams) {
    let mut death = plant.above_death_base + plant.above_death_drought * (1.0 - moisture);
    if tmean < plant.cold_death_threshold {
        death += plant.above_death_cold;
    }
    let (dead_mass, dead_n) = pixel.take_fraction(Pool::AboveLive, death.clamp(0.0, 1.0));
    pixel.add(Pool::StandingDead, dead_mass, dead_n);

    let (fallen_mass, fallen_n) =
        pixel.take_fraction(Pool::StandingDead, plant.standing_dead_fall.clamp(0.0, 1.0));
    add_litter(pixel, fallen_mass, fallen_n, plant.above_lignin, plant);

    let (root_mass, root_n) =
        pixel.take_fraction(Pool::BelowLive, plant.root_turnover.clamp(0.0, 1.0));
    add_litter(pixel, root_mass, root_n, plant.below_lignin, plant);
}

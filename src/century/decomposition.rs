//! First-order decay of litter and soil organic matter with explicit N routing.

use crate::params::{DecompositionParams, PlantParams};
use crate::state::{PixelState, Pool, SoilProperties};

/// Mass and N fluxes of one month's decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecompositionFlux {
    pub respiration: f64,
    pub gross_mineralization: f64,
    pub immobilization: f64,
}

struct Receiver {
    pool: Pool,
    /// Share of the decayed donor mass routed to this pool.
    share: f64,
    target_conc: f64,
}

/// Decays every litter and SOM pool by one month. `defac` is the combined
/// temperature and moisture decomposition factor.
pub fn decompose(
    pixel: &mut PixelState,
    defac: f64,
    soil: &SoilProperties,
    params: &DecompositionParams,
) -> DecompositionFlux {
    let monthly = |annual_rate: f64, effect: f64| {
        1.0 - (-annual_rate / 12.0 * defac * effect).exp()
    };
    let lignin = pixel.structural_lignin.clamp(0.0, 1.0);
    let texture = params.texture_intercept + params.texture_sand_slope * soil.sand;

    // Take every donor first so this month's receipts do not decay again.
    let structural = pixel.take_fraction(
        Pool::StructuralLitter,
        monthly(params.structural_rate, (-params.lignin_effect * lignin).exp()),
    );
    let metabolic = pixel.take_fraction(Pool::MetabolicLitter, monthly(params.metabolic_rate, 1.0));
    let active = pixel.take_fraction(Pool::SomActive, monthly(params.active_rate, texture));
    let slow = pixel.take_fraction(Pool::SomSlow, monthly(params.slow_rate, 1.0));
    let passive = pixel.take_fraction(Pool::SomPassive, monthly(params.passive_rate, 1.0));

    let mut flux = DecompositionFlux::default();
    let (structural_mass, structural_n) = structural;

    route(
        pixel,
        &mut flux,
        (structural_mass * lignin, structural_n * lignin),
        params.lignin_respiration,
        &[Receiver {
            pool: Pool::SomSlow,
            share: 1.0 - params.lignin_respiration,
            target_conc: params.slow_n_conc,
        }],
    );
    route(
        pixel,
        &mut flux,
        (structural_mass * (1.0 - lignin), structural_n * (1.0 - lignin)),
        params.structural_respiration,
        &[Receiver {
            pool: Pool::SomActive,
            share: 1.0 - params.structural_respiration,
            target_conc: params.active_n_conc,
        }],
    );
    route(
        pixel,
        &mut flux,
        metabolic,
        params.metabolic_respiration,
        &[Receiver {
            pool: Pool::SomActive,
            share: 1.0 - params.metabolic_respiration,
            target_conc: params.active_n_conc,
        }],
    );

    let active_resp = (params.active_respiration_intercept
        + params.active_respiration_sand * soil.sand)
        .clamp(0.0, 1.0);
    let to_passive = (params.active_to_passive_intercept + params.active_to_passive_clay * soil.clay)
        .min(1.0 - active_resp);
    route(
        pixel,
        &mut flux,
        active,
        active_resp,
        &[
            Receiver {
                pool: Pool::SomPassive,
                share: to_passive,
                target_conc: params.passive_n_conc,
            },
            Receiver {
                pool: Pool::SomSlow,
                share: 1.0 - active_resp - to_passive,
                target_conc: params.slow_n_conc,
            },
        ],
    );

    let slow_to_passive = (params.slow_to_passive_intercept + params.slow_to_passive_clay * soil.clay)
        .min(1.0 - params.slow_respiration);
    route(
        pixel,
        &mut flux,
        slow,
        params.slow_respiration,
        &[
            Receiver {
                pool: Pool::SomPassive,
                share: slow_to_passive,
                target_conc: params.passive_n_conc,
            },
            Receiver {
                pool: Pool::SomActive,
                share: 1.0 - params.slow_respiration - slow_to_passive,
                target_conc: params.active_n_conc,
            },
        ],
    );
    route(
        pixel,
        &mut flux,
        passive,
        params.passive_respiration,
        &[Receiver {
            pool: Pool::SomActive,
            share: 1.0 - params.passive_respiration,
            target_conc: params.active_n_conc,
        }],
    );
    flux
}

/// Moves decayed donor material into its receivers. N travels with the mass at
/// the donor's concentration; respired N is mineralised, receivers above their
/// target concentration mineralise the excess and receivers below it
/// immobilise from the mineral pool as far as it allows.
fn route(
    pixel: &mut PixelState,
    flux: &mut DecompositionFlux,
    (mass, nitrogen): (f64, f64),
    respiration: f64,
    receivers: &[Receiver],
) {
    if mass <= 0.0 {
        pixel.mineral_n += nitrogen.max(0.0);
        flux.gross_mineralization += nitrogen.max(0.0);
        return;
    }
    flux.respiration += mass * respiration;
    let respired_n = nitrogen * respiration;
    pixel.mineral_n += respired_n;
    flux.gross_mineralization += respired_n;

    let carried = 1.0 - respiration;
    for receiver in receivers {
        if receiver.share <= 0.0 {
            continue;
        }
        let received_mass = mass * receiver.share;
        let offered_n = if carried > 0.0 {
            nitrogen * receiver.share
        } else {
            0.0
        };
        let target_n = received_mass * receiver.target_conc;
        let received_n = if offered_n >= target_n {
            let excess = offered_n - target_n;
            pixel.mineral_n += excess;
            flux.gross_mineralization += excess;
            target_n
        } else {
            let drawn = (target_n - offered_n).min(pixel.mineral_n.max(0.0));
            pixel.mineral_n -= drawn;
            flux.immobilization += drawn;
            offered_n + drawn
        };
        pixel.add(receiver.pool, received_mass, received_n);
    }
}

/// Splits senesced material between structural and metabolic litter by its
/// lignin:N ratio and updates the structural lignin fraction.
pub fn add_litter(
    pixel: &mut PixelState,
    mass: f64,
    nitrogen: f64,
    lignin: f64,
    plant: &PlantParams,
) {
    if mass <= 0.0 {
        return;
    }
    let lignin = lignin.clamp(0.0, 1.0);
    let conc = nitrogen / mass;
    let metabolic_fraction = if conc > 0.0 {
        plant.metabolic_split_intercept - plant.metabolic_split_slope * (lignin / conc)
    } else {
        plant.metabolic_split_min
    };
    let metabolic_fraction = metabolic_fraction
        .max(plant.metabolic_split_min)
        .min(1.0 - lignin)
        .max(0.0);

    let structural_mass = mass * (1.0 - metabolic_fraction);
    let structural_n = nitrogen.min(structural_mass * plant.structural_n_conc);

    let old_mass = pixel.mass(Pool::StructuralLitter);
    let new_mass = old_mass + structural_mass;
    if new_mass > 0.0 {
        pixel.structural_lignin =
            (old_mass * pixel.structural_lignin + mass * lignin) / new_mass;
    }
    pixel.add(Pool::StructuralLitter, structural_mass, structural_n);
    pixel.add(
        Pool::MetabolicLitter,
        mass - structural_mass,
        nitrogen - structural_n,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn soil_pixel() -> PixelState {
        let mut pixel = PixelState::default();
        pixel.add(Pool::StructuralLitter, 120.0, 0.4);
        pixel.add(Pool::MetabolicLitter, 40.0, 0.6);
        pixel.add(Pool::SomActive, 80.0, 3.2);
        pixel.add(Pool::SomSlow, 2500.0, 66.0);
        pixel.add(Pool::SomPassive, 1500.0, 75.0);
        pixel.structural_lignin = 0.2;
        pixel.mineral_n = 0.5;
        pixel
    }

    #[test]
    fn decomposition_conserves_mass_and_nitrogen() {
        let params = DecompositionParams::default();
        let soil = SoilProperties::default();
        let mut pixel = soil_pixel();
        let mass_before = pixel.total_mass();
        let n_before = pixel.total_nitrogen();

        let flux = decompose(&mut pixel, 0.6, &soil, &params);

        assert!(flux.respiration > 0.0);
        assert_relative_eq!(
            pixel.total_mass() + flux.respiration,
            mass_before,
            epsilon = 1e-9
        );
        assert_relative_eq!(pixel.total_nitrogen(), n_before, epsilon = 1e-9);
        assert!(pixel.mineral_n >= 0.0);
        assert!(pixel.mass.iter().all(|m| *m >= 0.0));
    }

    #[test]
    fn immobilisation_stops_at_empty_mineral_pool() {
        let params = DecompositionParams::default();
        let soil = SoilProperties::default();
        let mut pixel = PixelState::default();
        // Very N-poor litter needs mineral N to reach SOM concentrations.
        pixel.add(Pool::MetabolicLitter, 200.0, 0.01);
        pixel.mineral_n = 0.05;
        let flux = decompose(&mut pixel, 1.0, &soil, &params);
        assert!(flux.immobilization > 0.0);
        assert!(flux.immobilization <= 0.05 + flux.gross_mineralization + 1e-12);
        assert!(pixel.mineral_n.abs() < 1e-12);
    }

    #[test]
    fn zero_defac_leaves_pools_alone() {
        let params = DecompositionParams::default();
        let soil = SoilProperties::default();
        let mut pixel = soil_pixel();
        let before = pixel;
        let flux = decompose(&mut pixel, 0.0, &soil, &params);
        assert_eq!(flux.respiration, 0.0);
        assert_eq!(pixel, before);
    }

    #[test]
    fn litter_split_follows_lignin_to_n() {
        let plant = PlantParams::default();
        let mut pixel = PixelState::default();
        add_litter(&mut pixel, 100.0, 1.0, 0.15, &plant);
        let metabolic = pixel.mass(Pool::MetabolicLitter);
        // 0.85 - 0.013 * (0.15 / 0.01)
        assert_relative_eq!(metabolic, 65.5, epsilon = 1e-9);
        assert_relative_eq!(pixel.total_mass(), 100.0, epsilon = 1e-12);
        assert_relative_eq!(pixel.total_nitrogen(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pixel.structural_lignin, 15.0 / 34.5, epsilon = 1e-9);
    }
}

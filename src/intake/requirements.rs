//! Daily energy and protein requirements and potential intake (GRAZPLAN).

use super::ReproductiveStatus;
use crate::params::SpeciesParams;

/// Liveweight (kg) of a young animal on the GRAZPLAN normal growth curve.
pub fn normal_weight(srw: f64, age_days: f64, species: &SpeciesParams) -> f64 {
    let birth = srw * species.birth_weight_fraction;
    srw - (srw - birth) * (-species.growth_rate * age_days / srw.powf(0.27)).exp()
}

pub fn metabolic_weight(weight: f64) -> f64 {
    weight.max(0.0).powf(0.75)
}

/// Maintenance metabolisable energy (MJ ME day-1).
pub fn energy_requirement(
    weight: f64,
    age_months: f64,
    status: ReproductiveStatus,
    species: &SpeciesParams,
) -> f64 {
    let age_years = age_months / 12.0;
    let km = 0.02 * species.reference_md + 0.5;
    let maintenance =
        species.maintenance_k * 0.28 * metabolic_weight(weight) * (-0.03 * age_years).exp() / km;
    let factor = match status {
        ReproductiveStatus::Dry => 1.0,
        ReproductiveStatus::Pregnant => species.pregnant_energy_factor,
        ReproductiveStatus::Lactating => species.lactating_energy_factor,
    };
    maintenance * factor
}

/// Crude protein requirement (kg CP day-1).
pub fn protein_requirement(
    weight: f64,
    status: ReproductiveStatus,
    species: &SpeciesParams,
) -> f64 {
    let factor = match status {
        ReproductiveStatus::Dry => 1.0,
        ReproductiveStatus::Pregnant => species.pregnant_protein_factor,
        ReproductiveStatus::Lactating => species.lactating_protein_factor,
    };
    species.protein_per_metabolic_kg * metabolic_weight(weight) * factor
}

/// Intake capacity (kg DM day-1) `CI1 * SRW * Z * (CI2 - Z)` with relative
/// size `Z = W / SRW` capped at one.
pub fn potential_intake(
    weight: f64,
    srw: f64,
    status: ReproductiveStatus,
    species: &SpeciesParams,
) -> f64 {
    if srw <= 0.0 || weight <= 0.0 {
        return 0.0;
    }
    let z = (weight / srw).min(1.0);
    let capacity = species.intake_ci1 * srw * z * (species.intake_ci2 - z);
    let lactation = match status {
        ReproductiveStatus::Lactating => species.lactation_intake_factor,
        _ => 1.0,
    };
    (capacity * lactation).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn growth_curve_runs_from_birth_to_maturity() {
        let cattle = SpeciesParams::cattle();
        assert_relative_eq!(normal_weight(550.0, 0.0, &cattle), 550.0 * 0.07);
        let yearling = normal_weight(550.0, 365.0, &cattle);
        let adult = normal_weight(550.0, 3650.0, &cattle);
        assert!(yearling > 100.0 && yearling < adult);
        assert!(adult <= 550.0);
    }

    #[test]
    fn dry_cow_maintenance_is_plausible() {
        let cattle = SpeciesParams::cattle();
        let me = energy_requirement(450.0, 60.0, ReproductiveStatus::Dry, &cattle);
        assert!(me > 40.0 && me < 70.0, "maintenance ME {me}");
        let lactating = energy_requirement(450.0, 60.0, ReproductiveStatus::Lactating, &cattle);
        assert_relative_eq!(lactating / me, cattle.lactating_energy_factor);
    }

    #[test]
    fn intake_capacity_scales_with_size() {
        let sheep = SpeciesParams::sheep();
        let adult = potential_intake(50.0, 50.0, ReproductiveStatus::Dry, &sheep);
        assert_relative_eq!(adult, 0.04 * 50.0 * 0.7, epsilon = 1e-12);
        let lamb = potential_intake(20.0, 50.0, ReproductiveStatus::Dry, &sheep);
        assert!(lamb < adult);
        let ewe = potential_intake(50.0, 50.0, ReproductiveStatus::Lactating, &sheep);
        assert!(ewe > adult);
        assert!(protein_requirement(50.0, ReproductiveStatus::Dry, &sheep) > 0.0);
    }
}

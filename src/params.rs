//! Parameter tables shared read-only by every pixel worker.
//!
//! Defaults follow the Century 4 grassland parameter files (carbon ratios
//! converted to dry-matter concentrations with biomass = 2.5 x carbon) and the
//! GRAZPLAN animal constants. Every field can be overridden from the scenario
//! `parameters:` block; missing fields keep their defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::grazing::GrazingResponse;
use crate::intake::Species;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Site used by every pixel without a `site_index` band entry.
    pub site: SiteParams,
    /// Site tables selected per pixel by the `site_index` band.
    pub sites: BTreeMap<u32, SiteParams>,
    pub plant: PlantParams,
    pub decomposition: DecompositionParams,
    pub forage: ForageParams,
    pub animals: AnimalParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteParams {
    pub latitude_deg: f64,
    pub elevation_m: f64,
    /// Soil organic matter (%) used by the texture-based water retention equations.
    pub soil_organic_matter_pct: f64,
    /// Annual wet deposition intercept (g N m-2 yr-1).
    pub n_deposition_intercept: f64,
    /// Deposition per cm of precipitation (g N m-2 cm-1).
    pub n_deposition_per_cm: f64,
    pub leach_intercept: f64,
    pub leach_sand_slope: f64,
    /// Monthly drainage (mm) at which leaching reaches its full rate.
    pub leach_saturation_drainage_mm: f64,
    /// Fraction of gross mineralisation lost as gas.
    pub volatilization_fraction: f64,
}

impl SiteParams {
    fn validate(&self, label: &str) -> Result<(), ModelError> {
        if !(0.0..=1.0).contains(&self.volatilization_fraction) {
            return Err(ModelError::Configuration(format!(
                "{label}.volatilization_fraction must lie in [0, 1], got {}",
                self.volatilization_fraction
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude_deg) {
            return Err(ModelError::Configuration(format!(
                "{label}.latitude_deg must lie in [-90, 90], got {}",
                self.latitude_deg
            )));
        }
        Ok(())
    }
}

impl Default for SiteParams {
    fn default() -> Self {
        Self {
            latitude_deg: 45.0,
            elevation_m: 1200.0,
            soil_organic_matter_pct: 1.0,
            n_deposition_intercept: 0.21,
            n_deposition_per_cm: 0.0028,
            leach_intercept: 0.2,
            leach_sand_slope: 0.7,
            leach_saturation_drainage_mm: 60.0,
            volatilization_fraction: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantParams {
    /// Maximum monthly total production (g m-2 month-1) with no limitation.
    pub max_production: f64,
    pub temperature_optimum: f64,
    pub temperature_maximum: f64,
    pub temperature_shape_left: f64,
    pub temperature_shape_right: f64,
    /// `pprpts` intercept, slope on water holding capacity, and full-production ratio.
    pub moisture_intercept: f64,
    pub moisture_capacity_slope: f64,
    pub moisture_full_ratio: f64,
    /// Standing dead (g m-2) halving production through shading.
    pub standing_dead_shading: f64,
    pub root_shoot_min: f64,
    pub root_shoot_max: f64,
    /// Monthly relaxation of root:shoot toward its stress target.
    pub root_shoot_relaxation: f64,
    pub above_n_min: f64,
    pub above_n_max: f64,
    pub below_n_min: f64,
    pub below_n_max: f64,
    /// Fraction of mineral N reachable by roots in a month.
    pub n_uptake_fraction: f64,
    /// Symbiotic fixation per g of potential legume production (g N g-1).
    pub legume_fixation: f64,
    pub above_lignin: f64,
    pub below_lignin: f64,
    pub above_death_base: f64,
    pub above_death_drought: f64,
    pub above_death_cold: f64,
    /// Mean temperature (C) below which cold death applies.
    pub cold_death_threshold: f64,
    pub standing_dead_fall: f64,
    pub root_turnover: f64,
    /// Metabolic split `intercept - slope * lignin:N`.
    pub metabolic_split_intercept: f64,
    pub metabolic_split_slope: f64,
    pub metabolic_split_min: f64,
    pub structural_n_conc: f64,
    pub grazing_response: GrazingResponse,
    pub grazing_linear_slope: f64,
    pub grazing_quadratic_b: f64,
    pub grazing_quadratic_c: f64,
    pub grazing_production_floor: f64,
    /// Proportional root:shoot reduction per unit fraction of live biomass removed.
    pub grazing_root_shoot_slope: f64,
    /// Fraction of grazed N returned as excreta.
    pub excreta_n_return: f64,
    /// Fraction of grazed mass returned as feces to metabolic litter.
    pub fecal_mass_return: f64,
    /// Share of returned N carried in feces; the rest enters the mineral pool as urine.
    pub fecal_n_share: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            max_production: 180.0,
            temperature_optimum: 27.0,
            temperature_maximum: 45.0,
            temperature_shape_left: 1.0,
            temperature_shape_right: 2.5,
            moisture_intercept: 0.0,
            moisture_capacity_slope: 1.0,
            moisture_full_ratio: 0.8,
            standing_dead_shading: 1800.0,
            root_shoot_min: 0.5,
            root_shoot_max: 3.0,
            root_shoot_relaxation: 0.25,
            above_n_min: 0.01,
            above_n_max: 0.02,
            below_n_min: 0.0067,
            below_n_max: 0.0089,
            n_uptake_fraction: 0.9,
            legume_fixation: 0.01,
            above_lignin: 0.15,
            below_lignin: 0.25,
            above_death_base: 0.05,
            above_death_drought: 0.25,
            above_death_cold: 0.3,
            cold_death_threshold: 0.0,
            standing_dead_fall: 0.15,
            root_turnover: 0.04,
            metabolic_split_intercept: 0.85,
            metabolic_split_slope: 0.013,
            metabolic_split_min: 0.2,
            structural_n_conc: 0.00267,
            grazing_response: GrazingResponse::Quadratic,
            grazing_linear_slope: 0.5,
            grazing_quadratic_b: 2.6,
            grazing_quadratic_c: 5.83,
            grazing_production_floor: 0.02,
            grazing_root_shoot_slope: 0.6,
            excreta_n_return: 0.8,
            fecal_mass_return: 0.3,
            fecal_n_share: 0.4,
        }
    }
}

impl PlantParams {
    pub fn clamp_root_shoot(&self, ratio: f64) -> f64 {
        ratio.clamp(self.root_shoot_min, self.root_shoot_max)
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        let plant = &self.plant;
        let ranges = [
            ("above_n", plant.above_n_min, plant.above_n_max),
            ("below_n", plant.below_n_min, plant.below_n_max),
            ("root_shoot", plant.root_shoot_min, plant.root_shoot_max),
        ];
        for (name, min, max) in ranges {
            if !(min > 0.0 && min <= max) {
                return Err(ModelError::Configuration(format!(
                    "{name} bounds must satisfy 0 < min <= max, got [{min}, {max}]"
                )));
            }
        }
        if plant.temperature_maximum <= plant.temperature_optimum {
            return Err(ModelError::Configuration(
                "temperature_maximum must exceed temperature_optimum".into(),
            ));
        }
        let fractions = [
            ("n_uptake_fraction", plant.n_uptake_fraction),
            ("standing_dead_fall", plant.standing_dead_fall),
            ("root_turnover", plant.root_turnover),
            ("root_shoot_relaxation", plant.root_shoot_relaxation),
            ("excreta_n_return", plant.excreta_n_return),
            ("fecal_mass_return", plant.fecal_mass_return),
            ("fecal_n_share", plant.fecal_n_share),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ModelError::Configuration(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        self.site.validate("site")?;
        for (index, site) in &self.sites {
            site.validate(&format!("sites.{index}"))?;
        }
        Ok(())
    }
}

/// Annual decomposition rates and transfer coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionParams {
    pub structural_rate: f64,
    pub metabolic_rate: f64,
    pub active_rate: f64,
    pub slow_rate: f64,
    pub passive_rate: f64,
    /// Lignin suppression exponent on structural decay.
    pub lignin_effect: f64,
    pub texture_intercept: f64,
    pub texture_sand_slope: f64,
    pub structural_respiration: f64,
    pub lignin_respiration: f64,
    pub metabolic_respiration: f64,
    pub active_respiration_intercept: f64,
    pub active_respiration_sand: f64,
    pub slow_respiration: f64,
    pub passive_respiration: f64,
    pub active_to_passive_intercept: f64,
    pub active_to_passive_clay: f64,
    pub slow_to_passive_intercept: f64,
    pub slow_to_passive_clay: f64,
    pub active_n_conc: f64,
    pub slow_n_conc: f64,
    pub passive_n_conc: f64,
    /// Arctangent temperature function coefficients (`teff`).
    pub temperature_midpoint: f64,
    pub temperature_offset: f64,
    pub temperature_span: f64,
    pub temperature_steepness: f64,
    /// Temperature at which the decomposition temperature factor equals one.
    pub temperature_reference: f64,
}

impl Default for DecompositionParams {
    fn default() -> Self {
        Self {
            structural_rate: 3.9,
            metabolic_rate: 14.8,
            active_rate: 7.3,
            slow_rate: 0.2,
            passive_rate: 0.0045,
            lignin_effect: 3.0,
            texture_intercept: 0.25,
            texture_sand_slope: 0.75,
            structural_respiration: 0.45,
            lignin_respiration: 0.3,
            metabolic_respiration: 0.55,
            active_respiration_intercept: 0.17,
            active_respiration_sand: 0.68,
            slow_respiration: 0.55,
            passive_respiration: 0.55,
            active_to_passive_intercept: 0.003,
            active_to_passive_clay: 0.032,
            slow_to_passive_intercept: 0.003,
            slow_to_passive_clay: 0.009,
            active_n_conc: 0.04,
            slow_n_conc: 0.0267,
            passive_n_conc: 0.05,
            temperature_midpoint: 15.4,
            temperature_offset: 11.75,
            temperature_span: 29.7,
            temperature_steepness: 0.031,
            temperature_reference: 30.0,
        }
    }
}

/// Forage quality relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForageParams {
    pub digestibility_intercept: f64,
    pub digestibility_slope: f64,
    pub digestibility_min: f64,
    pub digestibility_max: f64,
}

impl Default for ForageParams {
    fn default() -> Self {
        Self {
            digestibility_intercept: 0.2,
            digestibility_slope: 3.8,
            digestibility_min: 0.3,
            digestibility_max: 0.85,
        }
    }
}

/// GRAZPLAN constants for one species. Overrides must give the full table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesParams {
    /// Maintenance scaling `K` (cattle 1.4, sheep 1.0).
    pub maintenance_k: f64,
    pub intake_ci1: f64,
    pub intake_ci2: f64,
    pub lactation_intake_factor: f64,
    /// Availability coefficient of `RR = 1 - exp(-a * B)` (ha kg-1).
    pub availability_coefficient: f64,
    pub time_coefficient_a: f64,
    /// Grazing time coefficient (ha kg-1).
    pub time_coefficient_b: f64,
    pub quality_reference: f64,
    pub quality_slope: f64,
    /// Crude protein required per kg metabolic weight (kg CP kg-0.75 day-1).
    pub protein_per_metabolic_kg: f64,
    pub pregnant_energy_factor: f64,
    pub lactating_energy_factor: f64,
    pub pregnant_protein_factor: f64,
    pub lactating_protein_factor: f64,
    pub birth_weight_fraction: f64,
    pub growth_rate: f64,
    /// Diet energy density (MJ kg-1) assumed when converting net to metabolisable energy.
    pub reference_md: f64,
}

impl SpeciesParams {
    pub fn cattle() -> Self {
        Self {
            maintenance_k: 1.4,
            intake_ci1: 0.025,
            intake_ci2: 1.7,
            lactation_intake_factor: 1.3,
            availability_coefficient: 0.0015,
            time_coefficient_a: 0.6,
            time_coefficient_b: 0.0013,
            quality_reference: 0.8,
            quality_slope: 1.7,
            protein_per_metabolic_kg: 0.0059,
            pregnant_energy_factor: 1.15,
            lactating_energy_factor: 1.6,
            pregnant_protein_factor: 1.2,
            lactating_protein_factor: 1.8,
            birth_weight_fraction: 0.07,
            growth_rate: 0.0157,
            reference_md: 10.0,
        }
    }

    pub fn sheep() -> Self {
        Self {
            maintenance_k: 1.0,
            intake_ci1: 0.04,
            intake_ci2: 1.7,
            lactation_intake_factor: 1.4,
            availability_coefficient: 0.002,
            time_coefficient_a: 0.6,
            time_coefficient_b: 0.0017,
            quality_reference: 0.8,
            quality_slope: 1.7,
            protein_per_metabolic_kg: 0.0065,
            pregnant_energy_factor: 1.2,
            lactating_energy_factor: 1.7,
            pregnant_protein_factor: 1.25,
            lactating_protein_factor: 1.9,
            birth_weight_fraction: 0.09,
            growth_rate: 0.0157,
            reference_md: 10.0,
        }
    }

    pub fn goat() -> Self {
        Self {
            maintenance_k: 1.1,
            intake_ci1: 0.042,
            ..Self::sheep()
        }
    }

    pub fn wildlife() -> Self {
        Self {
            maintenance_k: 1.2,
            intake_ci1: 0.03,
            lactation_intake_factor: 1.3,
            ..Self::cattle()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimalParams {
    pub cattle: SpeciesParams,
    pub sheep: SpeciesParams,
    pub goat: SpeciesParams,
    pub wildlife: SpeciesParams,
}

impl Default for AnimalParams {
    fn default() -> Self {
        Self {
            cattle: SpeciesParams::cattle(),
            sheep: SpeciesParams::sheep(),
            goat: SpeciesParams::goat(),
            wildlife: SpeciesParams::wildlife(),
        }
    }
}

impl AnimalParams {
    pub fn species(&self, species: Species) -> &SpeciesParams {
        match species {
            Species::Cattle => &self.cattle,
            Species::Sheep => &self.sheep,
            Species::Goat => &self.goat,
            Species::Wildlife => &self.wildlife,
        }
    }
}

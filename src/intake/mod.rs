//! Herbivore intake, diet selection and offtake (adapted from GRAZPLAN).

pub mod diet;
pub mod requirements;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{DietLimitingNutrient, YearMonth};
use crate::error::ModelError;
use crate::grazing::Offtake;
use crate::params::{ModelParams, SpeciesParams};
use crate::state::{PixelState, Pool};
use diet::{forage_quality, select_diet, ForageClass, PROTEIN_PER_N};

/// g m-2 per kg ha-1.
pub const KG_HA_TO_G_M2: f64 = 0.1;

const DAYS_PER_MONTH: f64 = 30.4375;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Cattle,
    Sheep,
    Goat,
    Wildlife,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeClass {
    Juvenile,
    Adult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproductiveStatus {
    #[default]
    Dry,
    Pregnant,
    Lactating,
}

/// Animals per hectare, either one value for the whole grid or a density band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stocking {
    Uniform { animals_per_ha: f64 },
    Band { density_band: String },
}

fn default_age_class() -> AgeClass {
    AgeClass::Adult
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Herd {
    pub name: String,
    pub species: Species,
    /// kg
    pub standard_reference_weight: f64,
    /// Liveweight (kg) at the start of the run; juveniles then follow the growth curve.
    pub body_weight: f64,
    #[serde(default = "default_age_class")]
    pub age_class: AgeClass,
    /// Age at the start of the run.
    pub age_months: u32,
    #[serde(default)]
    pub reproductive_status: ReproductiveStatus,
    /// Status by calendar month (1-12); months not listed use `reproductive_status`.
    #[serde(default)]
    pub status_schedule: BTreeMap<u32, ReproductiveStatus>,
    pub stocking: Stocking,
}

impl Herd {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.standard_reference_weight > 0.0) || !(self.body_weight > 0.0) {
            return Err(ModelError::Configuration(format!(
                "herd '{}' needs positive standard_reference_weight and body_weight",
                self.name
            )));
        }
        if let Some(month) = self.status_schedule.keys().find(|m| !(1..=12).contains(*m)) {
            return Err(ModelError::Configuration(format!(
                "herd '{}' schedules status for month {month}",
                self.name
            )));
        }
        if let Stocking::Uniform { animals_per_ha } = self.stocking {
            if !animals_per_ha.is_finite() || animals_per_ha < 0.0 {
                return Err(ModelError::Configuration(format!(
                    "herd '{}' has stocking density {animals_per_ha}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Requirements for the month `elapsed` months after the run start.
    pub fn month(&self, month: YearMonth, elapsed: u32, params: &ModelParams) -> HerdMonth {
        let species = params.animals.species(self.species);
        let age_months = self.age_months + elapsed;
        let weight = match self.age_class {
            AgeClass::Adult => self.body_weight,
            AgeClass::Juvenile => {
                let start = requirements::normal_weight(
                    self.standard_reference_weight,
                    self.age_months as f64 * DAYS_PER_MONTH,
                    species,
                );
                let now = requirements::normal_weight(
                    self.standard_reference_weight,
                    age_months as f64 * DAYS_PER_MONTH,
                    species,
                );
                // Keep the animal's own offset from the curve as it grows.
                (self.body_weight + now - start).max(1.0)
            }
        };
        let status = self
            .status_schedule
            .get(&month.month())
            .copied()
            .unwrap_or(self.reproductive_status);

        HerdMonth {
            species: self.species,
            weight,
            age_months,
            status,
            energy_requirement: requirements::energy_requirement(
                weight,
                age_months as f64,
                status,
                species,
            ),
            protein_requirement: requirements::protein_requirement(weight, status, species),
            potential_intake: requirements::potential_intake(
                weight,
                self.standard_reference_weight,
                status,
                species,
            ),
        }
    }
}

/// A herd's state and requirements for one month, shared read-only by workers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HerdMonth {
    pub species: Species,
    pub weight: f64,
    pub age_months: u32,
    pub status: ReproductiveStatus,
    /// MJ ME day-1
    pub energy_requirement: f64,
    /// kg CP day-1
    pub protein_requirement: f64,
    /// kg DM day-1
    pub potential_intake: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntakeOutcome {
    pub offtake: Offtake,
    /// kg DM animal-1 day-1, after capping.
    pub intake: f64,
    pub sufficiency: f64,
}

/// Crude protein fraction of live plus standing dead forage.
pub fn forage_crude_protein(pixel: &PixelState) -> f64 {
    let mass = pixel.forage_mass();
    if mass <= 0.0 {
        return 0.0;
    }
    (pixel.n(Pool::AboveLive) + pixel.n(Pool::StandingDead)) / mass * PROTEIN_PER_N
}

/// Diet selection, offtake and sufficiency for one pixel grazed at `density`
/// animals ha-1 for `days` days.
pub fn graze_pixel(
    pixel: &PixelState,
    herd: &HerdMonth,
    density: f64,
    days: u32,
    limiting: DietLimitingNutrient,
    management_threshold: f64,
    params: &ModelParams,
) -> IntakeOutcome {
    let species: &SpeciesParams = params.animals.species(herd.species);
    let pools = [Pool::AboveLive, Pool::StandingDead];
    let classes: Vec<ForageClass> = pools
        .iter()
        .map(|pool| ForageClass {
            biomass: pixel.mass(*pool) / KG_HA_TO_G_M2,
            quality: forage_quality(pixel.concentration(*pool).unwrap_or(0.0), &params.forage),
        })
        .collect();
    let relative = select_diet(&classes, species);

    let animal_days = density.max(0.0) * days as f64;
    let mut offtake: Vec<f64> = relative
        .iter()
        .zip(&pools)
        .map(|(r, pool)| {
            let wanted = r * herd.potential_intake * animal_days * KG_HA_TO_G_M2;
            wanted.min(pixel.mass(*pool))
        })
        .collect();
    let allowed = (pixel.forage_mass() - management_threshold * KG_HA_TO_G_M2).max(0.0);
    let total: f64 = offtake.iter().sum();
    if total > allowed {
        let scale = if total > 0.0 { allowed / total } else { 0.0 };
        offtake.iter_mut().for_each(|o| *o *= scale);
    }

    let per_animal_day = |g_m2: f64| {
        if animal_days > 0.0 {
            g_m2 / KG_HA_TO_G_M2 / animal_days
        } else {
            0.0
        }
    };
    let intake: Vec<f64> = offtake.iter().map(|o| per_animal_day(*o)).collect();
    let energy: f64 = intake
        .iter()
        .zip(&classes)
        .map(|(i, c)| i * c.quality.metabolizable_energy)
        .sum();
    let protein: f64 = intake
        .iter()
        .zip(&classes)
        .map(|(i, c)| i * c.quality.crude_protein)
        .sum();
    let energy_ratio = ratio(energy, herd.energy_requirement);
    let protein_ratio = ratio(protein, herd.protein_requirement);
    let sufficiency = match limiting {
        DietLimitingNutrient::Energy => energy_ratio,
        DietLimitingNutrient::Protein => protein_ratio,
        DietLimitingNutrient::MostLimiting => energy_ratio.min(protein_ratio),
    };

    IntakeOutcome {
        offtake: Offtake {
            live: offtake[0],
            standing_dead: offtake[1],
        },
        intake: intake.iter().sum(),
        sufficiency,
    }
}

fn ratio(achieved: f64, required: f64) -> f64 {
    if required > 0.0 {
        (achieved / required).max(0.0)
    } else {
        0.0
    }
}

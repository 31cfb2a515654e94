//! Forage quality and sequential-fill diet selection.

use crate::params::{ForageParams, SpeciesParams};

/// Crude protein per unit nitrogen.
pub const PROTEIN_PER_N: f64 = 6.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForageQuality {
    /// Crude protein fraction of dry matter.
    pub crude_protein: f64,
    pub digestibility: f64,
    /// MJ ME kg-1 DM
    pub metabolizable_energy: f64,
}

pub fn forage_quality(n_conc: f64, forage: &ForageParams) -> ForageQuality {
    let crude_protein = n_conc.max(0.0) * PROTEIN_PER_N;
    let digestibility = (forage.digestibility_intercept + forage.digestibility_slope * crude_protein)
        .clamp(forage.digestibility_min, forage.digestibility_max);
    ForageQuality {
        crude_protein,
        digestibility,
        metabolizable_energy: 17.0 * digestibility - 2.0,
    }
}

/// One class of standing forage on offer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForageClass {
    /// kg DM ha-1
    pub biomass: f64,
    pub quality: ForageQuality,
}

/// Relative intake of each class (fraction of intake capacity), in input order.
///
/// Classes are visited from most to least digestible. Each takes
/// `min(UC, UC * RR * RT)` of the unsatisfied capacity `UC`, where `RR`
/// saturates with biomass and `RT` is the grazing-time adjustment, and the
/// amount eaten is scaled by the quality factor `RQ`.
pub fn select_diet(classes: &[ForageClass], species: &SpeciesParams) -> Vec<f64> {
    let mut order: Vec<usize> = (0..classes.len()).collect();
    order.sort_by(|a, b| {
        classes[*b]
            .quality
            .digestibility
            .total_cmp(&classes[*a].quality.digestibility)
    });

    let mut relative = vec![0.0; classes.len()];
    let mut unsatisfied = 1.0_f64;
    for i in order {
        if unsatisfied <= 0.0 {
            break;
        }
        let class = &classes[i];
        let biomass = class.biomass.max(0.0);
        let availability = 1.0 - (-species.availability_coefficient * biomass).exp();
        let time = 1.0
            + species.time_coefficient_a
                * (-(species.time_coefficient_b * biomass).powi(2)).exp();
        let fill = unsatisfied.min(unsatisfied * availability * time);
        let quality = (1.0
            - species.quality_slope
                * (species.quality_reference - class.quality.digestibility).max(0.0))
        .clamp(0.0, 1.0);
        relative[i] = fill * quality;
        unsatisfied -= fill;
    }
    relative
}

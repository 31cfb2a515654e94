//! Pixel state arena: one array per state variable, indexed by pixel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::YearMonth;
use crate::error::{ModelError, PixelError};
use crate::grazing::Offtake;
use crate::params::{ModelParams, PlantParams, SiteParams};
use crate::raster::{is_nodata, Band, RasterError, RasterStore, NODATA};

pub const POOL_COUNT: usize = 8;

/// Bands the initial state is read from are prefixed with this.
pub const INITIAL_PREFIX: &str = "init";
/// Checkpoint and final state bands are prefixed with this.
pub const STATE_PREFIX: &str = "state";
pub const STATUS_BAND: &str = "pixel_status";

const MASS_TOLERANCE: f64 = 1e-9;
const CONCENTRATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    AboveLive,
    StandingDead,
    BelowLive,
    StructuralLitter,
    MetabolicLitter,
    SomActive,
    SomSlow,
    SomPassive,
}

impl Pool {
    pub const ALL: [Pool; POOL_COUNT] = [
        Pool::AboveLive,
        Pool::StandingDead,
        Pool::BelowLive,
        Pool::StructuralLitter,
        Pool::MetabolicLitter,
        Pool::SomActive,
        Pool::SomSlow,
        Pool::SomPassive,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Pool::AboveLive => "above_live",
            Pool::StandingDead => "standing_dead",
            Pool::BelowLive => "below_live",
            Pool::StructuralLitter => "structural_litter",
            Pool::MetabolicLitter => "metabolic_litter",
            Pool::SomActive => "som_active",
            Pool::SomSlow => "som_slow",
            Pool::SomPassive => "som_passive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelStatus {
    Ok,
    /// Input no-data; never simulated.
    NoData,
    /// Climate was clamped into range this month.
    ClampedInput,
    /// Climate was out of range this month; the pixel was left unchanged.
    DomainInput,
    /// An invariant broke; the pixel is excluded for the rest of the run.
    Invalid,
}

impl PixelStatus {
    pub fn code(self) -> f64 {
        match self {
            PixelStatus::Ok => 0.0,
            PixelStatus::NoData => 1.0,
            PixelStatus::ClampedInput => 2.0,
            PixelStatus::DomainInput => 3.0,
            PixelStatus::Invalid => 4.0,
        }
    }

    /// Pixels in these states are skipped by every monthly step.
    pub fn is_excluded(self) -> bool {
        matches!(self, PixelStatus::NoData | PixelStatus::Invalid)
    }
}

/// Working copy of one pixel. Masses in g m-2 dry matter, nitrogen in g N m-2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelState {
    pub mass: [f64; POOL_COUNT],
    pub nitrogen: [f64; POOL_COUNT],
    pub mineral_n: f64,
    /// Lignin fraction of structural litter.
    pub structural_lignin: f64,
    pub root_shoot: f64,
    /// Plant-available soil water carried between months (mm).
    pub soil_water: f64,
    pub grazing_multiplier: f64,
}

impl Default for PixelState {
    fn default() -> Self {
        Self {
            mass: [0.0; POOL_COUNT],
            nitrogen: [0.0; POOL_COUNT],
            mineral_n: 0.0,
            structural_lignin: 0.0,
            root_shoot: 1.0,
            soil_water: 0.0,
            grazing_multiplier: 1.0,
        }
    }
}

impl PixelState {
    pub fn mass(&self, pool: Pool) -> f64 {
        self.mass[pool.index()]
    }

    pub fn n(&self, pool: Pool) -> f64 {
        self.nitrogen[pool.index()]
    }

    /// N concentration (g N g-1), `None` for an empty pool.
    pub fn concentration(&self, pool: Pool) -> Option<f64> {
        let mass = self.mass(pool);
        (mass > 0.0).then(|| self.n(pool) / mass)
    }

    pub fn add(&mut self, pool: Pool, mass: f64, nitrogen: f64) {
        self.mass[pool.index()] += mass;
        self.nitrogen[pool.index()] += nitrogen;
    }

    /// Removes a fraction of a pool, returning the (mass, N) taken.
    pub fn take_fraction(&mut self, pool: Pool, fraction: f64) -> (f64, f64) {
        let i = pool.index();
        let mass = self.mass[i] * fraction;
        let nitrogen = self.nitrogen[i] * fraction;
        self.mass[i] -= mass;
        self.nitrogen[i] -= nitrogen;
        (mass, nitrogen)
    }

    pub fn total_mass(&self) -> f64 {
        self.mass.iter().sum()
    }

    /// Organic plus mineral nitrogen.
    pub fn total_nitrogen(&self) -> f64 {
        self.nitrogen.iter().sum::<f64>() + self.mineral_n
    }

    pub fn forage_mass(&self) -> f64 {
        self.mass(Pool::AboveLive) + self.mass(Pool::StandingDead)
    }

    pub fn check_invariants(&self, plant: &PlantParams) -> Result<(), PixelError> {
        for pool in Pool::ALL {
            let mass = self.mass(pool);
            let nitrogen = self.n(pool);
            if !mass.is_finite() || mass < -MASS_TOLERANCE {
                return Err(PixelError::InvariantViolation(format!(
                    "{} mass is {mass}",
                    pool.name()
                )));
            }
            if !nitrogen.is_finite() || nitrogen < -MASS_TOLERANCE {
                return Err(PixelError::InvariantViolation(format!(
                    "{} nitrogen is {nitrogen}",
                    pool.name()
                )));
            }
        }
        if !self.mineral_n.is_finite() || self.mineral_n < -MASS_TOLERANCE {
            return Err(PixelError::InvariantViolation(format!(
                "mineral nitrogen is {}",
                self.mineral_n
            )));
        }
        let bounds = [
            (Pool::AboveLive, plant.above_n_min, plant.above_n_max),
            (Pool::BelowLive, plant.below_n_min, plant.below_n_max),
        ];
        for (pool, min, max) in bounds {
            if let Some(conc) = self.concentration(pool) {
                if conc < min * (1.0 - CONCENTRATION_TOLERANCE)
                    || conc > max * (1.0 + CONCENTRATION_TOLERANCE)
                {
                    return Err(PixelError::InvariantViolation(format!(
                        "{} N concentration {conc:.5} outside [{min}, {max}]",
                        pool.name()
                    )));
                }
            }
        }
        if self.root_shoot < plant.root_shoot_min * (1.0 - CONCENTRATION_TOLERANCE)
            || self.root_shoot > plant.root_shoot_max * (1.0 + CONCENTRATION_TOLERANCE)
        {
            return Err(PixelError::InvariantViolation(format!(
                "root:shoot {} outside [{}, {}]",
                self.root_shoot, plant.root_shoot_min, plant.root_shoot_max
            )));
        }
        Ok(())
    }
}

/// Structure-of-arrays storage for every pixel in the grid.
#[derive(Debug, Clone)]
pub struct PixelStates {
    width: usize,
    height: usize,
    mass: [Vec<f64>; POOL_COUNT],
    nitrogen: [Vec<f64>; POOL_COUNT],
    mineral_n: Vec<f64>,
    structural_lignin: Vec<f64>,
    root_shoot: Vec<f64>,
    soil_water: Vec<f64>,
    grazing_multiplier: Vec<f64>,
    pending_offtake: Vec<Offtake>,
    status: Vec<PixelStatus>,
}

impl PixelStates {
    pub fn new(width: usize, height: usize) -> Self {
        let len = width * height;
        Self {
            width,
            height,
            mass: std::array::from_fn(|_| vec![0.0; len]),
            nitrogen: std::array::from_fn(|_| vec![0.0; len]),
            mineral_n: vec![0.0; len],
            structural_lignin: vec![0.0; len],
            root_shoot: vec![1.0; len],
            soil_water: vec![0.0; len],
            grazing_multiplier: vec![1.0; len],
            pending_offtake: vec![Offtake::default(); len],
            status: vec![PixelStatus::Ok; len],
        }
    }

    /// Reads the `init_*` bands. Every band must exist and match the grid shape;
    /// a no-data value in any band marks the pixel `NoData`.
    pub fn from_store(
        store: &impl RasterStore,
        width: usize,
        height: usize,
        plant: &PlantParams,
    ) -> Result<Self, ModelError> {
        let mut states = Self::new(width, height);
        for (name, values) in states.persistent_variables_mut() {
            let band = read_static(store, &format!("{INITIAL_PREFIX}_{name}"), width, height)?;
            values.copy_from_slice(band.values());
        }

        for i in 0..states.len() {
            if states.persistent_values(i).any(is_nodata) {
                states.mark_nodata(i);
                continue;
            }
            let pixel = states.get(i);
            if pixel.mass.iter().chain(pixel.nitrogen.iter()).any(|v| *v < 0.0)
                || pixel.mineral_n < 0.0
                || pixel.soil_water < 0.0
                || !(0.0..=1.0).contains(&pixel.structural_lignin)
            {
                return Err(ModelError::Configuration(format!(
                    "initial state at pixel {i} has negative pools or lignin outside [0, 1]"
                )));
            }
            pixel.check_invariants(plant).map_err(|err| {
                ModelError::Configuration(format!("initial state at pixel {i}: {err}"))
            })?;
        }
        Ok(states)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> PixelState {
        PixelState {
            mass: std::array::from_fn(|p| self.mass[p][i]),
            nitrogen: std::array::from_fn(|p| self.nitrogen[p][i]),
            mineral_n: self.mineral_n[i],
            structural_lignin: self.structural_lignin[i],
            root_shoot: self.root_shoot[i],
            soil_water: self.soil_water[i],
            grazing_multiplier: self.grazing_multiplier[i],
        }
    }

    pub fn status(&self, i: usize) -> PixelStatus {
        self.status[i]
    }

    pub fn statuses(&self) -> &[PixelStatus] {
        &self.status
    }

    pub fn pending_offtake(&self, i: usize) -> Offtake {
        self.pending_offtake[i]
    }

    pub fn mark_nodata(&mut self, i: usize) {
        self.status[i] = PixelStatus::NoData;
    }

    pub fn chunks_mut(&mut self, chunk_size: usize) -> Vec<PixelChunk<'_>> {
        let len = self.len();
        let size = chunk_size.max(1);
        let mut mass: [&mut [f64]; POOL_COUNT] = self.mass.each_mut().map(|v| v.as_mut_slice());
        let mut nitrogen: [&mut [f64]; POOL_COUNT] =
            self.nitrogen.each_mut().map(|v| v.as_mut_slice());
        let mut mineral_n = self.mineral_n.as_mut_slice();
        let mut structural_lignin = self.structural_lignin.as_mut_slice();
        let mut root_shoot = self.root_shoot.as_mut_slice();
        let mut soil_water = self.soil_water.as_mut_slice();
        let mut grazing_multiplier = self.grazing_multiplier.as_mut_slice();
        let mut pending_offtake = self.pending_offtake.as_mut_slice();
        let mut status = self.status.as_mut_slice();

        let mut chunks = Vec::with_capacity(len.div_ceil(size));
        let mut offset = 0;
        while offset < len {
            let n = size.min(len - offset);
            chunks.push(PixelChunk {
                offset,
                mass: mass.each_mut().map(|s| take_front(s, n)),
                nitrogen: nitrogen.each_mut().map(|s| take_front(s, n)),
                mineral_n: take_front(&mut mineral_n, n),
                structural_lignin: take_front(&mut structural_lignin, n),
                root_shoot: take_front(&mut root_shoot, n),
                soil_water: take_front(&mut soil_water, n),
                grazing_multiplier: take_front(&mut grazing_multiplier, n),
                pending_offtake: take_front(&mut pending_offtake, n),
                status: take_front(&mut status, n),
            });
            offset += n;
        }
        chunks
    }

    /// Writes every state variable plus the status band as `<prefix>_<variable>`.
    pub fn write_bands(
        &self,
        store: &mut impl RasterStore,
        prefix: &str,
        month: Option<YearMonth>,
    ) -> Result<(), RasterError> {
        for (name, values) in self.output_variables() {
            let data = values
                .iter()
                .zip(&self.status)
                .map(|(v, s)| if *s == PixelStatus::NoData { NODATA } else { *v })
                .collect();
            store.write_band(
                &format!("{prefix}_{name}"),
                month,
                &Band::new(self.width, self.height, data),
            )?;
        }
        let status = self.status.iter().map(|s| s.code()).collect();
        store.write_band(
            &format!("{prefix}_status"),
            month,
            &Band::new(self.width, self.height, status),
        )
    }

    fn persistent_variables_mut(&mut self) -> Vec<(String, &mut Vec<f64>)> {
        let mut vars: Vec<(String, &mut Vec<f64>)> = Vec::with_capacity(2 * POOL_COUNT + 4);
        for (pool, values) in Pool::ALL.iter().zip(self.mass.iter_mut()) {
            vars.push((format!("{}_mass", pool.name()), values));
        }
        for (pool, values) in Pool::ALL.iter().zip(self.nitrogen.iter_mut()) {
            vars.push((format!("{}_n", pool.name()), values));
        }
        vars.push(("mineral_n".into(), &mut self.mineral_n));
        vars.push(("structural_lignin".into(), &mut self.structural_lignin));
        vars.push(("root_shoot".into(), &mut self.root_shoot));
        vars.push(("soil_water".into(), &mut self.soil_water));
        vars
    }

    fn output_variables(&self) -> Vec<(String, &Vec<f64>)> {
        let mut vars: Vec<(String, &Vec<f64>)> = Vec::with_capacity(2 * POOL_COUNT + 5);
        for (pool, values) in Pool::ALL.iter().zip(self.mass.iter()) {
            vars.push((format!("{}_mass", pool.name()), values));
        }
        for (pool, values) in Pool::ALL.iter().zip(self.nitrogen.iter()) {
            vars.push((format!("{}_n", pool.name()), values));
        }
        vars.push(("mineral_n".into(), &self.mineral_n));
        vars.push(("structural_lignin".into(), &self.structural_lignin));
        vars.push(("root_shoot".into(), &self.root_shoot));
        vars.push(("soil_water".into(), &self.soil_water));
        vars.push(("grazing_multiplier".into(), &self.grazing_multiplier));
        vars
    }

    fn persistent_values(&self, i: usize) -> impl Iterator<Item = f64> + '_ {
        self.mass
            .iter()
            .chain(self.nitrogen.iter())
            .chain([
                &self.mineral_n,
                &self.structural_lignin,
                &self.root_shoot,
                &self.soil_water,
            ])
            .map(move |values| values[i])
    }
}

/// Names of every band `PixelStates::from_store` requires.
pub fn initial_band_names() -> Vec<String> {
    let mut names = Vec::with_capacity(2 * POOL_COUNT + 4);
    for pool in Pool::ALL {
        names.push(format!("{INITIAL_PREFIX}_{}_mass", pool.name()));
        names.push(format!("{INITIAL_PREFIX}_{}_n", pool.name()));
    }
    for name in ["mineral_n", "structural_lignin", "root_shoot", "soil_water"] {
        names.push(format!("{INITIAL_PREFIX}_{name}"));
    }
    names
}

fn take_front<'a, T>(slice: &mut &'a mut [T], n: usize) -> &'a mut [T] {
    let whole = std::mem::take(slice);
    let (head, tail) = whole.split_at_mut(n);
    *slice = tail;
    head
}

fn read_static(
    store: &impl RasterStore,
    name: &str,
    width: usize,
    height: usize,
) -> Result<Band, ModelError> {
    store
        .read_band_with_shape(name, None, width, height)
        .map_err(|err| match err {
            RasterError::Missing(_) | RasterError::ShapeMismatch { .. } => {
                ModelError::Configuration(err.to_string())
            }
            other => ModelError::Raster(other),
        })
}

/// A disjoint, mutable window onto `PixelStates`. Each chunk is handed to
/// exactly one worker per month.
pub struct PixelChunk<'a> {
    offset: usize,
    mass: [&'a mut [f64]; POOL_COUNT],
    nitrogen: [&'a mut [f64]; POOL_COUNT],
    mineral_n: &'a mut [f64],
    structural_lignin: &'a mut [f64],
    root_shoot: &'a mut [f64],
    soil_water: &'a mut [f64],
    grazing_multiplier: &'a mut [f64],
    pending_offtake: &'a mut [Offtake],
    status: &'a mut [PixelStatus],
}

impl PixelChunk<'_> {
    /// Grid index of the first pixel in the chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    pub fn load(&self, i: usize) -> PixelState {
        PixelState {
            mass: std::array::from_fn(|p| self.mass[p][i]),
            nitrogen: std::array::from_fn(|p| self.nitrogen[p][i]),
            mineral_n: self.mineral_n[i],
            structural_lignin: self.structural_lignin[i],
            root_shoot: self.root_shoot[i],
            soil_water: self.soil_water[i],
            grazing_multiplier: self.grazing_multiplier[i],
        }
    }

    pub fn store(&mut self, i: usize, pixel: &PixelState) {
        for p in 0..POOL_COUNT {
            self.mass[p][i] = pixel.mass[p];
            self.nitrogen[p][i] = pixel.nitrogen[p];
        }
        self.mineral_n[i] = pixel.mineral_n;
        self.structural_lignin[i] = pixel.structural_lignin;
        self.root_shoot[i] = pixel.root_shoot;
        self.soil_water[i] = pixel.soil_water;
        self.grazing_multiplier[i] = pixel.grazing_multiplier;
    }

    pub fn status(&self, i: usize) -> PixelStatus {
        self.status[i]
    }

    pub fn set_status(&mut self, i: usize, status: PixelStatus) {
        self.status[i] = status;
    }

    pub fn pending_offtake(&self, i: usize) -> Offtake {
        self.pending_offtake[i]
    }

    pub fn set_pending_offtake(&mut self, i: usize, offtake: Offtake) {
        self.pending_offtake[i] = offtake;
    }
}

/// Static soil description of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilProperties {
    pub sand: f64,
    pub silt: f64,
    pub clay: f64,
    /// g cm-3
    pub bulk_density: f64,
    pub depth_cm: f64,
    /// Legume share of aboveground biomass (0-1).
    pub proportion_legume: f64,
}

impl Default for SoilProperties {
    fn default() -> Self {
        Self {
            sand: 0.4,
            silt: 0.4,
            clay: 0.2,
            bulk_density: 1.3,
            depth_cm: 60.0,
            proportion_legume: 0.0,
        }
    }
}

pub const SOIL_SAND: &str = "soil_sand";
pub const SOIL_SILT: &str = "soil_silt";
pub const SOIL_CLAY: &str = "soil_clay";
pub const SOIL_BULK_DENSITY: &str = "soil_bulk_density";
pub const SOIL_DEPTH: &str = "soil_depth";
pub const PROPORTION_LEGUME: &str = "proportion_legume";
pub const SITE_INDEX: &str = "site_index";

/// Read-only soil arrays shared by every worker.
#[derive(Debug, Clone)]
pub struct SoilGrid {
    sand: Vec<f64>,
    silt: Vec<f64>,
    clay: Vec<f64>,
    bulk_density: Vec<f64>,
    depth_cm: Vec<f64>,
    proportion_legume: Vec<f64>,
}

impl SoilGrid {
    /// Reads the soil bands and marks pixels with no-data soil in `states`.
    pub fn from_store(
        store: &impl RasterStore,
        states: &mut PixelStates,
    ) -> Result<Self, ModelError> {
        let (width, height) = (states.width(), states.height());
        let read = |name: &str| -> Result<Vec<f64>, ModelError> {
            Ok(read_static(store, name, width, height)?.into_values())
        };
        let proportion_legume = if store.has_band(PROPORTION_LEGUME, None) {
            read(PROPORTION_LEGUME)?
        } else {
            vec![0.0; width * height]
        };
        let grid = Self {
            sand: read(SOIL_SAND)?,
            silt: read(SOIL_SILT)?,
            clay: read(SOIL_CLAY)?,
            bulk_density: read(SOIL_BULK_DENSITY)?,
            depth_cm: read(SOIL_DEPTH)?,
            proportion_legume,
        };

        for i in 0..states.len() {
            let values = [
                grid.sand[i],
                grid.silt[i],
                grid.clay[i],
                grid.bulk_density[i],
                grid.depth_cm[i],
            ];
            if values.into_iter().any(is_nodata) {
                states.mark_nodata(i);
                continue;
            }
            let soil = grid.get(i);
            let fractions_ok = [soil.sand, soil.silt, soil.clay, soil.proportion_legume]
                .iter()
                .all(|f| (0.0..=1.0).contains(f));
            if !fractions_ok || soil.bulk_density <= 0.0 || soil.depth_cm <= 0.0 {
                return Err(ModelError::Configuration(format!(
                    "soil properties at pixel {i} out of range: {soil:?}"
                )));
            }
        }
        Ok(grid)
    }

    pub fn get(&self, i: usize) -> SoilProperties {
        let legume = self.proportion_legume[i];
        SoilProperties {
            sand: self.sand[i],
            silt: self.silt[i],
            clay: self.clay[i],
            bulk_density: self.bulk_density[i],
            depth_cm: self.depth_cm[i],
            proportion_legume: if is_nodata(legume) { 0.0 } else { legume },
        }
    }
}

/// Site parameters resolved per pixel. Without a `site_index` band every
/// pixel shares `ModelParams::site`.
#[derive(Debug, Clone)]
pub struct SiteGrid {
    sites: Vec<SiteParams>,
    index: Vec<usize>,
}

impl SiteGrid {
    /// Reads the optional `site_index` band; no-data entries mark the pixel
    /// no-data in `states`.
    pub fn from_store(
        store: &impl RasterStore,
        states: &mut PixelStates,
        params: &ModelParams,
    ) -> Result<Self, ModelError> {
        let mut sites = vec![params.site.clone()];
        let mut index = vec![0; states.len()];
        if !store.has_band(SITE_INDEX, None) {
            return Ok(Self { sites, index });
        }
        let codes = read_static(store, SITE_INDEX, states.width(), states.height())?;
        let mut slots = BTreeMap::new();
        for (i, &code) in codes.values().iter().enumerate() {
            if is_nodata(code) {
                states.mark_nodata(i);
                continue;
            }
            if code < 0.0 || code.fract() != 0.0 || code > u32::MAX as f64 {
                return Err(ModelError::Configuration(format!(
                    "site_index at pixel {i} is not a site code: {code}"
                )));
            }
            let key = code as u32;
            let site = params.sites.get(&key).ok_or_else(|| {
                ModelError::Configuration(format!(
                    "site_index at pixel {i} names site {key}, which has no parameters"
                ))
            })?;
            index[i] = *slots.entry(key).or_insert_with(|| {
                sites.push(site.clone());
                sites.len() - 1
            });
        }
        Ok(Self { sites, index })
    }

    pub fn get(&self, i: usize) -> &SiteParams {
        &self.sites[self.index[i]]
    }
}

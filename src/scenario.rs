use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::climate::Climatology;
use crate::config::RunConfig;
use crate::engine::{Simulation, SimulationBuilder};
use crate::intake::Herd;
use crate::params::ModelParams;
use crate::raster::{Band, RasterStore, NODATA};
use crate::runner::TaskRunner;
use crate::spatial::{Grid, PixelPos};
use crate::state::{
    PixelState, Pool, SoilProperties, INITIAL_PREFIX, PROPORTION_LEGUME, SOIL_BULK_DENSITY,
    SITE_INDEX, SOIL_CLAY, SOIL_DEPTH, SOIL_SAND, SOIL_SILT,
};

fn default_root_shoot() -> f64 {
    1.5
}

fn default_structural_lignin() -> f64 {
    0.2
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoolInit {
    pub mass: f64,
    pub n: f64,
}

/// Uniform starting state for every pixel.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialState {
    #[serde(default)]
    pub pools: BTreeMap<Pool, PoolInit>,
    #[serde(default)]
    pub mineral_n: f64,
    #[serde(default = "default_structural_lignin")]
    pub structural_lignin: f64,
    #[serde(default = "default_root_shoot")]
    pub root_shoot: f64,
    #[serde(default)]
    pub soil_water: f64,
}

impl InitialState {
    pub fn to_pixel(&self) -> PixelState {
        let mut pixel = PixelState {
            mineral_n: self.mineral_n,
            structural_lignin: self.structural_lignin,
            root_shoot: self.root_shoot,
            soil_water: self.soil_water,
            ..PixelState::default()
        };
        for (pool, init) in &self.pools {
            pixel.add(*pool, init.mass, init.n);
        }
        pixel
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub grid: Grid,
    pub run: RunConfig,
    #[serde(default)]
    pub soil: SoilProperties,
    pub initial_state: InitialState,
    pub climate: Climatology,
    #[serde(default)]
    pub herds: Vec<Herd>,
    /// Stocking density bands (animals ha-1, row-major) referenced by herds.
    #[serde(default)]
    pub density_bands: BTreeMap<String, Vec<f64>>,
    /// Site codes (row-major) selecting entries of `parameters.sites`.
    #[serde(default)]
    pub site_index: Option<Vec<f64>>,
    /// Pixels whose soil is written as no-data.
    #[serde(default)]
    pub nodata_pixels: Vec<PixelPos>,
    #[serde(default)]
    pub parameters: ModelParams,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    /// Shortens or extends the run to `months` months from its start.
    pub fn with_months(mut self, months: Option<u32>) -> Self {
        if let Some(months) = months {
            self.run.end_month = self.run.start_month.add_months(months);
        }
        self
    }

    /// Writes the initial state, soil, climate and stocking bands the
    /// simulation reads.
    pub fn seed_store(&self, store: &mut impl RasterStore) -> Result<()> {
        let Grid { width, height } = self.grid;
        let pixel = self.initial_state.to_pixel();
        let filled = |value: f64| Band::filled(width, height, value);

        for pool in Pool::ALL {
            store.write_band(
                &format!("{INITIAL_PREFIX}_{}_mass", pool.name()),
                None,
                &filled(pixel.mass(pool)),
            )?;
            store.write_band(
                &format!("{INITIAL_PREFIX}_{}_n", pool.name()),
                None,
                &filled(pixel.n(pool)),
            )?;
        }
        for (name, value) in [
            ("mineral_n", pixel.mineral_n),
            ("structural_lignin", pixel.structural_lignin),
            ("root_shoot", pixel.root_shoot),
            ("soil_water", pixel.soil_water),
        ] {
            store.write_band(&format!("{INITIAL_PREFIX}_{name}"), None, &filled(value))?;
        }

        let mut sand = filled(self.soil.sand);
        for pos in &self.nodata_pixels {
            let index = self
                .grid
                .index(*pos)
                .with_context(|| format!("no-data pixel ({}, {}) is outside the grid", pos.x, pos.y))?;
            sand.values_mut()[index] = NODATA;
        }
        store.write_band(SOIL_SAND, None, &sand)?;
        store.write_band(SOIL_SILT, None, &filled(self.soil.silt))?;
        store.write_band(SOIL_CLAY, None, &filled(self.soil.clay))?;
        store.write_band(SOIL_BULK_DENSITY, None, &filled(self.soil.bulk_density))?;
        store.write_band(SOIL_DEPTH, None, &filled(self.soil.depth_cm))?;
        store.write_band(PROPORTION_LEGUME, None, &filled(self.soil.proportion_legume))?;

        for (name, values) in &self.density_bands {
            let band = Band::try_new(width, height, values.clone())
                .with_context(|| format!("density band '{name}'"))?;
            store.write_band(name, None, &band)?;
        }
        if let Some(codes) = &self.site_index {
            let band = Band::try_new(width, height, codes.clone()).context("site_index band")?;
            store.write_band(SITE_INDEX, None, &band)?;
        }

        self.climate
            .write_bands(store, width, height, self.run.start_month, self.run.end_month)?;
        Ok(())
    }

    pub fn build_simulation<S: RasterStore, R: TaskRunner>(
        &self,
        store: S,
        runner: R,
    ) -> Result<Simulation<S, R>> {
        let simulation = SimulationBuilder::new(self.name.clone(), self.grid, self.run.clone())
            .with_params(self.parameters.clone())
            .with_herds(self.herds.iter().cloned())
            .build(store, runner)
            .with_context(|| format!("Invalid scenario '{}'", self.name))?;
        Ok(simulation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::MemoryRasterStore;

    const MINIMAL: &str = r#"
name: minimal
grid: { width: 2, height: 1 }
run:
  start_month: "2016-01"
  end_month: "2016-03"
initial_state:
  pools:
    above_live: { mass: 50.0, n: 0.75 }
    below_live: { mass: 100.0, n: 0.75 }
  mineral_n: 1.0
climate:
  precip: [10, 10, 20, 30, 50, 60, 60, 50, 30, 20, 10, 10]
  tmin: [-5, -4, 0, 4, 8, 12, 14, 13, 9, 4, 0, -4]
  tmax: [5, 6, 10, 15, 20, 25, 28, 27, 22, 15, 8, 4]
nodata_pixels:
  - { x: 1, y: 0 }
"#;

    #[test]
    fn minimal_scenario_fills_defaults() {
        let scenario: Scenario = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(scenario.grid, Grid::new(2, 1));
        assert_eq!(scenario.initial_state.root_shoot, 1.5);
        assert_eq!(scenario.soil, SoilProperties::default());
        assert!(scenario.herds.is_empty());
        let pixel = scenario.initial_state.to_pixel();
        assert_eq!(pixel.mass(Pool::AboveLive), 50.0);
    }

    #[test]
    fn seeding_writes_every_input_band() {
        let scenario: Scenario = serde_yaml::from_str(MINIMAL).unwrap();
        let mut store = MemoryRasterStore::new();
        scenario.seed_store(&mut store).unwrap();
        for name in crate::state::initial_band_names() {
            assert!(store.has_band(&name, None), "missing {name}");
        }
        assert_eq!(store.months_of("precip").len(), 2);
        let sand = store.read_band(SOIL_SAND, None).unwrap();
        assert_eq!(sand.values(), &[0.4, NODATA]);
    }

    #[test]
    fn months_override_moves_end() {
        let scenario: Scenario = serde_yaml::from_str(MINIMAL).unwrap();
        let scenario = scenario.with_months(Some(12));
        assert_eq!(scenario.run.end_month.to_string(), "2017-01");
    }

    #[test]
    fn loader_reports_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let err = ScenarioLoader::new(temp.path()).load("absent.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read scenario file"));
    }
}

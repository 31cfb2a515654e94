pub mod century;
pub mod climate;
pub mod config;
pub mod engine;
pub mod error;
pub mod grazing;
pub mod intake;
pub mod output;
pub mod params;
pub mod raster;
pub mod runner;
pub mod scenario;
pub mod spatial;
pub mod state;

pub use config::{RunConfig, YearMonth};
pub use engine::{CancelToken, Simulation, SimulationBuilder, SimulationState};
pub use error::{ModelError, PixelError};
pub use scenario::{Scenario, ScenarioLoader};

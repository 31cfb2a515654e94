//! Simulation controller: initialisation, the monthly step and run completion.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::century;
use crate::climate::{ClimateBands, MonthlyClimate};
use crate::config::{PixelErrorPolicy, RunConfig, YearMonth};
use crate::error::{ModelError, PixelError};
use crate::grazing::{apply_offtake, Offtake};
use crate::intake::{self, Herd, HerdMonth, IntakeOutcome, Stocking, KG_HA_TO_G_M2};
use crate::output::{write_monthly, MonthSummary, MonthlyRecord, RunSummary};
use crate::params::ModelParams;
use crate::raster::{is_nodata, RasterError, RasterStore};
use crate::runner::TaskRunner;
use crate::spatial::Grid;
use crate::state::{
    PixelChunk, PixelState, PixelStates, PixelStatus, SiteGrid, SoilGrid, STATE_PREFIX,
};

/// Cooperative cancellation flag, checked at month boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimulationState {
    Uninitialized,
    Initialized,
    /// The next month to simulate.
    Running(YearMonth),
    Completed,
    Failed(String),
    Cancelled,
}

impl SimulationState {
    pub fn label(&self) -> &'static str {
        match self {
            SimulationState::Uninitialized => "uninitialized",
            SimulationState::Initialized => "initialized",
            SimulationState::Running(_) => "running",
            SimulationState::Completed => "completed",
            SimulationState::Failed(_) => "failed",
            SimulationState::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SimulationState::Completed | SimulationState::Failed(_) | SimulationState::Cancelled
        )
    }
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationState::Running(month) => write!(f, "running ({month})"),
            SimulationState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// The herd grazing a pixel and its stocking density there (animals ha-1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HerdAssignment {
    pub herd: usize,
    pub density: f64,
}

pub struct SimulationBuilder {
    name: String,
    grid: Grid,
    run: RunConfig,
    params: ModelParams,
    herds: Vec<Herd>,
    cancel: CancelToken,
}

impl SimulationBuilder {
    pub fn new(name: impl Into<String>, grid: Grid, run: RunConfig) -> Self {
        Self {
            name: name.into(),
            grid,
            run,
            params: ModelParams::default(),
            herds: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_herd(mut self, herd: Herd) -> Self {
        self.herds.push(herd);
        self
    }

    pub fn with_herds(mut self, herds: impl IntoIterator<Item = Herd>) -> Self {
        self.herds.extend(herds);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build<S: RasterStore, R: TaskRunner>(
        self,
        store: S,
        runner: R,
    ) -> Result<Simulation<S, R>, ModelError> {
        self.run.validate()?;
        self.params.validate()?;
        if self.grid.is_empty() {
            return Err(ModelError::Configuration("grid has no pixels".into()));
        }
        for herd in &self.herds {
            herd.validate()?;
        }
        Ok(Simulation {
            name: self.name,
            grid: self.grid,
            month: self.run.start_month,
            run: self.run,
            params: Arc::new(self.params),
            herds: self.herds,
            cancel: self.cancel,
            store,
            runner,
            state: SimulationState::Uninitialized,
            landscape: None,
            summaries: Vec::new(),
        })
    }
}

/// Everything read at initialisation that the monthly step mutates or shares.
struct Landscape {
    pixels: PixelStates,
    soil: SoilGrid,
    sites: SiteGrid,
    assignments: Vec<Option<HerdAssignment>>,
}

pub struct Simulation<S, R> {
    name: String,
    grid: Grid,
    run: RunConfig,
    params: Arc<ModelParams>,
    herds: Vec<Herd>,
    cancel: CancelToken,
    store: S,
    runner: R,
    state: SimulationState,
    landscape: Option<Landscape>,
    /// Next month to simulate.
    month: YearMonth,
    summaries: Vec<MonthSummary>,
}

impl<S: RasterStore, R: TaskRunner> Simulation<S, R> {
    /// Reads initial state, soil, sites and stocking, and checks that climate
    /// exists for every month of the run. Every required band must be present
    /// with the grid's shape.
    pub fn initialize(&mut self) -> Result<(), ModelError> {
        if self.state != SimulationState::Uninitialized {
            return Err(self.invalid("initialize"));
        }
        match self.load_landscape() {
            Ok(landscape) => {
                self.landscape = Some(landscape);
                self.state = SimulationState::Initialized;
                Ok(())
            }
            Err(err) => {
                log::error!("Run '{}' failed to initialize: {err}", self.name);
                self.state = SimulationState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn load_landscape(&self) -> Result<Landscape, ModelError> {
        let (width, height) = (self.grid.width, self.grid.height);
        let mut pixels = PixelStates::from_store(&self.store, width, height, &self.params.plant)?;
        let soil = SoilGrid::from_store(&self.store, &mut pixels)?;
        let sites = SiteGrid::from_store(&self.store, &mut pixels, &self.params)?;
        let assignments = self.assign_herds()?;
        for offset in 0..self.run.total_months() {
            let month = self.run.start_month.add_months(offset);
            ClimateBands::read(&self.store, month, width, height)?;
        }
        let nodata = pixels
            .statuses()
            .iter()
            .filter(|s| **s == PixelStatus::NoData)
            .count();
        log::info!(
            "Initialized '{}': {}x{} pixels ({} no-data), {} herd(s), {} to {}",
            self.name,
            width,
            height,
            nodata,
            self.herds.len(),
            self.run.start_month,
            self.run.end_month
        );
        Ok(Landscape {
            pixels,
            soil,
            sites,
            assignments,
        })
    }

    /// Advances one month, or completes the run when no months remain.
    /// Returns the month's summary, or `None` when the step finished the run
    /// without simulating a month.
    pub fn step(&mut self) -> Result<Option<MonthSummary>, ModelError> {
        match self.state {
            SimulationState::Initialized | SimulationState::Running(_) => {}
            _ => return Err(self.invalid("step")),
        }
        if self.month >= self.run.end_month {
            self.finish()?;
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            log::warn!("Run '{}' cancelled before {}", self.name, self.month);
            self.state = SimulationState::Cancelled;
            return Ok(None);
        }
        match self.advance_month() {
            Ok(summary) => {
                self.month = self.month.next();
                self.state = SimulationState::Running(self.month);
                if self.month >= self.run.end_month {
                    self.finish()?;
                }
                Ok(Some(summary))
            }
            Err(err) => {
                log::error!("Run '{}' failed in {}: {err}", self.name, self.month);
                self.state = SimulationState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Initialises if needed, then steps until the run completes or is cancelled.
    pub fn run(&mut self) -> Result<(), ModelError> {
        if self.state == SimulationState::Uninitialized {
            self.initialize()?;
        }
        while !self.state.is_finished() {
            self.step()?;
        }
        Ok(())
    }

    fn advance_month(&mut self) -> Result<MonthSummary, ModelError> {
        let start = Instant::now();
        let month = self.month;
        let elapsed = self.run.start_month.months_until(month);
        let (width, height) = (self.grid.width, self.grid.height);
        let climate = ClimateBands::read(&self.store, month, width, height)?;
        let herds: Vec<HerdMonth> = self
            .herds
            .iter()
            .map(|herd| herd.month(month, elapsed, &self.params))
            .collect();
        for (herd, req) in self.herds.iter().zip(&herds) {
            log::debug!(
                "{month} herd '{}': {:.1} kg, {:.1} MJ ME/day, {:.3} kg CP/day, capacity {:.2} kg DM/day",
                herd.name,
                req.weight,
                req.energy_requirement,
                req.protein_requirement,
                req.potential_intake
            );
        }

        let landscape = self
            .landscape
            .as_mut()
            .ok_or_else(|| ModelError::Configuration("simulation not initialized".into()))?;
        let ctx = MonthContext {
            month,
            days: month.days(),
            grid: self.grid,
            climate: &climate,
            soil: &landscape.soil,
            sites: &landscape.sites,
            assignments: &landscape.assignments,
            herds: &herds,
            params: &self.params,
            run: &self.run,
        };
        let chunks = landscape.pixels.chunks_mut(self.run.chunk_size);
        let results = self
            .runner
            .join_all(chunks, |chunk| simulate_chunk(chunk, &ctx));

        let mut records = Vec::with_capacity(self.grid.len());
        for result in results {
            records.extend(result?);
        }
        write_monthly(&mut self.store, width, height, month, &records)?;

        let completed = elapsed + 1;
        let interval = self.run.checkpoint_interval_months;
        let checkpoint_due = interval > 0 && completed % interval == 0;
        if self.run.save_state_bands || checkpoint_due {
            landscape
                .pixels
                .write_bands(&mut self.store, STATE_PREFIX, Some(month))?;
            if checkpoint_due {
                log::info!("Checkpoint written for {month}");
            }
        }

        let summary =
            MonthSummary::from_records(month, &records, start.elapsed().as_secs_f64() * 1_000.0);
        log::info!(
            "{month}: {} pixels, mean forage {} kg/ha, mean sufficiency {}, {} flagged ({:.1} ms)",
            summary.simulated_pixels,
            format_mean(summary.mean_forage_biomass),
            format_mean(summary.mean_diet_sufficiency),
            summary.flagged_pixels,
            summary.duration_ms
        );
        self.summaries.push(summary.clone());
        Ok(summary)
    }

    fn finish(&mut self) -> Result<(), ModelError> {
        if let Some(landscape) = &self.landscape {
            landscape
                .pixels
                .write_bands(&mut self.store, STATE_PREFIX, None)?;
        }
        log::info!(
            "Run '{}' completed after {} month(s)",
            self.name,
            self.summaries.len()
        );
        self.state = SimulationState::Completed;
        Ok(())
    }

    fn assign_herds(&self) -> Result<Vec<Option<HerdAssignment>>, ModelError> {
        let len = self.grid.len();
        let mut assignments = vec![None; len];
        if !self.run.grazing_enabled {
            return Ok(assignments);
        }
        for (index, herd) in self.herds.iter().enumerate() {
            let densities = match &herd.stocking {
                Stocking::Uniform { animals_per_ha } => vec![*animals_per_ha; len],
                Stocking::Band { density_band } => self
                    .store
                    .read_band_with_shape(density_band, None, self.grid.width, self.grid.height)
                    .map_err(|err| match err {
                        RasterError::Missing(_) | RasterError::ShapeMismatch { .. } => {
                            ModelError::Configuration(format!(
                                "herd '{}' stocking: {err}",
                                herd.name
                            ))
                        }
                        other => ModelError::Raster(other),
                    })?
                    .into_values(),
            };
            for (pixel, density) in densities.into_iter().enumerate() {
                if is_nodata(density) || density == 0.0 {
                    continue;
                }
                if density < 0.0 {
                    return Err(ModelError::Configuration(format!(
                        "herd '{}' has negative stocking density {density} at pixel {pixel}",
                        herd.name
                    )));
                }
                if let Some(existing) = assignments[pixel] {
                    let other: &Herd = &self.herds[existing.herd];
                    return Err(ModelError::Configuration(format!(
                        "herds '{}' and '{}' both graze pixel {pixel}",
                        other.name, herd.name
                    )));
                }
                assignments[pixel] = Some(HerdAssignment {
                    herd: index,
                    density,
                });
            }
        }
        Ok(assignments)
    }

    fn invalid(&self, action: &'static str) -> ModelError {
        ModelError::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// The next month to be simulated.
    pub fn current_month(&self) -> YearMonth {
        self.month
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn pixels(&self) -> Option<&PixelStates> {
        self.landscape.as_ref().map(|l| &l.pixels)
    }

    pub fn herd_assignment(&self, pixel: usize) -> Option<HerdAssignment> {
        self.landscape
            .as_ref()
            .and_then(|l| l.assignments.get(pixel).copied().flatten())
    }

    pub fn summaries(&self) -> &[MonthSummary] {
        &self.summaries
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn run_summary(&self, total_duration_ms: f64) -> RunSummary {
        let count = |status: PixelStatus| {
            self.pixels()
                .map(|p| p.statuses().iter().filter(|s| **s == status).count())
                .unwrap_or(0)
        };
        RunSummary {
            scenario: self.name.clone(),
            start_month: self.run.start_month,
            end_month: self.run.end_month,
            final_state: self.state.label().to_string(),
            runner: self.runner.name().to_string(),
            width: self.grid.width,
            height: self.grid.height,
            nodata_pixels: count(PixelStatus::NoData),
            invalid_pixels: count(PixelStatus::Invalid),
            total_duration_ms,
            months: self.summaries.clone(),
        }
    }
}

fn format_mean(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}

/// Read-only inputs shared by every chunk in one month.
struct MonthContext<'a> {
    month: YearMonth,
    days: u32,
    grid: Grid,
    climate: &'a ClimateBands,
    soil: &'a SoilGrid,
    sites: &'a SiteGrid,
    assignments: &'a [Option<HerdAssignment>],
    herds: &'a [HerdMonth],
    params: &'a ModelParams,
    run: &'a RunConfig,
}

impl MonthContext<'_> {
    fn locate(&self, index: usize) -> String {
        match self.grid.position(index) {
            Some(pos) => format!("pixel {index} ({}, {})", pos.x, pos.y),
            None => format!("pixel {index}"),
        }
    }
}

fn simulate_chunk(
    mut chunk: PixelChunk<'_>,
    ctx: &MonthContext<'_>,
) -> Result<Vec<MonthlyRecord>, ModelError> {
    let mut records = Vec::with_capacity(chunk.len());
    for i in 0..chunk.len() {
        let index = chunk.offset() + i;
        let status = chunk.status(i);
        if status.is_excluded() {
            records.push(MonthlyRecord::empty(status));
            continue;
        }
        let climate = ctx.climate.at(index);
        if climate.is_nodata() {
            log::debug!("{} {}: no climate, month skipped", ctx.month, ctx.locate(index));
            records.push(MonthlyRecord::empty(PixelStatus::NoData));
            continue;
        }
        let mut pixel = chunk.load(i);
        match simulate_pixel(&mut pixel, index, &climate, chunk.pending_offtake(i), ctx) {
            Ok((record, offtake)) => {
                chunk.store(i, &pixel);
                chunk.set_pending_offtake(i, offtake);
                chunk.set_status(i, record.status);
                records.push(record);
            }
            Err(err) if ctx.run.on_pixel_error == PixelErrorPolicy::Abort => {
                return Err(ModelError::from_pixel(err, index, ctx.month));
            }
            Err(PixelError::DomainInput(detail)) => {
                log::warn!("{} {}: skipped month, {detail}", ctx.month, ctx.locate(index));
                chunk.set_status(i, PixelStatus::DomainInput);
                chunk.set_pending_offtake(i, Offtake::default());
                let unchanged = chunk.load(i);
                records.push(MonthlyRecord {
                    status: PixelStatus::DomainInput,
                    ..forage_record(&unchanged, None, &IntakeOutcome::default(), 0.0)
                });
            }
            Err(PixelError::InvariantViolation(detail)) => {
                log::warn!("{} {}: marked invalid, {detail}", ctx.month, ctx.locate(index));
                chunk.set_status(i, PixelStatus::Invalid);
                chunk.set_pending_offtake(i, Offtake::default());
                records.push(MonthlyRecord::empty(PixelStatus::Invalid));
            }
        }
    }
    Ok(records)
}

/// Grazing, growth and intake for one pixel-month, working on a copy.
fn simulate_pixel(
    pixel: &mut PixelState,
    index: usize,
    climate: &MonthlyClimate,
    pending: Offtake,
    ctx: &MonthContext<'_>,
) -> Result<(MonthlyRecord, Offtake), PixelError> {
    let params = ctx.params;
    let intensity = if ctx.run.grazing_enabled {
        apply_offtake(pixel, &pending, &params.plant)?.intensity
    } else {
        0.0
    };
    let report = century::grow(
        pixel,
        climate,
        &ctx.soil.get(index),
        ctx.sites.get(index),
        ctx.days,
        params,
        ctx.run.clamp_climate,
    )?;

    let grazing = ctx.assignments.get(index).copied().flatten();
    let (outcome, sufficiency) = match grazing {
        Some(assignment) => {
            let outcome = intake::graze_pixel(
                pixel,
                &ctx.herds[assignment.herd],
                assignment.density,
                ctx.days,
                ctx.run.diet_limiting_nutrient,
                ctx.run.management_threshold,
                params,
            );
            (outcome, Some(outcome.sufficiency))
        }
        None => (IntakeOutcome::default(), None),
    };
    let status = if report.clamped_input {
        PixelStatus::ClampedInput
    } else {
        PixelStatus::Ok
    };
    let record = MonthlyRecord {
        status,
        production: report.production,
        respiration: report.respiration,
        ..forage_record(pixel, sufficiency, &outcome, intensity)
    };
    Ok((record, outcome.offtake))
}

fn forage_record(
    pixel: &PixelState,
    sufficiency: Option<f64>,
    outcome: &IntakeOutcome,
    grazing_intensity: f64,
) -> MonthlyRecord {
    MonthlyRecord {
        forage_biomass: pixel.forage_mass() / KG_HA_TO_G_M2,
        forage_protein: intake::forage_crude_protein(pixel),
        forage_intake: outcome.intake,
        offtake: outcome.offtake.total() / KG_HA_TO_G_M2,
        diet_sufficiency: sufficiency,
        production: 0.0,
        respiration: 0.0,
        grazing_intensity,
        status: PixelStatus::Ok,
    }
}

use approx::assert_relative_eq;
use rangeland::{
    config::PixelErrorPolicy,
    engine::CancelToken,
    intake::{AgeClass, Herd, ReproductiveStatus, Species, Stocking},
    output::{DIET_SUFFICIENCY, FORAGE_BIOMASS, OFFTAKE, RUN_SUMMARY_FILE},
    params::SiteParams,
    raster::{is_nodata, Band, DirectoryRasterStore, MemoryRasterStore, RasterStore, NODATA},
    runner::{RayonRunner, SequentialRunner, TaskRunner},
    scenario::{Scenario, ScenarioLoader},
    spatial::Grid,
    state::{PixelStates, PixelStatus, Pool, STATUS_BAND},
    ModelError, SimulationBuilder, SimulationState, YearMonth,
};

fn scenario_loader() -> ScenarioLoader {
    ScenarioLoader::new(env!("CARGO_MANIFEST_DIR"))
}

fn load(file: &str) -> Scenario {
    scenario_loader().load(file).unwrap()
}

fn seeded(scenario: &Scenario) -> MemoryRasterStore {
    let mut store = MemoryRasterStore::new();
    scenario.seed_store(&mut store).unwrap();
    store
}

fn band_values(store: &impl RasterStore, name: &str, month: Option<YearMonth>) -> Vec<f64> {
    store.read_band(name, month).unwrap().into_values()
}

fn months(scenario: &Scenario) -> Vec<YearMonth> {
    let start = scenario.run.start_month;
    (0..scenario.run.total_months())
        .map(|i| start.add_months(i))
        .collect()
}

fn cattle(animals_per_ha: f64) -> Herd {
    Herd {
        name: "cows".into(),
        species: Species::Cattle,
        standard_reference_weight: 550.0,
        body_weight: 500.0,
        age_class: AgeClass::Adult,
        age_months: 48,
        reproductive_status: ReproductiveStatus::Dry,
        status_schedule: Default::default(),
        stocking: Stocking::Uniform { animals_per_ha },
    }
}

fn run_with<R: TaskRunner>(scenario: &Scenario, runner: R) -> MemoryRasterStore {
    let mut simulation = scenario.build_simulation(seeded(scenario), runner).unwrap();
    simulation.run().unwrap();
    assert_eq!(simulation.state(), &SimulationState::Completed);
    simulation.into_store()
}

#[test]
fn zero_length_run_leaves_state_untouched() {
    let scenario = load("scenarios/single_pixel.yaml").with_months(Some(0));
    let initial = scenario.initial_state.to_pixel();
    let mut simulation = scenario
        .build_simulation(seeded(&scenario), SequentialRunner)
        .unwrap();
    simulation.run().unwrap();

    assert_eq!(simulation.state(), &SimulationState::Completed);
    assert!(simulation.summaries().is_empty());
    assert_eq!(simulation.pixels().unwrap().get(0), initial);
    assert!(simulation.store().months_of(FORAGE_BIOMASS).is_empty());
    let final_slow = band_values(simulation.store(), "state_som_slow_mass", None);
    assert_eq!(final_slow, vec![initial.mass(Pool::SomSlow)]);
}

#[test]
fn ungrazed_pixel_settles_under_constant_climate() {
    let scenario = load("scenarios/single_pixel.yaml");
    let store = run_with(&scenario, SequentialRunner);

    let biomass: Vec<f64> = months(&scenario)
        .into_iter()
        .map(|month| band_values(&store, FORAGE_BIOMASS, Some(month))[0])
        .collect();
    assert_eq!(biomass.len(), 12);
    assert!(biomass.iter().all(|b| b.is_finite() && *b > 0.0));

    let deltas: Vec<f64> = biomass.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let early: f64 = deltas[..3].iter().sum::<f64>() / 3.0;
    let late: f64 = deltas[deltas.len() - 3..].iter().sum::<f64>() / 3.0;
    assert!(late < early, "late change {late} not below early change {early}");

    for month in months(&scenario) {
        let sufficiency = band_values(&store, DIET_SUFFICIENCY, Some(month));
        assert!(is_nodata(sufficiency[0]));
        assert_eq!(band_values(&store, OFFTAKE, Some(month)), vec![0.0]);
    }
}

#[test]
fn heavy_stocking_never_removes_more_than_standing_forage() {
    let mut scenario = load("scenarios/single_pixel.yaml").with_months(Some(6));
    scenario.herds.push(cattle(30.0));
    let plant = scenario.parameters.plant.clone();

    let mut simulation = scenario
        .build_simulation(seeded(&scenario), SequentialRunner)
        .unwrap();
    simulation.run().unwrap();
    let store = simulation.store();

    for month in months(&scenario) {
        let forage = band_values(store, FORAGE_BIOMASS, Some(month))[0];
        let offtake = band_values(store, OFFTAKE, Some(month))[0];
        let sufficiency = band_values(store, DIET_SUFFICIENCY, Some(month))[0];
        assert!(offtake >= 0.0);
        assert!(offtake <= forage + 1e-9, "{month}: {offtake} > {forage}");
        assert!((0.0..1.0).contains(&sufficiency), "{month}: {sufficiency}");
    }

    let pixel = simulation.pixels().unwrap().get(0);
    assert!(Pool::ALL.iter().all(|pool| pixel.mass(*pool) >= 0.0));
    pixel.check_invariants(&plant).unwrap();
}

#[test]
fn steppe_run_keeps_live_nitrogen_within_bounds() {
    let mut scenario = load("scenarios/steppe.yaml");
    scenario.run.save_state_bands = true;
    let plant = scenario.parameters.plant.clone();
    let store = run_with(&scenario, SequentialRunner);

    for month in months(&scenario) {
        let statuses = band_values(&store, STATUS_BAND, Some(month));
        assert!(statuses
            .iter()
            .all(|code| *code != PixelStatus::Invalid.code()));

        for (pool, min, max) in [
            ("above_live", plant.above_n_min, plant.above_n_max),
            ("below_live", plant.below_n_min, plant.below_n_max),
        ] {
            let mass = band_values(&store, &format!("state_{pool}_mass"), Some(month));
            let n = band_values(&store, &format!("state_{pool}_n"), Some(month));
            for (m, n) in mass.iter().zip(&n) {
                if is_nodata(*m) || *m <= 1e-6 {
                    continue;
                }
                let conc = n / m;
                assert!(
                    conc >= min * (1.0 - 1e-6) && conc <= max * (1.0 + 1e-6),
                    "{month} {pool}: {conc}"
                );
            }
        }
    }
}

#[test]
fn nodata_pixel_passes_through_every_month() {
    let scenario = load("scenarios/steppe.yaml");
    let index = scenario.grid.index(scenario.nodata_pixels[0]).unwrap();
    let store = run_with(&scenario, SequentialRunner);

    for month in months(&scenario) {
        assert_eq!(band_values(&store, FORAGE_BIOMASS, Some(month))[index], NODATA);
        assert_eq!(band_values(&store, DIET_SUFFICIENCY, Some(month))[index], NODATA);
        assert_eq!(
            band_values(&store, STATUS_BAND, Some(month))[index],
            PixelStatus::NoData.code()
        );
    }
    assert_eq!(band_values(&store, "state_som_slow_mass", None)[index], NODATA);
    let grazed = band_values(&store, DIET_SUFFICIENCY, Some(scenario.run.start_month));
    assert!(!is_nodata(grazed[0]));
}

/// Two-pixel copy of the single pixel scenario with a negative precipitation
/// value for the second pixel in its second month.
fn corrupted_precip(policy: PixelErrorPolicy) -> (Scenario, MemoryRasterStore, YearMonth) {
    let mut scenario = load("scenarios/single_pixel.yaml").with_months(Some(4));
    scenario.grid = Grid::new(2, 1);
    scenario.run.on_pixel_error = policy;
    let mut store = seeded(&scenario);
    let bad_month = scenario.run.start_month.next();
    let mut precip = store.read_band("precip", Some(bad_month)).unwrap();
    precip.values_mut()[1] = -5.0;
    store.write_band("precip", Some(bad_month), &precip).unwrap();
    (scenario, store, bad_month)
}

#[test]
fn skip_policy_holds_pixel_through_bad_climate() {
    let (scenario, store, bad_month) = corrupted_precip(PixelErrorPolicy::Skip);
    let mut simulation = scenario.build_simulation(store, SequentialRunner).unwrap();
    simulation.run().unwrap();
    let store = simulation.store();

    let status = band_values(store, STATUS_BAND, Some(bad_month));
    assert_eq!(status, vec![PixelStatus::Ok.code(), PixelStatus::DomainInput.code()]);

    let before = band_values(store, FORAGE_BIOMASS, Some(scenario.run.start_month));
    let during = band_values(store, FORAGE_BIOMASS, Some(bad_month));
    assert_eq!(during[1], before[1]);
    assert_ne!(during[0], before[0]);

    let after = band_values(store, STATUS_BAND, Some(bad_month.next()));
    assert_eq!(after, vec![PixelStatus::Ok.code(); 2]);
    assert_eq!(simulation.summaries()[1].flagged_pixels, 1);
}

#[test]
fn abort_policy_fails_run_on_bad_climate() {
    let (scenario, store, bad_month) = corrupted_precip(PixelErrorPolicy::Abort);
    let mut simulation = scenario.build_simulation(store, SequentialRunner).unwrap();
    let err = simulation.run().unwrap_err();

    match err {
        ModelError::DomainInput { pixel, month, .. } => {
            assert_eq!(pixel, 1);
            assert_eq!(month, bad_month);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(matches!(simulation.state(), SimulationState::Failed(_)));
    assert_eq!(simulation.summaries().len(), 1);
    assert!(!simulation.store().has_band(FORAGE_BIOMASS, Some(bad_month)));
}

#[test]
fn broken_nitrogen_routing_invalidates_or_aborts() {
    let mut scenario = load("scenarios/single_pixel.yaml").with_months(Some(3));
    scenario.parameters.decomposition.active_n_conc = -10.0;

    let mut aborting = scenario
        .build_simulation(seeded(&scenario), SequentialRunner)
        .unwrap();
    assert!(matches!(
        aborting.run(),
        Err(ModelError::InvariantViolation { pixel: 0, .. })
    ));

    scenario.run.on_pixel_error = PixelErrorPolicy::Skip;
    let store = run_with(&scenario, SequentialRunner);
    for month in months(&scenario) {
        assert_eq!(
            band_values(&store, STATUS_BAND, Some(month)),
            vec![PixelStatus::Invalid.code()]
        );
        assert_eq!(band_values(&store, FORAGE_BIOMASS, Some(month)), vec![NODATA]);
    }
}

#[test]
fn cancelled_run_stops_before_next_month() {
    let scenario = load("scenarios/steppe.yaml");
    let cancel = CancelToken::new();
    let mut simulation = SimulationBuilder::new(scenario.name.clone(), scenario.grid, scenario.run.clone())
        .with_params(scenario.parameters.clone())
        .with_herds(scenario.herds.clone())
        .with_cancel_token(cancel.clone())
        .build(seeded(&scenario), SequentialRunner)
        .unwrap();
    simulation.initialize().unwrap();
    simulation.step().unwrap();
    simulation.step().unwrap();
    cancel.cancel();
    simulation.run().unwrap();

    assert_eq!(simulation.state(), &SimulationState::Cancelled);
    assert_eq!(simulation.summaries().len(), 2);
    let third = scenario.run.start_month.add_months(2);
    assert!(!simulation.store().has_band(FORAGE_BIOMASS, Some(third)));
    assert!(!simulation.store().has_band("state_som_slow_mass", None));
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let scenario = load("scenarios/steppe.yaml").with_months(Some(8));
    let sequential = run_with(&scenario, SequentialRunner);
    let parallel = run_with(&scenario, RayonRunner::with_threads(3).unwrap());

    for month in months(&scenario) {
        for band in [FORAGE_BIOMASS, OFFTAKE, DIET_SUFFICIENCY, STATUS_BAND] {
            assert_eq!(
                band_values(&sequential, band, Some(month)),
                band_values(&parallel, band, Some(month)),
                "{band} differs in {month}"
            );
        }
    }
    for pool in Pool::ALL {
        let name = format!("state_{}_n", pool.name());
        assert_eq!(
            band_values(&sequential, &name, None),
            band_values(&parallel, &name, None)
        );
    }
}

#[test]
fn checkpoints_follow_interval() {
    let scenario = load("scenarios/steppe.yaml");
    let store = run_with(&scenario, SequentialRunner);

    let checkpoints = store.months_of("state_som_slow_mass");
    let expected: Vec<YearMonth> = ["2016-06", "2016-12", "2017-06", "2017-12"]
        .iter()
        .map(|m| m.parse().unwrap())
        .collect();
    assert_eq!(checkpoints, expected);
    assert!(store.has_band("state_som_slow_mass", None));
    assert!(store.has_band("state_status", None));
}

#[test]
fn directory_store_run_writes_bands_and_summary() {
    let temp = tempfile::tempdir().unwrap();
    let scenario = load("scenarios/single_pixel.yaml").with_months(Some(3));
    let mut store = DirectoryRasterStore::new(temp.path()).unwrap();
    scenario.seed_store(&mut store).unwrap();

    let mut simulation = scenario.build_simulation(store, SequentialRunner).unwrap();
    simulation.run().unwrap();
    let summary = simulation.run_summary(1.0);
    let path = summary.write(temp.path()).unwrap();

    assert_eq!(path, temp.path().join(RUN_SUMMARY_FILE));
    assert!(temp.path().join("forage_biomass_2016_03.json").exists());
    assert!(!temp.path().join("forage_biomass_2016_04.json").exists());
    assert!(temp.path().join("state_som_passive_n.json").exists());

    let reopened = DirectoryRasterStore::new(temp.path()).unwrap();
    let band: Band = reopened
        .read_band(FORAGE_BIOMASS, Some(scenario.run.start_month))
        .unwrap();
    assert_eq!(band.len(), 1);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["final_state"], "completed");
    assert_eq!(written["months"].as_array().unwrap().len(), 3);
}

/// Two-pixel copy of the single pixel scenario whose second pixel has no
/// climate in its second month.
fn climate_gap(policy: PixelErrorPolicy) -> (Scenario, MemoryRasterStore, YearMonth) {
    let mut scenario = load("scenarios/single_pixel.yaml").with_months(Some(4));
    scenario.grid = Grid::new(2, 1);
    scenario.run.on_pixel_error = policy;
    scenario.run.save_state_bands = true;
    let mut store = seeded(&scenario);
    let gap = scenario.run.start_month.next();
    for name in ["precip", "tmin", "tmax"] {
        let mut band = store.read_band(name, Some(gap)).unwrap();
        band.values_mut()[1] = NODATA;
        store.write_band(name, Some(gap), &band).unwrap();
    }
    (scenario, store, gap)
}

#[test]
fn climate_gap_skips_pixel_without_touching_state() {
    for policy in [PixelErrorPolicy::Abort, PixelErrorPolicy::Skip] {
        let (scenario, store, gap) = climate_gap(policy);
        let start = scenario.run.start_month;
        let mut simulation = scenario.build_simulation(store, SequentialRunner).unwrap();
        simulation.run().unwrap();
        assert_eq!(simulation.state(), &SimulationState::Completed);
        let store = simulation.store();

        assert_eq!(
            band_values(store, STATUS_BAND, Some(gap)),
            vec![PixelStatus::Ok.code(), PixelStatus::NoData.code()]
        );
        let forage = band_values(store, FORAGE_BIOMASS, Some(gap));
        assert!(!is_nodata(forage[0]));
        assert_eq!(forage[1], NODATA);
        for band in ["state_above_live_mass", "state_som_slow_n", "state_soil_water"] {
            assert_eq!(
                band_values(store, band, Some(gap))[1],
                band_values(store, band, Some(start))[1],
                "{band} changed during the gap"
            );
        }
        assert_eq!(
            band_values(store, STATUS_BAND, Some(gap.next())),
            vec![PixelStatus::Ok.code(); 2]
        );
        assert_eq!(simulation.summaries()[1].simulated_pixels, 1);
        assert_eq!(simulation.summaries()[1].flagged_pixels, 0);
    }
}

#[test]
fn site_table_changes_production_per_pixel() {
    let mut scenario = load("scenarios/single_pixel.yaml").with_months(Some(1));
    scenario.grid = Grid::new(2, 1);
    scenario.site_index = Some(vec![1.0, 2.0]);
    scenario.parameters.sites.insert(1, SiteParams::default());
    scenario.parameters.sites.insert(
        2,
        SiteParams {
            latitude_deg: 60.0,
            elevation_m: 3000.0,
            ..SiteParams::default()
        },
    );
    let store = run_with(&scenario, SequentialRunner);

    let forage = band_values(&store, FORAGE_BIOMASS, Some(scenario.run.start_month));
    assert!(
        forage[1] < forage[0],
        "high dry site {} not below lowland {}",
        forage[1],
        forage[0]
    );

    scenario.site_index = Some(vec![1.0, 3.0]);
    let mut unknown = scenario
        .build_simulation(seeded(&scenario), SequentialRunner)
        .unwrap();
    assert!(matches!(
        unknown.initialize(),
        Err(ModelError::Configuration(_))
    ));
}

#[test]
fn pending_offtake_never_exceeds_standing_pools() {
    let mut heavy = load("scenarios/single_pixel.yaml").with_months(Some(6));
    heavy.herds.push(cattle(30.0));
    let steppe = load("scenarios/steppe.yaml").with_months(Some(12));

    for scenario in [steppe, heavy] {
        let mut simulation = scenario
            .build_simulation(seeded(&scenario), SequentialRunner)
            .unwrap();
        simulation.initialize().unwrap();
        while !simulation.state().is_finished() {
            let Some(summary) = simulation.step().unwrap() else {
                continue;
            };
            let pixels = simulation.pixels().unwrap();
            for i in 0..scenario.grid.len() {
                if pixels.status(i).is_excluded() {
                    continue;
                }
                let offtake = pixels.pending_offtake(i);
                let pixel = pixels.get(i);
                assert!(offtake.live >= 0.0 && offtake.standing_dead >= 0.0);
                assert!(
                    offtake.live <= pixel.mass(Pool::AboveLive) + 1e-9,
                    "{} pixel {i}: live offtake {} above {}",
                    summary.month,
                    offtake.live,
                    pixel.mass(Pool::AboveLive)
                );
                assert!(offtake.standing_dead <= pixel.mass(Pool::StandingDead) + 1e-9);
            }
        }
    }
}

fn landscape_mass(pixels: &PixelStates) -> f64 {
    (0..pixels.len())
        .filter(|i| pixels.status(*i) != PixelStatus::NoData)
        .map(|i| pixels.get(i).total_mass())
        .sum()
}

#[test]
fn ungrazed_landscape_closes_mass_budget_each_month() {
    let mut scenario = load("scenarios/steppe.yaml").with_months(Some(12));
    scenario.run.grazing_enabled = false;
    let mut simulation = scenario
        .build_simulation(seeded(&scenario), SequentialRunner)
        .unwrap();
    simulation.initialize().unwrap();

    let mut before = landscape_mass(simulation.pixels().unwrap());
    while !simulation.state().is_finished() {
        let Some(summary) = simulation.step().unwrap() else {
            continue;
        };
        let after = landscape_mass(simulation.pixels().unwrap());
        assert_relative_eq!(
            after + summary.total_respiration,
            before + summary.total_production,
            max_relative = 1e-9
        );
        assert_eq!(summary.total_offtake, 0.0);
        assert!(summary.mean_grazing_intensity.is_none());
        before = after;
    }
    assert_eq!(simulation.summaries().len(), 12);
}

#[test]
fn grazing_intensity_follows_last_months_offtake() {
    let mut scenario = load("scenarios/single_pixel.yaml").with_months(Some(4));
    scenario.herds.push(cattle(0.5));
    let mut simulation = scenario
        .build_simulation(seeded(&scenario), SequentialRunner)
        .unwrap();
    simulation.run().unwrap();

    let summaries = simulation.summaries();
    assert!(summaries[0].mean_grazing_intensity.is_none());
    assert!(summaries[0].total_offtake > 0.0);
    for summary in &summaries[1..] {
        let intensity = summary.mean_grazing_intensity.unwrap();
        assert!(intensity > 0.0 && intensity <= 1.0, "{}: {intensity}", summary.month);
        assert!(summary.total_production > 0.0);
    }
}

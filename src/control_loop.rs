use std::time::Duration;

use serde::Deserialize;

use crate::{
    climate::ClimateController,
    dashboard::Dashboard,
    fault::{Fault, Module},
    irrigation::IrrigationController,
    models::{ClimateSnapshot, IrrigationSnapshot},
    settings,
    time_context::{Clock, TimeContext},
};

/// Builds fresh module instances from static configuration.
pub trait ModuleFactory: Send {
    fn climate(&self) -> ClimateController;
    fn irrigation(&self) -> IrrigationController;
}

/// Which module is rebuilt for each kind of fault.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecoveryPolicy {
    pub outdoor_sensor: Module,
    pub indoor_sensor: Module,
    pub water_sensor: Module,
    pub forecast: Module,
}

impl Default for RecoveryPolicy {
    /// Soil probe faults rebuild the climate module, as the reference
    /// controller does.
    fn default() -> Self {
        Self {
            outdoor_sensor: Module::Climate,
            indoor_sensor: Module::Climate,
            water_sensor: Module::Climate,
            forecast: Module::Irrigation,
        }
    }
}

impl RecoveryPolicy {
    /// Rebuild the module that reported the fault.
    pub fn faulted_module() -> Self {
        Self {
            water_sensor: Module::Irrigation,
            ..Self::default()
        }
    }

    pub fn target(&self, fault: &Fault) -> Module {
        match fault {
            Fault::OutdoorSensorFailure => self.outdoor_sensor,
            Fault::IndoorSensorFailure => self.indoor_sensor,
            Fault::WaterSensorFailure => self.water_sensor,
            Fault::ForecastFetchFailure(_) => self.forecast,
        }
    }
}

/// Extra delay added to the cycle interval after consecutive faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    None,
    Linear { step_secs: u64, max_secs: u64 },
    Exponential { base_secs: u64, max_secs: u64 },
}

impl Backoff {
    pub fn delay(&self, consecutive_faults: u32) -> Duration {
        if consecutive_faults == 0 {
            return Duration::ZERO;
        }
        let secs = match *self {
            Backoff::None => 0,
            Backoff::Linear {
                step_secs,
                max_secs,
            } => step_secs
                .saturating_mul(u64::from(consecutive_faults))
                .min(max_secs),
            Backoff::Exponential {
                base_secs,
                max_secs,
            } => {
                let factor = 2u64.checked_pow(consecutive_faults - 1).unwrap_or(u64::MAX);
                base_secs.saturating_mul(factor).min(max_secs)
            }
        };
        Duration::from_secs(secs)
    }
}

/// Limits on fault recovery. The defaults retry forever without delay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub backoff: Backoff,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Giving up after {faults} consecutive faulted cycles, last fault: {last}")]
    RetriesExhausted { faults: u32, last: Fault },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LoopState {
    Running,
    Reinitializing(Module),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Rendered {
        climate: ClimateSnapshot,
        irrigation: IrrigationSnapshot,
    },
    Faulted(Fault),
}

/// Sequences the modules once per cycle and absorbs their faults by
/// rebuilding the affected module.
pub struct ControlLoop {
    factory: Box<dyn ModuleFactory>,
    dashboard: Box<dyn Dashboard>,
    clock: Box<dyn Clock>,
    calendar: settings::Calendar,
    interval: Duration,
    recovery: RecoveryPolicy,
    retry: RetryPolicy,
    climate: ClimateController,
    irrigation: IrrigationController,
    state: LoopState,
    consecutive_faults: u32,
}

impl ControlLoop {
    pub fn new(
        control: &settings::Control,
        calendar: settings::Calendar,
        factory: Box<dyn ModuleFactory>,
        dashboard: Box<dyn Dashboard>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let climate = factory.climate();
        let irrigation = factory.irrigation();

        Self {
            factory,
            dashboard,
            clock,
            calendar,
            interval: control.cycle_interval(),
            recovery: control.recovery.clone(),
            retry: control.retry.clone(),
            climate,
            irrigation,
            state: LoopState::Running,
            consecutive_faults: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run cycles until the retry policy gives up. With the default policy
    /// this never returns.
    pub async fn run_until_completion(mut self) -> Result<(), ControlError> {
        tracing::info!(interval = ?self.interval, "Control loop started");

        loop {
            let mut delay = self.interval;

            if let CycleOutcome::Faulted(fault) = self.run_cycle().await {
                if let Some(max_retries) = self.retry.max_retries {
                    if self.consecutive_faults > max_retries {
                        tracing::error!(faults = self.consecutive_faults, %fault, "Retries exhausted");
                        return Err(ControlError::RetriesExhausted {
                            faults: self.consecutive_faults,
                            last: fault,
                        });
                    }
                }
                delay += self.retry.backoff.delay(self.consecutive_faults);
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Run a single cycle: climate, then irrigation, then the dashboard.
    #[tracing::instrument(skip(self), fields(state = %self.state))]
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let time = TimeContext::classify(self.clock.now(), &self.calendar);
        tracing::debug!(season = %time.season, time_of_day = %time.time_of_day, "Cycle started");

        match self.evaluate(&time).await {
            Ok((climate, irrigation)) => {
                self.dashboard.render(&climate, &irrigation);
                if let LoopState::Reinitializing(module) = self.state {
                    tracing::info!(%module, "Recovered");
                }
                self.state = LoopState::Running;
                self.consecutive_faults = 0;

                CycleOutcome::Rendered {
                    climate,
                    irrigation,
                }
            }
            Err(fault) => {
                self.consecutive_faults += 1;
                tracing::warn!(
                    %fault,
                    module = %fault.module(),
                    consecutive_faults = self.consecutive_faults,
                    "Cycle faulted"
                );
                self.reinitialize(self.recovery.target(&fault));

                CycleOutcome::Faulted(fault)
            }
        }
    }

    async fn evaluate(
        &mut self,
        time: &TimeContext,
    ) -> Result<(ClimateSnapshot, IrrigationSnapshot), Fault> {
        self.climate.read_sensors().await?;
        let outdoor = self
            .climate
            .outdoor_temperature()
            .ok_or(Fault::OutdoorSensorFailure)?;
        let climate = self
            .climate
            .decide(time)
            .ok_or(Fault::IndoorSensorFailure)?;

        self.irrigation.read_sensors(outdoor).await?;
        self.irrigation.refresh_forecast().await?;
        let irrigation = self
            .irrigation
            .decide(time.now)
            .ok_or(Fault::WaterSensorFailure)?;

        Ok((climate, irrigation))
    }

    /// Drop the module and build a new one. Nothing carries over, including
    /// the watering latch.
    fn reinitialize(&mut self, module: Module) {
        tracing::info!(%module, "Reinitializing module");
        match module {
            Module::Climate => self.climate = self.factory.climate(),
            Module::Irrigation => self.irrigation = self.factory.irrigation(),
        }
        self.state = LoopState::Reinitializing(module);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use chrono::NaiveDateTime;

    use crate::{
        dashboard::MockDashboard,
        forecast::{tests::payload_with, ForecastError, ForecastProvider, MockForecastProvider},
        models::{HvacDecision, HvacMode, HvacState, Measurement, SoilMoisture, UnitSystem},
        sensors::{ClimateSensor, MockClimateSensor, MockMoistureSensor, MoistureSensor},
        settings::tests::test_settings,
        time_context::tests::at,
    };

    use super::*;

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    /// Probe readings for one module instance. `None` models a dead probe.
    #[derive(Clone, Copy)]
    struct Probes {
        outdoor: Option<Measurement>,
        indoor: Option<Measurement>,
        soil: Option<SoilMoisture>,
        /// Successful forecast fetches before the service starts failing.
        /// `None` never fails.
        forecast_fetches: Option<usize>,
        /// Whether the irrigation collaborators may be touched at all.
        irrigation_used: bool,
    }

    impl Probes {
        /// 50°F outside, 68°F inside, dry soil.
        fn healthy() -> Self {
            Self {
                outdoor: Some(Measurement::new(10.0, 30.0)),
                indoor: Some(Measurement::new(20.0, 40.0)),
                soil: Some(SoilMoisture::new(15.0)),
                forecast_fetches: None,
                irrigation_used: true,
            }
        }
    }

    fn climate_sensor(reading: Option<Measurement>) -> Box<dyn ClimateSensor> {
        let mut sensor = MockClimateSensor::new();
        sensor.expect_read().returning(move || reading);
        Box::new(sensor)
    }

    fn moisture_sensor(probes: &Probes) -> Box<dyn MoistureSensor> {
        let mut sensor = MockMoistureSensor::new();
        if probes.irrigation_used {
            let reading = probes.soil;
            sensor.expect_read().returning(move || reading);
        } else {
            sensor.expect_read().never();
        }
        Box::new(sensor)
    }

    fn forecast(probes: &Probes) -> Box<dyn ForecastProvider> {
        let mut forecast = MockForecastProvider::new();
        if !probes.irrigation_used {
            forecast.expect_fetch().never();
            return Box::new(forecast);
        }

        let limit = probes.forecast_fetches;
        let mut fetches = 0;
        forecast.expect_fetch().returning(move || {
            fetches += 1;
            match limit {
                Some(limit) if fetches > limit => Err(ForecastError::TooShort {
                    series: "hourly",
                    found: 0,
                    expected: 12,
                }),
                _ => Ok(payload_with(&[0.0; 24])),
            }
        });
        Box::new(forecast)
    }

    /// Hands out instances built from `probes(n)`, where `n` counts builds of
    /// that module starting at zero.
    struct TestFactory {
        settings: settings::Settings,
        probes: fn(usize) -> Probes,
        climate_builds: Arc<AtomicUsize>,
        irrigation_builds: Arc<AtomicUsize>,
    }

    impl ModuleFactory for TestFactory {
        fn climate(&self) -> ClimateController {
            let n = self.climate_builds.fetch_add(1, Ordering::SeqCst);
            let probes = (self.probes)(n);
            ClimateController::new(
                self.settings.climate.clone(),
                UnitSystem::Imperial,
                climate_sensor(probes.outdoor),
                climate_sensor(probes.indoor),
            )
        }

        fn irrigation(&self) -> IrrigationController {
            let n = self.irrigation_builds.fetch_add(1, Ordering::SeqCst);
            let probes = (self.probes)(n);
            IrrigationController::new(
                self.settings.irrigation.clone(),
                moisture_sensor(&probes),
                forecast(&probes),
            )
        }
    }

    struct Harness {
        control_loop: ControlLoop,
        climate_builds: Arc<AtomicUsize>,
        irrigation_builds: Arc<AtomicUsize>,
    }

    fn harness(
        probes: fn(usize) -> Probes,
        control: settings::Control,
        dashboard: MockDashboard,
    ) -> Harness {
        let settings = test_settings();
        let climate_builds = Arc::new(AtomicUsize::new(0));
        let irrigation_builds = Arc::new(AtomicUsize::new(0));
        let factory = TestFactory {
            settings: settings.clone(),
            probes,
            climate_builds: climate_builds.clone(),
            irrigation_builds: irrigation_builds.clone(),
        };

        let control_loop = ControlLoop::new(
            &control,
            settings.calendar.clone(),
            Box::new(factory),
            Box::new(dashboard),
            // Mid January, midday.
            Box::new(FixedClock(at(1, 12))),
        );

        Harness {
            control_loop,
            climate_builds,
            irrigation_builds,
        }
    }

    fn control() -> settings::Control {
        test_settings().control
    }

    #[tokio::test]
    async fn healthy_cycle_renders_both_decisions() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().times(1).return_const(());
        let mut harness = harness(|_| Probes::healthy(), control(), dashboard);

        let outcome = harness.control_loop.run_cycle().await;

        let CycleOutcome::Rendered {
            climate,
            irrigation,
        } = outcome
        else {
            panic!("expected a rendered cycle");
        };
        assert_eq!(*climate.decision(), HvacDecision::new(HvacMode::Heat, 70.0));
        assert_eq!(*climate.state(), HvacState::On);
        assert!(irrigation.state().needs_water());
        assert_eq!(harness.control_loop.state(), LoopState::Running);
    }

    #[tokio::test]
    async fn outdoor_fault_skips_irrigation_and_rebuilds_climate() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().never();
        let mut harness = harness(
            |_| Probes {
                outdoor: None,
                irrigation_used: false,
                ..Probes::healthy()
            },
            control(),
            dashboard,
        );

        let outcome = harness.control_loop.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Faulted(Fault::OutdoorSensorFailure));
        assert_eq!(harness.climate_builds.load(Ordering::SeqCst), 2);
        assert_eq!(harness.irrigation_builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.control_loop.state(),
            LoopState::Reinitializing(Module::Climate)
        );
    }

    #[tokio::test]
    async fn water_fault_rebuilds_climate_by_default() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().never();
        let mut harness = harness(
            |_| Probes {
                soil: None,
                ..Probes::healthy()
            },
            control(),
            dashboard,
        );

        let outcome = harness.control_loop.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Faulted(Fault::WaterSensorFailure));
        assert_eq!(harness.climate_builds.load(Ordering::SeqCst), 2);
        assert_eq!(harness.irrigation_builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn water_fault_can_rebuild_irrigation() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().never();
        let mut control = control();
        control.recovery = RecoveryPolicy::faulted_module();
        let mut harness = harness(
            |_| Probes {
                soil: None,
                ..Probes::healthy()
            },
            control,
            dashboard,
        );

        harness.control_loop.run_cycle().await;

        assert_eq!(harness.climate_builds.load(Ordering::SeqCst), 1);
        assert_eq!(harness.irrigation_builds.load(Ordering::SeqCst), 2);
        assert_eq!(
            harness.control_loop.state(),
            LoopState::Reinitializing(Module::Irrigation)
        );
    }

    #[tokio::test]
    async fn rebuilt_module_recovers_next_cycle() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().times(1).return_const(());
        // Only the first climate instance has a dead outdoor probe.
        let mut harness = harness(
            |n| Probes {
                outdoor: (n > 0).then(|| Measurement::new(10.0, 30.0)),
                ..Probes::healthy()
            },
            control(),
            dashboard,
        );

        let first = harness.control_loop.run_cycle().await;
        let second = harness.control_loop.run_cycle().await;

        assert_eq!(first, CycleOutcome::Faulted(Fault::OutdoorSensorFailure));
        assert!(matches!(second, CycleOutcome::Rendered { .. }));
        assert_eq!(harness.control_loop.state(), LoopState::Running);
    }

    #[tokio::test]
    async fn forecast_fault_skips_display_and_resets_irrigation() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().times(2).return_const(());
        // The first irrigation instance waters dry soil, then loses its
        // forecast. Its replacement sees soil between wilt and capacity.
        let mut harness = harness(
            |n| match n {
                0 => Probes {
                    forecast_fetches: Some(1),
                    ..Probes::healthy()
                },
                _ => Probes {
                    soil: Some(SoilMoisture::new(30.0)),
                    ..Probes::healthy()
                },
            },
            control(),
            dashboard,
        );

        let first = harness.control_loop.run_cycle().await;
        let second = harness.control_loop.run_cycle().await;

        let CycleOutcome::Rendered { irrigation, .. } = first else {
            panic!("expected the first cycle to render");
        };
        assert!(irrigation.state().needs_water());
        assert!(matches!(
            second,
            CycleOutcome::Faulted(Fault::ForecastFetchFailure(_))
        ));
        assert_eq!(harness.climate_builds.load(Ordering::SeqCst), 1);
        assert_eq!(harness.irrigation_builds.load(Ordering::SeqCst), 2);
        assert_eq!(
            harness.control_loop.state(),
            LoopState::Reinitializing(Module::Irrigation)
        );

        // A carried over latch would keep watering at 30%.
        let third = harness.control_loop.run_cycle().await;

        let CycleOutcome::Rendered { irrigation, .. } = third else {
            panic!("expected the rebuilt module to render");
        };
        assert!(!irrigation.state().needs_water());
        assert_eq!(irrigation.state().last_water_time(), None);
        assert_eq!(harness.control_loop.state(), LoopState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_once_retries_are_exhausted() {
        let mut dashboard = MockDashboard::new();
        dashboard.expect_render().never();
        let mut control = control();
        control.retry = RetryPolicy {
            max_retries: Some(2),
            backoff: Backoff::Linear {
                step_secs: 5,
                max_secs: 30,
            },
        };
        let harness = harness(
            |_| Probes {
                indoor: None,
                ..Probes::healthy()
            },
            control,
            dashboard,
        );
        let climate_builds = harness.climate_builds.clone();

        let err = harness
            .control_loop
            .run_until_completion()
            .await
            .unwrap_err();

        let ControlError::RetriesExhausted { faults, last } = err;
        assert_eq!(faults, 3);
        assert_eq!(last, Fault::IndoorSensorFailure);
        assert_eq!(climate_builds.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn backoff_delays() {
        let linear = Backoff::Linear {
            step_secs: 10,
            max_secs: 25,
        };
        let exponential = Backoff::Exponential {
            base_secs: 2,
            max_secs: 60,
        };

        assert_eq!(Backoff::None.delay(7), Duration::ZERO);
        assert_eq!(linear.delay(0), Duration::ZERO);
        assert_eq!(linear.delay(2), Duration::from_secs(20));
        assert_eq!(linear.delay(3), Duration::from_secs(25));
        assert_eq!(exponential.delay(1), Duration::from_secs(2));
        assert_eq!(exponential.delay(4), Duration::from_secs(16));
        assert_eq!(exponential.delay(80), Duration::from_secs(60));
    }

    #[test]
    fn recovery_policy_parses_from_toml() {
        let policy: RecoveryPolicy = toml::from_str(
            r#"
            outdoor_sensor = "climate"
            indoor_sensor = "climate"
            water_sensor = "irrigation"
            forecast = "irrigation"
            "#,
        )
        .unwrap();

        assert_eq!(policy, RecoveryPolicy::faulted_module());
        assert_eq!(
            policy.target(&Fault::ForecastFetchFailure("timeout".into())),
            Module::Irrigation
        );
    }
}

use std::fmt::{Debug, Display};

use anyhow::Context;
use tokio::task::JoinError;

use crate::{
    control_loop::ControlLoop,
    dashboard::{Dashboard, LogDashboard, MqttDashboard},
    factory::HubModuleFactory,
    forecast::HttpForecastProvider,
    mqtt::MqttBridge,
    sensors::SensorHub,
    settings::Settings,
    time_context::SystemClock,
};

mod climate;
mod control_loop;
mod dashboard;
mod factory;
mod fault;
mod forecast;
mod irrigation;
mod models;
mod mqtt;
mod sensors;
mod settings;
mod telemetry;
mod time_context;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    let subscriber = telemetry::create_subscriber(
        "smart-home-hub".to_string(),
        &settings.logger.level,
        std::io::stdout,
    );
    telemetry::init_subscriber(subscriber);

    tracing::info!(units = %settings.units.system, "Starting hub");

    let hub = SensorHub::new();
    let bridge = MqttBridge::new(&settings.mqtt, hub.clone());
    let dashboard: Box<dyn Dashboard> = match &settings.mqtt.dashboard_topic {
        Some(topic) => Box::new(MqttDashboard::new(bridge.client(), topic)),
        None => Box::new(LogDashboard),
    };

    let forecast =
        HttpForecastProvider::new(&settings.forecast).context("Failed to build HTTP client")?;
    let control_loop = ControlLoop::new(
        &settings.control,
        settings.calendar.clone(),
        Box::new(HubModuleFactory::new(settings.clone(), hub, forecast)),
        dashboard,
        Box::new(SystemClock),
    );

    let bridge_task = tokio::spawn(bridge.run_until_completion());
    let control_task = tokio::spawn(control_loop.run_until_completion());
    let signal_task = tokio::signal::ctrl_c();

    tokio::select! {
        result = bridge_task => report_exit("mqtt bridge", result),
        result = control_task => report_exit("control loop", result),
        result = signal_task => report_exit("closed by user", Ok(result)),
    };

    Ok(())
}

fn report_exit(task_name: &str, outcome: Result<Result<(), impl Debug + Display>, JoinError>) {
    match outcome {
        Ok(Ok(())) => tracing::info!("{} has exited", task_name),
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{} failed",
                task_name
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{}' task failed to complete",
                task_name
            )
        }
    }
}

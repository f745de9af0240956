use std::str::FromStr;

use tracing::{subscriber::set_global_default, Level, Subscriber};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{
    filter::Targets, fmt::MakeWriter, prelude::__tracing_subscriber_SubscriberExt,
    registry::LookupSpan, Registry,
};

/// Setup telemetry for this crate at `level` and output it to a given sink.
/// Everything else is logged from WARN and up.
pub fn create_subscriber<Sink>(
    name: String,
    level: &str,
    sink: Sink,
) -> impl Subscriber + Send + Sync + for<'span> LookupSpan<'span>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let filter = Targets::new()
        .with_target(name.replace('-', "_"), level)
        .with_default(Level::WARN);

    let formatting_layer = BunyanFormattingLayer::new(name, sink);

    Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    set_global_default(subscriber).expect("Failed to setup log subscriber");
}

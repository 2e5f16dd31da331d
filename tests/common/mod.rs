#![allow(dead_code)]

use std::time::Duration;

use color_eyre::Result;
use futures::StreamExt;
use serial_repl::{
    config::{Config, Timeouts},
    connection::{self, Connection},
    events::OutputEvent,
    mock::{MockBuilder, MockDevice},
    session::OutputStream,
};
use tokio::time::timeout;
use tracing::Level;

pub fn test_config() -> Config {
    Config {
        timeouts: Timeouts {
            probe_ms: Some(5000),
            response_ms: Some(5000),
            liveness_check_ms: None,
        },
        ..Default::default()
    }
}

/// A session connected to a mock device, past the responsiveness probe.
pub async fn connected_with(name: &str, config: &Config) -> Result<(Connection, MockDevice)> {
    serial_repl::logging::init(Level::INFO, None).await;

    let (transport, mut device) = MockBuilder::new(name)
        .set_signals(config.signals.clone())
        .build();

    let (connection, answered) = tokio::join!(
        connection::connect_transport(transport, config),
        device.answer_interrupt()
    );
    answered?;

    Ok((connection?, device))
}

pub async fn connected(name: &str) -> Result<(Connection, MockDevice)> {
    connected_with(name, &test_config()).await
}

/// Everything the stream yields until it ends.
pub async fn collect(output: OutputStream) -> Result<Vec<OutputEvent>> {
    Ok(timeout(Duration::from_secs(5), output.collect::<Vec<_>>()).await?)
}

/// The most recent output snapshot.
pub fn last_output(events: &[OutputEvent]) -> Option<&str> {
    events.iter().rev().find_map(OutputEvent::as_output)
}

pub fn errors(events: &[OutputEvent]) -> Vec<&serial_repl::events::ErrorMessage> {
    events
        .iter()
        .filter_map(OutputEvent::as_error_message)
        .collect()
}

//! Finding, opening and checking a device, resulting in a [`Session`].

use tracing::{debug, info, warn};

pub use crate::serial::serial_port::PortCandidate;

use crate::{
    config::Config,
    error::{ConnectionFailure, ConnectionFailureKind},
    serial::serial_port::{is_port_present, matching_ports, SerialPortBuilder},
    session::Session,
    transport::{Disconnection, EndpointId, Transport},
};

/// A usable connection to a device.
#[derive(Debug)]
pub struct Connection {
    /// Run commands on the device.
    pub session: Session,

    /// Completes when the device is gone, e.g. unplugged, or after [`Session::disconnect`].
    pub disconnection: Disconnection,
}

/// The serial ports passing the configured device filters.
pub fn list_ports(config: &Config) -> Result<Vec<PortCandidate>, ConnectionFailure> {
    matching_ports(&config.filters).map_err(|e| {
        ConnectionFailure::new(
            ConnectionFailureKind::NotSupported,
            format!("Could not list serial ports: {e}"),
        )
    })
}

fn validate(config: &Config) -> Result<(), ConnectionFailure> {
    config
        .validate()
        .map_err(|e| ConnectionFailure::new(ConnectionFailureKind::BadConfig, e.to_string()))
}

/// Connect to the configured port, or else the first port passing the device filters.
pub async fn connect(config: &Config) -> Result<Connection, ConnectionFailure> {
    validate(config)?;

    let path = match &config.port {
        Some(port) => port.clone(),
        None => {
            let candidates = list_ports(config)?;
            debug!(?candidates, "Candidates");

            let Some(candidate) = candidates.into_iter().next() else {
                return Err(ConnectionFailure::new(
                    ConnectionFailureKind::FailedToObtainPort,
                    format!("No serial port matches the filters {:?}", config.filters),
                ));
            };

            candidate.path
        }
    };

    let stream = SerialPortBuilder::new(&path)
        .set_line_settings(config.line.clone())
        .build()
        .map_err(|e| {
            ConnectionFailure::new(
                ConnectionFailureKind::FailedToOpenPort,
                format!("Could not open {path}: {e}"),
            )
        })?;

    let transport = Transport::new(EndpointId::Tty(path.clone()), stream);

    match config.timeouts.liveness_check() {
        // Ports not listed by the system, such as pseudo terminals, cannot be watched.
        Some(interval) if is_port_present(&path) => {
            transport.watch_presence(interval, move || is_port_present(&path));
        }
        Some(_) => debug!(%path, "Port not listed, not watching it"),
        None => {}
    }

    connect_transport(transport, config).await
}

/// Set up a session on an already opened transport.
///
/// The configuration must be valid and the device must answer with a REPL prompt,
/// else the transport is closed again.
pub async fn connect_transport(
    transport: Transport,
    config: &Config,
) -> Result<Connection, ConnectionFailure> {
    let id = transport.id().clone();
    let disconnection = transport.disconnection();

    if let Err(failure) = validate(config) {
        warn!(%id, %failure, "Not connecting");
        let (_, _, pumps) = transport.into_parts();
        pumps.close().await;

        return Err(failure);
    }

    let session = Session::new(transport, config);

    if let Err(e) = session.probe(config.timeouts.probe()).await {
        warn!(%id, %e, "No response");
        session.disconnect().await;

        return Err(ConnectionFailure::new(
            ConnectionFailureKind::PortNoResponse,
            format!("{id} did not show a REPL prompt: {e}"),
        ));
    }

    info!(%id, "Connected");

    Ok(Connection {
        session,
        disconnection,
    })
}

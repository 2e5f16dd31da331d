use std::io;

use thiserror::Error;

/// Any error the serial transport might encounter.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    IO(#[from] io::Error),

    /// Errors from the serial port driver, e.g. when opening or enumerating.
    #[error("Serial port driver problem: {0}")]
    Driver(#[from] tokio_serial::Error),
}

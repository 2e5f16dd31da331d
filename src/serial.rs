/// Serial port related errors.
pub(crate) mod error;

/// Opening and finding serial ports.
pub(crate) mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub(crate) mod codecs {
    pub(crate) mod text;
}

/// The message data type used for text received on serial.
pub type SerialMessage = String;

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

use std::{path::Path, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Physical line parameters used when opening a serial port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate.
    pub baud: u32,

    /// Number of data bits per character.
    pub data_bits: serialport::DataBits,

    /// Number of stop bits.
    pub stop_bits: serialport::StopBits,

    /// Parity checking.
    pub parity: serialport::Parity,

    /// Flow control.
    /// The device has no pins for hardware flow control, so keep this at `None`.
    pub flow_control: serialport::FlowControl,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: serialport::DataBits::Eight,
            stop_bits: serialport::StopBits::One,
            parity: serialport::Parity::None,
            flow_control: serialport::FlowControl::None,
        }
    }
}

/// Allows USB serial ports with this vendor (and optionally product) id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceFilter {
    /// USB vendor id.
    pub vendor_id: u16,

    /// USB product id. Any product of the vendor matches if not given.
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Does the given USB device pass this filter?
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id.map_or(true, |pid| pid == product_id)
    }
}

/// Buffering parameters for reading device output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadConfig {
    /// Program output is reported at most this often.
    pub poll_interval_ms: u64,

    /// How many characters of recent program output are kept.
    ///
    /// Twice the number of characters a user facing output view shows is a good choice.
    pub max_retained_chars: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_retained_chars: 1000,
        }
    }
}

impl ReadConfig {
    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// The marker strings printed by the device, or by code we make it run.
///
/// These must never show up in regular program output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signals {
    /// Printed by the REPL when it waits for input.
    pub repl_prompt: String,

    /// Printed right before user code runs.
    pub execution_start: String,

    /// Printed right after user code finished.
    pub execution_done: String,

    /// Start of a traceback from code run as the entry point file,
    /// up to and including the `line ` of the first frame.
    pub file_traceback: String,

    /// Start of a traceback from code run via `exec`,
    /// up to and including the `line ` of the frame within the executed string.
    pub exec_traceback: String,

    /// Typed after a tab completion request, so we know when the listing is over.
    pub completion_end: String,
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            repl_prompt: ">>> ".into(),
            execution_start: "Execution Start: 0x3f3f3f3f".into(),
            execution_done: "Execute Done: 0x3f3f3f3f".into(),
            file_traceback: "Traceback (most recent call last):\r\n  File \"main.py\", line ".into(),
            exec_traceback: "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n  File \"<string>\", line ".into(),
            completion_end: "Completion End: 0x3f3f3f3f".into(),
        }
    }
}

impl Signals {
    fn all(&self) -> [(&'static str, &str); 6] {
        [
            ("repl_prompt", self.repl_prompt.as_str()),
            ("execution_start", self.execution_start.as_str()),
            ("execution_done", self.execution_done.as_str()),
            ("file_traceback", self.file_traceback.as_str()),
            ("exec_traceback", self.exec_traceback.as_str()),
            ("completion_end", self.completion_end.as_str()),
        ]
    }
}

/// Device specific statements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// The file the device runs after a reset.
    pub entry_point: String,

    /// A statement which resets the device.
    pub reset_statement: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            entry_point: "main.py".into(),
            reset_statement: "from microbit import *;reset()".into(),
        }
    }
}

/// Time limits. `None` means wait forever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    /// How long a freshly opened port has to show a REPL prompt.
    pub probe_ms: Option<u64>,

    /// How long to wait for any marker outside of program output streaming.
    pub response_ms: Option<u64>,

    /// How often to check that a serial port is still present.
    pub liveness_check_ms: Option<u64>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_ms: Some(3000),
            response_ms: None,
            liveness_check_ms: Some(2000),
        }
    }
}

impl Timeouts {
    /// See [`Timeouts::probe_ms`].
    pub fn probe(&self) -> Option<Duration> {
        self.probe_ms.map(Duration::from_millis)
    }

    /// See [`Timeouts::response_ms`].
    pub fn response(&self) -> Option<Duration> {
        self.response_ms.map(Duration::from_millis)
    }

    /// See [`Timeouts::liveness_check_ms`].
    pub fn liveness_check(&self) -> Option<Duration> {
        self.liveness_check_ms.map(Duration::from_millis)
    }
}

/// The configuration used when connecting to a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Line parameters.
    pub line: LineSettings,

    /// Ports are only considered if they match any of these.
    pub filters: Vec<DeviceFilter>,

    /// Use this port instead of looking for one matching the filters.
    pub port: Option<String>,

    /// See [`ReadConfig`].
    pub read: ReadConfig,

    /// See [`Signals`].
    pub signals: Signals,

    /// See [`DeviceConfig`].
    pub device: DeviceConfig,

    /// See [`Timeouts`].
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            line: LineSettings::default(),
            filters: vec![DeviceFilter {
                vendor_id: 0x0d28,
                product_id: None,
            }],
            port: None,
            read: ReadConfig::default(),
            signals: Signals::default(),
            device: DeviceConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Could not parse configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            port: Some("/dev/ttyACM0".into()),
            filters: vec![
                DeviceFilter {
                    vendor_id: 0x0d28,
                    product_id: Some(0x0204),
                },
                DeviceFilter {
                    vendor_id: 0x2e8a,
                    product_id: None,
                },
            ],
            timeouts: Timeouts {
                response_ms: Some(10_000),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::InternalIssue(format!("Could not serialize configuration: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let p = p.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::BadConfig(format!("Could not read {p:?}: {e}")))?;

        let config = Self::deserialize(&s)?;
        config.validate()?;

        Ok(config)
    }

    fn check_signals_non_empty(&self) -> Result<(), Error> {
        for (name, signal) in self.signals.all() {
            if signal.is_empty() {
                return Err(Error::BadConfig(format!(
                    "The signal `{name}` is empty. Signals must be non-empty strings which do not show up in regular output."
                )));
            }
        }

        Ok(())
    }

    fn check_signals_unique(&self) -> Result<(), Error> {
        let duplicates = self
            .signals
            .all()
            .into_iter()
            .map(|(_, signal)| signal)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!("Signals are told apart by their text, so they must be unique. Duplicates: {duplicates:?}")))
        }
    }

    fn check_printable_signals(&self) -> Result<(), Error> {
        // These end up inside a single quoted Python string literal.
        for (name, signal) in [
            ("execution_start", self.signals.execution_start.as_str()),
            ("execution_done", self.signals.execution_done.as_str()),
        ] {
            if signal.contains(&['\'', '\\', '\r', '\n'][..]) {
                return Err(Error::BadConfig(format!(
                    "The signal `{name}` ({signal:?}) is printed by injected code and may not contain quotes, backslashes or newlines."
                )));
            }
        }

        Ok(())
    }

    fn check_read(&self) -> Result<(), Error> {
        if self.read.poll_interval_ms == 0 {
            return Err(Error::BadConfig(
                "The poll interval must be at least one millisecond.".into(),
            ));
        }

        // A marker longer than what we keep around could never be seen.
        let longest = self
            .signals
            .all()
            .into_iter()
            .map(|(_, signal)| signal.chars().count() + "\r\n".len())
            .max()
            .unwrap_or_default();

        if self.read.max_retained_chars < longest {
            return Err(Error::BadConfig(format!(
                "max_retained_chars is {}, but must be at least {longest} to be able to spot the longest signal.",
                self.read.max_retained_chars
            )));
        }

        Ok(())
    }

    /// Check the invariants the protocol relies on.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_signals_non_empty()?;
        self.check_signals_unique()?;
        self.check_printable_signals()?;
        self.check_read()?;

        Ok(())
    }
}

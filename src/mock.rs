//! A mock device, useful to test sessions without an actual board.
//!
//! The mock does nothing by itself.
//! Tests play the device's part: they read what the host sent, and make the device answer.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, info, trace};

use crate::{
    command::{decode_injected, Injection, INTERRUPT, LINES_BEFORE_CODE},
    config::Signals,
    transport::{EndpointId, Transport},
};

/// What a micro:bit says after a reset, before running the entry point.
pub const BANNER: &str =
    "MicroPython v1.13 on 2021-02-19; micro:bit v2.0.0 with nRF52833\r\nType \"help()\" for more information.\r\n";

/// Builder for a mock device and the transport connected to it.
#[derive(Debug)]
pub struct MockBuilder {
    name: String,
    signals: Signals,
    buffer_size: usize,
}

impl MockBuilder {
    /// Start a new builder.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            signals: Signals::default(),
            buffer_size: 4096,
        }
    }

    /// Set the [`Signals`] the mock uses.
    /// Must match what the host is configured with.
    pub fn set_signals(mut self, signals: Signals) -> Self {
        self.signals = signals;
        self
    }

    /// How many bytes may be in flight in each direction.
    pub fn set_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Connect a transport to a new mock device.
    #[must_use]
    pub fn build(self) -> (Transport, MockDevice) {
        info!(name = %self.name, "Running mock");

        let (host, device) = tokio::io::duplex(self.buffer_size);

        (
            Transport::new(EndpointId::Mock(self.name), host),
            MockDevice {
                io: device,
                received: vec![],
                signals: self.signals,
            },
        )
    }
}

/// The device end of a mock connection.
///
/// Dropping it is like unplugging the device.
#[derive(Debug)]
pub struct MockDevice {
    io: DuplexStream,
    received: Vec<u8>,
    signals: Signals,
}

fn invalid<S: Into<String>>(problem: S) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, problem.into())
}

impl MockDevice {
    /// Say `text` to the host.
    pub async fn emit(&mut self, text: &str) -> io::Result<()> {
        trace!("Device says {text:?}");
        self.io.write_all(text.as_bytes()).await
    }

    /// Wait until the host sent `token`.
    /// Returns what it sent before that.
    pub async fn read_until(&mut self, token: &str) -> io::Result<String> {
        let token = token.as_bytes();

        loop {
            if let Some(position) = self
                .received
                .windows(token.len())
                .position(|window| window == token)
            {
                let before = String::from_utf8_lossy(&self.received[..position]).into_owned();
                self.received.drain(..position + token.len());

                return Ok(before);
            }

            let mut buf = [0; 1024];
            let n = self.io.read(&mut buf).await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "The host hung up",
                ));
            }

            self.received.extend_from_slice(&buf[..n]);
        }
    }

    /// Wait for the host to interrupt.
    pub async fn expect_interrupt(&mut self) -> io::Result<()> {
        let before = self.read_until(&(INTERRUPT as char).to_string()).await?;
        debug!(?before, "Interrupted");

        Ok(())
    }

    /// Show a fresh REPL prompt.
    pub async fn prompt(&mut self) -> io::Result<()> {
        let prompt = format!("\r\n{}", self.signals.repl_prompt);
        self.emit(&prompt).await
    }

    /// Answer an interrupt at an idle REPL.
    pub async fn answer_interrupt(&mut self) -> io::Result<()> {
        self.expect_interrupt().await?;
        self.prompt().await
    }

    /// Wait for a line the host typed, and echo it like the REPL does.
    pub async fn read_command(&mut self) -> io::Result<String> {
        let line = self.read_until("\r").await?;
        self.emit(&format!("{line}\r\n")).await?;

        Ok(line)
    }

    async fn expect_injection(&mut self, expected: Injection) -> io::Result<String> {
        self.answer_interrupt().await?;
        let line = self.read_command().await?;

        let (injection, program) =
            decode_injected(&line).ok_or_else(|| invalid(format!("Not code: {line:?}")))?;

        if injection != expected {
            return Err(invalid(format!("Expected {expected:?}, got {injection:?}")));
        }

        let before = format!("print('{}')\r\n", self.signals.execution_start);
        let after = format!("\r\nprint('{}')", self.signals.execution_done);

        let code = program
            .strip_prefix(&before)
            .and_then(|program| program.strip_suffix(&after))
            .ok_or_else(|| invalid(format!("Markers missing: {program:?}")))?;

        Ok(code.replace("\r\n", "\n"))
    }

    /// Play along with a flash.
    /// Returns the code the host wants to store.
    ///
    /// The device is left right after the reset, the code is expected to start next.
    pub async fn expect_flash(&mut self) -> io::Result<String> {
        let code = self.expect_injection(Injection::Flash).await?;
        self.emit(BANNER).await?;

        Ok(code)
    }

    /// Play along with an execute.
    /// Returns the code the host wants to run.
    pub async fn expect_execute(&mut self) -> io::Result<String> {
        self.expect_injection(Injection::Execute).await
    }

    /// Play along with a reboot.
    pub async fn expect_reboot(&mut self) -> io::Result<()> {
        self.answer_interrupt().await?;
        self.read_command().await?;
        self.emit(BANNER).await
    }

    /// The injected code starts running.
    pub async fn start(&mut self) -> io::Result<()> {
        let start = format!("{}\r\n", self.signals.execution_start);
        self.emit(&start).await
    }

    /// The injected code is done.
    pub async fn done(&mut self) -> io::Result<()> {
        let done = format!("{}\r\n", self.signals.execution_done);
        self.emit(&done).await
    }

    /// The injected code fails at `line` (counting from zero) with `exception`,
    /// e.g. `NameError: name 'x' isn't defined`.
    pub async fn traceback(
        &mut self,
        injection: Injection,
        line: usize,
        exception: &str,
    ) -> io::Result<()> {
        let marker = match injection {
            Injection::Flash => &self.signals.file_traceback,
            Injection::Execute => &self.signals.exec_traceback,
        };

        let traceback = format!(
            "{marker}{}, in <module>\r\n{exception}\r\n",
            line + 1 + LINES_BEFORE_CODE
        );

        self.emit(&traceback).await
    }
}

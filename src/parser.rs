//! Turns device output into protocol milestones and [`OutputEvent`]s.
//!
//! A command goes through these steps:
//!
//! 1. Wait for a fresh REPL prompt, see [`SignalParser::await_prompt`].
//! 2. Wait for the start marker, see [`SignalParser::await_start`].
//!    A traceback instead means the code never ran, e.g. due to a syntax error.
//! 3. Stream output until the done marker or a traceback shows up, see [`SignalParser::stream`].
//!    Another start marker means the reset button was pressed.
//! 4. Parse the traceback, if any. See [`SignalParser::capture_error`].

use std::{future::Future, time::Duration};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    command::LINES_BEFORE_CODE,
    config::Signals,
    error::Error,
    events::{ErrorMessage, OutputEvent},
    reader::LineBufferReader,
};

/// What showed up after code was injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// The code started running.
    Running,

    /// The code failed before running.
    /// The traceback is next in line, see [`SignalParser::capture_error`].
    Traceback,

    /// The code was interrupted while it was still being typed into the REPL.
    Interrupted,
}

/// How streaming output ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    /// The code ran to completion.
    Done,

    /// The code failed.
    Failed(ErrorMessage),
}

/// How the REPL reports a `KeyboardInterrupt` in what it was typed directly.
/// Tracebacks of our code show up before this, so this only matches when the code never got to run.
const INTERRUPTED_AT_PROMPT: &str = "\r\nKeyboardInterrupt";

/// Run `read`, giving up after `limit` if there is one.
pub(crate) async fn bounded<T, F>(limit: Option<Duration>, waiting_for: &str, read: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
            warn!(?limit, "Gave up waiting for {waiting_for}");
            Error::DeviceUnresponsive(format!("waiting for {waiting_for}"))
        })?,
        None => read.await,
    }
}

/// Reads device output in terms of the marker strings.
#[derive(Debug)]
pub struct SignalParser {
    reader: LineBufferReader,
    prompt: String,
    start: String,
    done: String,
    file_traceback: String,
    exec_traceback: String,
    response_timeout: Option<Duration>,
}

impl SignalParser {
    /// Parse what `reader` provides.
    ///
    /// Waiting for anything but program output is bounded by `response_timeout`, if set.
    pub fn new(reader: LineBufferReader, signals: &Signals, response_timeout: Option<Duration>) -> Self {
        Self {
            reader,
            prompt: signals.repl_prompt.clone(),
            // The markers are printed on their own line.
            // Requiring the line ending also means the echo of our own command does not count.
            start: format!("{}\r\n", signals.execution_start),
            done: format!("{}\r\n", signals.execution_done),
            file_traceback: signals.file_traceback.clone(),
            exec_traceback: signals.exec_traceback.clone(),
            response_timeout,
        }
    }

    /// Forget about anything received so far.
    pub fn discard(&mut self) {
        self.reader.discard();
    }

    /// Wait for a REPL prompt.
    pub async fn await_prompt(&mut self) -> Result<(), Error> {
        bounded(
            self.response_timeout,
            "a REPL prompt",
            self.reader.read_until(&self.prompt),
        )
        .await?;

        debug!("At the prompt");
        Ok(())
    }

    /// Wait for `token`, which is typed by us and then echoed back.
    pub async fn await_echo(&mut self, token: &str) -> Result<String, Error> {
        let mut echoed = String::new();

        bounded(
            self.response_timeout,
            "an echo",
            self.reader
                .read_until_any_with_updates(&[token], |text, _| echoed = text.to_owned()),
        )
        .await?;

        Ok(echoed)
    }

    /// Wait for the code to start running.
    pub async fn await_start(&mut self) -> Result<Start, Error> {
        let tokens = [
            self.start.as_str(),
            self.file_traceback.as_str(),
            self.exec_traceback.as_str(),
            INTERRUPTED_AT_PROMPT,
        ];

        let index = bounded(
            self.response_timeout,
            "the code to start",
            self.reader.read_until_any_with_updates(&tokens, |_, _| {}),
        )
        .await?;

        match index {
            0 => {
                info!("Code started");
                Ok(Start::Running)
            }
            3 => {
                info!("Interrupted before starting");
                Ok(Start::Interrupted)
            }
            _ => {
                info!("Code failed to start");
                Ok(Start::Traceback)
            }
        }
    }

    /// Send program output to `events` until the code is done or fails.
    ///
    /// Offsets on the output count from the start of the code, across reset presses.
    ///
    /// This may take forever, so it is not bounded by the response timeout.
    pub async fn stream(
        &mut self,
        events: &mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<Finish, Error> {
        let tokens = [
            self.done.as_str(),
            self.start.as_str(),
            self.file_traceback.as_str(),
            self.exec_traceback.as_str(),
        ];

        // Output before the current read.
        let mut received = 0;

        loop {
            let base = received;

            let index = self
                .reader
                .read_until_any_with_updates(&tokens, |chunk, end| {
                    received = base + end;

                    if !chunk.is_empty() {
                        // The receiving end may have lost interest, that's fine.
                        let _ = events.send(OutputEvent::output(chunk, received));
                    }
                })
                .await?;

            match index {
                0 => {
                    info!("Code done");
                    return Ok(Finish::Done);
                }
                1 => {
                    info!("Reset pressed");
                    let _ = events.send(OutputEvent::ResetPressed);
                }
                _ => break,
            }
        }

        self.capture_error().await.map(Finish::Failed)
    }

    /// Parse the rest of a traceback.
    ///
    /// Expects the traceback marker to be consumed already, so the next line starts with
    /// the line number the code failed at.
    pub async fn capture_error(&mut self) -> Result<ErrorMessage, Error> {
        let response_timeout = self.response_timeout;

        bounded(response_timeout, "a traceback", async {
            let first = self.reader.read_line().await?;
            let line = parse_line_number(&first);

            // Any frames deeper than the first are indented.
            let exception = loop {
                let line = self.reader.read_line().await?;

                if !line.starts_with("  ") {
                    break line;
                }
            };

            let (exception_type, message) = exception
                .split_once(": ")
                .unwrap_or((exception.as_str(), ""));

            let error = ErrorMessage {
                line,
                exception_type: exception_type.trim().to_owned(),
                message: message.trim_end().to_owned(),
            };
            info!(%error, "Code failed");

            Ok::<_, Error>(error)
        })
        .await
    }
}

/// The line number in the user's code, counting from zero.
///
/// `text` is the rest of a traceback's first line within the code, e.g. `3, in <module>`.
/// The marker print we put in front of the code shifts what the device reports.
fn parse_line_number(text: &str) -> Option<usize> {
    let number = text.split(',').next()?.trim().parse::<usize>().ok()?;

    number.checked_sub(1 + LINES_BEFORE_CODE)
}

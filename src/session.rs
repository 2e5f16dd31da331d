//! The state machine sequencing commands on a connected device.
//!
//! Running code goes like this:
//! get a clean prompt, inject the code, wait for it to start, then stream output
//! in the background until it is done or fails.
//! The caller gets an [`OutputStream`] as soon as the code started.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    command::{self, INTERRUPT},
    config::{Config, DeviceConfig, Signals},
    error::Error,
    events::{ErrorMessage, OutputEvent, State},
    parser::{bounded, Finish, SignalParser, Start},
    reader::LineBufferReader,
    transport::{Pumps, Transport, TransportWriter},
};

/// The events of a single command, in order.
///
/// Ends once the command is done, failed, or the device disconnected.
#[derive(Debug)]
pub struct OutputStream {
    inner: UnboundedReceiverStream<OutputEvent>,
}

impl Stream for OutputStream {
    type Item = OutputEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Holding this means the session is busy.
/// Dropping it makes the session free again, however the command ended.
#[derive(Debug)]
struct BusyGuard {
    state: Arc<watch::Sender<State>>,
}

impl BusyGuard {
    fn acquire(state: &Arc<watch::Sender<State>>) -> Result<Self, Error> {
        let acquired = state.send_if_modified(|state| {
            if *state == State::Free {
                *state = State::Busy;
                true
            } else {
                false
            }
        });

        if acquired {
            debug!("Busy");
            Ok(Self {
                state: state.clone(),
            })
        } else {
            Err(Error::DeviceNotFree)
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.send_replace(State::Free);
        debug!("Free");
    }
}

/// A connected device running a REPL.
#[derive(Debug)]
pub struct Session {
    state: Arc<watch::Sender<State>>,
    parser: Arc<Mutex<SignalParser>>,
    writer: TransportWriter,
    pumps: Pumps,
    running: Mutex<Option<JoinHandle<()>>>,
    signals: Signals,
    device: DeviceConfig,
    response_timeout: Option<Duration>,
}

impl Session {
    pub(crate) fn new(transport: Transport, config: &Config) -> Self {
        let (writer, incoming, pumps) = transport.into_parts();

        let reader = LineBufferReader::new(incoming, &config.read);
        let parser = SignalParser::new(reader, &config.signals, config.timeouts.response());

        let (state, _) = watch::channel(State::Free);

        Self {
            state: Arc::new(state),
            parser: Arc::new(Mutex::new(parser)),
            writer,
            pumps,
            running: Mutex::new(None),
            signals: config.signals.clone(),
            device: config.device.clone(),
            response_timeout: config.timeouts.response(),
        }
    }

    /// Interrupt whatever runs and wait for a fresh prompt.
    /// Anything the device said before is forgotten.
    async fn resync(&self, parser: &mut SignalParser) -> Result<(), Error> {
        parser.discard();
        self.writer.write([INTERRUPT])?;
        parser.await_prompt().await
    }

    /// Check that the device answers at all.
    pub(crate) async fn probe(&self, limit: Option<Duration>) -> Result<(), Error> {
        let mut parser = self.parser.lock().await;

        bounded(limit, "a first REPL prompt", self.resync(&mut parser)).await
    }

    async fn run(&self, what: &'static str, line: String) -> Result<OutputStream, Error> {
        let busy = BusyGuard::acquire(&self.state)?;
        info!(what, "Running");

        let mut parser = self.parser.clone().lock_owned().await;

        self.resync(&mut parser).await?;
        self.writer.write(line)?;

        let start = parser.await_start().await?;

        let (events, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(
            async move {
                let finish = match start {
                    Start::Running => parser.stream(&events).await,
                    Start::Traceback => parser.capture_error().await.map(Finish::Failed),
                    Start::Interrupted => Ok(Finish::Failed(ErrorMessage {
                        line: None,
                        exception_type: "KeyboardInterrupt".into(),
                        message: String::new(),
                    })),
                };

                match finish {
                    Ok(Finish::Done) => {}
                    Ok(Finish::Failed(error)) => {
                        let _ = events.send(OutputEvent::ErrorMessage(error));
                    }
                    Err(e) => warn!(%e, "Output ended early"),
                }

                // The next command may take the parser as soon as we are free,
                // and whoever sees the stream end sees us free.
                drop(parser);
                drop(busy);
                drop(events);
            }
            .instrument(info_span!("output", what)),
        );

        // Any previous run is over, since we were free.
        *self.running.lock().await = Some(task);

        Ok(OutputStream {
            inner: UnboundedReceiverStream::new(rx),
        })
    }

    /// Store `code` as the entry point, and reset the device to run it.
    pub async fn flash(&self, code: &str) -> Result<OutputStream, Error> {
        self.run(
            "flash",
            command::flash(code, &self.signals, &self.device),
        )
        .await
    }

    /// Run `code` in the REPL as is, keeping what previous code left behind.
    pub async fn execute(&self, code: &str) -> Result<OutputStream, Error> {
        self.run("execute", command::execute(code, &self.signals))
            .await
    }

    /// Reset the device, running the stored entry point.
    pub async fn reboot(&self) -> Result<OutputStream, Error> {
        self.run("reboot", command::reboot(&self.device)).await
    }

    /// Stop running code. Returns once the session is free again.
    ///
    /// The stream of the interrupted command likely ends with a `KeyboardInterrupt`.
    /// That includes code interrupted while still being typed into the REPL,
    /// in which case the command's stream holds only the error.
    ///
    /// An interrupt landing while the session waits for a fresh prompt ahead of a command
    /// is swallowed by the REPL, so the command runs anyway.
    /// This waits for it to end, or for the response timeout if one is configured.
    pub async fn interrupt(&self) -> Result<(), Error> {
        let mut state = self.state.subscribe();

        if *state.borrow() == State::Free {
            return Err(Error::DeviceNotRunning);
        }

        info!("Interrupting");
        self.writer.write([INTERRUPT])?;

        bounded(self.response_timeout, "an interrupt to land", async {
            state
                .wait_for(|state| *state == State::Free)
                .await
                .map(|_| ())
                .map_err(|_| Error::Disconnected)
        })
        .await
    }

    /// See [`State`].
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Ask the REPL how `prefix` could be completed.
    pub async fn completions(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let _busy = BusyGuard::acquire(&self.state)?;
        let mut parser = self.parser.lock().await;

        self.resync(&mut parser).await?;
        self.writer
            .write(command::completion(prefix, &self.signals))?;

        let echoed = parser.await_echo(&self.signals.completion_end).await?;

        // Get rid of what we typed.
        self.resync(&mut parser).await?;

        let completions = command::parse_completions(prefix, &echoed);
        debug!(prefix, ?completions, "Completions");

        Ok(completions)
    }

    /// Close the connection.
    ///
    /// Reading stops first, then writing, then the transport is released.
    /// Any running command's stream ends.
    pub async fn disconnect(self) {
        info!("Disconnecting");

        self.pumps.close().await;

        if let Some(running) = self.running.into_inner() {
            if let Err(e) = running.await {
                warn!(?e, "Output task did not end cleanly");
            }
        }
    }
}

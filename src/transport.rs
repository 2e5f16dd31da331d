use std::{fmt::Display, time::Duration};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::{codec::Decoder, sync::CancellationToken};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    error::Error,
    serial::{codecs::text::TextCodec, SerialMessage, SerialMessageBytes},
};

/// What a transport is connected to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
pub enum EndpointId {
    /// A tty/COM port.
    Tty(String),

    /// An in-memory mock device.
    Mock(String),
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointId::Tty(tty) => {
                // Reduce log verbosity
                let tty = tty.strip_prefix("/dev/serial/by-id/").unwrap_or(tty);

                write!(f, "tty: {tty}")
            }
            EndpointId::Mock(mock) => write!(f, "mock: {mock}"),
        }
    }
}

/// Completes once the transport is no longer usable.
///
/// Happens once, either because the device went away or because the session was disconnected.
/// Waiting on it does not cause a disconnect.
#[derive(Debug, Clone, Default)]
pub struct Disconnection {
    token: CancellationToken,
}

impl Disconnection {
    /// Wait until disconnected.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// Has the disconnection happened already?
    pub fn is_disconnected(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn raise(&self) {
        self.token.cancel()
    }
}

/// Puts bytes on the wire.
#[derive(Debug, Clone)]
pub struct TransportWriter {
    tx: mpsc::UnboundedSender<SerialMessageBytes>,
}

impl TransportWriter {
    /// Queue `message` for writing.
    pub fn write<M>(&self, message: M) -> Result<(), Error>
    where
        M: AsRef<[u8]>,
    {
        self.tx
            .send(message.as_ref().to_vec())
            .map_err(|_| Error::Disconnected)
    }
}

/// The tasks moving data between the byte stream and the channels.
#[derive(Debug)]
pub(crate) struct Pumps {
    id: EndpointId,
    stop_reading: CancellationToken,
    reading: JoinHandle<()>,
    stop_writing: CancellationToken,
    writing: JoinHandle<()>,
    disconnection: Disconnection,
}

impl Pumps {
    /// Tear down in order: the read side first, then the write side.
    /// The byte stream is closed once both have let go of it.
    pub(crate) async fn close(self) {
        debug!(id = %self.id, "Closing transport");

        self.stop_reading.cancel();
        if let Err(e) = self.reading.await {
            warn!(?e, "Read pump did not end cleanly");
        }
        debug!("Reader closed");

        self.stop_writing.cancel();
        if let Err(e) = self.writing.await {
            warn!(?e, "Write pump did not end cleanly");
        }
        debug!("Writer closed");

        self.disconnection.raise();
        info!(id = %self.id, "Transport closed");
    }
}

/// A byte stream to a device, decoded into text.
#[derive(Debug)]
pub struct Transport {
    id: EndpointId,
    writer: TransportWriter,
    incoming: mpsc::UnboundedReceiver<SerialMessage>,
    pumps: Pumps,
    disconnection: Disconnection,
}

impl Transport {
    /// Spawn the pumps for reading and writing `io`.
    pub fn new<IO>(id: EndpointId, io: IO) -> Self
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // Sink: Send things (to the device), stream: receive things (from the device)
        let (mut sink, mut stream) = TextCodec.framed(io).split();

        let (incoming_tx, incoming) = mpsc::unbounded_channel::<SerialMessage>();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<SerialMessageBytes>();

        let disconnection = Disconnection::default();
        let stop_reading = CancellationToken::new();
        let stop_writing = CancellationToken::new();

        let span = match &id {
            EndpointId::Tty(path) => info_span!("tty", %path),
            EndpointId::Mock(name) => info_span!("mock", %name),
        };

        let reading = {
            let stop = stop_reading.clone();
            let disconnection = disconnection.clone();

            tokio::spawn(
                async move {
                    loop {
                        tokio::select! {
                            _ = stop.cancelled() => {
                                debug!("Asked to stop reading");
                                break;
                            }
                            frame = stream.next() => match frame {
                                Some(Ok(text)) => {
                                    trace!("Text from device: `{:?}`", text.chars().take(32).collect::<String>());

                                    if incoming_tx.send(text).is_err() {
                                        debug!("Nobody reads anymore, exiting");
                                        break;
                                    }
                                }
                                Some(Err(e)) => {
                                    error!(?e, "Read error, exiting");
                                    disconnection.raise();
                                    break;
                                }
                                None => {
                                    warn!("Device closed the stream");
                                    disconnection.raise();
                                    break;
                                }
                            }
                        }
                    }
                }
                .instrument(span.clone()),
            )
        };

        let writing = {
            let stop = stop_writing.clone();
            let disconnection = disconnection.clone();

            tokio::spawn(
                async move {
                    loop {
                        tokio::select! {
                            _ = stop.cancelled() => {
                                debug!("Asked to stop writing");
                                break;
                            }
                            message = outgoing_rx.recv() => match message {
                                Some(message) => {
                                    trace!("Message to device: `{:?}`", &message[..message.len().min(32)]);

                                    if let Err(e) = sink.send(message).await {
                                        error!(?e, "Write error, exiting");
                                        disconnection.raise();
                                        break;
                                    }
                                }
                                None => {
                                    debug!("Nobody writes anymore, exiting");
                                    break;
                                }
                            }
                        }
                    }
                }
                .instrument(span),
            )
        };

        Self {
            id: id.clone(),
            writer: TransportWriter { tx: outgoing },
            incoming,
            pumps: Pumps {
                id,
                stop_reading,
                reading,
                stop_writing,
                writing,
                disconnection: disconnection.clone(),
            },
            disconnection,
        }
    }

    /// What this transport is connected to.
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// A handle on the disconnection event.
    pub fn disconnection(&self) -> Disconnection {
        self.disconnection.clone()
    }

    /// Poll `still_present` every `interval`, and treat the device as gone once it says no.
    pub(crate) fn watch_presence<F>(&self, interval: Duration, still_present: F)
    where
        F: Fn() -> bool + Send + 'static,
    {
        let stop_reading = self.pumps.stop_reading.clone();
        let disconnection = self.disconnection.clone();

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = disconnection.wait() => break,
                        _ = tokio::time::sleep(interval) => {
                            if !still_present() {
                                warn!("Device vanished");
                                stop_reading.cancel();
                                disconnection.raise();
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("presence", id = %self.id)),
        );
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        TransportWriter,
        mpsc::UnboundedReceiver<SerialMessage>,
        Pumps,
    ) {
        (self.writer, self.incoming, self.pumps)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn text_flows_both_ways() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let transport = Transport::new(EndpointId::Mock("both-ways".into()), ours);
        let (writer, mut incoming, _pumps) = transport.into_parts();

        writer.write(b"\x03").unwrap();
        writer.write("print(1)\r").unwrap();

        let mut received = vec![0; "\x03print(1)\r".len()];
        theirs.read_exact(&mut received).await.unwrap();
        assert_eq!(received, b"\x03print(1)\r");

        theirs.write_all("1\r\n>>> ".as_bytes()).await.unwrap();

        let mut text = String::new();
        while text != "1\r\n>>> " {
            text.push_str(&incoming.recv().await.unwrap());
        }
    }

    #[tokio::test]
    async fn device_hanging_up_disconnects() {
        let (ours, theirs) = tokio::io::duplex(64);
        let transport = Transport::new(EndpointId::Mock("hang-up".into()), ours);
        let disconnection = transport.disconnection();
        let (_writer, mut incoming, _pumps) = transport.into_parts();

        drop(theirs);

        disconnection.wait().await;
        assert!(incoming.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_is_ordered_and_final() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let transport = Transport::new(EndpointId::Mock("close".into()), ours);
        let disconnection = transport.disconnection();
        let (writer, mut incoming, pumps) = transport.into_parts();

        assert!(!disconnection.is_disconnected());
        pumps.close().await;
        assert!(disconnection.is_disconnected());

        assert!(incoming.recv().await.is_none());
        assert_eq!(writer.write(b"too late"), Err(Error::Disconnected));

        // Our end of the stream is gone.
        let mut buf = [0; 8];
        assert_eq!(theirs.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_device_disconnects() {
        let (ours, _theirs) = tokio::io::duplex(64);
        let transport = Transport::new(EndpointId::Mock("vanish".into()), ours);
        let disconnection = transport.disconnection();

        transport.watch_presence(Duration::from_secs(1), || false);

        disconnection.wait().await;
        let (_writer, mut incoming, _pumps) = transport.into_parts();
        assert!(incoming.recv().await.is_none());
    }
}

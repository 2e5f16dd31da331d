//! Pull based reads on top of the text arriving from the transport.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tracing::trace;

use crate::{config::ReadConfig, error::Error, serial::SerialMessage};

const LINE_END: &str = "\r\n";

/// Buffers text from the device and searches it for tokens.
#[derive(Debug)]
pub struct LineBufferReader {
    buffer: String,
    incoming: mpsc::UnboundedReceiver<SerialMessage>,
    poll_interval: Duration,
    max_retained_chars: usize,
}

/// Byte offset where the last `chars` characters of `text` start.
fn tail_start(text: &str, chars: usize) -> usize {
    if chars == 0 {
        return text.len();
    }

    text.char_indices()
        .rev()
        .nth(chars - 1)
        .map_or(0, |(index, _)| index)
}

impl LineBufferReader {
    /// Read text arriving on `incoming`.
    pub fn new(incoming: mpsc::UnboundedReceiver<SerialMessage>, config: &ReadConfig) -> Self {
        Self {
            buffer: String::new(),
            incoming,
            poll_interval: config.poll_interval().max(Duration::from_millis(1)),
            max_retained_chars: config.max_retained_chars,
        }
    }

    /// Length of the longest tail of `text` which could be the start of one of the `tokens`.
    fn partial_token_len(text: &str, tokens: &[&str]) -> usize {
        tokens
            .iter()
            .flat_map(|&token| {
                token
                    .char_indices()
                    .skip(1)
                    .map(move |(index, _)| &token[..index])
            })
            .filter(|start| text.ends_with(start))
            .map(str::len)
            .max()
            .unwrap_or_default()
    }

    /// Wait for more text and append it to the buffer.
    async fn fetch(&mut self) -> Result<(), Error> {
        let text = self.incoming.recv().await.ok_or(Error::Disconnected)?;
        trace!(len = text.len(), "Fetched");

        self.buffer.push_str(&text);

        Ok(())
    }

    /// Keep only the last `chars` characters, return how many bytes were dropped.
    fn retain_tail(&mut self, chars: usize) -> usize {
        let start = tail_start(&self.buffer, chars);
        self.buffer.drain(..start);

        start
    }

    /// Remove everything up to and including the first `token`, return what came before it.
    ///
    /// The token must be in the buffer.
    fn split_off_through(&mut self, token: &str, position: usize) -> String {
        let before = self.buffer[..position].to_owned();
        self.buffer.drain(..position + token.len());

        before
    }

    /// The earliest occurrence of any token.
    /// Ties go to the token listed first.
    fn find_any(&self, tokens: &[&str]) -> Option<(usize, usize)> {
        tokens
            .iter()
            .enumerate()
            .filter_map(|(index, token)| self.buffer.find(token).map(|position| (index, position)))
            .min_by_key(|&(index, position)| (position, index))
    }

    /// Wait for a line, and return it without the line ending.
    ///
    /// Only use this when the device is known to print a full line next,
    /// since everything waits until it does.
    pub async fn read_line(&mut self) -> Result<String, Error> {
        loop {
            if let Some(position) = self.buffer.find(LINE_END) {
                return Ok(self.split_off_through(LINE_END, position));
            }

            self.fetch().await?;
        }
    }

    /// Wait for `token`, discarding it and everything before it.
    ///
    /// While waiting, only the few characters which may be the start of the token are kept.
    pub async fn read_until(&mut self, token: &str) -> Result<(), Error> {
        let keep = token.chars().count().saturating_sub(1);

        loop {
            if let Some(position) = self.buffer.find(token) {
                self.split_off_through(token, position);
                return Ok(());
            }

            self.retain_tail(keep);
            self.fetch().await?;
        }
    }

    /// Wait for any of the `tokens`, returning the index of the one found.
    ///
    /// While waiting, `on_progress` is handed the buffer each poll interval if it has changed since.
    /// A trailing part of the buffer which may turn out to be a token is left out.
    /// At most the configured number of characters are kept between reads.
    ///
    /// Along with the text, `on_progress` gets the byte offset right past it,
    /// counted from where this call started reading.
    /// Text dropped to stay within bounds still counts, so the offset says exactly
    /// where the text sits in everything received.
    ///
    /// When a token is found, `on_progress` is handed what came before it a final time,
    /// and the buffer continues after the token.
    pub async fn read_until_any_with_updates<F>(
        &mut self,
        tokens: &[&str],
        mut on_progress: F,
    ) -> Result<usize, Error>
    where
        F: FnMut(&str, usize),
    {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes right away.
        ticker.tick().await;

        let mut changed = false;

        // Bytes dropped from the front of the buffer so far.
        let mut dropped = 0;

        let (index, position) = loop {
            if let Some(found) = self.find_any(tokens) {
                break found;
            }

            dropped += self.retain_tail(self.max_retained_chars);

            tokio::select! {
                fetched = self.fetch() => {
                    fetched?;
                    changed = true;
                }
                _ = ticker.tick() => {
                    if changed {
                        // Might be a token in the making, hold it back until we know.
                        let shown = self.buffer.len() - Self::partial_token_len(&self.buffer, tokens);
                        on_progress(&self.buffer[..shown], dropped + shown);
                        changed = false;
                    }
                }
            }
        };

        let before = self.split_off_through(tokens[index], position);
        on_progress(&before, dropped + position);

        Ok(index)
    }

    /// Throw away everything received so far.
    pub fn discard(&mut self) {
        while self.incoming.try_recv().is_ok() {}
        self.buffer.clear();
    }

    /// Borrow what is currently buffered.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }
}

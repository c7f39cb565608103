// src/exec/feeder.rs

//! Ordered handoff of command payloads into an interpreter's stdin.
//!
//! The feeder side is cheap to clone; the single [`FeedReader`] is consumed by
//! a pump task that writes into the child's stdin (a pipe or a PTY master).
//! Closing enqueues a sentinel: the reader ends once it dequeues it, which in
//! turn closes the interpreter's input.

use std::io::{self, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::ExecError;

/// Default number of payloads that may be queued before `put` waits.
pub const DEFAULT_FEEDER_CAPACITY: usize = 16;

/// Writer half of the feed queue.
#[derive(Debug, Clone)]
pub struct CommandFeeder {
    tx: mpsc::Sender<Option<Vec<u8>>>,
}

/// Reader half of the feed queue.
#[derive(Debug)]
pub struct FeedReader {
    rx: mpsc::Receiver<Option<Vec<u8>>>,
    done: bool,
}

/// Create a feeder/reader pair. `capacity` is clamped to at least 1.
pub fn command_feeder(capacity: usize) -> (CommandFeeder, FeedReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandFeeder { tx }, FeedReader { rx, done: false })
}

impl CommandFeeder {
    /// Enqueue one payload, appending a trailing newline if it lacks one.
    pub async fn put(&self, payload: impl Into<Vec<u8>>) -> Result<(), ExecError> {
        let mut payload = payload.into();
        if payload.last() != Some(&b'\n') {
            payload.push(b'\n');
        }

        self.tx
            .send(Some(payload))
            .await
            .map_err(|_| ExecError::Io("command feeder is closed".to_string()))
    }

    /// Enqueue the close sentinel. Closing twice is harmless.
    pub async fn close(&self) {
        if self.tx.send(None).await.is_err() {
            debug!("command feeder already closed");
        }
    }

    /// Non-waiting close used on teardown paths where the queue may be full
    /// because the interpreter stopped reading.
    pub fn try_close(&self) {
        let _ = self.tx.try_send(None);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Forward everything `source` produces into the queue until EOF.
    ///
    /// Used for a request's own stdin; the returned task is aborted when the
    /// request completes.
    pub fn spawn_forward<R>(&self, mut source: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match source.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Some(buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "request stdin source failed");
                        break;
                    }
                }
            }
        })
    }
}

impl FeedReader {
    /// Next payload; `None` once the sentinel was dequeued or all feeders are gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Some(chunk)) => Some(chunk),
            Some(None) | None => {
                self.done = true;
                None
            }
        }
    }

    /// Blocking variant for use on a blocking thread (PTY masters).
    pub fn blocking_recv(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }
        match self.rx.blocking_recv() {
            Some(Some(chunk)) => Some(chunk),
            Some(None) | None => {
                self.done = true;
                None
            }
        }
    }
}

/// Copy queued payloads into an async writer (a piped child stdin).
///
/// Returns when the feeder is closed; dropping `writer` afterwards delivers
/// EOF to the interpreter.
pub async fn pump_into<W>(mut reader: FeedReader, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = reader.recv().await {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
    }
    writer.shutdown().await.or(Ok(()))
}

/// Blocking counterpart of [`pump_into`].
pub fn pump_blocking<W: Write>(mut reader: FeedReader, mut writer: W) -> io::Result<()> {
    while let Some(chunk) = reader.blocking_recv() {
        writer.write_all(&chunk)?;
        writer.flush()?;
    }
    Ok(())
}

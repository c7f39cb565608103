// src/exec/sink.rs

//! Downstream writers for interpreter output.
//!
//! [`BestEffortSink`] is the only place where write errors are swallowed: an
//! interpreter's output loop must never stall or die because whoever consumes
//! the bytes went away. The trade-off lives in the type (its `deliver` returns
//! nothing) instead of being hidden at call sites.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use super::OutputSink;

/// Optional downstream writer whose writes cannot fail.
pub struct BestEffortSink {
    label: String,
    inner: Option<OutputSink>,
}

impl BestEffortSink {
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            inner: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// Swap the downstream writer, returning the previous one.
    pub fn attach(&mut self, writer: Option<OutputSink>) -> Option<OutputSink> {
        std::mem::replace(&mut self.inner, writer)
    }

    /// Forward `data`; drops it silently when detached, logs write errors.
    pub fn deliver(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let Some(writer) = self.inner.as_mut() else {
            trace!(sink = %self.label, bytes = data.len(), "no writer attached; dropping output");
            return;
        };

        if let Err(e) = writer.write_all(data).and_then(|_| writer.flush()) {
            warn!(sink = %self.label, error = %e, "downstream write failed; output dropped");
        }
    }
}

impl std::fmt::Debug for BestEffortSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BestEffortSink")
            .field("label", &self.label)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Cloneable in-memory writer, handy for capturing output of a request.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Boxed clone, ready to be handed to an `ExecRequest`.
    pub fn sink(&self) -> OutputSink {
        Box::new(self.clone())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// src/exec/proxy.rs

//! Reassignable, marker-scanning output sink.
//!
//! One [`OutputProxy`] sits behind each of an interpreter's output streams for
//! the whole lifetime of the process. A background monitor copies bytes into
//! it; each request attaches its own downstream writer for the duration of the
//! request and detaches it afterwards.
//!
//! When a completion marker regex is armed, every chunk is scanned: the first
//! match is stripped from the forwarded bytes and reported through the marker
//! callback after [`MARKER_GRACE`], so the rest of the same write reaches the
//! downstream writer before anyone reacts to the marker.

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::OutputSink;
use super::sink::BestEffortSink;

/// Delay between observing a marker and invoking its callback.
pub const MARKER_GRACE: Duration = Duration::from_millis(50);

/// Pause before detaching a writer that was written to recently.
pub const DETACH_SETTLE: Duration = Duration::from_millis(100);

const RECENT_WRITE_WINDOW: Duration = Duration::from_secs(1);
const READ_BUF_SIZE: usize = 8192;

/// A marker occurrence: the full match and its capture groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    pub text: String,
    pub groups: Vec<Option<String>>,
}

impl MarkerMatch {
    /// Capture group `index` (0 is the whole match).
    pub fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return Some(&self.text);
        }
        self.groups.get(index - 1).and_then(|g| g.as_deref())
    }
}

pub type MarkerCallback = Arc<dyn Fn(MarkerMatch) + Send + Sync>;

struct MarkerWatch {
    regex: Regex,
    on_found: MarkerCallback,
}

struct ProxyState {
    sink: BestEffortSink,
    marker: Option<MarkerWatch>,
    last_write: Option<Instant>,
}

struct ProxyInner {
    name: String,
    state: Mutex<ProxyState>,
}

/// Cloneable handle to a shared output proxy.
#[derive(Clone)]
pub struct OutputProxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for OutputProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputProxy")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl OutputProxy {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(ProxyInner {
                state: Mutex::new(ProxyState {
                    sink: BestEffortSink::detached(name.clone()),
                    marker: None,
                    last_write: None,
                }),
                name,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has_writer(&self) -> bool {
        self.lock().sink.is_attached()
    }

    fn wrote_recently(&self) -> bool {
        self.lock()
            .last_write
            .is_some_and(|at| at.elapsed() < RECENT_WRITE_WINDOW)
    }

    /// Replace the downstream writer.
    ///
    /// Detaching (`None`) right after output was produced first waits
    /// [`DETACH_SETTLE`] so bytes already in flight land in the old writer.
    /// The old writer is flushed and dropped.
    pub async fn set_writer(&self, writer: Option<OutputSink>) {
        if writer.is_none() && self.wrote_recently() {
            tokio::time::sleep(DETACH_SETTLE).await;
        }

        let previous = self.lock().sink.attach(writer);
        if let Some(mut previous) = previous {
            if let Err(e) = previous.flush() {
                debug!(proxy = %self.name(), error = %e, "flushing detached writer failed");
            }
        }
    }

    /// Attach a writer and arm a marker in one step.
    pub async fn set_writer_marker(
        &self,
        writer: Option<OutputSink>,
        marker: Regex,
        on_found: MarkerCallback,
    ) {
        self.set_writer(writer).await;
        self.set_marker(marker, on_found);
    }

    pub fn set_marker(&self, regex: Regex, on_found: MarkerCallback) {
        self.lock().marker = Some(MarkerWatch { regex, on_found });
    }

    pub fn clear_marker(&self) {
        self.lock().marker = None;
    }

    /// Disarm the marker and detach the writer.
    pub async fn detach(&self) {
        self.clear_marker();
        self.set_writer(None).await;
    }

    /// Scan and forward one chunk. Always reports the full chunk as written.
    pub fn write_chunk(&self, data: &[u8]) -> usize {
        let mut state = self.lock();
        state.last_write = Some(Instant::now());

        let (forwarded, found) = match state.marker.as_ref() {
            Some(watch) => scan_marker(&self.inner.name, &watch.regex, data),
            None => (Cow::Borrowed(data), None),
        };

        if let Some(found) = found {
            if let Some(watch) = state.marker.as_ref() {
                fire_marker(Arc::clone(&watch.on_found), found);
            }
        }

        state.sink.deliver(&forwarded);
        data.len()
    }

    /// Copy `source` into the proxy on a background task until EOF or error.
    pub fn monitor<R>(&self, mut source: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let proxy = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            loop {
                match source.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        proxy.write_chunk(&buf[..n]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(proxy = %proxy.name(), error = %e, "output source failed");
                        break;
                    }
                }
            }
            debug!(proxy = %proxy.name(), "output monitor ended");
        })
    }

    /// Blocking-thread variant of [`OutputProxy::monitor`] for PTY masters.
    ///
    /// A PTY master reports `EIO` once every slave handle is closed; that is
    /// treated as end of stream.
    pub fn monitor_blocking<R>(&self, mut source: R) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        let proxy = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        proxy.write_chunk(&buf[..n]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        debug!(proxy = %proxy.name(), error = %e, "pty output source ended");
                        break;
                    }
                }
            }
            debug!(proxy = %proxy.name(), "output monitor ended");
        })
    }
}

impl Write for OutputProxy {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_chunk(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Strip the first marker match from `data`.
fn scan_marker<'a>(
    proxy: &str,
    regex: &Regex,
    data: &'a [u8],
) -> (Cow<'a, [u8]>, Option<MarkerMatch>) {
    let mut all = regex.captures_iter(data);

    let Some(caps) = all.next() else {
        return (Cow::Borrowed(data), None);
    };
    let Some(whole) = caps.get(0) else {
        return (Cow::Borrowed(data), None);
    };

    let extra = all.count();
    if extra > 0 {
        warn!(
            proxy,
            extra,
            "multiple completion markers in one chunk; only the first is consumed"
        );
    }

    let found = MarkerMatch {
        text: String::from_utf8_lossy(whole.as_bytes()).into_owned(),
        groups: caps
            .iter()
            .skip(1)
            .map(|g| g.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
            .collect(),
    };

    let mut stripped = Vec::with_capacity(data.len() - whole.len());
    stripped.extend_from_slice(&data[..whole.start()]);
    stripped.extend_from_slice(&data[whole.end()..]);

    (Cow::Owned(stripped), Some(found))
}

fn fire_marker(on_found: MarkerCallback, found: MarkerMatch) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(MARKER_GRACE).await;
                on_found(found);
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(MARKER_GRACE);
                on_found(found);
            });
        }
    }
}

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use aardy::content_type::ContentType;
use aardy::errors::ExecError;
use aardy::exec::{ExecFuture, ExecRequest, ExecResponse, Executor, RequestHeader};

/// One request as the fake saw it.
#[derive(Debug, Clone)]
pub struct ExecutedRequest {
    pub header: RequestHeader,
    pub content: String,
}

/// A fake executor that:
/// - records which requests were executed, in start order
/// - echoes the payload to the request's stdout sink
/// - sleeps for the configured delay, honouring cancellation
/// - exits 0, or with the status configured for the payload.
pub struct FakeExecutor {
    name: String,
    content_types: Vec<ContentType>,
    delay: Duration,
    exits: HashMap<String, i32>,
    executed: Arc<Mutex<Vec<ExecutedRequest>>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    cleanups: AtomicUsize,
}

impl FakeExecutor {
    pub fn new(name: &str, content_type: &str) -> Self {
        Self {
            name: name.to_string(),
            content_types: vec![content_type.parse().expect("valid content type in test")],
            delay: Duration::ZERO,
            exits: HashMap::new(),
            executed: Arc::new(Mutex::new(Vec::new())),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Exit with `status` when the payload equals `content`.
    pub fn with_exit(mut self, content: &str, status: i32) -> Self {
        self.exits.insert(content.to_string(), status);
        self
    }

    pub fn executed(&self) -> Vec<ExecutedRequest> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_contents(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.content).collect()
    }

    /// Highest number of requests observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    async fn run(&self, cancel: CancellationToken, request: ExecRequest) -> Result<i32, ExecError> {
        let ExecRequest {
            header,
            content,
            mut stdout,
            ..
        } = request;
        let content = String::from_utf8_lossy(&content).into_owned();

        self.executed.lock().unwrap().push(ExecutedRequest {
            header,
            content: content.clone(),
        });

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {
                if let Some(out) = stdout.as_mut() {
                    let _ = writeln!(out, "{content}");
                }
                Ok(self.exits.get(&content).copied().unwrap_or(0))
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl Executor for FakeExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn content_types(&self) -> &[ContentType] {
        &self.content_types
    }

    fn execute(&self, cancel: CancellationToken, request: ExecRequest) -> ExecFuture<'_> {
        Box::pin(async move {
            let header = request.header.clone();
            let outcome = self.run(cancel, request).await;
            ExecResponse::from_outcome(header, outcome)
        })
    }

    fn cleanup(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#![allow(dead_code)]

use std::time::Duration;

use aardy::content_type::ContentType;
use aardy::exec::command::InterpreterCommand;
use aardy::exec::{ExecRequest, ExecutorOptions, PersistentProcessExecutor, RequestHeader, ShellStrategy};

pub use aardy_test_utils::builders;
pub use aardy_test_utils::fake_executor::FakeExecutor;
pub use aardy_test_utils::{init_tracing, with_timeout, with_timeout_secs};

pub fn ct(s: &str) -> ContentType {
    s.parse().expect("valid content type in test")
}

pub fn request(node: &str, content_type: &str, content: &str) -> ExecRequest {
    ExecRequest::new(RequestHeader::new("test-run", node), ct(content_type), content)
}

/// A bash executor speaking the exit-marker protocol over plain pipes.
pub fn piped_bash() -> PersistentProcessExecutor {
    PersistentProcessExecutor::new(
        "bash",
        ct("text/bash"),
        InterpreterCommand::new("bash"),
        ShellStrategy::new(),
    )
    .with_options(ExecutorOptions {
        disable_pty: true,
        ..ExecutorOptions::default()
    })
}

/// Whether this machine can allocate pseudo-terminals (containers often can't).
pub fn pty_available() -> bool {
    #[cfg(unix)]
    {
        aardy::exec::pty::open_pty().is_ok()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

pub const SHORT: Duration = Duration::from_millis(200);

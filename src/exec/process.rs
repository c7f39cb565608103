// src/exec/process.rs

//! Spawning and supervising interpreter processes.
//!
//! [`WiredProcess::spawn`] starts a child with its stdin fed from a
//! [`CommandFeeder`] and its stdout/stderr copied into two [`OutputProxy`]s,
//! either over plain pipes or over two pseudo-terminals. The child is placed
//! in its own process group so the whole job can be interrupted or killed.
//!
//! [`ProcessHandle`] is the cloneable view other components use to observe
//! the exit status or to request a kill.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::EXIT_STATUS_UNKNOWN;
use super::command::InterpreterCommand;
use super::feeder::{CommandFeeder, DEFAULT_FEEDER_CAPACITY, FeedReader, command_feeder, pump_into};
use super::proxy::OutputProxy;

/// How long teardown waits for output monitors to drain before aborting them.
const MONITOR_SETTLE: Duration = Duration::from_millis(500);

/// Cloneable handle to a running (or finished) child process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    path: String,
    kill: CancellationToken,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program path, as used in "terminated unexpectedly" errors.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn exit_status(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Resolves with the exit status once the process is gone.
    pub async fn exited(&self) -> i32 {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(code) = *rx.borrow_and_update() {
                return code;
            }
            if rx.changed().await.is_err() {
                return (*rx.borrow()).unwrap_or(EXIT_STATUS_UNKNOWN);
            }
        }
    }

    /// Force-kill the process group. Idempotent.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Send SIGINT to the process group (the interpreter and its foreground job).
    #[cfg(unix)]
    pub fn interrupt(&self) -> io::Result<()> {
        match self.pid {
            Some(pid) if !self.has_exited() => signal_group(pid, libc::SIGINT),
            _ => Ok(()),
        }
    }

    #[cfg(not(unix))]
    pub fn interrupt(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Signal every process in the group led by `pid`.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if unsafe { libc::kill(-pgid, signal) } < 0 {
        let err = io::Error::last_os_error();
        // ESRCH: the group is already gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

/// Map an `ExitStatus` to an integer: the exit code, or 128+signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    EXIT_STATUS_UNKNOWN
}

/// Take ownership of `child` and publish its exit status through a watch channel.
fn supervise(mut child: Child, path: String) -> ProcessHandle {
    let pid = child.id();
    let kill = CancellationToken::new();
    let (exit_tx, exit_rx) = watch::channel(None);

    let kill_requested = kill.clone();
    let label = path.clone();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_requested.cancelled() => {
                debug!(path = %label, ?pid, "killing interpreter process group");
                #[cfg(unix)]
                if let Some(pid) = pid {
                    if let Err(e) = signal_group(pid, libc::SIGKILL) {
                        debug!(path = %label, error = %e, "killing process group failed");
                    }
                }
                if let Err(e) = child.start_kill() {
                    debug!(path = %label, error = %e, "start_kill failed");
                }
                child.wait().await
            }
        };

        let code = match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!(path = %label, error = %e, "waiting for interpreter process failed");
                EXIT_STATUS_UNKNOWN
            }
        };
        info!(path = %label, ?pid, exit_code = code, "interpreter process exited");
        let _ = exit_tx.send(Some(code));
    });

    ProcessHandle {
        pid,
        path,
        kill,
        exit_rx,
    }
}

fn base_command(command: &InterpreterCommand) -> Command {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true);
    if let Some(cwd) = &command.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}

/// A child process with its stdio wired to a feeder and two proxies.
#[derive(Debug)]
pub struct WiredProcess {
    feeder: CommandFeeder,
    stdout: OutputProxy,
    stderr: OutputProxy,
    process: ProcessHandle,
    use_pty: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl WiredProcess {
    /// Start `command`. With `use_pty` the child runs as a session leader
    /// with a PTY as its controlling terminal; otherwise plain pipes are used.
    pub fn spawn(
        command: &InterpreterCommand,
        use_pty: bool,
        stdout: OutputProxy,
        stderr: OutputProxy,
    ) -> io::Result<Self> {
        let (feeder, reader) = command_feeder(DEFAULT_FEEDER_CAPACITY);

        let (process, tasks) = if use_pty {
            spawn_pty(command, reader, &stdout, &stderr)?
        } else {
            spawn_piped(command, reader, &stdout, &stderr)?
        };

        info!(
            path = %process.path(),
            pid = ?process.pid(),
            use_pty,
            "interpreter process started"
        );

        Ok(Self {
            feeder,
            stdout,
            stderr,
            process,
            use_pty,
            tasks,
        })
    }

    pub fn feeder(&self) -> &CommandFeeder {
        &self.feeder
    }

    pub fn stdout(&self) -> &OutputProxy {
        &self.stdout
    }

    pub fn stderr(&self) -> &OutputProxy {
        &self.stderr
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    pub fn use_pty(&self) -> bool {
        self.use_pty
    }

    /// Tear the process down and return its exit status.
    ///
    /// Closes the feeder; unless the caller already observed the exit, the
    /// process group is force-killed. Output monitors get a short window to
    /// drain before they are aborted.
    pub async fn shutdown(mut self, already_done: bool) -> i32 {
        self.feeder.try_close();
        if !already_done && !self.process.has_exited() {
            self.process.kill();
        }
        let code = self.process.exited().await;

        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(MONITOR_SETTLE, task).await.is_err() {
                abort.abort();
            }
        }
        code
    }
}

fn spawn_piped(
    command: &InterpreterCommand,
    reader: FeedReader,
    stdout: &OutputProxy,
    stderr: &OutputProxy,
) -> io::Result<(ProcessHandle, Vec<JoinHandle<()>>)> {
    let mut cmd = base_command(command);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let missing = |name: &str| io::Error::other(format!("child {name} was not captured"));
    let child_stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let child_stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let child_stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let label = command.display_path();
    let pump = tokio::spawn(async move {
        if let Err(e) = pump_into(reader, child_stdin).await {
            debug!(path = %label, error = %e, "stdin pump ended");
        }
    });

    let tasks = vec![
        pump,
        stdout.monitor(child_stdout),
        stderr.monitor(child_stderr),
    ];
    Ok((supervise(child, command.display_path()), tasks))
}

#[cfg(unix)]
fn spawn_pty(
    command: &InterpreterCommand,
    reader: FeedReader,
    stdout: &OutputProxy,
    stderr: &OutputProxy,
) -> io::Result<(ProcessHandle, Vec<JoinHandle<()>>)> {
    use std::fs::File;
    use std::os::fd::AsFd;

    use super::feeder::pump_blocking;
    use super::pty;

    let io_pair = pty::open_pty()?;
    let err_pair = pty::open_pty()?;
    pty::disable_echo(io_pair.slave.as_fd())?;

    let mut cmd = base_command(command);
    cmd.stdin(Stdio::from(io_pair.slave.try_clone()?))
        .stdout(Stdio::from(io_pair.slave.try_clone()?))
        .stderr(Stdio::from(err_pair.slave.try_clone()?));
    // SAFETY: become_session_leader only calls async-signal-safe functions.
    unsafe {
        cmd.pre_exec(pty::become_session_leader);
    }

    let child = cmd.spawn()?;
    // The child holds its own copies; ours must go so the masters see EIO
    // once the child exits.
    drop(cmd);
    drop(io_pair.slave);
    drop(err_pair.slave);

    let master_out = File::from(io_pair.master);
    let master_in = master_out.try_clone()?;
    let master_err = File::from(err_pair.master);

    let label = command.display_path();
    let pump = tokio::task::spawn_blocking(move || {
        if let Err(e) = pump_blocking(reader, master_in) {
            debug!(path = %label, error = %e, "pty stdin pump ended");
        }
    });

    let tasks = vec![
        pump,
        stdout.monitor_blocking(master_out),
        stderr.monitor_blocking(master_err),
    ];
    Ok((supervise(child, command.display_path()), tasks))
}

#[cfg(not(unix))]
fn spawn_pty(
    command: &InterpreterCommand,
    reader: FeedReader,
    stdout: &OutputProxy,
    stderr: &OutputProxy,
) -> io::Result<(ProcessHandle, Vec<JoinHandle<()>>)> {
    warn!(path = %command.display_path(), "pseudo-terminals unsupported here; using pipes");
    spawn_piped(command, reader, stdout, stderr)
}

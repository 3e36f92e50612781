//! Process supervisor - owns the child process lifecycle.
//!
//! Spawn creates the three stdio pipes explicitly so pipe creation failures are
//! distinguishable from process creation failures, and so the host-side ends can be
//! put in non-blocking mode before the child exists. All pipe ends are close-on-exec;
//! the child only sees the ends dup'd onto its fds 0/1/2.
//!
//! Termination is two-phase: SIGTERM, a bounded grace period, then SIGKILL and a
//! blocking reap. A reaped child is never signalled again (its pid may be reused).
//!
//! Writing to a child that closed its stdin raises SIGPIPE in the host. Spawning
//! ignores SIGPIPE unless the host installed its own handler, so the write fails
//! with `EPIPE` instead of terminating the host.

use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, kill, sigaction};
use nix::unistd::Pid;

/// Default delay between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Liveness re-probe interval while waiting out the grace period.
const GRACE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to create {pipe} pipe: {source}")]
    PipeCreation {
        pipe: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("failed to create process: {0}")]
    Fork(#[source] io::Error),

    #[error("failed to execute {}: {source}", path.display())]
    Exec {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Capability set the bridge needs from a running child.
///
/// Implemented by [`ChildProcess`]; the bridge only talks to this trait so the
/// lifecycle logic does not depend on how the process was created.
pub trait ProcessHandle: Send {
    fn id(&self) -> u32;

    /// Non-blocking liveness probe. Reaps the child if it has exited.
    fn is_alive(&mut self) -> bool;

    /// Idempotent graceful-then-forced shutdown. Returns once the child is reaped.
    fn terminate(&mut self, grace: Duration);

    fn exit_status(&self) -> Option<ExitStatus>;
}

/// Host-side ends of the child's stdio pipes, all non-blocking.
#[derive(Debug)]
pub struct ChildPipes {
    pub stdin: File,
    pub stdout: File,
    pub stderr: File,
}

/// A spawned child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Option<Child>,
    pid: u32,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn reap(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid = self.pid, %status, "Child exited");
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to probe child, assuming exited");
                true
            }
        }
    }

    fn signal(&self, signal: Signal) {
        let Ok(raw) = i32::try_from(self.pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(raw), signal) {
            tracing::debug!(pid = self.pid, ?signal, error = %e, "Failed to signal child");
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        self.child.is_some() && !self.reap()
    }

    fn terminate(&mut self, grace: Duration) {
        if self.child.is_none() {
            return;
        }

        if !self.reap() {
            tracing::debug!(pid = self.pid, "Sending SIGTERM");
            self.signal(Signal::SIGTERM);

            let deadline = Instant::now() + grace;
            while Instant::now() < deadline && !self.reap() {
                std::thread::sleep(GRACE_POLL.min(grace));
            }

            if !self.reap() {
                tracing::info!(pid = self.pid, ?grace, "Child ignored SIGTERM, sending SIGKILL");
                self.signal(Signal::SIGKILL);
            }
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        if self.status.is_none() {
            match child.wait() {
                Ok(status) => {
                    tracing::debug!(pid = self.pid, %status, "Child reaped");
                    self.status = Some(status);
                }
                Err(e) => tracing::warn!(pid = self.pid, error = %e, "Failed to reap child"),
            }
        }
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate(DEFAULT_GRACE_PERIOD);
    }
}

/// Spawn `executable` with `args`, wiring its stdio to fresh pipes.
///
/// On any error every pipe created so far is closed before returning.
pub fn spawn<I, S>(executable: &Path, args: I) -> Result<(ChildProcess, ChildPipes), SpawnError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    ignore_sigpipe();

    let (stdin_child, stdin_host) = cloexec_pipe("stdin")?;
    let (stdout_host, stdout_child) = cloexec_pipe("stdout")?;
    let (stderr_host, stderr_child) = cloexec_pipe("stderr")?;

    for (pipe, fd) in [
        ("stdin", &stdin_host),
        ("stdout", &stdout_host),
        ("stderr", &stderr_host),
    ] {
        set_nonblocking(fd).map_err(|source| SpawnError::PipeCreation { pipe, source })?;
    }

    // The Command owns the child-side ends; dropping it closes them in the host.
    let child = {
        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::from(stdin_child))
            .stdout(Stdio::from(stdout_child))
            .stderr(Stdio::from(stderr_child));
        command
            .spawn()
            .map_err(|e| classify_spawn_error(executable, e))?
    };

    let pid = child.id();
    tracing::info!(pid, executable = %executable.display(), "Spawned child process");

    Ok((
        ChildProcess {
            child: Some(child),
            pid,
            status: None,
        },
        ChildPipes {
            stdin: File::from(stdin_host),
            stdout: File::from(stdout_host),
            stderr: File::from(stderr_host),
        },
    ))
}

/// Set SIGPIPE to ignored if it is at its default disposition. A handler the host
/// installed is put back untouched.
pub fn ignore_sigpipe() {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN runs no code in signal context
    match unsafe { sigaction(Signal::SIGPIPE, &ignore) } {
        Ok(previous) if matches!(previous.handler(), SigHandler::SigDfl | SigHandler::SigIgn) => {}
        Ok(previous) => {
            // SAFETY: reinstalls exactly what the host had
            if let Err(e) = unsafe { sigaction(Signal::SIGPIPE, &previous) } {
                tracing::warn!(error = %e, "Failed to restore SIGPIPE handler");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to ignore SIGPIPE"),
    }
}

fn classify_spawn_error(executable: &Path, err: io::Error) -> SpawnError {
    let exec_failure = matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || err.raw_os_error() == Some(nix::libc::ENOEXEC);

    if exec_failure {
        SpawnError::Exec {
            path: executable.to_path_buf(),
            source: err,
        }
    } else {
        SpawnError::Fork(err)
    }
}

/// Returns `(read, write)`.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe(pipe: &'static str) -> Result<(OwnedFd, OwnedFd), SpawnError> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|source| SpawnError::PipeCreation { pipe, source })
}

/// Returns `(read, write)`.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe(pipe: &'static str) -> Result<(OwnedFd, OwnedFd), SpawnError> {
    use nix::fcntl::FdFlag;

    let (read, write) =
        nix::unistd::pipe().map_err(|source| SpawnError::PipeCreation { pipe, source })?;
    for fd in [&read, &write] {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|source| SpawnError::PipeCreation { pipe, source })?;
    }
    Ok((read, write))
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn sh(script: &str) -> (ChildProcess, ChildPipes) {
        spawn(Path::new("/bin/sh"), ["-c", script]).unwrap()
    }

    fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    #[test]
    fn alive_after_spawn_and_dead_after_exit() {
        let (mut child, pipes) = sh("read line");
        assert!(child.is_alive());

        drop(pipes);
        assert!(wait_until(Duration::from_secs(5), || !child.is_alive()));
        assert!(child.exit_status().is_some());
    }

    #[test]
    fn host_read_ends_are_nonblocking() {
        let (mut child, mut pipes) = sh("sleep 5");

        let mut buf = [0u8; 16];
        let err = pipes.stdout.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        child.terminate(Duration::from_millis(50));
    }

    #[test]
    fn nonexistent_executable_is_exec_error() {
        let err = spawn(Path::new("/nonexistent/runtime"), ["wrapper.js"]).unwrap_err();
        assert!(matches!(err, SpawnError::Exec { .. }), "{err:?}");
    }

    #[test]
    fn terminate_graceful_child() {
        let (mut child, _pipes) = sh("sleep 30");
        let started = Instant::now();

        child.terminate(Duration::from_secs(2));

        assert!(!child.is_alive());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn terminate_escalates_when_sigterm_ignored() {
        let (mut child, mut pipes) = sh("trap '' TERM; echo armed; while :; do sleep 1; done");

        // Wait until the trap is installed before signalling.
        let mut buf = [0u8; 16];
        assert!(wait_until(Duration::from_secs(5), || {
            matches!(pipes.stdout.read(&mut buf), Ok(n) if n > 0)
        }));

        let grace = Duration::from_millis(100);
        let started = Instant::now();
        child.terminate(grace);

        assert!(!child.is_alive());
        assert!(started.elapsed() >= grace);
        assert!(started.elapsed() < grace + Duration::from_secs(2));
    }

    #[test]
    fn terminate_twice_is_noop() {
        let (mut child, _pipes) = sh("sleep 30");

        child.terminate(Duration::from_millis(50));
        let status = child.exit_status();
        child.terminate(Duration::from_millis(50));

        assert!(!child.is_alive());
        assert_eq!(child.exit_status(), status);
    }
}

//! Bridge - composes supervisor, transport, and protocol into one lifecycle unit.
//!
//! Flow:
//! 1. `start`: validate config, spawn `runtime wrapper script`
//! 2. `pump` on every scheduler tick: flush queued writes, drain stdout then stderr,
//!    probe liveness
//! 3. `send` once the child has announced `ready`
//! 4. On shutdown or child death: terminate, close pipes, enter a terminal state
//!
//! Nothing here blocks except `terminate`, which waits out the grace period and
//! then reaps the child.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::codec::{DEFAULT_MAX_FRAME_LEN, FrameError};
use crate::bridge::protocol::{Atom, HostRequest, InboundEvent, OutletMessage, ProtocolError};
use crate::bridge::transport::{
    DEFAULT_MAX_PENDING_WRITE, PipeKind, Transport, TransportError, TransportLimits,
};
use crate::host::{HostEventSink, RuntimeInfo};
use crate::state::BridgeState;
use crate::supervisor::{self, DEFAULT_GRACE_PERIOD, ProcessHandle, SpawnError};

/// Default interval between pumps when driven by [`crate::driver`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Frames read from each pipe in one pump before yielding to the host.
pub const DEFAULT_MAX_FRAMES_PER_PUMP: usize = 256;

/// Pumps a dead child's leftover output may span before the bridge fails.
const MAX_EXIT_DRAIN_PUMPS: usize = 64;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Runtime executable (e.g. the absolute path of `bun`).
    pub executable: PathBuf,
    /// Runtime-side wrapper that loads the script and speaks the protocol.
    pub wrapper: PathBuf,
    pub script: PathBuf,
    /// Name used in diagnostics ("Bun", "Node.js", ...).
    pub label: String,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub max_frame_len: usize,
    pub max_pending_write: usize,
    /// Per-pipe read budget for one [`Bridge::pump`].
    pub max_frames_per_pump: usize,
}

impl BridgeConfig {
    pub fn new(
        executable: impl Into<PathBuf>,
        wrapper: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            wrapper: wrapper.into(),
            script: script.into(),
            label: "runtime".to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_pending_write: DEFAULT_MAX_PENDING_WRITE,
            max_frames_per_pump: DEFAULT_MAX_FRAMES_PER_PUMP,
        }
    }

    pub fn for_runtime(
        runtime: &RuntimeInfo,
        wrapper: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
    ) -> Self {
        Self::new(runtime.executable.clone(), wrapper, script).with_label(runtime.name.clone())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_max_pending_write(mut self, len: usize) -> Self {
        self.max_pending_write = len;
        self
    }

    pub fn with_max_frames_per_pump(mut self, frames: usize) -> Self {
        self.max_frames_per_pump = frames;
        self
    }

    pub fn validate(&self) -> Result<(), SpawnError> {
        fn absolute(what: &str, path: &Path) -> Result<(), SpawnError> {
            if path.is_absolute() {
                Ok(())
            } else {
                Err(SpawnError::InvalidConfig(format!(
                    "{} path must be absolute: {}",
                    what,
                    path.display()
                )))
            }
        }

        absolute("executable", &self.executable)?;
        absolute("wrapper", &self.wrapper)?;
        absolute("script", &self.script)?;

        if self.poll_interval.is_zero() {
            return Err(SpawnError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(SpawnError::InvalidConfig(
                "max frame length must be non-zero".to_string(),
            ));
        }
        if self.max_frames_per_pump == 0 {
            return Err(SpawnError::InvalidConfig(
                "frames per pump must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> TransportLimits {
        TransportLimits {
            max_frame_len: self.max_frame_len,
            max_pending_write: self.max_pending_write,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge already {0}")]
    AlreadyStarted(BridgeState),

    #[error("bridge is {0}, not accepting messages")]
    NotRunning(BridgeState),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What happened to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written (or queued whole) to the child's stdin.
    Sent,
    /// Dropped because the child has not announced readiness yet.
    Dropped,
}

/// Counters for one pump pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Valid events dispatched from stdout.
    pub events: usize,
    pub stderr_lines: usize,
    /// Frames discarded as malformed.
    pub errors: usize,
    /// A pipe hit its read budget with input possibly left over for the next pump.
    pub saturated: bool,
}

/// One supervised child process and its event stream.
///
/// Starting a bridge sets SIGPIPE to ignored when the process still has the
/// default disposition (see [`supervisor::ignore_sigpipe`]). A host that installs
/// its own SIGPIPE handler must let writes to a closed pipe return `EPIPE`.
pub struct Bridge<S: HostEventSink> {
    config: BridgeConfig,
    sink: S,
    state: BridgeState,
    process: Option<Box<dyn ProcessHandle>>,
    transport: Option<Transport>,
    failure: Option<String>,
    exit_drains: usize,
}

impl<S: HostEventSink> Bridge<S> {
    pub fn new(config: BridgeConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            state: BridgeState::Created,
            process: None,
            transport: None,
            failure: None,
            exit_drains: 0,
        }
    }

    /// Create and start in one step. A spawn failure leaves the bridge `Failed`
    /// (already reported to the sink).
    pub fn spawn(config: BridgeConfig, sink: S) -> Self {
        let mut bridge = Self::new(config, sink);
        if let Err(e) = bridge.start() {
            tracing::debug!(error = %e, "Bridge start failed");
        }
        bridge
    }

    /// Adopt an already running child and its transport.
    pub fn attach(
        config: BridgeConfig,
        sink: S,
        process: Box<dyn ProcessHandle>,
        transport: Transport,
    ) -> Self {
        let mut bridge = Self::new(config, sink);
        bridge.process = Some(process);
        bridge.transport = Some(transport);
        bridge.set_state(BridgeState::AwaitingReady);
        bridge
    }

    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.state != BridgeState::Created {
            return Err(BridgeError::AlreadyStarted(self.state));
        }
        self.set_state(BridgeState::Spawning);

        let spawned = self.config.validate().and_then(|()| {
            supervisor::spawn(
                &self.config.executable,
                [&self.config.wrapper, &self.config.script],
            )
        });

        match spawned {
            Ok((process, pipes)) => {
                tracing::info!(
                    pid = process.pid(),
                    runtime = %self.config.label,
                    script = %self.config.script.display(),
                    "Child spawned, awaiting ready"
                );
                self.transport = Some(Transport::new(
                    pipes.stdin,
                    pipes.stdout,
                    pipes.stderr,
                    self.config.limits(),
                ));
                self.process = Some(Box::new(process));
                self.set_state(BridgeState::AwaitingReady);
                Ok(())
            }
            Err(e) => {
                self.fail(format!("failed to spawn {} process: {}", self.config.label, e));
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == BridgeState::Ready
    }

    /// Non-blocking liveness probe of the child.
    pub fn is_alive(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_alive())
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.id())
    }

    /// Reason for entering `Failed`, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn send(
        &mut self,
        inlet: usize,
        selector: &str,
        args: &[Atom],
    ) -> Result<Delivery, BridgeError> {
        self.send_request(HostRequest::message(inlet, selector, args.to_vec()))
    }

    pub fn send_request(&mut self, request: HostRequest) -> Result<Delivery, BridgeError> {
        match self.state {
            BridgeState::Ready => {}
            BridgeState::AwaitingReady => {
                tracing::trace!(?request, "Child not ready, dropping message");
                return Ok(Delivery::Dropped);
            }
            state => return Err(BridgeError::NotRunning(state)),
        }

        let line = request.encode()?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(BridgeError::NotRunning(self.state));
        };
        if let Err(e) = transport.write_line(&line) {
            tracing::warn!(error = %e, "Failed to send message to child");
            return Err(e.into());
        }
        Ok(Delivery::Sent)
    }

    pub fn send_bang(&mut self, inlet: usize) -> Result<Delivery, BridgeError> {
        self.send(inlet, "bang", &[])
    }

    pub fn send_float(&mut self, inlet: usize, value: f64) -> Result<Delivery, BridgeError> {
        self.send(inlet, "float", &[Atom::Float(value)])
    }

    pub fn send_symbol(&mut self, inlet: usize, symbol: &str) -> Result<Delivery, BridgeError> {
        self.send(inlet, "symbol", &[Atom::from(symbol)])
    }

    pub fn send_list(&mut self, inlet: usize, atoms: &[Atom]) -> Result<Delivery, BridgeError> {
        self.send(inlet, "list", atoms)
    }

    /// Any other selector, e.g. `set 1 2`.
    pub fn send_anything(
        &mut self,
        inlet: usize,
        selector: &str,
        atoms: &[Atom],
    ) -> Result<Delivery, BridgeError> {
        self.send(inlet, selector, atoms)
    }

    /// One non-blocking drain-and-dispatch pass.
    ///
    /// Order: queued writes, stdout frames, stderr lines, then the liveness probe.
    /// Each pipe yields at most `max_frames_per_pump` frames per call; the rest
    /// waits for the next pump. If the child is gone, the pipes are drained once
    /// more so output written just before exit still reaches the host. Leftovers
    /// beyond that budget postpone the failure to later pumps, up to a fixed
    /// number of passes.
    pub fn pump(&mut self) -> PumpStats {
        let mut stats = PumpStats::default();
        if !self.state.is_running() {
            return stats;
        }

        if let Some(transport) = self.transport.as_mut()
            && let Err(e) = transport.flush()
        {
            tracing::warn!(error = %e, "Failed to flush queued messages");
        }

        self.drain(PipeKind::Stdout, &mut stats);
        self.drain(PipeKind::Stderr, &mut stats);

        if !self.is_alive() {
            let mut leftover = PumpStats::default();
            self.drain(PipeKind::Stdout, &mut leftover);
            self.drain(PipeKind::Stderr, &mut leftover);
            stats.events += leftover.events;
            stats.stderr_lines += leftover.stderr_lines;
            stats.errors += leftover.errors;
            stats.saturated |= leftover.saturated;

            if leftover.saturated && self.exit_drains < MAX_EXIT_DRAIN_PUMPS {
                self.exit_drains += 1;
                tracing::debug!(passes = self.exit_drains, "Child exited, draining remaining output");
                return stats;
            }

            let status = self.process.as_ref().and_then(|p| p.exit_status());
            let reason = match status {
                Some(status) => format!(
                    "{} process terminated unexpectedly ({})",
                    self.config.label, status
                ),
                None => format!("{} process terminated unexpectedly", self.config.label),
            };
            self.fail(reason);
        }

        stats
    }

    /// Terminate the child and close all pipes. Repeated calls are no-ops.
    pub fn shutdown(&mut self) {
        match self.state {
            BridgeState::Created => {
                self.set_state(BridgeState::Terminated);
                return;
            }
            BridgeState::Terminating | BridgeState::Terminated | BridgeState::Failed => return,
            BridgeState::Spawning | BridgeState::AwaitingReady | BridgeState::Ready => {}
        }

        self.set_state(BridgeState::Terminating);
        self.release();
        self.set_state(BridgeState::Terminated);
        tracing::info!(runtime = %self.config.label, "Bridge shut down");
    }

    fn drain(&mut self, pipe: PipeKind, stats: &mut PumpStats) {
        for _ in 0..self.config.max_frames_per_pump {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };
            let frame = match transport.try_read_frame(pipe) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(FrameError::TooLong { max }) => {
                    if pipe == PipeKind::Stdout {
                        self.report_protocol_error(ProtocolError::FrameTooLong { max }, stats);
                    } else {
                        tracing::warn!(%pipe, max, "Discarding oversized line from child");
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%pipe, error = %e, "Read from child failed");
                    return;
                }
            };

            match pipe {
                PipeKind::Stdout => self.handle_frame(&frame, stats),
                PipeKind::Stderr => {
                    stats.stderr_lines += 1;
                    let line = String::from_utf8_lossy(&frame);
                    self.sink.child_stderr(line.trim_end_matches('\r'));
                }
            }
        }
        tracing::trace!(%pipe, "Read budget exhausted, yielding");
        stats.saturated = true;
    }

    fn handle_frame(&mut self, frame: &[u8], stats: &mut PumpStats) {
        match InboundEvent::decode(frame) {
            Ok(event) => {
                stats.events += 1;
                self.dispatch(event);
            }
            Err(e) => self.report_protocol_error(e, stats),
        }
    }

    fn report_protocol_error(&mut self, err: ProtocolError, stats: &mut PumpStats) {
        stats.errors += 1;
        tracing::warn!(error = %err, "Discarding frame from child");
        self.sink
            .report_error(&format!("invalid message from {}: {}", self.config.label, err));
    }

    fn dispatch(&mut self, event: InboundEvent) {
        tracing::trace!(?event, "Dispatching event");
        match event {
            InboundEvent::Ready => {
                if self.state == BridgeState::AwaitingReady {
                    self.set_state(BridgeState::Ready);
                    self.sink.log(&format!("{} runtime ready", self.config.label));
                } else {
                    tracing::debug!(state = %self.state, "Ignoring repeated ready");
                }
            }
            InboundEvent::Outlet { outlet, message } => match message {
                OutletMessage::Bang => self.sink.emit_bang(outlet),
                OutletMessage::Float(value) => self.sink.emit_float(outlet, value),
                OutletMessage::Symbol(symbol) => self.sink.emit_symbol(outlet, &symbol),
                OutletMessage::List(atoms) => self.sink.emit_list(outlet, &atoms),
            },
            InboundEvent::Log { text } => self.sink.log(&text),
            InboundEvent::Error { text } => self.sink.report_error(&text),
        }
    }

    /// Enter `Failed`, release everything, and notify the host exactly once.
    fn fail(&mut self, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        tracing::error!(state = %self.state, %reason, "Bridge failed");
        self.release();
        self.set_state(BridgeState::Failed);
        self.sink.report_error(&reason);
        self.failure = Some(reason);
    }

    fn release(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate(self.config.grace_period);
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    fn set_state(&mut self, next: BridgeState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Bridge state transition");
            self.state = next;
        }
    }
}

impl<S: HostEventSink> Drop for Bridge<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

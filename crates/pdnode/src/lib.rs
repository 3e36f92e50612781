//! pdnode: supervised scripting-runtime child process bridge.
//!
//! A [`Bridge`] spawns `runtime wrapper script`, exchanges newline-delimited JSON
//! over the child's stdio without ever blocking the caller, and turns the child's
//! output into [`HostEventSink`] calls. The host drives it by calling
//! [`Bridge::pump`] on its own scheduler tick, or via [`driver::drive`].

#[cfg(not(unix))]
compile_error!("pdnode only supports unix targets");

mod state;
mod version;

pub mod bridge;
pub mod driver;
pub mod host;
pub mod orchestrator;
pub mod supervisor;

pub use orchestrator::{Bridge, BridgeConfig, BridgeError, Delivery, PumpStats};

pub use bridge::protocol::{
    Atom, HostRequest, InboundEvent, OutletMessage, ProtocolError, decode_inbound,
    encode_outbound,
};
pub use bridge::transport::{PipeKind, Transport, TransportError, TransportLimits};
pub use host::{HostEventSink, RuntimeInfo, RuntimeSelector, ScriptResolver};
pub use state::BridgeState;
pub use supervisor::{ChildPipes, ChildProcess, ProcessHandle, SpawnError};
pub use version::{PDNODE_VERSION, VersionInfo};

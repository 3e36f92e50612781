//! Stdio plumbing between the host and a runtime child process.
//!
//! # Architecture
//!
//! - **codec**: newline framing with a per-frame length cap
//! - **protocol**: JSON envelopes (`message` out; `ready`/`outlet`/`log`/`error` in)
//! - **transport**: non-blocking pipe reads and writes, reassembling frames across
//!   short reads

pub mod codec;
pub mod protocol;
pub mod transport;

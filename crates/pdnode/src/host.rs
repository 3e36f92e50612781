//! Interfaces to the embedding host.
//!
//! The bridge never reaches into host internals: everything it produces goes through
//! a [`HostEventSink`] handed over at construction. Runtime discovery and script path
//! resolution happen before a bridge exists and are modelled as collaborator traits.

use std::path::{Path, PathBuf};

use crate::bridge::protocol::Atom;

/// Receives everything the child produces.
///
/// Outlet methods carry the outlet index from the wire so multi-outlet hosts can
/// route; single-outlet hosts ignore it.
pub trait HostEventSink {
    fn emit_bang(&mut self, outlet: usize);

    fn emit_float(&mut self, outlet: usize, value: f64);

    fn emit_symbol(&mut self, outlet: usize, symbol: &str);

    fn emit_list(&mut self, outlet: usize, atoms: &[Atom]);

    /// Informational text from the child (or the bridge itself).
    fn log(&mut self, message: &str);

    /// Errors reported by the child, malformed frames, and fatal bridge conditions.
    fn report_error(&mut self, message: &str);

    /// One line of the child's free-form stderr output.
    fn child_stderr(&mut self, line: &str) {
        self.log(line);
    }
}

impl<T: HostEventSink + ?Sized> HostEventSink for &mut T {
    fn emit_bang(&mut self, outlet: usize) {
        (**self).emit_bang(outlet)
    }

    fn emit_float(&mut self, outlet: usize, value: f64) {
        (**self).emit_float(outlet, value)
    }

    fn emit_symbol(&mut self, outlet: usize, symbol: &str) {
        (**self).emit_symbol(outlet, symbol)
    }

    fn emit_list(&mut self, outlet: usize, atoms: &[Atom]) {
        (**self).emit_list(outlet, atoms)
    }

    fn log(&mut self, message: &str) {
        (**self).log(message)
    }

    fn report_error(&mut self, message: &str) {
        (**self).report_error(message)
    }

    fn child_stderr(&mut self, line: &str) {
        (**self).child_stderr(line)
    }
}

/// A scripting runtime chosen for a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    /// Human-readable name, e.g. "Bun" or "Node.js".
    pub name: String,
    pub version: String,
    /// Absolute path of the runtime executable.
    pub executable: PathBuf,
}

/// Picks the runtime executable for a script.
pub trait RuntimeSelector {
    type Error: std::error::Error;

    fn select(&self, script: &Path) -> Result<RuntimeInfo, Self::Error>;
}

/// Turns a user-supplied script reference into an absolute, existing path.
pub trait ScriptResolver {
    type Error: std::error::Error;

    fn resolve(&self, script: &str) -> Result<PathBuf, Self::Error>;
}

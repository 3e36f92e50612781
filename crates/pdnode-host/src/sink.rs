//! Console event sink: prints outlet output and child diagnostics as text.

use std::io::Write;

use pdnode::{Atom, HostEventSink};

/// Writes outlet output to `out` and log/error lines to `console`.
///
/// Output format:
/// - `outlet 0: float 3.5`
/// - `[node] Sum: 3`
/// - `[node] error: handler threw`
pub struct ConsoleSink<O: Write, C: Write> {
    out: O,
    console: C,
    errors: usize,
}

impl<O: Write, C: Write> ConsoleSink<O, C> {
    pub fn new(out: O, console: C) -> Self {
        Self {
            out,
            console,
            errors: 0,
        }
    }

    /// Number of errors reported so far.
    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn into_inner(self) -> (O, C) {
        (self.out, self.console)
    }

    fn outlet(&mut self, outlet: usize, selector: &str, atoms: &[Atom]) {
        let mut line = format!("outlet {outlet}: {selector}");
        for atom in atoms {
            line.push(' ');
            line.push_str(&atom.to_string());
        }
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, "Failed to write outlet output");
        }
    }

    fn console(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.console, "{line}") {
            tracing::warn!(error = %e, "Failed to write console output");
        }
    }
}

impl ConsoleSink<std::io::Stdout, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<O: Write, C: Write> HostEventSink for ConsoleSink<O, C> {
    fn emit_bang(&mut self, outlet: usize) {
        self.outlet(outlet, "bang", &[]);
    }

    fn emit_float(&mut self, outlet: usize, value: f64) {
        self.outlet(outlet, "float", &[Atom::Float(value)]);
    }

    fn emit_symbol(&mut self, outlet: usize, symbol: &str) {
        self.outlet(outlet, "symbol", &[Atom::from(symbol)]);
    }

    fn emit_list(&mut self, outlet: usize, atoms: &[Atom]) {
        self.outlet(outlet, "list", atoms);
    }

    fn log(&mut self, message: &str) {
        self.console(format_args!("[node] {message}"));
    }

    fn report_error(&mut self, message: &str) {
        self.errors += 1;
        self.console(format_args!("[node] error: {message}"));
    }

    fn child_stderr(&mut self, line: &str) {
        self.console(format_args!("[node] {line}"));
    }
}

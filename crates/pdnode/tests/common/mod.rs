//! Shared helpers: a recording sink and `/bin/sh` wrapper scripts standing in
//! for a real runtime.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use pdnode::{Atom, Bridge, BridgeConfig, HostEventSink};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Bang(usize),
    Float(usize, f64),
    Symbol(usize, String),
    List(usize, Vec<Atom>),
    Log(String),
    Error(String),
    Stderr(String),
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Recorder {
    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Error(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Log(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl HostEventSink for Recorder {
    fn emit_bang(&mut self, outlet: usize) {
        self.events.push(Event::Bang(outlet));
    }

    fn emit_float(&mut self, outlet: usize, value: f64) {
        self.events.push(Event::Float(outlet, value));
    }

    fn emit_symbol(&mut self, outlet: usize, symbol: &str) {
        self.events.push(Event::Symbol(outlet, symbol.to_string()));
    }

    fn emit_list(&mut self, outlet: usize, atoms: &[Atom]) {
        self.events.push(Event::List(outlet, atoms.to_vec()));
    }

    fn log(&mut self, message: &str) {
        self.events.push(Event::Log(message.to_string()));
    }

    fn report_error(&mut self, message: &str) {
        self.events.push(Event::Error(message.to_string()));
    }

    fn child_stderr(&mut self, line: &str) {
        self.events.push(Event::Stderr(line.to_string()));
    }
}

/// A wrapper script plus a dummy user script in a temp dir.
pub struct Fixture {
    _dir: TempDir,
    pub wrapper: PathBuf,
    pub script: PathBuf,
}

impl Fixture {
    /// `body` is shell; `$1` is the user script path.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = dir.path().join("wrapper.sh");
        let script = dir.path().join("script.js");
        std::fs::write(&wrapper, body).unwrap();
        std::fs::write(&script, "// user script\n").unwrap();
        Self {
            _dir: dir,
            wrapper,
            script,
        }
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig::new("/bin/sh", &self.wrapper, &self.script).with_label("sh")
    }

    pub fn start(&self) -> Bridge<Recorder> {
        let mut bridge = Bridge::new(self.config(), Recorder::default());
        bridge.start().unwrap();
        bridge
    }
}

/// Pump every millisecond until `done` holds or `timeout` passes.
pub fn pump_until<S: HostEventSink>(
    bridge: &mut Bridge<S>,
    timeout: Duration,
    mut done: impl FnMut(&Bridge<S>) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        bridge.pump();
        if done(bridge) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Announces ready, then answers every inbound line.
pub const ECHO_WRAPPER: &str = r#"
echo '{"type":"ready"}'
while IFS= read -r line; do
  case "$line" in
    *'"selector":"bang"'*) echo '{"type":"outlet","outlet":0,"selector":"bang","args":[]}' ;;
    *'"selector":"float"'*) echo '{"type":"outlet","outlet":1,"selector":"float","args":[7]}' ;;
    *) printf '{"type":"log","message":"%s"}\n' "unhandled" ;;
  esac
done
"#;

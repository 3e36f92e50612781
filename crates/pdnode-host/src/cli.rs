use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

pub const USAGE: &str = "Usage: pdnode-host [options] <script>

Runs <script> under Bun or Node.js and bridges it to this terminal.
Lines typed on stdin are sent to inlets (`bang`, `float 3.5`, `@1 list 1 2`, ...);
outlet output is printed on stdout.

Arguments:
  <script>                Script path, relative to the project directory

Options:
  --runtime <path>        Runtime executable [default: bun or node from PATH]
  --wrapper <path>        Protocol wrapper script [default: $PDNODE_WRAPPER or wrapper.js next to pdnode-host]
  --project <dir>         Directory relative script paths resolve against [default: .]
  --grace-ms <n>          Delay between SIGTERM and SIGKILL on shutdown [default: 100]
  --poll-ms <n>           Pump interval [default: 1]
  --ready-timeout-ms <n>  How long to wait for the child to become ready [default: 10000]
  --list-runtimes         Show detected runtimes and exit
  --version               Show version and exit
  -h, --help              Show this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub script: String,
    pub runtime: Option<PathBuf>,
    pub wrapper: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub grace: Option<Duration>,
    pub poll: Option<Duration>,
    pub ready_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Options),
    ListRuntimes,
    Version,
    Help,
}

/// Parse `argv` (including `argv[0]`).
pub fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut script: Option<String> = None;
    let mut runtime = None;
    let mut wrapper = None;
    let mut project = None;
    let mut grace = None;
    let mut poll = None;
    let mut ready_timeout = DEFAULT_READY_TIMEOUT;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--runtime" => {
                i += 1;
                runtime = Some(PathBuf::from(value(args, i, "--runtime")?));
            }
            "--wrapper" => {
                i += 1;
                wrapper = Some(PathBuf::from(value(args, i, "--wrapper")?));
            }
            "--project" => {
                i += 1;
                project = Some(PathBuf::from(value(args, i, "--project")?));
            }
            "--grace-ms" => {
                i += 1;
                grace = Some(millis(args, i, "--grace-ms")?);
            }
            "--poll-ms" => {
                i += 1;
                let interval = millis(args, i, "--poll-ms")?;
                if interval.is_zero() {
                    return Err("--poll-ms must be at least 1".to_string());
                }
                poll = Some(interval);
            }
            "--ready-timeout-ms" => {
                i += 1;
                ready_timeout = millis(args, i, "--ready-timeout-ms")?;
            }
            "--list-runtimes" => return Ok(Invocation::ListRuntimes),
            "--version" | "-V" => return Ok(Invocation::Version),
            "--help" | "-h" => return Ok(Invocation::Help),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => {
                if script.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                script = Some(arg.to_string());
            }
        }
        i += 1;
    }

    let script = script.ok_or("missing required argument: <script>")?;
    Ok(Invocation::Run(Options {
        script,
        runtime,
        wrapper,
        project,
        grace,
        poll,
        ready_timeout,
    }))
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn millis(args: &[String], i: usize, flag: &str) -> Result<Duration, String> {
    let raw = value(args, i, flag)?;
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("{flag} expects milliseconds, got `{raw}`"))
}

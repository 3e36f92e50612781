use std::path::PathBuf;
use std::process;

use anyhow::Context;
use pdnode::driver::{self, ReadyError};
use pdnode::{Bridge, BridgeConfig, BridgeState, RuntimeSelector, ScriptResolver, VersionInfo};
use pdnode_host::cli::{self, Invocation, Options};
use pdnode_host::{ConsoleSink, HostError, PathRuntimeSelector, ProjectResolver};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queued stdin commands waiting for the next tick.
const REQUEST_BUFFER: usize = 256;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let invocation = match cli::parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("{}", cli::USAGE);
            process::exit(2);
        }
    };

    let code = match invocation {
        Invocation::Help => {
            println!("{}", cli::USAGE);
            0
        }
        Invocation::Version => {
            println!("{}", VersionInfo::new());
            0
        }
        Invocation::ListRuntimes => {
            print!("{}", PathRuntimeSelector::from_env().report());
            0
        }
        Invocation::Run(opts) => {
            pdnode_host::init_tracing();
            match run_blocking(opts) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    1
                }
            }
        }
    };

    process::exit(code);
}

fn run_blocking(opts: Options) -> anyhow::Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(opts))
}

async fn run(opts: Options) -> anyhow::Result<i32> {
    let project = match opts.project {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let script = ProjectResolver::from_env(project).resolve(&opts.script)?;

    let mut selector = PathRuntimeSelector::from_env();
    if let Some(executable) = opts.runtime {
        selector = selector.with_explicit(executable);
    }
    let runtime = selector.select(&script)?;
    let wrapper = resolve_wrapper(opts.wrapper)?;

    eprintln!("{}", VersionInfo::new().with_runtime(&runtime));
    tracing::info!(
        runtime = %runtime.name,
        version = %runtime.version,
        executable = %runtime.executable.display(),
        script = %script.display(),
        "Loading script"
    );

    let mut config = BridgeConfig::for_runtime(&runtime, wrapper, script);
    if let Some(grace) = opts.grace {
        config = config.with_grace_period(grace);
    }
    if let Some(poll) = opts.poll {
        config = config.with_poll_interval(poll);
    }

    let mut bridge = Bridge::new(config, ConsoleSink::stdio());
    if let Err(e) = bridge.start() {
        // Already reported through the sink.
        tracing::debug!(error = %e, "Start failed");
        return Ok(1);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let ready = tokio::select! {
        _ = shutdown.cancelled() => None,
        result = driver::wait_ready(&mut bridge, opts.ready_timeout) => Some(result),
    };
    match ready {
        None => {
            bridge.shutdown();
            return Ok(0);
        }
        Some(Err(ReadyError::Timeout(timeout))) => {
            tracing::error!(?timeout, "Child never became ready");
            bridge.shutdown();
            return Ok(1);
        }
        Some(Err(ReadyError::Ended(state))) => {
            tracing::debug!(%state, "Bridge ended before ready");
            return Ok(1);
        }
        Some(Ok(())) => {}
    }

    let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
    tokio::spawn(pdnode_host::forward_commands(tokio::io::stdin(), tx));

    let state = driver::drive(&mut bridge, rx, shutdown).await;
    Ok(if state == BridgeState::Failed { 1 } else { 0 })
}

/// `--wrapper`, else `$PDNODE_WRAPPER`, else `wrapper.js` beside this executable.
fn resolve_wrapper(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let wrapper = match explicit.or_else(|| std::env::var_os("PDNODE_WRAPPER").map(PathBuf::from)) {
        Some(path) => path,
        None => {
            let exe = std::env::current_exe().context("failed to locate pdnode-host executable")?;
            exe.parent()
                .context("pdnode-host executable has no parent directory")?
                .join("wrapper.js")
        }
    };

    let wrapper = std::path::absolute(&wrapper)
        .with_context(|| format!("failed to resolve wrapper path {}", wrapper.display()))?;
    if !wrapper.is_file() {
        return Err(HostError::WrapperNotFound(wrapper).into());
    }
    Ok(wrapper)
}

//! Console host for the pdnode bridge.
//!
//! Stands in for an embedding application: picks a runtime, resolves the script,
//! prints outlet output, and turns stdin lines into inlet messages.

pub mod cli;
pub mod command;
pub mod error;
pub mod paths;
pub mod runtime;
pub mod sink;

use pdnode::HostRequest;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use command::parse_command;
pub use error::HostError;
pub use paths::ProjectResolver;
pub use runtime::{PathRuntimeSelector, RuntimeReport};
pub use sink::ConsoleSink;

/// Install the stderr tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `PDNODE_LOG` (debug, warn, error) sets
/// the level for both crates. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("PDNODE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "pdnode={level},pdnode_host={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Parse command lines from `input` and forward them until input ends or the
/// receiver goes away. Returns the number of requests forwarded.
pub async fn forward_commands<R>(input: R, requests: mpsc::Sender<HostRequest>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut forwarded = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_command(&line) {
                Ok(Some(request)) => {
                    if requests.send(request).await.is_err() {
                        tracing::debug!("Bridge stopped accepting requests");
                        break;
                    }
                    forwarded += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(line = %line, "{}", e),
            },
            Ok(None) => {
                tracing::debug!("Command input closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read command input");
                break;
            }
        }
    }

    forwarded
}

//! Tracing setup: stdout plus an append-only log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates that are chatty at debug level.
const QUIET_TARGETS: [&str; 5] = ["hyper", "hyper_util", "reqwest", "rustls", "tungstenite"];

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![if debug { "debug" } else { "info" }.to_string()];
        directives.extend(QUIET_TARGETS.iter().map(|t| format!("{}=warn", t)));
        EnvFilter::new(directives.join(","))
    })
}

/// Install the global subscriber. `RUST_LOG` wins over `debug`. Keep the returned guard alive for the
/// lifetime of the process so buffered file output is flushed.
pub fn init(debug: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(path.as_os_str());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
    guard
}

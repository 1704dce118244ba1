// THEORY:
// Both command-line tools speak the same contract: stdout carries exactly one JSON
// document (a result or `{"error": ...}`), diagnostics go to stderr, and the exit
// status tells success, runtime failure and misuse apart. This module holds that
// shared contract so the two binaries cannot drift from each other.

use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `thermal_vision=debug`).
pub const LOG_ENV: &str = "THERMAL_VISION_LOG";

pub const EXIT_RUNTIME_ERROR: u8 = 1;
pub const EXIT_USAGE_ERROR: u8 = 2;

/// Installs a stderr-only fmt subscriber, filtered by `THERMAL_VISION_LOG`
/// (default `warn`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// The `{"error": message}` document.
pub fn error_json(message: &str) -> String {
    serde_json::to_string(&ErrorBody { error: message })
        .unwrap_or_else(|_| String::from(r#"{"error":"unprintable error"}"#))
}

/// Prints a successful result and maps it to exit status 0.
pub fn emit<T: Serialize>(result: anyhow::Result<T>) -> ExitCode {
    match result.and_then(|value| serde_json::to_string(&value).map_err(anyhow::Error::from)) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!("{err:#}");
            println!("{}", error_json(&format!("{err:#}")));
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

/// Prints a usage error and maps it to exit status 2.
pub fn usage(message: &str) -> ExitCode {
    println!("{}", error_json(message));
    ExitCode::from(EXIT_USAGE_ERROR)
}

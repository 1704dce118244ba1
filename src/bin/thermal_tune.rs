// Tuning entry point: measures reviewer feedback boxes on a candidate image and
// prints threshold deltas as JSON.
//
// Usage: thermal_tune CANDIDATE PAYLOAD_JSON

use anyhow::Context;
use std::path::Path;
use std::process::ExitCode;
use thermal_vision::VisionError;
use thermal_vision::cli;
use thermal_vision::core_modules::tuner::{self, FeedbackPayload, TuningReport};
use thermal_vision::pipeline::load_rgb;

fn main() -> ExitCode {
    cli::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        return cli::usage("expected arguments: candidate.png payload.json");
    }

    cli::emit(run(Path::new(&args[1]), Path::new(&args[2])))
}

fn run(candidate_path: &Path, payload_path: &Path) -> anyhow::Result<TuningReport> {
    let raw = std::fs::read_to_string(payload_path).map_err(|source| VisionError::Io {
        path: payload_path.to_path_buf(),
        source,
    })?;
    let payload: FeedbackPayload = serde_json::from_str(&raw)
        .map_err(VisionError::from)
        .with_context(|| format!("parsing feedback payload {}", payload_path.display()))?;

    let candidate = load_rgb(candidate_path)?;
    Ok(tuner::tune(&candidate, &payload))
}

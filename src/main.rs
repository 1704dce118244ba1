// Detection entry point: compares a baseline and a candidate image and prints the
// inspection report as JSON.
//
// Usage: thermal_detect BASELINE CANDIDATE [PARAMETERS_JSON]

use anyhow::Context;
use std::path::Path;
use std::process::ExitCode;
use thermal_vision::cli;
use thermal_vision::{DetectionParameters, InspectionReport, ThermalInspector};

fn main() -> ExitCode {
    cli::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if !(3..=4).contains(&args.len()) {
        return cli::usage("usage: thermal_detect BASELINE CANDIDATE [PARAMETERS_JSON]");
    }

    cli::emit(run(&args[1], &args[2], args.get(3).map(String::as_str)))
}

fn run(baseline: &str, candidate: &str, params_path: Option<&str>) -> anyhow::Result<InspectionReport> {
    let params = match params_path {
        Some(path) => DetectionParameters::from_json_file(Path::new(path))
            .with_context(|| format!("loading parameters from {path}"))?,
        None => DetectionParameters::default(),
    };

    let inspector = ThermalInspector::new(params)?;
    let report = inspector
        .inspect_files(Path::new(baseline), Path::new(candidate))
        .context("inspection failed")?;
    Ok(report)
}

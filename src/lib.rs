// THEORY:
// This file is the main entry point for the `thermal_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (the two command-line tools and
// any host that links the library directly).
//
// The primary goal is to export the `ThermalInspector` and its report types
// (`InspectionReport`, `RegionInfo`, `FaultType`) as the high-level interface for
// baseline-versus-candidate inspection, and the `tuner` module for offline
// recalibration. The leaf algorithms live in `core_modules`, one concept per file.

pub mod cli;
pub mod core_modules;
pub mod error;
pub mod params;
pub mod pipeline;

pub use error::{Result, VisionError};
pub use params::DetectionParameters;
pub use pipeline::{InspectionReport, ThermalInspector};

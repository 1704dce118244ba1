// Exercises the two binaries through their JSON/exit-status contract.

use image::{Rgb, RgbImage};
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn detect(args: &[&Path]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_thermal_detect"))
        .args(args)
        .output()
        .expect("run thermal_detect")
}

fn tune(args: &[&Path]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_thermal_tune"))
        .args(args)
        .output()
        .expect("run thermal_tune")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is one JSON document")
}

fn write_png(dir: &TempDir, name: &str, image: &RgbImage) -> std::path::PathBuf {
    let path = dir.path().join(name);
    image.save(&path).expect("write png");
    path
}

#[test]
fn detect_prints_a_report() {
    let dir = TempDir::new().expect("tempdir");
    let baseline = RgbImage::from_pixel(200, 160, Rgb([51, 51, 51]));
    let mut candidate = baseline.clone();
    for y in 60..90 {
        for x in 80..110 {
            candidate.put_pixel(x, y, Rgb([255, 30, 0]));
        }
    }
    let baseline_path = write_png(&dir, "baseline.png", &baseline);
    let candidate_path = write_png(&dir, "candidate.png", &candidate);

    let output = detect(&[&baseline_path, &candidate_path]);
    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    assert_eq!(json["boxes"], serde_json::json!([[70, 60, 30, 30]]));
    assert_eq!(json["boxInfo"][0]["boxFault"], "point overload");
    assert_eq!(json["faultType"], "point overload");
}

#[test]
fn detect_honors_a_parameter_file() {
    let dir = TempDir::new().expect("tempdir");
    let baseline = RgbImage::from_pixel(200, 160, Rgb([51, 51, 51]));
    let mut candidate = baseline.clone();
    for y in 60..90 {
        for x in 80..110 {
            candidate.put_pixel(x, y, Rgb([255, 30, 0]));
        }
    }
    let baseline_path = write_png(&dir, "baseline.png", &baseline);
    let candidate_path = write_png(&dir, "candidate.png", &candidate);
    let params_path = dir.path().join("params.json");
    std::fs::write(&params_path, r#"{"min_area_pixels": 2000.0}"#).expect("write params");

    let output = detect(&[&baseline_path, &candidate_path, &params_path]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_json(&output)["boxes"], serde_json::json!([]));
}

#[test]
fn detect_usage_error_has_its_own_status() {
    let output = detect(&[Path::new("only-one.png")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout_json(&output)["error"].is_string());
}

#[test]
fn detect_missing_image_is_a_runtime_error() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("missing.png");
    let output = detect(&[&missing, &missing]);
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert!(json["error"].as_str().is_some_and(|m| m.contains("missing.png")));
}

#[test]
fn tune_lowers_saturation_threshold_for_a_pale_missed_box() {
    let dir = TempDir::new().expect("tempdir");
    let mut candidate = RgbImage::from_pixel(200, 200, Rgb([51, 51, 51]));
    for y in 50..90 {
        for x in 50..90 {
            // Saturation 0.15, well under the default 0.30.
            candidate.put_pixel(x, y, Rgb([200, 170, 170]));
        }
    }
    let candidate_path = write_png(&dir, "candidate.png", &candidate);
    let payload_path = dir.path().join("payload.json");
    std::fs::write(
        &payload_path,
        r#"{
            "parameters": {"warm_sat_threshold": 0.3, "warm_val_threshold": 0.4,
                           "contrast_threshold": 0.15, "min_area_pixels": 32,
                           "min_area_ratio": 0.001, "warm_hue_low": 0.17,
                           "warm_hue_high": 0.95},
            "addedBoxes": [[50, 50, 40, 40]],
            "removedBoxes": []
        }"#,
    )
    .expect("write payload");

    let output = tune(&[&candidate_path, &payload_path]);
    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    let sat_delta = json["parameter_updates"]["warm_sat_threshold"]
        .as_f64()
        .expect("saturation delta present");
    assert!(sat_delta < 0.0);
    assert_eq!(json["addedCount"], 1);
    assert_eq!(json["removedCount"], 0);
    assert!(json["notes"].as_str().is_some_and(|n| n.starts_with("added=1 removed=0")));
}

#[test]
fn tune_malformed_payload_is_a_runtime_error() {
    let dir = TempDir::new().expect("tempdir");
    let candidate_path = write_png(&dir, "candidate.png", &RgbImage::new(8, 8));
    let payload_path = dir.path().join("payload.json");
    std::fs::write(&payload_path, "{not json").expect("write payload");

    let output = tune(&[&candidate_path, &payload_path]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout_json(&output)["error"].is_string());
}

#[test]
fn tune_usage_error_has_its_own_status() {
    let output = tune(&[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout_json(&output)["error"].is_string());
}

// End-to-end inspection scenarios over the public API.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thermal_vision::core_modules::alignment::{self, OrbAligner};
use thermal_vision::core_modules::comparison::logistic;
use thermal_vision::pipeline::{FaultType, Region, SeverityLabel};
use thermal_vision::{DetectionParameters, ThermalInspector};

const BASE_GRAY: Rgb<u8> = Rgb([51, 51, 51]); // value 0.2

fn inspector() -> ThermalInspector {
    ThermalInspector::new(DetectionParameters::default()).expect("default parameters")
}

#[test]
fn identical_gray_images_report_nothing() {
    let image = RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]));
    let report = inspector().inspect(&image, &image).expect("inspect");

    assert_eq!(report.warm_fraction, 0.0);
    assert!(report.boxes.is_empty());
    assert!(report.box_info.is_empty());
    assert_eq!(report.fault_type, FaultType::None);
    assert_eq!(report.hist_distance, 0.0);
    assert_eq!(report.dv95, 0.0);
    assert_eq!(report.prob, logistic(0.0));
    assert_eq!(report.prob, 0.5);
    assert_eq!(report.overall_severity, 0.0);
    assert_eq!(report.overall_severity_label, SeverityLabel::Low);
}

#[test]
fn hot_square_is_a_point_overload() {
    let baseline = RgbImage::from_pixel(1000, 1000, BASE_GRAY);
    let mut candidate = baseline.clone();
    for y in 450..550 {
        for x in 450..550 {
            candidate.put_pixel(x, y, Rgb([255, 0, 0]));
        }
    }

    let report = inspector().inspect(&baseline, &candidate).expect("inspect");

    // 5% of the width is trimmed from each side before comparison.
    assert_eq!((report.image_width, report.image_height), (900, 1000));
    assert_eq!(report.boxes, vec![Region::new(400, 450, 100, 100)]);
    assert_eq!(report.box_info.len(), 1);

    let info = &report.box_info[0];
    assert_eq!(info.box_fault, FaultType::PointOverload);
    assert_eq!(info.label, "Point overload");
    assert_eq!(info.aspect, 1.0);
    assert!(info.area_frac < 0.10);
    assert!((info.avg_delta_v - 0.8).abs() < 1e-9);
    assert_eq!(info.severity, 1.0);
    assert_eq!(info.severity_label, SeverityLabel::Critical);

    assert_eq!(report.fault_type, FaultType::PointOverload);
    assert!((report.warm_fraction - 10_000.0 / 900_000.0).abs() < 1e-12);
    assert!(report.prob > 0.5 && report.prob < 1.0);
}

#[test]
fn every_reported_region_has_floored_severity() {
    let baseline = RgbImage::from_pixel(400, 300, BASE_GRAY);
    let mut candidate = baseline.clone();
    // Value 0.4 over 0.2: just past the contrast threshold, low on the ramp.
    for y in 100..140 {
        for x in 150..230 {
            candidate.put_pixel(x, y, Rgb([102, 40, 30]));
        }
    }
    let report = inspector().inspect(&baseline, &candidate).expect("inspect");
    assert_eq!(report.box_info.len(), 1);
    for info in &report.box_info {
        assert!(info.severity >= 0.05);
    }
    assert_eq!(report.box_info[0].severity_label, SeverityLabel::Low);
}

#[test]
fn solid_baseline_against_noise_still_completes() {
    let baseline = RgbImage::from_pixel(240, 180, Rgb([70, 70, 70]));
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let candidate = RgbImage::from_fn(240, 180, |_, _| {
        let v: u8 = rng.random();
        Rgb([v, v / 2, v / 3])
    });

    let report = inspector().inspect(&baseline, &candidate).expect("inspect");
    assert_eq!((report.image_width, report.image_height), (216, 180));
    assert!(report.prob >= 0.5);
    for info in &report.box_info {
        assert!(info.area_frac >= 0.0 && info.area_frac <= 1.0);
    }
}

/// A warm-hued scene at constant brightness. Texture lives in the green channel,
/// so every pixel passes the hue, saturation and value gates and only a fill-color
/// baseline pixel can look like warming.
fn warm_scene(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let coarse = GrayImage::from_fn(width / 7 + 2, height / 7 + 2, |_, _| {
        Luma([rng.random_range(0..=190)])
    });
    let fine = imageops::resize(&coarse, width, height, FilterType::Triangle);
    RgbImage::from_fn(width, height, |x, y| Rgb([200, fine.get_pixel(x, y)[0], 0]))
}

#[test]
fn shifted_camera_registers_and_reports_nothing() {
    let scene = warm_scene(480, 360, 5);
    let baseline = imageops::crop_imm(&scene, 20, 20, 400, 300).to_image();
    let candidate = imageops::crop_imm(&scene, 28, 25, 400, 300).to_image();

    let aligned = alignment::align(&OrbAligner::default(), &baseline, &candidate, 0.05);
    assert!(aligned.is_aligned(), "shifted scene should register");
    let validity = aligned.validity.as_ref().expect("aligned runs carry a validity mask");
    assert!(validity.count() < (360 * 300) as usize);
    assert!(validity.count() > (340 * 290) as usize);

    let report = inspector().inspect(&baseline, &candidate).expect("inspect");
    assert_eq!((report.image_width, report.image_height), (360, 300));
    assert!(report.boxes.is_empty(), "spurious boxes {:?}", report.boxes);
    assert_eq!(report.fault_type, FaultType::None);
    assert_eq!(report.warm_fraction, 0.0);
}

#[test]
fn report_serializes_to_the_wire_shape() {
    let image = RgbImage::from_pixel(100, 80, BASE_GRAY);
    let report = inspector().inspect(&image, &image).expect("inspect");
    let json = serde_json::to_value(&report).expect("serialize");

    for key in [
        "prob",
        "histDistance",
        "dv95",
        "warmFraction",
        "imageWidth",
        "imageHeight",
        "boxes",
        "boxInfo",
        "faultType",
        "overallSeverity",
        "overallSeverityLabel",
        "annotated",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert_eq!(json["faultType"], "none");
    assert_eq!(json["overallSeverity"], 0.0);
    assert_eq!(json["overallSeverityLabel"], "low");
    assert_eq!(json["annotated"], "");
}

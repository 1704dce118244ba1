// THEORY:
// The `Pixel` module is the foundation of the Color Model. It is a "dumb" data
// container for a single RGB pixel plus the one heuristic every later stage relies
// on: its position in HSV space. Nothing here knows about neighbors, baselines or
// thresholds; comparisons between two pixels belong to `SmartPixel`.
//
// Key principles:
// 1) Single-pixel scope: `to_hsv` is a pure, total function of three bytes.
// 2) Normalized output: hue is measured around a 360 degree circle and divided by
//    360, so every component of a `ColorSample` lives in [0,1] (hue in [0,1)).
// 3) Gray is hueless: when max == min the hue and saturation are both zero.

use image::Rgb;

pub type Channel = u8;
pub type NormalizedChannel = f64;
pub type Hue = f64;
pub type SaturationHSV = f64;
pub type ValueHSV = f64;

/// A pixel's position in normalized HSV space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorSample {
    /// Hue in [0,1), cyclic: 0.0 and 1.0 are the same red.
    pub hue: Hue,
    /// Saturation in [0,1]; zero for any gray pixel.
    pub saturation: SaturationHSV,
    /// Value (brightness, the max channel) in [0,1].
    pub value: ValueHSV,
}

/// Converts an 8-bit channel triplet to normalized hue/saturation/value.
pub fn to_hsv(red: Channel, green: Channel, blue: Channel) -> ColorSample {
    let r = red as NormalizedChannel / 255.0;
    let g = green as NormalizedChannel / 255.0;
    let b = blue as NormalizedChannel / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;

    let hue_degrees = if chroma == 0.0 {
        0.0
    } else if max == r {
        (60.0 * ((g - b) / chroma) + 360.0) % 360.0
    } else if max == g {
        (60.0 * ((b - r) / chroma) + 120.0) % 360.0
    } else {
        (60.0 * ((r - g) / chroma) + 240.0) % 360.0
    };

    let saturation = if max == 0.0 { 0.0 } else { chroma / max };

    ColorSample {
        hue: hue_degrees / 360.0,
        saturation,
        value: max,
    }
}

/// A "dumb" data container representing a single RGB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    /// The red channel value (0-255).
    pub red: Channel,
    /// The green channel value (0-255).
    pub green: Channel,
    /// The blue channel value (0-255).
    pub blue: Channel,
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
        Pixel { red, green, blue }
    }

    /// HSV representation of this pixel.
    pub fn hsv(&self) -> ColorSample {
        to_hsv(self.red, self.green, self.blue)
    }
}

impl From<Rgb<u8>> for Pixel {
    fn from(rgb: Rgb<u8>) -> Self {
        Pixel::new(rgb[0], rgb[1], rgb[2])
    }
}

impl From<&Rgb<u8>> for Pixel {
    fn from(rgb: &Rgb<u8>) -> Self {
        Pixel::new(rgb[0], rgb[1], rgb[2])
    }
}

impl From<Pixel> for Rgb<u8> {
    fn from(pixel: Pixel) -> Self {
        Rgb([pixel.red, pixel.green, pixel.blue])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn primary_colors_land_on_expected_hues() {
        let red = to_hsv(255, 0, 0);
        assert!(red.hue.abs() < EPS);
        assert!((red.saturation - 1.0).abs() < EPS);
        assert!((red.value - 1.0).abs() < EPS);

        let green = to_hsv(0, 255, 0);
        assert!((green.hue - 1.0 / 3.0).abs() < EPS);

        let blue = to_hsv(0, 0, 255);
        assert!((blue.hue - 2.0 / 3.0).abs() < EPS);
    }

    #[test]
    fn magenta_side_of_red_wraps_below_one() {
        // Hue just short of a full turn, never 1.0.
        let sample = to_hsv(255, 0, 10);
        assert!(sample.hue > 0.95 && sample.hue < 1.0);
    }

    #[test]
    fn black_is_fully_degenerate() {
        let sample = to_hsv(0, 0, 0);
        assert_eq!(sample, ColorSample::default());
    }

    #[test]
    fn pixel_round_trips_through_image_rgb() {
        let pixel = Pixel::new(12, 200, 7);
        let rgb: image::Rgb<u8> = pixel.into();
        assert_eq!(Pixel::from(rgb), pixel);
    }

    proptest! {
        #[test]
        fn hsv_components_stay_in_range(r in any::<u8>(), g in any::<u8>(), b in any::<u8>()) {
            let sample = to_hsv(r, g, b);
            prop_assert!(sample.hue >= 0.0 && sample.hue < 1.0);
            prop_assert!((0.0..=1.0).contains(&sample.saturation));
            prop_assert!((0.0..=1.0).contains(&sample.value));
        }

        #[test]
        fn gray_pixels_have_no_saturation(level in any::<u8>()) {
            let sample = Pixel::new(level, level, level).hsv();
            prop_assert_eq!(sample.saturation, 0.0);
            prop_assert_eq!(sample.hue, 0.0);
        }
    }
}

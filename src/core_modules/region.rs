// THEORY:
// A `Region` is the spatial output of the warm-pixel grouping stage: the axis-aligned
// bounding rectangle of one connected cluster of warm pixels, in candidate
// coordinates. Like the pixel containers, it is "dumb" data plus geometry helpers;
// classification and severity are layered on by the Fault Classifier.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle over candidate coordinates. Width and height are always > 0
/// for regions produced by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[u32; 4]", from = "[u32; 4]")]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Bounding box of the inclusive pixel span `[min_x, max_x] x [min_y, max_y]`.
    pub fn from_extent(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Area of the overlap between two rectangles (zero when disjoint).
    pub fn intersection_area(&self, other: &Region) -> u64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return 0;
        }
        (x1 - x0) as u64 * (y1 - y0) as u64
    }

    /// Fraction of `self`'s area lying inside `other`.
    pub fn fraction_inside(&self, other: &Region) -> f64 {
        let area = self.area();
        if area == 0 {
            return 0.0;
        }
        self.intersection_area(other) as f64 / area as f64
    }

    /// Long side over short side, with the short side floored at 1.
    pub fn aspect_ratio(&self) -> f64 {
        let long_side = self.width.max(self.height) as f64;
        let short_side = (self.width.min(self.height) as f64).max(1.0);
        long_side / short_side
    }
}

impl From<Region> for [u32; 4] {
    fn from(region: Region) -> Self {
        [region.x, region.y, region.width, region.height]
    }
}

impl From<[u32; 4]> for Region {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Region::new(x, y, width, height)
    }
}

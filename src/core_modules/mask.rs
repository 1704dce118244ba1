// THEORY:
// A `Mask` is a boolean grid with the same dimensions as the candidate image. Two
// kinds flow through the system: the Validity Mask (produced once by alignment,
// marking warped-baseline pixels with real coverage) and the Warm Mask (rebuilt from
// scratch by every comparison). Both are addressed by (x, y) and stored row-major.

use image::GrayImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, false)
    }

    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width as usize) * (height as usize)],
        }
    }

    /// Builds a mask from a grayscale coverage image: any non-zero pixel is `true`.
    pub fn from_coverage(coverage: &GrayImage) -> Self {
        Self {
            width: coverage.width(),
            height: coverage.height(),
            data: coverage.pixels().map(|p| p[0] > 0).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let index = self.index(x, y);
        self.data[index] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Keeps only the pixels set in both masks.
    pub fn intersect(&mut self, other: &Mask) {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        for (mine, theirs) in self.data.iter_mut().zip(&other.data) {
            *mine &= *theirs;
        }
    }
}

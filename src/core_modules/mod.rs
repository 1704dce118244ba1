// Leaf algorithms, one concept per file, ordered from the pixel up.

pub mod pixel;
pub mod smart_pixel;
pub mod mask;
pub mod histogram;
pub mod homography;
pub mod features;
pub mod alignment;
pub mod region;
pub mod blob_detector;
pub mod comparison;
pub mod classifier;
pub mod tuner;

// THEORY:
// The `BlobDetector` is the engine of the spatial grouping layer. It turns the Warm
// Mask (a binary, per-pixel verdict) into a short list of rectangular regions that a
// human can review.
//
// Algorithm steps:
// 1.  **Connected Components**: every unvisited warm pixel seeds a breadth-first
//     traversal over its 4-connected warm neighbors. The traversal uses an explicit
//     queue and a visited grid scoped to the single call, never recursion, so large
//     hot spots cannot exhaust the stack.
// 2.  **Size Filter**: a component survives only if its pixel count reaches the
//     minimum area. Its bounding rectangle becomes a `Region`.
// 3.  **Nesting Merge**: a region is discarded when at least half of its area lies
//     inside another region that is still kept. The decision is made in a single
//     pass over the input list; a region already discarded can no longer discard
//     anyone else, and nothing is re-evaluated afterwards.
// 4.  **Stateless Utility**: like the rest of the core, the detector keeps no memory
//     between calls.

use crate::core_modules::mask::Mask;
use crate::core_modules::region::Region;
use std::collections::VecDeque;

/// Fraction of a region's area that must lie inside another kept region for it to
/// be discarded as nested.
pub const NESTED_OVERLAP_FRACTION: f64 = 0.5;

/// Labels the 4-connected components of `mask` and returns the bounding boxes of
/// those with at least `min_area` pixels, in raster order of their first pixel.
pub fn find_regions(mask: &Mask, min_area: f64) -> Vec<Region> {
    let (width, height) = mask.dimensions();
    let mut visited = Mask::new(width, height);
    let mut regions = Vec::new();
    let mut queue: VecDeque<(u32, u32)> = VecDeque::new();

    for y in 0..height {
        for x in 0..width {
            if !mask.get(x, y) || visited.get(x, y) {
                continue;
            }

            // --- Breadth-first growth from this seed ---
            visited.set(x, y, true);
            queue.push_back((x, y));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let mut pixel_count = 0usize;

            while let Some((px, py)) = queue.pop_front() {
                pixel_count += 1;
                min_x = min_x.min(px);
                min_y = min_y.min(py);
                max_x = max_x.max(px);
                max_y = max_y.max(py);

                for (nx, ny) in neighbors(px, py, width, height) {
                    if mask.get(nx, ny) && !visited.get(nx, ny) {
                        visited.set(nx, ny, true);
                        queue.push_back((nx, ny));
                    }
                }
            }

            if pixel_count as f64 >= min_area {
                regions.push(Region::from_extent(min_x, min_y, max_x, max_y));
            }
        }
    }

    regions
}

/// The 4-connected in-bounds neighbors of (x, y).
fn neighbors(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let right = (x + 1 < width).then(|| (x + 1, y));
    let left = (x > 0).then(|| (x - 1, y));
    let down = (y + 1 < height).then(|| (x, y + 1));
    let up = (y > 0).then(|| (x, y - 1));
    [right, left, down, up].into_iter().flatten()
}

/// Drops regions that are at least half contained in another kept region.
pub fn merge_nested(regions: &[Region]) -> Vec<Region> {
    let mut keep = vec![true; regions.len()];

    for i in 0..regions.len() {
        for j in 0..regions.len() {
            if i == j || !keep[j] {
                continue;
            }
            if regions[i].area() > 0
                && regions[i].fraction_inside(&regions[j]) >= NESTED_OVERLAP_FRACTION
            {
                keep[i] = false;
                break;
            }
        }
    }

    regions
        .iter()
        .zip(keep)
        .filter_map(|(region, kept)| kept.then_some(*region))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paint(mask: &mut Mask, region: Region) {
        for y in region.y..region.bottom() {
            for x in region.x..region.right() {
                mask.set(x, y, true);
            }
        }
    }

    #[test]
    fn empty_mask_has_no_regions() {
        assert!(find_regions(&Mask::new(50, 50), 1.0).is_empty());
    }

    #[test]
    fn separate_squares_become_separate_regions() {
        let mut mask = Mask::new(100, 100);
        paint(&mut mask, Region::new(5, 5, 10, 10));
        paint(&mut mask, Region::new(50, 60, 20, 8));
        let regions = find_regions(&mask, 32.0);
        assert_eq!(
            regions,
            vec![Region::new(5, 5, 10, 10), Region::new(50, 60, 20, 8)]
        );
    }

    #[test]
    fn diagonal_pixels_are_not_connected() {
        let mut mask = Mask::new(4, 4);
        mask.set(0, 0, true);
        mask.set(1, 1, true);
        assert_eq!(find_regions(&mask, 1.0).len(), 2);
    }

    #[test]
    fn small_components_are_filtered() {
        let mut mask = Mask::new(40, 40);
        paint(&mut mask, Region::new(0, 0, 5, 6)); // 30 px
        paint(&mut mask, Region::new(20, 20, 8, 4)); // 32 px
        let regions = find_regions(&mask, 32.0);
        assert_eq!(regions, vec![Region::new(20, 20, 8, 4)]);
    }

    #[test]
    fn l_shape_yields_its_bounding_box() {
        let mut mask = Mask::new(30, 30);
        paint(&mut mask, Region::new(2, 2, 1, 20));
        paint(&mut mask, Region::new(2, 21, 15, 1));
        assert_eq!(find_regions(&mask, 1.0), vec![Region::new(2, 2, 15, 20)]);
    }

    #[test]
    fn large_component_does_not_overflow_the_stack() {
        let mask = Mask::filled(1500, 1500, true);
        assert_eq!(find_regions(&mask, 32.0), vec![Region::new(0, 0, 1500, 1500)]);
    }

    #[test]
    fn contained_region_is_discarded_and_container_kept() {
        let outer = Region::new(0, 0, 100, 100);
        let inner = Region::new(10, 10, 20, 20);
        assert_eq!(merge_nested(&[inner, outer]), vec![outer]);
        assert_eq!(merge_nested(&[outer, inner]), vec![outer]);
    }

    #[test]
    fn partial_overlap_below_half_is_kept() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(6, 0, 10, 10); // 40% of each inside the other
        assert_eq!(merge_nested(&[a, b]), vec![a, b]);
    }

    #[test]
    fn duplicate_regions_collapse_to_one() {
        let a = Region::new(3, 3, 10, 10);
        assert_eq!(merge_nested(&[a, a]), vec![a]);
    }

    #[test]
    fn discarded_region_cannot_discard_others() {
        // b sits inside a and is dropped first; c is half inside b only.
        let a = Region::new(0, 0, 20, 20);
        let b = Region::new(10, 10, 10, 10);
        let c = Region::new(15, 15, 10, 10);
        // c: 25 of 100 px inside a, 25 inside b -> kept regardless.
        assert_eq!(merge_nested(&[b, a, c]), vec![a, c]);

        let d = Region::new(12, 12, 10, 5); // 40 of 50 px inside b, 40 inside a
        assert_eq!(merge_nested(&[b, a, d]), vec![a]);
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(
            raw in prop::collection::vec((0u32..60, 0u32..60, 1u32..30, 1u32..30), 0..12)
        ) {
            let regions: Vec<Region> = raw
                .into_iter()
                .map(|(x, y, w, h)| Region::new(x, y, w, h))
                .collect();
            let once = merge_nested(&regions);
            let twice = merge_nested(&once);
            prop_assert_eq!(&once, &twice);

            for (i, a) in once.iter().enumerate() {
                for (j, b) in once.iter().enumerate() {
                    if i != j {
                        prop_assert!(a.fraction_inside(b) < NESTED_OVERLAP_FRACTION);
                    }
                }
            }
        }
    }
}

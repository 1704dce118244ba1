// THEORY:
// The `histogram` module holds the global, position-free half of the comparison:
// how differently are colors distributed across the two images? Each image gets a
// 2D hue x saturation histogram; both are normalized to sum to one and compared by
// Euclidean distance. A second helper turns the sampled brightness increases into
// the dv95 tail statistic.

use crate::core_modules::pixel::ColorSample;

/// A dense 2D histogram over (hue, saturation), stored hue-major.
#[derive(Debug, Clone, PartialEq)]
pub struct HueSatHistogram {
    hue_bins: usize,
    sat_bins: usize,
    bins: Vec<f64>,
}

impl HueSatHistogram {
    pub fn new(hue_bins: usize, sat_bins: usize) -> Self {
        let hue_bins = hue_bins.max(1);
        let sat_bins = sat_bins.max(1);
        Self {
            hue_bins,
            sat_bins,
            bins: vec![0.0; hue_bins * sat_bins],
        }
    }

    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    pub fn total(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Increments the bin holding `sample`'s hue and saturation.
    pub fn add(&mut self, sample: &ColorSample) {
        let hue_bin = Self::bin_of(sample.hue, self.hue_bins);
        let sat_bin = Self::bin_of(sample.saturation, self.sat_bins);
        self.bins[hue_bin * self.sat_bins + sat_bin] += 1.0;
    }

    #[inline]
    fn bin_of(value: f64, bins: usize) -> usize {
        // Truncation toward zero, with saturation == 1.0 folded into the last bin.
        ((value * bins as f64) as usize).min(bins - 1)
    }

    /// Scales the bins to sum to one. An empty histogram is left untouched.
    pub fn normalize(&mut self) {
        let total = self.total();
        if total > 0.0 {
            for bin in &mut self.bins {
                *bin /= total;
            }
        }
    }

    /// Euclidean (L2) distance between two histograms of the same shape.
    pub fn l2_distance(&self, other: &HueSatHistogram) -> f64 {
        debug_assert_eq!(self.bins.len(), other.bins.len());
        self.bins
            .iter()
            .zip(other.bins.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

/// Value at the `percentile` rank of `samples`, using the nearest index
/// `round(percentile * (n - 1))` after sorting, with halves rounded to even.
/// Returns 0 for no samples.
pub fn percentile(samples: &mut [f64], percentile: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let index = (percentile * (samples.len() - 1) as f64).round_ties_even() as usize;
    samples[index.min(samples.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(hue: f64, saturation: f64) -> ColorSample {
        ColorSample {
            hue,
            saturation,
            value: 1.0,
        }
    }

    #[test]
    fn saturation_of_one_lands_in_last_bin() {
        let mut hist = HueSatHistogram::new(30, 32);
        hist.add(&sample(0.0, 1.0));
        assert_eq!(hist.bins()[31], 1.0);
    }

    #[test]
    fn empty_histogram_normalizes_to_zero() {
        let mut hist = HueSatHistogram::new(4, 4);
        hist.normalize();
        assert_eq!(hist.total(), 0.0);
    }

    #[test]
    fn disjoint_histograms_are_sqrt_two_apart() {
        let mut a = HueSatHistogram::new(4, 4);
        let mut b = HueSatHistogram::new(4, 4);
        a.add(&sample(0.0, 0.0));
        b.add(&sample(0.5, 0.5));
        a.normalize();
        b.normalize();
        assert!((a.l2_distance(&b) - std::f64::consts::SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn percentile_uses_rounded_index() {
        let mut values: Vec<f64> = (0..=20).map(|v| v as f64).rev().collect();
        // round(0.95 * 20) = 19
        assert_eq!(percentile(&mut values, 0.95), 19.0);
        assert_eq!(percentile(&mut Vec::new(), 0.95), 0.0);
        assert_eq!(percentile(&mut vec![0.3], 0.95), 0.3);
    }

    #[test]
    fn percentile_index_rounds_half_to_even() {
        // 0.95 * 30 = 28.5 lands on index 28, not 29.
        let mut values: Vec<f64> = (0..31).map(|v| v as f64).collect();
        assert_eq!(percentile(&mut values, 0.95), 28.0);
        // 0.95 * 70 = 66.5 lands on index 66.
        let mut values: Vec<f64> = (0..71).map(|v| v as f64).collect();
        assert_eq!(percentile(&mut values, 0.95), 66.0);
    }

    proptest! {
        #[test]
        fn normalized_histogram_sums_to_one(
            samples in prop::collection::vec((0.0f64..1.0, 0.0f64..=1.0), 1..200)
        ) {
            let mut hist = HueSatHistogram::new(30, 32);
            for (h, s) in &samples {
                hist.add(&sample(*h, *s));
            }
            hist.normalize();
            prop_assert!((hist.total() - 1.0).abs() < 1e-9);
            prop_assert_eq!(hist.l2_distance(&hist.clone()), 0.0);
        }

        #[test]
        fn percentile_is_monotone_in_each_sample(
            values in prop::collection::vec(0.0f64..1.0, 1..100),
            pick in any::<prop::sample::Index>(),
            bump in 0.0f64..1.0,
        ) {
            let mut values = values;
            let before = percentile(&mut values.clone(), 0.95);
            let i = pick.index(values.len());
            values[i] += bump;
            let after = percentile(&mut values, 0.95);
            prop_assert!(after >= before);
        }
    }
}

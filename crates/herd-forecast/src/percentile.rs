//! Linear-interpolation quantiles.
//!
//! Rank is `q * (n - 1)`; the value is interpolated between the floor and
//! ceiling ranks of the sorted sample. The same rule is used everywhere so an
//! ensemble always reduces to the same bands.

/// Quantile `q` in `[0, 1]` of an already sorted, non-empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Sort `values` in place and return the requested quantiles, in order.
///
/// NaN samples are ordered last by `total_cmp`; callers filter them out.
pub fn quantiles(values: &mut [f64], qs: &[f64]) -> Option<Vec<f64>> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    qs.iter().map(|&q| quantile_sorted(values, q)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolates_between_ranks() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        // pos = 0.5 * 3 = 1.5
        assert_eq!(quantile_sorted(&sorted, 0.5), Some(25.0));
        // pos = 0.1 * 3 = 0.3
        let p10 = quantile_sorted(&sorted, 0.1).unwrap();
        assert!((p10 - 13.0).abs() < 1e-9);
        assert_eq!(quantile_sorted(&sorted, 0.0), Some(10.0));
        assert_eq!(quantile_sorted(&sorted, 1.0), Some(40.0));
    }

    #[test]
    fn test_single_sample() {
        assert_eq!(quantile_sorted(&[7.0], 0.9), Some(7.0));
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(quantile_sorted(&[], 0.5), None);
        assert_eq!(quantiles(&mut [], &[0.5]), None);
    }

    #[test]
    fn test_quantiles_sort_and_stay_ordered() {
        let mut values = vec![5.0, 1.0, 9.0, 3.0, 7.0];
        let qs = quantiles(&mut values, &[0.1, 0.5, 0.9]).unwrap();
        assert_eq!(values, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
        assert!(qs[0] <= qs[1] && qs[1] <= qs[2]);
        assert_eq!(qs[1], 5.0);
    }
}

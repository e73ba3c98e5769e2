//! Greedy nearest-neighbor pairing
//!
//! 1:1 matching without replacement: treated units are visited in index
//! order, each taking its closest unused control. Distance ties resolve to
//! the control with the smaller index, which keeps re-runs bit-identical.

/// Pair each treated row with its nearest unused control.
///
/// `distance(t, c)` measures treated row `t` against control row `c` (both
/// cohort row indices). With a caliper, a treated unit whose best available
/// control lies beyond it is dropped rather than force-matched.
pub fn greedy_pairs<F>(
    treated_rows: &[usize],
    control_rows: &[usize],
    distance: F,
    caliper: Option<f64>,
) -> Vec<(usize, usize)>
where
    F: Fn(usize, usize) -> f64,
{
    let mut used = vec![false; control_rows.len()];
    let mut pairs = Vec::with_capacity(treated_rows.len().min(control_rows.len()));

    for &treated in treated_rows {
        let mut best: Option<(usize, f64)> = None;
        for (slot, &control) in control_rows.iter().enumerate() {
            if used[slot] {
                continue;
            }
            let d = distance(treated, control);
            if !d.is_finite() {
                continue;
            }
            // strict < keeps the earliest control on ties
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((slot, d));
            }
        }

        if let Some((slot, d)) = best {
            if caliper.map_or(true, |c| d <= c) {
                used[slot] = true;
                pairs.push((treated, control_rows[slot]));
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_each_treated_with_nearest_control() {
        let treated = [0, 1];
        let control = [2, 3, 4];
        let scores: [f64; 5] = [0.10, 0.80, 0.12, 0.78, 0.50];
        let pairs =
            greedy_pairs(&treated, &control, |t, c| (scores[t] - scores[c]).abs(), None);
        assert_eq!(pairs, vec![(0, 2), (1, 3)]);
    }

    #[test]
    fn controls_are_not_reused() {
        let treated = [0, 1];
        let control = [2];
        let scores: [f64; 3] = [0.5, 0.5, 0.5];
        let pairs =
            greedy_pairs(&treated, &control, |t, c| (scores[t] - scores[c]).abs(), None);
        // one control can only serve one treated unit
        assert_eq!(pairs, vec![(0, 2)]);
    }

    #[test]
    fn ties_resolve_to_lower_control_index() {
        let treated = [0];
        let control = [1, 2];
        let pairs = greedy_pairs(&treated, &control, |_, _| 0.25, None);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn caliper_drops_distant_treated_units() {
        let treated = [0, 1];
        let control = [2, 3];
        let scores: [f64; 4] = [0.10, 0.90, 0.105, 0.40];
        let pairs =
            greedy_pairs(&treated, &control, |t, c| (scores[t] - scores[c]).abs(), Some(0.01));
        // treated 1's best control is 0.5 away, past the caliper
        assert_eq!(pairs, vec![(0, 2)]);
    }

    #[test]
    fn every_pair_respects_the_caliper() {
        let treated: Vec<usize> = (0..5).collect();
        let control: Vec<usize> = (5..15).collect();
        let scores: Vec<f64> = (0..15).map(|i| i as f64 / 15.0).collect();
        let caliper = 0.35;
        let pairs = greedy_pairs(
            &treated,
            &control,
            |t, c| (scores[t] - scores[c]).abs(),
            Some(caliper),
        );
        assert!(!pairs.is_empty());
        for (t, c) in pairs {
            assert!((scores[t] - scores[c]).abs() <= caliper);
        }
    }
}

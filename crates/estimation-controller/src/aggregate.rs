//! Vote aggregation.
//!
//! Pure statistics over a completed estimation round: arithmetic mean,
//! median, and a recommendation snapped onto the session's scale. Nothing
//! here is stored; the session actor computes results fresh whenever every
//! participant has voted.

use serde::Serialize;

use crate::scale::Scale;

/// Statistics attached to views once a round is complete.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    /// Arithmetic mean of all votes.
    pub average: f64,
    /// Median vote; mean of the two middle votes for even counts.
    pub median: f64,
    /// Midpoint of average and median, ceiling-snapped onto the scale.
    pub recommendation: u32,
}

/// Computes the aggregate for a round.
///
/// Returns `None` for zero votes. An empty roster trivially counts as
/// all-voted, so this is the single gate keeping aggregation away from
/// zero-participant sessions.
#[must_use]
pub fn aggregate(votes: &[u32], scale: &Scale) -> Option<AggregateResult> {
    if votes.is_empty() {
        return None;
    }
    let average = average(votes);
    let median = median(votes);
    Some(AggregateResult {
        average,
        median,
        recommendation: recommendation(average, median, scale),
    })
}

/// Arithmetic mean of the votes. Undefined for empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average(votes: &[u32]) -> f64 {
    let sum: u64 = votes.iter().map(|vote| u64::from(*vote)).sum();
    sum as f64 / votes.len() as f64
}

/// Median of the votes.
///
/// Even-length input yields the mean of the two middle values; empty input
/// yields `0.0`.
#[must_use]
pub fn median(votes: &[u32]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    let mut sorted = votes.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let upper = sorted.get(mid).copied().unwrap_or(0);
    if sorted.len() % 2 == 0 {
        let lower = sorted.get(mid - 1).copied().unwrap_or(0);
        (f64::from(lower) + f64::from(upper)) / 2.0
    } else {
        f64::from(upper)
    }
}

/// Snaps the midpoint of `average` and `median` onto the scale.
///
/// Returns the first scale value at or above the midpoint, or the scale
/// maximum when the midpoint exceeds every value. Rounding up biases the
/// recommendation toward not under-estimating.
#[must_use]
pub fn recommendation(average: f64, median: f64, scale: &Scale) -> u32 {
    let midpoint = (average + median) / 2.0;
    scale
        .values()
        .iter()
        .copied()
        .find(|value| f64::from(*value) >= midpoint)
        .unwrap_or_else(|| scale.max())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn scale_of(values: &[u32]) -> Scale {
        Scale::new("test", values.to_vec()).unwrap()
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[1, 2, 3, 5]), 2.75);
        assert_eq!(average(&[8]), 8.0);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[1, 2, 3, 5]), 2.5);
    }

    #[test]
    fn test_median_odd_count() {
        assert_eq!(median(&[1, 2, 3]), 2.0);
    }

    #[test]
    fn test_median_sorts_input() {
        assert_eq!(median(&[5, 1, 3]), 3.0);
        assert_eq!(median(&[13, 1, 2, 8]), 5.0);
    }

    #[test]
    fn test_median_empty() {
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_recommendation_snaps_to_next_entry() {
        // Midpoint 2.625 -> first entry >= 2.625 is 3.
        let scale = scale_of(&[1, 2, 3, 5, 8, 13]);
        assert_eq!(recommendation(2.75, 2.5, &scale), 3);
    }

    #[test]
    fn test_recommendation_exact_entry() {
        let scale = scale_of(&[1, 2, 3, 5, 8, 13]);
        assert_eq!(recommendation(3.0, 3.0, &scale), 3);
    }

    #[test]
    fn test_recommendation_ceiling_is_scale_max() {
        let scale = Scale::by_name("fibonacci").unwrap();
        assert_eq!(recommendation(500.0, 300.0, &scale), 144);
    }

    #[test]
    fn test_aggregate_empty_votes() {
        let scale = Scale::by_name("fibonacci").unwrap();
        assert_eq!(aggregate(&[], &scale), None);
    }

    #[test]
    fn test_aggregate_full_round() {
        let scale = scale_of(&[1, 2, 3, 5, 8, 13]);
        let result = aggregate(&[1, 2, 3, 5], &scale).unwrap();
        assert_eq!(result.average, 2.75);
        assert_eq!(result.median, 2.5);
        assert_eq!(result.recommendation, 3);
    }

    #[test]
    fn test_aggregate_single_vote() {
        let scale = scale_of(&[1, 2, 3, 5, 8, 13]);
        let result = aggregate(&[8], &scale).unwrap();
        assert_eq!(result.average, 8.0);
        assert_eq!(result.median, 8.0);
        assert_eq!(result.recommendation, 8);
    }

    #[test]
    fn test_aggregate_serializes_camel_case() {
        let scale = scale_of(&[1, 2, 3]);
        let result = aggregate(&[1, 2], &scale).unwrap();
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["average"], 1.5);
        assert_eq!(json["median"], 1.5);
        assert_eq!(json["recommendation"], 2);
    }
}

//! Ranking metrics over per-lane item scores.
use rayon::prelude::*;

use crate::{ItemId, PredictionError};

/// Number of real items scored strictly higher than `target`. Row 0 is
/// padding and never outranks anything.
fn rank_of(scores: &[f32], target: ItemId) -> Result<Option<usize>, PredictionError> {
    let target_score = match scores.get(target) {
        Some(&score) => score,
        None => return Ok(None),
    };

    if !target_score.is_finite() {
        return Err(PredictionError::InvalidPredictionValue);
    }

    let mut rank = 0;

    for (item_id, &score) in scores.iter().enumerate().skip(1) {
        if score.is_nan() {
            return Err(PredictionError::InvalidPredictionValue);
        }

        if item_id != target && score > target_score {
            rank += 1;
        }
    }

    Ok(Some(rank))
}

/// Fraction of rows whose target is among the `k` highest-scored items.
///
/// `scores[row]` holds one score per item id. Targets without a score count
/// as misses.
pub fn hit_rate_at_k(
    scores: &[Vec<f32>],
    targets: &[ItemId],
    k: usize,
) -> Result<f32, PredictionError> {
    if targets.is_empty() {
        return Ok(0.0);
    }

    let hits: Vec<bool> = scores
        .par_iter()
        .zip(targets.par_iter())
        .map(|(row, &target)| Ok(rank_of(row, target)?.map_or(false, |rank| rank < k)))
        .collect::<Result<_, PredictionError>>()?;

    Ok(hits.iter().filter(|&&hit| hit).count() as f32 / targets.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_within_top_k() {
        let scores = vec![
            vec![9.0, 0.1, 0.9, 0.5, 0.3],
            vec![9.0, 0.8, 0.1, 0.7, 0.6],
            vec![0.0, 0.2, 0.2, 0.2, 0.2],
        ];

        // Row 0: item 3 ranks second. Row 1: item 4 ranks third. Row 2: ties
        // do not outrank the target.
        let targets = vec![3, 4, 2];

        assert_eq!(hit_rate_at_k(&scores, &targets, 1).unwrap(), 1.0 / 3.0);
        assert_eq!(hit_rate_at_k(&scores, &targets, 2).unwrap(), 2.0 / 3.0);
        assert_eq!(hit_rate_at_k(&scores, &targets, 3).unwrap(), 1.0);
    }

    #[test]
    fn padding_row_is_ignored() {
        let scores = vec![vec![100.0, 0.5, 0.1]];

        assert_eq!(hit_rate_at_k(&scores, &[1], 1).unwrap(), 1.0);
    }

    #[test]
    fn unknown_targets_miss() {
        let scores = vec![vec![0.0, 0.5, 0.1]];

        assert_eq!(hit_rate_at_k(&scores, &[7], 5).unwrap(), 0.0);
    }

    #[test]
    fn nan_scores_are_rejected() {
        let scores = vec![vec![0.0, ::std::f32::NAN, 0.1]];

        assert!(hit_rate_at_k(&scores, &[2], 5).is_err());
    }
}

//! Evaluation Metrics
//!
//! ROC-AUC, precision, recall and friends on a held-out split.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Held-out evaluation of one component model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    // Ranking
    pub roc_auc: f64,

    // Thresholded
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub threshold: f64,

    // Sizes
    pub sample_count: usize,
    pub positive_rate: f64,
    pub train_rows: usize,
    pub eval_rows: usize,
}

impl Default for EvaluationMetrics {
    fn default() -> Self {
        Self {
            roc_auc: 0.5,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            accuracy: 0.0,
            threshold: 0.5,
            sample_count: 0,
            positive_rate: 0.0,
            train_rows: 0,
            eval_rows: 0,
        }
    }
}

/// Mann-Whitney ROC-AUC with tied scores sharing their average rank
///
/// `None` when either class is missing or a score is not finite.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    if scores.len() != labels.len() || scores.iter().any(|s| !s.is_finite()) {
        return None;
    }

    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    // 1-based ranks, ties averaged
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Calculate metrics from eval-split scores; `None` when ROC-AUC is undefined
pub fn calculate_metrics(
    scores: &[f64],
    labels: &[bool],
    threshold: f64,
    train_rows: usize,
) -> Option<EvaluationMetrics> {
    let roc_auc = roc_auc(scores, labels)?;

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut tn = 0usize;
    let mut fn_ = 0usize;
    for (&score, &label) in scores.iter().zip(labels) {
        match (score >= threshold, label) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let eval_rows = labels.len();
    let positives = tp + fn_;

    Some(EvaluationMetrics {
        roc_auc,
        precision,
        recall,
        f1,
        accuracy: ratio(tp + tn, eval_rows),
        threshold,
        sample_count: train_rows + eval_rows,
        positive_rate: ratio(positives, eval_rows),
        train_rows,
        eval_rows,
    })
}

//! Gradient Boosted Trees
//!
//! Binary classifier: logistic loss, depth-limited regression trees with Newton
//! leaf values and L2-regularised gains, seeded row subsampling per tree.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GbmParams;

const PROB_EPSILON: f64 = 1e-6;
const MIN_HESSIAN: f64 = 1e-16;
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("fit cancelled after {completed_trees} trees")]
    Cancelled { completed_trees: usize },

    #[error("invalid training input: {0}")]
    InvalidInput(String),
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        gain: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: f64,
    },
}

impl TreeNode {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    let v = x.get(*feature).copied().unwrap_or(f64::NAN);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }

    fn add_gains(&self, gains: &mut [f64]) {
        if let TreeNode::Split {
            feature,
            gain,
            left,
            right,
            ..
        } = self
        {
            if let Some(slot) = gains.get_mut(*feature) {
                *slot += gain;
            }
            left.add_gains(gains);
            right.add_gains(gains);
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Gradient and hessian of each training row at the current margin
struct Gradients<'a> {
    x: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// One regression tree fitted to the gradient of the logistic loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub root: TreeNode,
}

impl RegressionTree {
    fn fit(data: &Gradients<'_>, rows: Vec<usize>, n_features: usize, params: &GbmParams) -> Self {
        Self {
            root: Self::build(data, rows, n_features, params, 0),
        }
    }

    fn leaf_value(g: f64, h: f64, lambda: f64) -> f64 {
        -g / (h + lambda)
    }

    fn score(g: f64, h: f64, lambda: f64) -> f64 {
        g * g / (h + lambda)
    }

    fn build(
        data: &Gradients<'_>,
        rows: Vec<usize>,
        n_features: usize,
        params: &GbmParams,
        depth: usize,
    ) -> TreeNode {
        let g: f64 = rows.iter().map(|&i| data.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| data.hess[i]).sum();
        let leaf = TreeNode::Leaf {
            value: Self::leaf_value(g, h, params.lambda),
        };

        if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf.max(1) {
            return leaf;
        }

        match Self::best_split(data, &rows, n_features, params, g, h) {
            Some(best) => TreeNode::Split {
                feature: best.feature,
                threshold: best.threshold,
                gain: best.gain,
                left: Box::new(Self::build(data, best.left, n_features, params, depth + 1)),
                right: Box::new(Self::build(data, best.right, n_features, params, depth + 1)),
            },
            None => leaf,
        }
    }

    fn best_split(
        data: &Gradients<'_>,
        rows: &[usize],
        n_features: usize,
        params: &GbmParams,
        g_total: f64,
        h_total: f64,
    ) -> Option<BestSplit> {
        let min_leaf = params.min_samples_leaf.max(1);
        let parent = Self::score(g_total, h_total, params.lambda);
        let mut best: Option<(usize, f64, f64)> = None;
        let mut sorted = rows.to_vec();

        for feature in 0..n_features {
            sorted.sort_by(|&a, &b| data.x[a][feature].total_cmp(&data.x[b][feature]));

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                g_left += data.grad[i];
                h_left += data.hess[i];

                let n_left = pos + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }
                let here = data.x[i][feature];
                let next = data.x[sorted[pos + 1]][feature];
                if here >= next {
                    continue;
                }

                let g_right = g_total - g_left;
                let h_right = h_total - h_left;
                if h_left < params.min_child_weight || h_right < params.min_child_weight {
                    continue;
                }

                let gain = 0.5
                    * (Self::score(g_left, h_left, params.lambda)
                        + Self::score(g_right, h_right, params.lambda)
                        - parent);
                if gain > MIN_GAIN && best.map_or(true, |(_, _, b)| gain > b) {
                    best = Some((feature, (here + next) / 2.0, gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&i| data.x[i][feature] <= threshold);
        Some(BestSplit {
            feature,
            threshold,
            gain,
            left,
            right,
        })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.root.predict(x)
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }
}

/// Boosted ensemble producing a failure probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedModel {
    pub n_features: usize,
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl GradientBoostedModel {
    /// Fit on rows `x` with labels `y` and per-row weights
    ///
    /// `should_stop` is polled before every tree; returning true aborts the fit.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[bool],
        weights: &[f64],
        params: &GbmParams,
        seed: u64,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<Self, FitError> {
        if x.is_empty() {
            return Err(FitError::InvalidInput("no training rows".to_string()));
        }
        if x.len() != y.len() || x.len() != weights.len() {
            return Err(FitError::InvalidInput(format!(
                "{} rows, {} labels, {} weights",
                x.len(),
                y.len(),
                weights.len()
            )));
        }
        let n_features = x[0].len();
        if x.iter().any(|row| row.len() != n_features) {
            return Err(FitError::InvalidInput("ragged feature matrix".to_string()));
        }

        let total_weight: f64 = weights.iter().sum();
        let positive_weight: f64 = y
            .iter()
            .zip(weights)
            .filter(|(&label, _)| label)
            .map(|(_, &w)| w)
            .sum();
        let prior = (positive_weight / total_weight).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
        let base_score = (prior / (1.0 - prior)).ln();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut margins = vec![base_score; x.len()];
        let mut grad = vec![0.0; x.len()];
        let mut hess = vec![0.0; x.len()];
        let mut trees = Vec::with_capacity(params.n_trees);

        for round in 0..params.n_trees {
            if should_stop() {
                return Err(FitError::Cancelled {
                    completed_trees: round,
                });
            }

            for i in 0..x.len() {
                let p = sigmoid(margins[i]);
                let target = if y[i] { 1.0 } else { 0.0 };
                grad[i] = weights[i] * (p - target);
                hess[i] = (weights[i] * p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let mut rows: Vec<usize> = if params.subsample < 1.0 {
                (0..x.len())
                    .filter(|_| rng.gen::<f64>() < params.subsample)
                    .collect()
            } else {
                (0..x.len()).collect()
            };
            if rows.is_empty() {
                rows = (0..x.len()).collect();
            }

            let data = Gradients {
                x,
                grad: &grad,
                hess: &hess,
            };
            let tree = RegressionTree::fit(&data, rows, n_features, params);

            for (margin, row) in margins.iter_mut().zip(x) {
                *margin += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            n_features,
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn predict_margin(&self, x: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.predict_margin(x))
    }

    /// Total split gain per feature, normalised to sum to 1
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut gains = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.root.add_gains(&mut gains);
        }
        let total: f64 = gains.iter().sum();
        if total > 0.0 {
            gains.iter_mut().for_each(|g| *g /= total);
        }
        gains
    }
}

//! Stratified train / eval split

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of each side, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
}

/// Rows of one class that go to the eval side
fn eval_count(n_class: usize, eval_fraction: f64) -> usize {
    let wanted = (n_class as f64 * eval_fraction).round() as usize;
    if n_class >= 2 {
        wanted.clamp(1, n_class - 1)
    } else {
        0
    }
}

/// Split each class separately so both sides keep the label balance
pub fn stratified_split(labels: &[bool], eval_fraction: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut eval = Vec::new();

    for class in [false, true] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(&mut rng);

        let n_eval = eval_count(members.len(), eval_fraction);
        eval.extend_from_slice(&members[..n_eval]);
        train.extend_from_slice(&members[n_eval..]);
    }

    train.sort_unstable();
    eval.sort_unstable();
    Split { train, eval }
}

/// Allowed distance between a weight sum and 1.0.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Anything carrying a criterion weight.
pub trait Weighted: Clone {
    fn weight(&self) -> f64;
    fn set_weight(&mut self, weight: f64);
}

pub fn total_weight<T: Weighted>(criteria: &[T]) -> f64 {
    criteria.iter().map(Weighted::weight).sum()
}

/// True when the weights sum to 1.0 within [`WEIGHT_TOLERANCE`].
pub fn validate<T: Weighted>(criteria: &[T]) -> bool {
    (total_weight(criteria) - 1.0).abs() <= WEIGHT_TOLERANCE
}

/// Rescales weights to sum to 1.0, keeping their proportions. A zero sum
/// falls back to a uniform split. The input is left untouched.
pub fn normalize<T: Weighted>(criteria: &[T]) -> Vec<T> {
    if criteria.is_empty() {
        return Vec::new();
    }
    let sum = total_weight(criteria);
    let uniform = 1.0 / criteria.len() as f64;
    criteria
        .iter()
        .map(|criterion| {
            let mut out = criterion.clone();
            let weight = if sum == 0.0 {
                uniform
            } else {
                criterion.weight() / sum
            };
            out.set_weight(weight);
            out
        })
        .collect()
}

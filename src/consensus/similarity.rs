//! Token-set similarity between response texts.

use std::collections::HashSet;

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of the lower-cased whitespace token sets of `a` and `b`.
///
/// Returns `1.0` for texts with identical vocabularies (including two empty
/// texts) and `0.0` for fully disjoint ones.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left = token_set(a);
    let right = token_set(b);

    if left.is_empty() && right.is_empty() {
        return 1.0;
    }

    let intersection = left.intersection(&right).count();
    let union = left.len() + right.len() - intersection;
    intersection as f64 / union as f64
}

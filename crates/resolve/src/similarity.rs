use std::collections::HashSet;

/// Similarity between two already-normalized names, in [0, 1].
/// Exact match and containment dominate; otherwise the better of word
/// overlap and character-bigram overlap decides. Symmetric and
/// deterministic so resolution does not depend on comparison order.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    // One name contained in the other handles abbreviations like
    // "international business machines" vs "business machines".
    if a.contains(b) || b.contains(a) {
        return 0.9;
    }

    let word_score = word_jaccard(a, b);
    let bigram_score = bigram_dice(a, b);
    word_score.max(bigram_score)
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let common = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    common as f64 / union as f64
}

fn bigram_dice(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> HashSet<(char, char)> {
        let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let ba = bigrams(a);
    let bb = bigrams(b);
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let common = ba.intersection(&bb).count();
    2.0 * common as f64 / (ba.len() + bb.len()) as f64
}

/// Cosine similarity between two embedding vectors. Zero when either
/// vector is degenerate or the dimensions disagree.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Element-wise mean of a set of equal-length vectors. Used to derive
/// an entity-level embedding from the chunks that mention the entity.
pub fn mean_embedding(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut sum = vec![0.0f32; dim];
    for vector in vectors {
        for (acc, &x) in sum.iter_mut().zip(vector.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for acc in &mut sum {
        *acc /= n;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_score_one() {
        assert_eq!(name_similarity("acme", "acme"), 1.0);
    }

    #[test]
    fn containment_scores_high() {
        assert!(name_similarity("acme holdings", "acme") >= 0.9);
    }

    #[test]
    fn unrelated_names_score_low() {
        assert!(name_similarity("acme", "globex") < 0.5);
    }

    #[test]
    fn similarity_is_symmetric() {
        let pairs = [("jane doe", "doe jane"), ("acme corp", "acme group")];
        for (a, b) in pairs {
            assert_eq!(name_similarity(a, b), name_similarity(b, a));
        }
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        let w = vec![2.0f32, 4.0, 6.0];
        assert!((cosine(&v, &w) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_dimension_mismatch() {
        assert_eq!(cosine(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn mean_embedding_averages() {
        let a = [1.0f32, 3.0];
        let b = [3.0f32, 5.0];
        let mean = mean_embedding(&[&a, &b]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
    }

    #[test]
    fn mean_embedding_rejects_mixed_dimensions() {
        let a = [1.0f32, 3.0];
        let b = [3.0f32];
        assert!(mean_embedding(&[&a, &b]).is_none());
    }
}

use crate::model::{Publication, Query};

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Text embedded for a query and for each individual publication. Both sides
/// of the similarity share one format so the scores stay comparable.
pub fn embedding_text(title: &str, abstract_text: &str) -> String {
    format!("Title: {title}\nAbstract: {abstract_text}")
}

pub fn query_embedding_text(query: &Query) -> String {
    embedding_text(&query.title, &query.abstract_text)
}

pub fn publication_embedding_text(publication: &Publication) -> String {
    embedding_text(&publication.title, &publication.abstract_text)
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let l = f64::from(*left_value);
        let r = f64::from(*right_value);
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }

    (dot / (left_norm.sqrt() * right_norm.sqrt())).clamp(-1.0, 1.0)
}

/// Arithmetic mean of a set of equal-length vectors. Returns the zero vector
/// of `dimensions` when the set is empty.
pub fn centroid(vectors: &[Vec<f32>], dimensions: usize) -> Vec<f32> {
    if vectors.is_empty() {
        return vec![0.0; dimensions];
    }

    let dims = vectors[0].len();
    let mut sum = vec![0.0_f64; dims];
    for vector in vectors {
        for (slot, value) in sum.iter_mut().zip(vector.iter()) {
            *slot += f64::from(*value);
        }
    }

    let count = vectors.len() as f64;
    sum.into_iter().map(|value| (value / count) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::{centroid, cosine_similarity, embedding_text, normalize_whitespace};

    #[test]
    fn embedding_text_uses_title_and_abstract_lines() {
        let text = embedding_text("X", "Y");
        assert_eq!(text, "Title: X\nAbstract: Y");
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let vector = vec![0.3_f32, -0.4, 0.5];
        let score = cosine_similarity(&vector, &vector);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_of_opposite_vectors_is_minus_one() {
        let left = vec![1.0_f32, 2.0];
        let right = vec![-1.0_f32, -2.0];
        let score = cosine_similarity(&left, &right);
        assert!((score + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_against_zero_vector_is_zero() {
        let left = vec![0.0_f32, 0.0, 0.0];
        let right = vec![0.2_f32, 0.4, 0.1];
        assert_eq!(cosine_similarity(&left, &right), 0.0);
    }

    #[test]
    fn cosine_similarity_stays_within_unit_interval() {
        let left = vec![1.0e-20_f32, 1.0e-20];
        let right = vec![1.0e-20_f32, 1.0e-20];
        let score = cosine_similarity(&left, &right);
        assert!((-1.0..=1.0).contains(&score));
    }

    #[test]
    fn centroid_averages_componentwise() {
        let vectors = vec![vec![1.0_f32, 0.0], vec![0.0_f32, 1.0]];
        assert_eq!(centroid(&vectors, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn centroid_of_empty_set_is_zero_vector() {
        let vectors: Vec<Vec<f32>> = Vec::new();
        assert_eq!(centroid(&vectors, 3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn normalize_whitespace_collapses_runs() {
        assert_eq!(normalize_whitespace("  a\t\tb \n c  "), "a b c");
    }
}

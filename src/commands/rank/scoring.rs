use anyhow::Result;

use crate::cli::AggregationMode;
use crate::model::{AuthorProfile, Query, RankedCandidate};
use crate::semantic::{centroid, cosine_similarity, publication_embedding_text, query_embedding_text};
use crate::services::embedding::Embedder;

/// Ranks every author against the query by cosine similarity. The result has
/// exactly one entry per author, sorted by descending score; ties keep the
/// author input order (stable sort). An author with no embeddable content
/// (no publications in aggregate mode, no summary in summarize mode) gets
/// the zero vector and a similarity of 0.0 rather than being excluded.
pub(super) fn rank_authors(
    query: &Query,
    profiles: &[AuthorProfile],
    mode: AggregationMode,
    embedder: &dyn Embedder,
) -> Result<Vec<RankedCandidate>> {
    let query_vector = embedder.embed(&query_embedding_text(query))?;
    let author_vectors = author_embeddings(profiles, mode, embedder)?;

    let mut candidates: Vec<RankedCandidate> = author_vectors
        .iter()
        .enumerate()
        .map(|(author_id, vector)| RankedCandidate {
            author_id,
            score: cosine_similarity(&query_vector, vector),
        })
        .collect();

    candidates.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(candidates)
}

fn author_embeddings(
    profiles: &[AuthorProfile],
    mode: AggregationMode,
    embedder: &dyn Embedder,
) -> Result<Vec<Vec<f32>>> {
    match mode {
        AggregationMode::Aggregate => aggregate_embeddings(profiles, embedder),
        AggregationMode::Summarize => summarize_embeddings(profiles, embedder),
    }
}

/// One batched embedding call over every publication of every author, then a
/// per-author centroid.
fn aggregate_embeddings(
    profiles: &[AuthorProfile],
    embedder: &dyn Embedder,
) -> Result<Vec<Vec<f32>>> {
    let mut texts = Vec::new();
    let mut ranges = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let start = texts.len();
        for publication in &profile.publications {
            texts.push(publication_embedding_text(publication));
        }
        ranges.push(start..texts.len());
    }

    let vectors = embedder.embed_batch(&texts)?;
    let dimensions = vectors
        .first()
        .map(|vector| vector.len())
        .unwrap_or_else(|| embedder.dimensions());

    Ok(ranges
        .into_iter()
        .map(|range| centroid(&vectors[range], dimensions))
        .collect())
}

/// One embedding per author over the narrative summary. Authors without a
/// summary are not sent to the backend; they get the zero vector.
fn summarize_embeddings(
    profiles: &[AuthorProfile],
    embedder: &dyn Embedder,
) -> Result<Vec<Vec<f32>>> {
    let mut texts = Vec::new();
    let mut text_slots = Vec::with_capacity(profiles.len());
    for profile in profiles {
        match &profile.summary {
            Some(summary) if !summary.trim().is_empty() => {
                text_slots.push(Some(texts.len()));
                texts.push(summary.clone());
            }
            _ => text_slots.push(None),
        }
    }

    let vectors = embedder.embed_batch(&texts)?;
    let dimensions = vectors
        .first()
        .map(|vector| vector.len())
        .unwrap_or_else(|| embedder.dimensions());

    Ok(text_slots
        .into_iter()
        .map(|slot| match slot {
            Some(index) => vectors[index].clone(),
            None => vec![0.0; dimensions],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::rank_authors;
    use crate::cli::AggregationMode;
    use crate::model::{AuthorProfile, Publication, Query};
    use crate::services::embedding::{Embedder, HashEmbedder};

    fn publication(title: &str, abstract_text: &str) -> Publication {
        Publication {
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            source_url: None,
        }
    }

    fn profile(name: &str, publications: Vec<Publication>, summary: Option<&str>) -> AuthorProfile {
        AuthorProfile {
            name: name.to_string(),
            publications,
            summary: summary.map(ToOwned::to_owned),
            failed_urls: Vec::new(),
            source_hash: None,
        }
    }

    fn query(title: &str, abstract_text: &str) -> Query {
        Query {
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
        }
    }

    /// Embeds every text to the same constant vector, forcing score ties.
    struct ConstantEmbedder;

    impl Embedder for ConstantEmbedder {
        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[test]
    fn every_author_is_ranked_even_with_zero_publications() {
        let embedder = HashEmbedder::new(64);
        let profiles = vec![
            profile(
                "A",
                vec![
                    publication("Graph transformers", "We study graphs."),
                    publication("Graph attention", "Attention over graphs."),
                ],
                None,
            ),
            profile("B", vec![publication("Protein folding", "Folding models.")], None),
            profile("C", Vec::new(), None),
        ];
        let paper = query("X", "Y");

        let ranked = rank_authors(&paper, &profiles, AggregationMode::Aggregate, &embedder)
            .expect("ranking succeeds");

        assert_eq!(ranked.len(), profiles.len());
        let candidate_c = ranked
            .iter()
            .find(|candidate| candidate.author_id == 2)
            .expect("author with no publications stays ranked");
        assert_eq!(candidate_c.score, 0.0);
        for candidate in &ranked {
            assert!((-1.0..=1.0).contains(&candidate.score));
        }
    }

    #[test]
    fn ranking_is_sorted_descending_and_deterministic() {
        let embedder = HashEmbedder::new(128);
        let profiles = vec![
            profile(
                "Relevant",
                vec![publication(
                    "Reviewer assignment by embeddings",
                    "Semantic similarity for reviewer matching.",
                )],
                None,
            ),
            profile(
                "Unrelated",
                vec![publication("Quantum chemistry", "Molecular orbitals.")],
                None,
            ),
        ];
        let paper = query(
            "Reviewer assignment by embeddings",
            "Semantic similarity for reviewer matching.",
        );

        let first = rank_authors(&paper, &profiles, AggregationMode::Aggregate, &embedder)
            .expect("ranking succeeds");
        let second = rank_authors(&paper, &profiles, AggregationMode::Aggregate, &embedder)
            .expect("ranking succeeds");

        assert_eq!(first, second);
        assert_eq!(first[0].author_id, 0);
        assert!(first[0].score >= first[1].score);
    }

    #[test]
    fn ties_preserve_author_input_order() {
        let profiles = vec![
            profile("First", vec![publication("a", "b")], None),
            profile("Second", vec![publication("c", "d")], None),
            profile("Third", vec![publication("e", "f")], None),
        ];
        let paper = query("X", "Y");

        let ranked = rank_authors(&paper, &profiles, AggregationMode::Aggregate, &ConstantEmbedder)
            .expect("ranking succeeds");

        let order: Vec<usize> = ranked.iter().map(|candidate| candidate.author_id).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn summarize_mode_embeds_the_narrative_summary() {
        let embedder = HashEmbedder::new(128);
        let profiles = vec![
            profile(
                "Matching summary",
                Vec::new(),
                Some("Works on reviewer assignment and semantic matching."),
            ),
            profile("No summary", Vec::new(), None),
        ];
        let paper = query(
            "Reviewer assignment",
            "Works on reviewer assignment and semantic matching.",
        );

        let ranked = rank_authors(&paper, &profiles, AggregationMode::Summarize, &embedder)
            .expect("ranking succeeds");

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].author_id, 0);
        assert!(ranked[0].score > 0.0);
        assert_eq!(ranked[1].score, 0.0);
    }
}

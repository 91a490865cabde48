use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::model::{AuthorProfile, JustificationRecord, Query, RankedCandidate};
use crate::services::generation::{generate_with_retry, RetryPolicy, TextGenerator};
use crate::util::write_text_atomic;

pub(super) const JUSTIFICATION_SYSTEM_PROMPT: &str = "You are an academic chair of a conference. Given the information of a paper (title and abstract) and a reviewer, explain why the reviewer is a good or bad fit to review the paper according to the provided fitness score.";

/// Similarity rescaled to the 0-100 scale used in prompts.
pub(super) fn display_score(similarity: f64) -> i64 {
    (similarity * 100.0).round() as i64
}

pub(super) fn justification_user_prompt(query: &Query, narrative: &str, score: i64) -> String {
    format!(
        "\nPaper Title: {}\nPaper Abstract: {}\nSummary of Research by the Reviewer: {}\nFitness Score (out of 100): {}\n\nExplain whether the reviewer is a good fit to review the paper based on the given fitness score:\n",
        query.title, query.abstract_text, narrative, score
    )
}

#[derive(Debug)]
pub(super) struct JustifyOutcome {
    pub records: Vec<JustificationRecord>,
    /// Total underlying generation invocations across all records, retries
    /// included.
    pub attempts: usize,
}

/// Generates justifications for the top-K candidates in rank order, writing
/// the complete record sequence to `output_path` after every success so an
/// interrupted run loses at most the in-flight candidate. Any terminal
/// generation failure aborts the remaining batch; already-checkpointed
/// records stay on disk.
pub(super) fn generate_top_k(
    query: &Query,
    ranked: &[RankedCandidate],
    profiles: &[AuthorProfile],
    top_k: usize,
    generator: &dyn TextGenerator,
    retry: RetryPolicy,
    request_gap: Duration,
    output_path: &Path,
) -> Result<JustifyOutcome> {
    let count = top_k.min(ranked.len());
    let mut records = Vec::with_capacity(count);
    let mut attempts = 0;

    for (position, candidate) in ranked[..count].iter().enumerate() {
        if position > 0 && !request_gap.is_zero() {
            std::thread::sleep(request_gap);
        }

        let rank = position + 1;
        let profile = &profiles[candidate.author_id];
        let user_prompt =
            justification_user_prompt(query, &profile.narrative(), display_score(candidate.score));

        let outcome =
            generate_with_retry(generator, JUSTIFICATION_SYSTEM_PROMPT, &user_prompt, retry)
                .with_context(|| {
                    format!("justification for rank {rank} ({}) failed", profile.name)
                })?;
        attempts += outcome.attempts;

        records.push(JustificationRecord {
            rank,
            name: profile.name.clone(),
            fitness: candidate.score,
            author_id: candidate.author_id,
            explanation: outcome.text,
        });
        write_records_checkpoint(output_path, &records)?;

        info!(
            rank,
            name = %profile.name,
            attempts = outcome.attempts,
            path = %output_path.display(),
            "justification generated and checkpointed"
        );
    }

    Ok(JustifyOutcome { records, attempts })
}

pub(super) fn write_records_checkpoint(
    path: &Path,
    records: &[JustificationRecord],
) -> Result<()> {
    let mut contents = String::new();
    for record in records {
        contents.push_str(
            &serde_json::to_string(record).context("failed to serialize justification record")?,
        );
        contents.push('\n');
    }
    write_text_atomic(path, &contents)
}

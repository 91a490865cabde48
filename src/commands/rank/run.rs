use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{AggregationMode, EmbeddingBackend, RankArgs};
use crate::commands::profile::{build_and_cache_profiles, load_cached_profiles, ProfileOptions};
use crate::csvio::format_row_plain;
use crate::model::{AuthorProfile, Query, RankRunManifest, RankedCandidate};
use crate::services::embedding::{
    Embedder, HashEmbedder, HttpEmbedder, DEFAULT_LOCAL_MODEL_ID, DEFAULT_REMOTE_MODEL_ID,
};
use crate::services::generation::{ChatClient, GenerationConfig, RetryPolicy};
use crate::util::{
    ensure_directory, now_utc_string, read_to_string, utc_compact_string, write_json_pretty,
    write_text_atomic,
};

use super::justify::generate_top_k;
use super::scoring::rank_authors;

pub const FITNESS_SCORES_HEADER: &str = "Rank,Author Name,Fitness Score,Author ID";

pub fn run(args: RankArgs) -> Result<()> {
    let started = Instant::now();
    let run_id = format!("rank-{}", utc_compact_string(Utc::now()));
    let mode = args.mode;
    let mut warnings = Vec::new();

    let queries = load_queries(&args.queries)?;
    let profiles = load_or_build_profiles(&args)?;
    info!(
        authors = profiles.len(),
        queries = queries.len(),
        mode = mode.as_str(),
        "ranking inputs loaded"
    );

    if mode == AggregationMode::Summarize {
        let missing = profiles
            .iter()
            .filter(|profile| profile.summary.as_deref().map(str::trim).unwrap_or("").is_empty())
            .count();
        if missing > 0 {
            warn!(
                missing,
                "authors without a narrative summary score 0.0 in summarize mode"
            );
            warnings.push(format!("{missing} authors have no narrative summary"));
        }
    }

    let (embedder, embedding_model_id) = build_embedder(&args)?;
    let generator = if args.rank_only {
        None
    } else {
        let config = GenerationConfig::from_env(&args.llm, &args.llm_base_url)?;
        Some(ChatClient::new(config, Duration::from_secs(120))?)
    };

    ensure_directory(&args.log_dir)?;

    let selected = selected_query_indices(&args, queries.len())?;
    let retry = RetryPolicy {
        max_attempts: args.retry_attempts,
        retry_delay: Duration::from_secs(args.retry_delay_secs),
    };
    let request_gap = Duration::from_secs(args.request_gap_secs);

    let mut justification_records = 0;
    let mut generation_attempts = 0;

    for query_index in selected {
        let query = &queries[query_index];
        info!(
            query_index,
            title = %query.title,
            mode = mode.as_str(),
            "ranking authors against query"
        );

        let ranked = rank_authors(query, &profiles, mode, embedder.as_ref())?;
        write_fitness_scores(&args.log_dir, mode, query_index, &ranked, &profiles)?;

        if let Some(client) = &generator {
            let output_path = args.log_dir.join(format!(
                "output_{}_query_{}.txt",
                mode.as_str(),
                query_index
            ));
            let outcome = generate_top_k(
                query,
                &ranked,
                &profiles,
                args.top_k,
                client,
                retry,
                request_gap,
                &output_path,
            )
            .with_context(|| format!("justification batch for query {query_index} failed"))?;

            justification_records += outcome.records.len();
            generation_attempts += outcome.attempts;
        }
    }

    let manifest = RankRunManifest {
        manifest_version: 1,
        run_id,
        generated_at: now_utc_string(),
        mode: mode.as_str().to_string(),
        embedding_model_id,
        embedding_backend: args.embedding_backend.as_str().to_string(),
        llm: args.llm.clone(),
        author_count: profiles.len(),
        query_count: queries.len(),
        top_k: args.top_k,
        justification_records,
        generation_attempts,
        duration_ms: started.elapsed().as_millis(),
        warnings,
    };
    let manifest_path = args
        .log_dir
        .join("manifests")
        .join(format!("rank_run_{}.json", mode.as_str()));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote rank run manifest");

    Ok(())
}

/// Accepts either a JSON array of queries or a single query object.
fn load_queries(path: &Path) -> Result<Vec<Query>> {
    let raw = read_to_string(path)?;

    if let Ok(queries) = serde_json::from_str::<Vec<Query>>(&raw) {
        if queries.is_empty() {
            bail!("query file {} contains no queries", path.display());
        }
        return Ok(queries);
    }

    let single: Query = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse query file {}", path.display()))?;
    Ok(vec![single])
}

fn load_or_build_profiles(args: &RankArgs) -> Result<Vec<AuthorProfile>> {
    if let Some(profiles) = load_cached_profiles(&args.profile_cache)? {
        info!(
            path = %args.profile_cache.display(),
            authors = profiles.len(),
            "loaded profile cache"
        );
        return Ok(profiles);
    }

    info!(
        path = %args.profile_cache.display(),
        "profile cache missing, building author profiles"
    );
    let options = ProfileOptions {
        database: args.database.clone(),
        profile_cache: args.profile_cache.clone(),
        log_dir: args.log_dir.clone(),
        llm: args.llm.clone(),
        llm_base_url: args.llm_base_url.clone(),
        skip_summaries: false,
        summary_words: args.summary_words,
        token_budget: args.token_budget,
        fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
        retry: RetryPolicy {
            max_attempts: args.retry_attempts,
            retry_delay: Duration::from_secs(args.retry_delay_secs),
        },
    };
    let (profiles, _stats) = build_and_cache_profiles(&options)?;
    Ok(profiles)
}

fn selected_query_indices(args: &RankArgs, query_count: usize) -> Result<Vec<usize>> {
    if args.query_indices.is_empty() {
        return Ok((0..query_count).collect());
    }

    let mut indices = args.query_indices.clone();
    indices.sort_unstable();
    indices.dedup();
    for &index in &indices {
        if index >= query_count {
            bail!("query index {index} is out of range (query file has {query_count} queries)");
        }
    }
    Ok(indices)
}

fn build_embedder(args: &RankArgs) -> Result<(Box<dyn Embedder>, String)> {
    match args.embedding_backend {
        EmbeddingBackend::LocalHash => {
            let model_id = if args.embedding_model.is_empty() {
                DEFAULT_LOCAL_MODEL_ID.to_string()
            } else {
                args.embedding_model.clone()
            };
            Ok((Box::new(HashEmbedder::new(args.embedding_dim)), model_id))
        }
        EmbeddingBackend::OpenaiCompat => {
            let model_id = if args.embedding_model.is_empty() {
                DEFAULT_REMOTE_MODEL_ID.to_string()
            } else {
                args.embedding_model.clone()
            };
            let embedder = HttpEmbedder::from_env(
                &args.embedding_base_url,
                &model_id,
                args.embedding_dim,
                Duration::from_secs(120),
            )?;
            Ok((Box::new(embedder), model_id))
        }
    }
}

fn write_fitness_scores(
    log_dir: &Path,
    mode: AggregationMode,
    query_index: usize,
    ranked: &[RankedCandidate],
    profiles: &[AuthorProfile],
) -> Result<()> {
    let path = fitness_scores_path(log_dir, mode, query_index);

    let mut contents = String::from(FITNESS_SCORES_HEADER);
    contents.push('\n');
    for (position, candidate) in ranked.iter().enumerate() {
        let row = format_row_plain(&[
            (position + 1).to_string(),
            profiles[candidate.author_id].name.clone(),
            format!("{:.6}", candidate.score),
            candidate.author_id.to_string(),
        ]);
        contents.push_str(&row);
        contents.push('\n');
    }

    write_text_atomic(&path, &contents)?;
    info!(path = %path.display(), rows = ranked.len(), "wrote fitness score file");
    Ok(())
}

pub(crate) fn fitness_scores_path(
    log_dir: &Path,
    mode: AggregationMode,
    query_index: usize,
) -> PathBuf {
    log_dir.join(format!(
        "fitness_scores_{}_query_{}.csv",
        mode.as_str(),
        query_index
    ))
}

#[cfg(test)]
mod tests {
    use super::load_queries;

    #[test]
    fn query_file_accepts_array_or_single_object() {
        let dir = tempfile::tempdir().expect("tempdir");

        let array_path = dir.path().join("queries.json");
        std::fs::write(
            &array_path,
            r#"[{"title": "A", "abstract": "a"}, {"title": "B", "abstract": "b"}]"#,
        )
        .expect("write");
        let queries = load_queries(&array_path).expect("array parses");
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].title, "B");

        let single_path = dir.path().join("query.json");
        std::fs::write(&single_path, r#"{"title": "Solo", "abstract": "s"}"#).expect("write");
        let queries = load_queries(&single_path).expect("single parses");
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].title, "Solo");
    }

    #[test]
    fn empty_query_array_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queries.json");
        std::fs::write(&path, "[]").expect("write");
        assert!(load_queries(&path).is_err());
    }
}

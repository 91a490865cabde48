use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::ProfileArgs;
use crate::model::{AuthorProfile, DatabaseEntry, ProfileRunManifest, Publication};
use crate::services::fetch::PublicationFetcher;
use crate::services::generation::{
    generate_with_retry, ChatClient, GenerationConfig, GenerationError, RetryPolicy, TextGenerator,
};
use crate::util::{
    now_utc_string, read_to_string, sha256_text, utc_compact_string, write_json_pretty,
};

use super::budget::{fit_publications_to_budget, publication_block};

const SUMMARY_SYSTEM_PROMPT: &str = "You are an academic expert. Given the information of several papers (title and abstract) from one author, summarize the main research contributions of this author.";

pub(crate) struct ProfileOptions {
    pub database: PathBuf,
    pub profile_cache: PathBuf,
    pub log_dir: PathBuf,
    pub llm: String,
    pub llm_base_url: String,
    pub skip_summaries: bool,
    pub summary_words: usize,
    pub token_budget: usize,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProfileOptions {
    fn from_args(args: &ProfileArgs) -> Self {
        Self {
            database: args.database.clone(),
            profile_cache: args.profile_cache.clone(),
            log_dir: args.log_dir.clone(),
            llm: args.llm.clone(),
            llm_base_url: args.llm_base_url.clone(),
            skip_summaries: args.skip_summaries,
            summary_words: args.summary_words,
            token_budget: args.token_budget,
            fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
            retry: RetryPolicy {
                max_attempts: args.retry_attempts,
                retry_delay: Duration::from_secs(args.retry_delay_secs),
            },
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BuildStats {
    pub fetched_urls: usize,
    pub failed_urls: usize,
    pub summarized_authors: usize,
    pub warnings: Vec<String>,
}

pub fn run(args: ProfileArgs) -> Result<()> {
    let options = ProfileOptions::from_args(&args);
    let started = Instant::now();
    let run_id = format!("profile-{}", utc_compact_string(Utc::now()));

    if !args.refresh {
        if let Some(profiles) = load_cached_profiles(&options.profile_cache)? {
            info!(
                path = %options.profile_cache.display(),
                authors = profiles.len(),
                "profile cache present, skipping rebuild"
            );
            write_manifest(&options, &run_id, &profiles, &BuildStats::default(), true, started)?;
            return Ok(());
        }
    }

    let (profiles, stats) = build_and_cache_profiles(&options)?;
    write_manifest(&options, &run_id, &profiles, &stats, false, started)?;

    info!(
        authors = profiles.len(),
        fetched = stats.fetched_urls,
        failed = stats.failed_urls,
        summarized = stats.summarized_authors,
        "profile build completed"
    );

    Ok(())
}

pub(crate) fn load_cached_profiles(path: &Path) -> Result<Option<Vec<AuthorProfile>>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = read_to_string(path)?;
    let profiles: Vec<AuthorProfile> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse profile cache {}", path.display()))?;
    Ok(Some(profiles))
}

pub(crate) fn build_and_cache_profiles(
    options: &ProfileOptions,
) -> Result<(Vec<AuthorProfile>, BuildStats)> {
    let entries = read_database(&options.database)?;
    if entries.is_empty() {
        bail!("author database {} is empty", options.database.display());
    }

    let fetcher = PublicationFetcher::new(options.fetch_timeout)?;
    let summarizer: Option<ChatClient> = if options.skip_summaries {
        None
    } else {
        let config = GenerationConfig::from_env(&options.llm, &options.llm_base_url)?;
        Some(ChatClient::new(config, Duration::from_secs(120))?)
    };

    let (profiles, stats) = build_author_profiles(
        &entries,
        &fetcher,
        summarizer.as_ref().map(|client| client as &dyn TextGenerator),
        options,
    )?;

    write_json_pretty(&options.profile_cache, &profiles)?;
    info!(path = %options.profile_cache.display(), "wrote profile cache");

    Ok((profiles, stats))
}

fn build_author_profiles(
    entries: &[(DatabaseEntry, String)],
    fetcher: &PublicationFetcher,
    summarizer: Option<&dyn TextGenerator>,
    options: &ProfileOptions,
) -> Result<(Vec<AuthorProfile>, BuildStats)> {
    let mut profiles = Vec::with_capacity(entries.len());
    let mut stats = BuildStats::default();

    for (entry, source_hash) in entries {
        let mut publications = Vec::with_capacity(entry.publication_urls.len());
        let mut failed_urls = Vec::new();

        for url in &entry.publication_urls {
            match fetcher.fetch(url) {
                Ok(publication) => {
                    stats.fetched_urls += 1;
                    publications.push(publication);
                }
                Err(error) => {
                    stats.failed_urls += 1;
                    warn!(author = %entry.name, url = %url, error = %error, "publication fetch failed, skipping url");
                    stats
                        .warnings
                        .push(format!("{}: fetch failed for {url}: {error:#}", entry.name));
                    failed_urls.push(url.clone());
                }
            }
        }

        let summary = match summarizer {
            Some(generator) if !publications.is_empty() => summarize_author(
                generator,
                &entry.name,
                &publications,
                options,
                &mut stats,
            )?,
            _ => None,
        };
        if summary.is_some() {
            stats.summarized_authors += 1;
        }

        profiles.push(AuthorProfile {
            name: entry.name.clone(),
            publications,
            summary,
            failed_urls,
            source_hash: Some(source_hash.clone()),
        });
    }

    Ok((profiles, stats))
}

/// Requests a narrative research summary for one author. A transient failure
/// that outlives the retry budget degrades to a missing summary; a
/// validation failure aborts the whole build.
fn summarize_author(
    generator: &dyn TextGenerator,
    author: &str,
    publications: &[Publication],
    options: &ProfileOptions,
    stats: &mut BuildStats,
) -> Result<Option<String>> {
    let fitted = fit_publications_to_budget(publications, options.token_budget);
    if fitted.len() < publications.len() {
        info!(
            author,
            kept = fitted.len(),
            total = publications.len(),
            "publication block over token budget, truncated"
        );
    }

    let system_prompt = format!(
        "{SUMMARY_SYSTEM_PROMPT} Keep the summary under {} words.",
        options.summary_words
    );
    let user_prompt = format!("{}\n\nSummary of Research:", publication_block(&fitted));

    match generate_with_retry(generator, &system_prompt, &user_prompt, options.retry) {
        Ok(outcome) => {
            info!(author, attempts = outcome.attempts, "author summary generated");
            Ok(Some(outcome.text))
        }
        Err(GenerationError::Transient(message)) => {
            warn!(author, error = %message, "summary generation failed, continuing without summary");
            stats
                .warnings
                .push(format!("{author}: summary generation failed: {message}"));
            Ok(None)
        }
        Err(error @ GenerationError::Validation(_)) => {
            Err(error).with_context(|| format!("summary request for {author} was rejected"))
        }
    }
}

fn read_database(path: &Path) -> Result<Vec<(DatabaseEntry, String)>> {
    let raw = read_to_string(path)?;
    let mut entries = Vec::new();

    for (line_number, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: DatabaseEntry = serde_json::from_str(trimmed).with_context(|| {
            format!(
                "failed to parse {} line {}",
                path.display(),
                line_number + 1
            )
        })?;
        entries.push((entry, sha256_text(trimmed)));
    }

    Ok(entries)
}

fn write_manifest(
    options: &ProfileOptions,
    run_id: &str,
    profiles: &[AuthorProfile],
    stats: &BuildStats,
    reused_cache: bool,
    started: Instant,
) -> Result<()> {
    let manifest = ProfileRunManifest {
        manifest_version: 1,
        run_id: run_id.to_string(),
        generated_at: now_utc_string(),
        database_path: options.database.display().to_string(),
        cache_path: options.profile_cache.display().to_string(),
        author_count: profiles.len(),
        publication_count: profiles
            .iter()
            .map(|profile| profile.publications.len())
            .sum(),
        fetched_urls: stats.fetched_urls,
        failed_urls: stats.failed_urls,
        summarized_authors: stats.summarized_authors,
        reused_cache,
        duration_ms: started.elapsed().as_millis(),
        warnings: stats.warnings.clone(),
    };

    let manifest_path = options.log_dir.join("manifests").join("profile_run.json");
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote profile run manifest");

    Ok(())
}

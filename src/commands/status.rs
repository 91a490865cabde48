use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{AggregationMode, StatusArgs};
use crate::commands::profile::load_cached_profiles;
use crate::util::sha256_text;

const MODES: [AggregationMode; 2] = [AggregationMode::Aggregate, AggregationMode::Summarize];

pub fn run(args: StatusArgs) -> Result<()> {
    report_profile_cache(&args)?;
    report_log_outputs(&args.log_dir)?;

    if args.agreement_report.exists() {
        info!(path = %args.agreement_report.display(), "agreement report present");
    } else {
        warn!(path = %args.agreement_report.display(), "agreement report missing");
    }

    Ok(())
}

fn report_profile_cache(args: &StatusArgs) -> Result<()> {
    let Some(profiles) = load_cached_profiles(&args.profile_cache)? else {
        warn!(path = %args.profile_cache.display(), "profile cache missing");
        return Ok(());
    };

    let without_summary = profiles
        .iter()
        .filter(|profile| profile.summary.as_deref().map(str::trim).unwrap_or("").is_empty())
        .count();
    let publication_count: usize = profiles
        .iter()
        .map(|profile| profile.publications.len())
        .sum();
    let failed_urls: usize = profiles.iter().map(|profile| profile.failed_urls.len()).sum();

    info!(
        path = %args.profile_cache.display(),
        authors = profiles.len(),
        publications = publication_count,
        without_summary,
        failed_urls,
        "profile cache loaded"
    );

    if args.database.exists() {
        let stale = stale_profile_count(&args.database, &profiles)?;
        if stale > 0 {
            warn!(
                stale,
                database = %args.database.display(),
                "profiles differ from the current database, consider profile --refresh"
            );
        }
    } else {
        warn!(path = %args.database.display(), "author database missing");
    }

    Ok(())
}

/// Profiles whose recorded source hash no longer matches any database row.
fn stale_profile_count(
    database: &Path,
    profiles: &[crate::model::AuthorProfile],
) -> Result<usize> {
    let raw = std::fs::read_to_string(database)
        .with_context(|| format!("failed to read {}", database.display()))?;
    let hashes: HashSet<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(sha256_text)
        .collect();

    Ok(profiles
        .iter()
        .filter(|profile| match &profile.source_hash {
            Some(hash) => !hashes.contains(hash),
            None => true,
        })
        .count())
}

fn report_log_outputs(log_dir: &Path) -> Result<()> {
    if !log_dir.exists() {
        warn!(path = %log_dir.display(), "log directory missing");
        return Ok(());
    }

    for mode in MODES {
        let mut raw_outputs = 0;
        let mut score_files = 0;
        for entry in std::fs::read_dir(log_dir)
            .with_context(|| format!("failed to read {}", log_dir.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(&format!("output_{}_query_", mode.as_str())) {
                raw_outputs += 1;
            }
            if name.starts_with(&format!("fitness_scores_{}_query_", mode.as_str())) {
                score_files += 1;
            }
        }

        let consolidated_dir = log_dir.join(mode.as_str());
        let consolidated = if consolidated_dir.exists() {
            std::fs::read_dir(&consolidated_dir)
                .with_context(|| format!("failed to read {}", consolidated_dir.display()))?
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_str()
                        .map(|name| name.ends_with(".csv"))
                        .unwrap_or(false)
                })
                .count()
        } else {
            0
        };

        info!(
            mode = mode.as_str(),
            raw_outputs,
            score_files,
            consolidated,
            "per-mode output status"
        );
    }

    Ok(())
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::cli::{AggregationMode, ConsolidateArgs};
use crate::commands::rank::fitness_scores_path;
use crate::csvio::{format_row_quoted, parse_rows};
use crate::semantic::normalize_whitespace;
use crate::util::{ensure_directory, read_to_string, write_text_atomic};

pub const CONSOLIDATED_HEADER: [&str; 4] = ["index", "name", "fitness_score", "rationale"];

/// Raw justification line as found in per-query output files. Other scoring
/// systems produce these too, so every field is optional and loosely typed.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    rank: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fitness: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
}

pub fn run(args: ConsolidateArgs) -> Result<()> {
    let modes = if args.modes.is_empty() {
        vec![AggregationMode::Aggregate, AggregationMode::Summarize]
    } else {
        let mut modes = args.modes.clone();
        modes.dedup();
        modes
    };

    for mode in modes {
        let mode_dir = args.log_dir.join(mode.as_str());
        ensure_directory(&mode_dir)?;

        let query_indices = if args.queries.is_empty() {
            discover_query_indices(&args.log_dir, mode)?
        } else {
            let mut indices = args.queries.clone();
            indices.sort_unstable();
            indices.dedup();
            indices
        };

        if query_indices.is_empty() {
            warn!(mode = mode.as_str(), "no raw output files found, nothing to consolidate");
            continue;
        }

        for query_index in query_indices {
            consolidate_query(&args.log_dir, &mode_dir, mode, query_index)?;
        }
    }

    Ok(())
}

fn consolidate_query(
    log_dir: &Path,
    mode_dir: &Path,
    mode: AggregationMode,
    query_index: usize,
) -> Result<()> {
    let output_path = log_dir.join(format!(
        "output_{}_query_{}.txt",
        mode.as_str(),
        query_index
    ));
    if !output_path.exists() {
        warn!(path = %output_path.display(), "raw output missing, skipping query");
        return Ok(());
    }

    let raw = match read_to_string(&output_path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %output_path.display(), error = %error, "failed to read raw output, skipping query");
            return Ok(());
        }
    };
    let records = match parse_raw_records(&raw) {
        Ok(records) => records,
        Err(error) => {
            warn!(path = %output_path.display(), error = %error, "failed to parse raw output, skipping query");
            return Ok(());
        }
    };

    let scores_path = fitness_scores_path(log_dir, mode, query_index);
    let scores = if scores_path.exists() {
        match read_to_string(&scores_path) {
            Ok(text) => parse_fitness_scores(&text),
            Err(error) => {
                warn!(path = %scores_path.display(), error = %error, "could not read fitness scores");
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    let rows = consolidate_records(&records, &scores);
    let contents = render_consolidated_csv(&rows);

    let consolidated_path = mode_dir.join(format!("{query_index}.csv"));
    write_text_atomic(&consolidated_path, &contents)?;
    info!(
        path = %consolidated_path.display(),
        records = rows.len(),
        "consolidated query results"
    );

    Ok(())
}

fn parse_raw_records(raw: &str) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for (line_number, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("line {} is not a record", line_number + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Name-keyed score overrides from the side-channel CSV. The first
/// occurrence of a name wins; a row with an unparsable score ends the scan
/// and keeps what was collected so far.
fn parse_fitness_scores(text: &str) -> HashMap<String, f64> {
    let mut scores = HashMap::new();

    let Some(rows) = parse_rows(text) else {
        warn!("fitness score file is not valid csv, ignoring");
        return scores;
    };
    let Some(header) = rows.first() else {
        return scores;
    };
    let name_column = header.iter().position(|column| column.trim() == "Author Name");
    let score_column = header.iter().position(|column| column.trim() == "Fitness Score");
    let (Some(name_column), Some(score_column)) = (name_column, score_column) else {
        warn!("fitness score file is missing expected columns, ignoring");
        return scores;
    };

    for row in &rows[1..] {
        let (Some(name), Some(raw_score)) = (row.get(name_column), row.get(score_column)) else {
            warn!("short row in fitness score file, stopping score scan");
            break;
        };
        let Ok(score) = raw_score.trim().parse::<f64>() else {
            warn!(value = %raw_score, "unparsable fitness score, stopping score scan");
            break;
        };
        scores.entry(name.trim().to_string()).or_insert(score);
    }

    scores
}

fn consolidate_records(
    records: &[RawRecord],
    scores: &HashMap<String, f64>,
) -> Vec<[String; 4]> {
    records
        .iter()
        .map(|record| {
            let name = record.name.clone().unwrap_or_default();
            let fitness = scores
                .get(name.trim())
                .copied()
                .or_else(|| value_to_f64(record.fitness.as_ref()));
            let fitness_text = fitness.map(|score| format!("{score:.2}")).unwrap_or_default();

            [
                value_to_string(record.rank.as_ref()),
                name,
                fitness_text,
                clean_rationale(record.explanation.as_deref().unwrap_or_default()),
            ]
        })
        .collect()
}

/// Strips every line break and control whitespace out of a rationale and
/// collapses runs to single spaces, so the value always fits one CSV field.
fn clean_rationale(rationale: &str) -> String {
    let replaced: String = rationale
        .chars()
        .map(|character| {
            if matches!(character, '\n' | '\r' | '\t' | '\u{000B}' | '\u{000C}') {
                ' '
            } else {
                character
            }
        })
        .collect();
    normalize_whitespace(&replaced)
}

fn render_consolidated_csv(rows: &[[String; 4]]) -> String {
    let mut contents = format_row_quoted(
        &CONSOLIDATED_HEADER
            .iter()
            .map(|column| column.to_string())
            .collect::<Vec<String>>(),
    );
    contents.push('\n');

    for row in rows {
        contents.push_str(&format_row_quoted(row.as_slice()));
        contents.push('\n');
    }
    contents
}

fn value_to_string(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn value_to_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    match value {
        Some(serde_json::Value::Number(number)) => number.as_f64(),
        Some(serde_json::Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn discover_query_indices(log_dir: &Path, mode: AggregationMode) -> Result<Vec<usize>> {
    let pattern = Regex::new(&format!(
        r"^output_{}_query_(\d+)\.txt$",
        regex::escape(mode.as_str())
    ))
    .context("failed to compile output filename pattern")?;

    let mut indices = Vec::new();
    if !log_dir.exists() {
        return Ok(indices);
    }

    for entry in std::fs::read_dir(log_dir)
        .with_context(|| format!("failed to read {}", log_dir.display()))?
    {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(captures) = pattern.captures(name) {
            if let Ok(index) = captures[1].parse::<usize>() {
                indices.push(index);
            }
        }
    }

    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

pub(crate) fn consolidated_path(log_dir: &Path, system: &str, doc_id: &str) -> PathBuf {
    log_dir.join(system).join(format!("{doc_id}.csv"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        clean_rationale, consolidate_records, parse_fitness_scores, parse_raw_records,
        render_consolidated_csv,
    };

    fn consolidate_text(raw: &str, scores_csv: Option<&str>) -> String {
        let records = parse_raw_records(raw).expect("raw output parses");
        let scores = scores_csv.map(parse_fitness_scores).unwrap_or_default();
        render_consolidated_csv(&consolidate_records(&records, &scores))
    }

    #[test]
    fn clean_rationale_collapses_all_control_whitespace() {
        let cleaned = clean_rationale("a\nb\r\nc\td\u{000B}e\u{000C}f   g");
        assert_eq!(cleaned, "a b c d e f g");
    }

    #[test]
    fn rationale_never_contains_control_whitespace() {
        let raw = r#"{"rank": 1, "name": "Ada Lovelace", "fitness": 0.91, "explanation": "line one\nline two\r\ttabbed\u000bvertical\u000cformfeed"}"#;
        let csv = consolidate_text(raw, None);

        let body = csv.lines().nth(1).expect("data row");
        assert!(body.contains("line one line two tabbed vertical formfeed"));
        for line in csv.lines() {
            assert!(!line.contains('\t'));
        }
    }

    #[test]
    fn missing_explanation_still_emits_a_row() {
        let raw = r#"{"rank": 1, "name": "Ada Lovelace", "fitness": 0.5}"#;
        let csv = consolidate_text(raw, None);
        assert_eq!(
            csv.lines().nth(1).expect("data row"),
            "\"1\",\"Ada Lovelace\",\"0.50\",\"\""
        );
    }

    #[test]
    fn side_channel_score_overrides_record_score_by_name() {
        let raw = "\n".to_string()
            + r#"{"rank": 1, "name": "Ada Lovelace", "fitness": 0.1, "explanation": "a"}"#
            + "\n"
            + r#"{"rank": 2, "name": "Unknown Person", "fitness": 0.2, "explanation": "b"}"#;
        let scores = "Rank,Author Name,Fitness Score,Author ID\n1,Ada Lovelace,0.876,0\n";

        let csv = consolidate_text(&raw, Some(scores));
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[1].contains("\"0.88\""));
        assert!(lines[2].contains("\"0.20\""));
    }

    #[test]
    fn duplicate_names_in_score_file_keep_first_occurrence() {
        let scores = "Rank,Author Name,Fitness Score,Author ID\n1,Ada Lovelace,0.9,0\n2,Ada Lovelace,0.1,7\n";
        let map = parse_fitness_scores(scores);
        assert_eq!(map.get("Ada Lovelace"), Some(&0.9));
    }

    #[test]
    fn unparsable_score_falls_back_to_record_fitness() {
        let raw = r#"{"rank": 1, "name": "Ada Lovelace", "fitness": "not a number", "explanation": "a"}"#;
        let csv = consolidate_text(raw, None);
        assert_eq!(
            csv.lines().nth(1).expect("data row"),
            "\"1\",\"Ada Lovelace\",\"\",\"a\""
        );
    }

    #[test]
    fn consolidation_is_idempotent() {
        let raw = r#"{"rank": 1, "name": "Grace Hopper", "fitness": 0.77, "explanation": "solid\nmatch"}"#;
        let first = consolidate_text(raw, None);
        let second = consolidate_text(raw, None);
        assert_eq!(first, second);
    }

    #[test]
    fn every_field_is_quoted_including_header() {
        let raw = r#"{"rank": 1, "name": "Ada Lovelace", "fitness": 0.91, "explanation": "fine"}"#;
        let csv = consolidate_text(raw, None);
        assert_eq!(
            csv.lines().next().expect("header"),
            "\"index\",\"name\",\"fitness_score\",\"rationale\""
        );
    }

    #[test]
    fn empty_scores_map_for_malformed_csv() {
        let map = parse_fitness_scores("not,a real\nheader");
        assert!(map.is_empty());
    }

    #[test]
    fn record_missing_name_uses_empty_join_key() {
        let raw = r#"{"rank": 3, "fitness": 0.4, "explanation": "anonymous"}"#;
        let records = parse_raw_records(raw).expect("parses");
        let rows = consolidate_records(&records, &HashMap::new());
        assert_eq!(rows[0][1], "");
        assert_eq!(rows[0][2], "0.40");
    }
}

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::cli::AgreementArgs;
use crate::commands::consolidate::consolidated_path;
use crate::csvio::{format_row_plain, parse_rows};
use crate::util::{read_to_string, write_text_atomic};

const DEFAULT_SYSTEMS: [&str; 4] = ["gpt", "gemini", "summarize", "aggregate"];

/// Values containing these markers are descriptive text that leaked into the
/// name column of a malformed CSV, not person names.
const NAME_DENYLIST: [&str; 6] = [
    "expert",
    "researcher",
    "specialist",
    "leading",
    "known",
    "prominent",
];

pub fn run(args: AgreementArgs) -> Result<()> {
    let systems: Vec<String> = if args.systems.is_empty() {
        DEFAULT_SYSTEMS.iter().map(|system| system.to_string()).collect()
    } else {
        args.systems.clone()
    };
    if systems.len() < 2 {
        bail!("agreement needs at least two systems to compare");
    }

    let doc_ids = if args.doc_ids.is_empty() {
        discover_doc_ids(&args.log_dir, &systems)?
    } else {
        args.doc_ids.clone()
    };
    if doc_ids.is_empty() {
        bail!(
            "no consolidated files found under {} for systems {}",
            args.log_dir.display(),
            systems.join(", ")
        );
    }

    let pairs = system_pairs(&systems);
    let mut rows: Vec<(String, Vec<usize>)> = Vec::with_capacity(doc_ids.len());

    for doc_id in &doc_ids {
        let mut top_names: Vec<HashSet<String>> = Vec::with_capacity(systems.len());
        for system in &systems {
            let path = consolidated_path(&args.log_dir, system, doc_id);
            let names = match read_to_string(&path) {
                Ok(raw) => read_top_names(&raw, args.top_n),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "consolidated file unreadable, treating as empty");
                    Vec::new()
                }
            };
            top_names.push(names.into_iter().collect());
        }

        let overlaps: Vec<usize> = pairs
            .iter()
            .map(|(left, right, _)| top_names[*left].intersection(&top_names[*right]).count())
            .collect();

        for ((_, _, label), overlap) in pairs.iter().zip(&overlaps) {
            info!(doc_id = %doc_id, pair = %label, overlap, top_n = args.top_n, "pairwise agreement");
        }
        rows.push((doc_id.clone(), overlaps));
    }

    let report = render_agreement_report(&pairs, &rows);
    write_text_atomic(&args.output, &report)?;
    info!(
        path = %args.output.display(),
        documents = rows.len(),
        pairs = pairs.len(),
        "wrote agreement report"
    );

    Ok(())
}

/// Top-N name extraction with a strict-then-permissive strategy: a quoted
/// CSV parse of the `name` column, accepted only when the first value looks
/// like a person name; otherwise a pattern scan for `number, name,` pairs
/// over the raw text.
pub(crate) fn read_top_names(raw: &str, top_n: usize) -> Vec<String> {
    match strict_top_names(raw, top_n) {
        Some(names) => names,
        None => fallback_top_names(raw, top_n),
    }
}

fn strict_top_names(raw: &str, top_n: usize) -> Option<Vec<String>> {
    let rows = parse_rows(raw)?;
    let header = rows.first()?;
    let name_column = header.iter().position(|column| column.trim() == "name")?;

    let names: Vec<String> = rows[1..]
        .iter()
        .filter_map(|row| row.get(name_column))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .take(top_n)
        .collect();

    if looks_like_person_name(names.first()?) {
        Some(names)
    } else {
        None
    }
}

fn looks_like_person_name(value: &str) -> bool {
    let lowered = value.to_lowercase();
    value.chars().count() < 50
        && !value.contains(',')
        && value.chars().any(char::is_uppercase)
        && value.contains(' ')
        && !NAME_DENYLIST.iter().any(|marker| lowered.contains(marker))
}

fn fallback_top_names(raw: &str, top_n: usize) -> Vec<String> {
    let pattern = Regex::new(r"(\d+),\s*([^,]+),").expect("name pair pattern is valid");

    let mut names = Vec::new();
    for captures in pattern.captures_iter(raw) {
        if names.len() >= top_n {
            break;
        }
        let candidate = captures[2].trim().trim_matches('"').trim().to_string();
        if !candidate.is_empty() && candidate.chars().count() < 100 {
            names.push(candidate);
        }
    }
    names
}

/// Unordered system pairs in combination order, labelled with the
/// three-letter abbreviations the report columns use.
fn system_pairs(systems: &[String]) -> Vec<(usize, usize, String)> {
    let mut pairs = Vec::new();
    for left in 0..systems.len() {
        for right in (left + 1)..systems.len() {
            let label = format!(
                "{}-{}",
                abbreviate_system(&systems[left]),
                abbreviate_system(&systems[right])
            );
            pairs.push((left, right, label));
        }
    }
    pairs
}

fn abbreviate_system(system: &str) -> String {
    if system == "gemini" {
        return "gem".to_string();
    }
    system.chars().take(3).collect()
}

fn render_agreement_report(
    pairs: &[(usize, usize, String)],
    rows: &[(String, Vec<usize>)],
) -> String {
    let mut header = vec!["docID".to_string()];
    header.extend(pairs.iter().map(|(_, _, label)| label.clone()));

    let mut contents = format_row_plain(&header);
    contents.push('\n');

    for (doc_id, overlaps) in rows {
        let mut fields = vec![doc_id.clone()];
        fields.extend(overlaps.iter().map(|overlap| overlap.to_string()));
        contents.push_str(&format_row_plain(&fields));
        contents.push('\n');
    }

    let mut average_fields = vec!["average".to_string()];
    for column in 0..pairs.len() {
        let sum: usize = rows.iter().map(|(_, overlaps)| overlaps[column]).sum();
        let mean = if rows.is_empty() {
            0.0
        } else {
            sum as f64 / rows.len() as f64
        };
        average_fields.push(format!("{mean:.2}"));
    }
    contents.push_str(&format_row_plain(&average_fields));
    contents.push('\n');

    contents
}

/// Union of `{id}.csv` stems across the systems' consolidated directories,
/// numeric ids first in numeric order.
fn discover_doc_ids(log_dir: &Path, systems: &[String]) -> Result<Vec<String>> {
    let mut ids = HashSet::new();

    for system in systems {
        let dir = log_dir.join(system);
        if !dir.exists() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(".csv") {
                ids.insert(stem.to_string());
            }
        }
    }

    let mut ids: Vec<String> = ids.into_iter().collect();
    ids.sort_by_key(|id| match id.parse::<u64>() {
        Ok(number) => (0, number, id.clone()),
        Err(_) => (1, 0, id.clone()),
    });
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::{looks_like_person_name, read_top_names, render_agreement_report, system_pairs};

    fn consolidated_csv(names: &[&str]) -> String {
        let mut text = String::from("\"index\",\"name\",\"fitness_score\",\"rationale\"\n");
        for (index, name) in names.iter().enumerate() {
            text.push_str(&format!(
                "\"{}\",\"{}\",\"0.80\",\"a plausible reviewer\"\n",
                index + 1,
                name
            ));
        }
        text
    }

    #[test]
    fn strict_parse_reads_name_column() {
        let csv = consolidated_csv(&["Ada Lovelace", "Grace Hopper", "Alan Turing"]);
        let names = read_top_names(&csv, 10);
        assert_eq!(
            names,
            vec!["Ada Lovelace", "Grace Hopper", "Alan Turing"]
        );
    }

    #[test]
    fn headerless_file_falls_back_to_pattern_extraction() {
        let text = "1, Ada Lovelace, pioneered analytical engines and tabulation\n2, Grace Hopper, built early compilers\n";
        let names = read_top_names(text, 10);
        assert_eq!(names, vec!["Ada Lovelace", "Grace Hopper"]);
    }

    #[test]
    fn person_name_heuristic_rejects_descriptive_text() {
        assert!(looks_like_person_name("Ada Lovelace"));
        assert!(!looks_like_person_name("a leading expert in machine learning"));
        assert!(!looks_like_person_name("lowercase words"));
        assert!(!looks_like_person_name("Mononym"));
        let long_value = "Very Long ".repeat(10);
        assert!(!looks_like_person_name(long_value.trim()));
    }

    #[test]
    fn top_n_bounds_both_extraction_paths() {
        let csv = consolidated_csv(&["A B", "C D", "E F", "G H"]);
        assert_eq!(read_top_names(&csv, 2).len(), 2);

        let malformed = "1, Ada Lovelace, x\n2, Grace Hopper, y\n3, Alan Turing, z\n";
        assert_eq!(read_top_names(malformed, 2).len(), 2);
    }

    #[test]
    fn identical_lists_overlap_fully_and_disjoint_lists_not_at_all() {
        let names: Vec<&str> = vec![
            "A One", "B Two", "C Three", "D Four", "E Five", "F Six", "G Seven", "H Eight",
            "I Nine", "J Ten",
        ];
        let left: std::collections::HashSet<String> =
            read_top_names(&consolidated_csv(&names), 10).into_iter().collect();
        let right: std::collections::HashSet<String> =
            read_top_names(&consolidated_csv(&names), 10).into_iter().collect();
        assert_eq!(left.intersection(&right).count(), 10);

        let other_names: Vec<&str> = vec![
            "K One", "L Two", "M Three", "N Four", "O Five", "P Six", "Q Seven", "R Eight",
            "S Nine", "T Ten",
        ];
        let disjoint: std::collections::HashSet<String> =
            read_top_names(&consolidated_csv(&other_names), 10)
                .into_iter()
                .collect();
        assert_eq!(left.intersection(&disjoint).count(), 0);
    }

    #[test]
    fn default_pair_labels_match_report_columns() {
        let systems: Vec<String> = ["gpt", "gemini", "summarize", "aggregate"]
            .iter()
            .map(|system| system.to_string())
            .collect();
        let labels: Vec<String> = system_pairs(&systems)
            .into_iter()
            .map(|(_, _, label)| label)
            .collect();
        assert_eq!(
            labels,
            vec!["gpt-gem", "gpt-sum", "gpt-agg", "gem-sum", "gem-agg", "sum-agg"]
        );
    }

    #[test]
    fn report_ends_with_two_decimal_average_row() {
        let systems: Vec<String> = ["gpt", "gemini"].iter().map(|s| s.to_string()).collect();
        let pairs = system_pairs(&systems);
        let rows = vec![
            ("0".to_string(), vec![10]),
            ("1".to_string(), vec![3]),
        ];

        let report = render_agreement_report(&pairs, &rows);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "docID,gpt-gem");
        assert_eq!(lines[1], "0,10");
        assert_eq!(lines[2], "1,3");
        assert_eq!(lines[3], "average,6.50");
    }
}

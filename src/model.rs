use serde::{Deserialize, Serialize};

/// One line of the author database (`database.jsonl`).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    #[serde(default)]
    pub publication_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Cached author record (`author_profile.json`). The embeddable content for
/// a run is derived from `publications` or `summary` depending on the
/// aggregation mode; the cache itself is mode-independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub name: String,
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub failed_urls: Vec<String>,
    /// Hash of the database row this profile was built from, used to report
    /// staleness without re-fetching.
    #[serde(default)]
    pub source_hash: Option<String>,
}

impl AuthorProfile {
    /// The narrative text used in justification prompts. Falls back to the
    /// publication titles when no summary was generated.
    pub fn narrative(&self) -> String {
        match &self.summary {
            Some(summary) if !summary.trim().is_empty() => summary.clone(),
            _ => self
                .publications
                .iter()
                .map(|publication| publication.title.as_str())
                .collect::<Vec<&str>>()
                .join("; "),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Query {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub author_id: usize,
    pub score: f64,
}

/// One line of the per-query raw output (`output_{mode}_query_{i}.txt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JustificationRecord {
    pub rank: usize,
    pub name: String,
    pub fitness: f64,
    pub author_id: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub database_path: String,
    pub cache_path: String,
    pub author_count: usize,
    pub publication_count: usize,
    pub fetched_urls: usize,
    pub failed_urls: usize,
    pub summarized_authors: usize,
    pub reused_cache: bool,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub mode: String,
    pub embedding_model_id: String,
    pub embedding_backend: String,
    pub llm: String,
    pub author_count: usize,
    pub query_count: usize,
    pub top_k: usize,
    pub justification_records: usize,
    pub generation_attempts: usize,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}

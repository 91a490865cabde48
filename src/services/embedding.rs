use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::semantic::normalize_whitespace;

pub const DEFAULT_LOCAL_MODEL_ID: &str = "local-hash-v1";
pub const DEFAULT_REMOTE_MODEL_ID: &str = "text-embedding-v3";

const EMBEDDING_API_KEY_VAR: &str = "QWEN_API_KEY";

pub trait Embedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts)?;
        vectors
            .pop()
            .context("embedding backend returned no vector for a single text")
    }

    fn dimensions(&self) -> usize;
}

/// Deterministic offline backend: hashed unigram/bigram features,
/// L2-normalized. Useful for tests and for running the pipeline without a
/// remote embedding service; similarity values are crude but stable.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for feature in text_features(text) {
            let hash = stable_hash(&feature);
            let index = (hash as usize) % self.dimensions;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
            vector[index] += sign * weight;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn text_features(text: &str) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn l2_normalize(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Blocking client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn from_env(
        base_url: &str,
        model: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = std::env::var(EMBEDDING_API_KEY_VAR)
            .with_context(|| format!("{EMBEDDING_API_KEY_VAR} is not set"))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            dimensions,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("embedding endpoint returned {status}: {body}");
        }

        let parsed: EmbeddingResponse = response
            .json()
            .context("failed to parse embedding response")?;

        if parsed.data.len() != texts.len() {
            bail!(
                "embedding endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            );
        }

        let mut data = parsed.data;
        data.sort_by_key(|entry| entry.index);
        Ok(data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::{Embedder, HashEmbedder};

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let first = embedder.embed("graph neural networks").expect("embed");
        let second = embedder.embed("graph neural networks").expect("embed");
        assert_eq!(first, second);
    }

    #[test]
    fn hash_embedder_normalizes_nonempty_text() {
        let embedder = HashEmbedder::new(64);
        let vector = embedder.embed("reinforcement learning from human feedback").expect("embed");
        let norm = vector
            .iter()
            .map(|value| f64::from(*value) * f64::from(*value))
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hash_embedder_returns_zero_vector_for_empty_text() {
        let embedder = HashEmbedder::new(32);
        let vector = embedder.embed("").expect("embed");
        assert!(vector.iter().all(|value| *value == 0.0));
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn batch_order_matches_input_order() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let vectors = embedder.embed_batch(&texts).expect("embed");
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed("alpha beta").expect("embed"));
        assert_eq!(vectors[1], embedder.embed("gamma delta").expect("embed"));
    }
}

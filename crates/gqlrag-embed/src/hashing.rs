//! Deterministic lexical embedder.
//!
//! Feature-hashes normalized tokens into a fixed-size signed vector. Needs no
//! model download and gives identical vectors for identical input, so it is
//! the default embedder and the one used in tests.

use async_trait::async_trait;
use gqlrag_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput, identifier_words};
use tracing::debug;

/// Model name reported in index manifests.
pub const HASHING_MODEL: &str = "hashing-v1";

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 384;

const MAX_TOKENS: usize = 8192;

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could",
    "do", "dsl", "every", "find", "for", "from", "get", "give", "i", "in", "is", "it", "list",
    "me", "my", "need", "of", "on", "or", "please", "show", "some", "such", "that", "the",
    "their", "them", "these", "this", "those", "to", "want", "what", "which", "with", "would",
    "you",
];

/// Hashing embedder over camel-case-split, stop-word-filtered tokens.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder with the default dimension (384).
    #[must_use]
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIMENSION)
    }

    /// Create an embedder with a custom dimension.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Normalized tokens of `text`.
    #[must_use]
    pub fn tokenize(text: &str) -> Vec<String> {
        identifier_words(text)
            .into_iter()
            .filter(|word| word.len() > 1 && !STOP_WORDS.contains(&word.as_str()))
            .map(|word| fold_plural(&word))
            .collect()
    }

    fn embed_one(&self, text: &str, normalize: bool) -> EmbeddingOutput {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0f32; self.dimension];

        for token in &tokens {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&bytes[..8]);
            let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }

        if normalize {
            let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for value in &mut embedding {
                    *value /= norm;
                }
            }
        }

        EmbeddingOutput {
            embedding,
            token_count: tokens.len(),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold simple English plurals: `conditioners` -> `conditioner`, `queries` -> `query`.
fn fold_plural(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.len() > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
    {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        HASHING_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        MAX_TOKENS
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        debug!("Hashing {} texts", texts.len());
        texts
            .iter()
            .map(|text| {
                let output = self.embed_one(text, config.normalize);
                if output.token_count > MAX_TOKENS {
                    Err(EmbedError::InputTooLong {
                        tokens: output.token_count,
                        max: MAX_TOKENS,
                    })
                } else {
                    Ok(output)
                }
            })
            .collect()
    }
}

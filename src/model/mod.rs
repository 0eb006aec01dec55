//! Embedding-model cache
//!
//! The embedding model is downloaded while the image is assembled and copied verbatim into
//! the runtime image. At run time the cache is read-only and looked up offline; what
//! happens when it is missing is governed by [`CachePolicy`].

mod cache;

pub use cache::{CacheError, CacheReport, ModelCache};

#[cfg(test)]
pub(crate) use cache::test_support;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime behaviour when the pre-populated cache is missing or incomplete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Refuse to start; the runtime is pinned offline
    #[default]
    Require,
    /// Start anyway and let the model runtime download what it needs
    Fetch,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::Require => write!(f, "require"),
            CachePolicy::Fetch => write!(f, "fetch"),
        }
    }
}

/// A model on the hub and the files the runtime loads from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub revision: String,
    pub files: Vec<String>,
}

impl ModelSpec {
    pub const ALL_MINILM_L6_V2: &'static str = "sentence-transformers/all-MiniLM-L6-v2";

    /// One-shot interpreter command that instantiates the embedding client, forcing the
    /// download into the default cache and nothing else
    pub fn python_prefetch_command(&self) -> String {
        format!(
            "python -c \"from sentence_transformers import SentenceTransformer; \
             SentenceTransformer('{}', revision='{}')\"",
            self.id, self.revision
        )
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            id: Self::ALL_MINILM_L6_V2.to_string(),
            revision: "main".to_string(),
            files: [
                "config.json",
                "config_sentence_transformers.json",
                "modules.json",
                "sentence_bert_config.json",
                "tokenizer.json",
                "tokenizer_config.json",
                "special_tokens_map.json",
                "vocab.txt",
                "model.safetensors",
                "1_Pooling/config.json",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
        }
    }
}

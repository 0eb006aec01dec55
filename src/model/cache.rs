//! Hub cache inspection and prefetch

use super::ModelSpec;
use crate::progress::{ProgressEvent, ProgressHandler};
use hf_hub::api::sync::{ApiBuilder, ApiError};
use hf_hub::{Cache, Repo, RepoType};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(
        "Model cache for {model} is incomplete in {hub_dir}: missing {}",
        .missing.join(", ")
    )]
    Incomplete {
        model: String,
        hub_dir: PathBuf,
        missing: Vec<String>,
    },

    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize model hub client: {0}")]
    Client(#[source] ApiError),

    #[error("Failed to download {file} of {model}: {source}")]
    Download {
        model: String,
        file: String,
        #[source]
        source: ApiError,
    },
}

/// What an offline lookup found
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub model: String,
    pub revision: String,
    pub hub_dir: PathBuf,
    pub found: Vec<PathBuf>,
    pub missing: Vec<String>,
    pub total_bytes: u64,
}

impl CacheReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A model-hub cache directory (`$HF_HOME/hub`)
#[derive(Debug, Clone)]
pub struct ModelCache {
    hub_dir: PathBuf,
}

impl ModelCache {
    pub fn new(hub_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub_dir: hub_dir.into(),
        }
    }

    pub fn from_hf_home(hf_home: &Path) -> Self {
        Self::new(hf_home.join("hub"))
    }

    /// Cache of the current user, the same place the python hub client defaults to
    pub fn user_default() -> Self {
        let hf_home = dirs::cache_dir()
            .map(|d| d.join("huggingface"))
            .unwrap_or_else(|| PathBuf::from(".cache/huggingface"));
        Self::from_hf_home(&hf_home)
    }

    pub fn hub_dir(&self) -> &Path {
        &self.hub_dir
    }

    fn repo(spec: &ModelSpec) -> Repo {
        Repo::with_revision(spec.id.clone(), RepoType::Model, spec.revision.clone())
    }

    /// Looks every required file up in the cache without any network access
    pub fn inspect(&self, spec: &ModelSpec) -> CacheReport {
        let cache = Cache::new(self.hub_dir.clone());
        let repo = cache.repo(Self::repo(spec));

        let mut found = Vec::new();
        let mut missing = Vec::new();
        let mut total_bytes = 0;

        for file in &spec.files {
            match repo.get(file) {
                Some(path) => match std::fs::metadata(&path) {
                    Ok(meta) if meta.len() > 0 => {
                        total_bytes += meta.len();
                        found.push(path);
                    }
                    _ => missing.push(format!("{} (empty)", file)),
                },
                None => missing.push(file.clone()),
            }
        }

        debug!(
            model = %spec.id,
            found = found.len(),
            missing = missing.len(),
            "Inspected model cache"
        );

        CacheReport {
            model: spec.id.clone(),
            revision: spec.revision.clone(),
            hub_dir: self.hub_dir.clone(),
            found,
            missing,
            total_bytes,
        }
    }

    /// Like [`inspect`](Self::inspect) but an incomplete cache is an error
    pub fn verify(
        &self,
        spec: &ModelSpec,
        progress: &dyn ProgressHandler,
    ) -> Result<CacheReport, CacheError> {
        let report = self.inspect(spec);
        progress.on_progress(&ProgressEvent::CacheVerified {
            model: spec.id.clone(),
            complete: report.is_complete(),
        });

        if !report.is_complete() {
            return Err(CacheError::Incomplete {
                model: spec.id.clone(),
                hub_dir: self.hub_dir.clone(),
                missing: report.missing,
            });
        }
        Ok(report)
    }

    /// Downloads every required file into the cache
    ///
    /// Blocking; stops at the first failed download. Files already cached are not fetched
    /// again.
    pub fn prefetch(
        &self,
        spec: &ModelSpec,
        progress: &dyn ProgressHandler,
    ) -> Result<CacheReport, CacheError> {
        std::fs::create_dir_all(&self.hub_dir).map_err(|source| CacheError::CreateDir {
            path: self.hub_dir.clone(),
            source,
        })?;

        let api = ApiBuilder::new()
            .with_cache_dir(self.hub_dir.clone())
            .with_progress(false)
            .build()
            .map_err(CacheError::Client)?;
        let repo = api.repo(Self::repo(spec));

        let start = Instant::now();
        progress.on_progress(&ProgressEvent::PrefetchStarted {
            model: spec.id.clone(),
            files: spec.files.len(),
        });
        info!(
            "Prefetching {} ({} files) into {}",
            spec.id,
            spec.files.len(),
            self.hub_dir.display()
        );

        for file in &spec.files {
            let path = repo.get(file).map_err(|source| CacheError::Download {
                model: spec.id.clone(),
                file: file.clone(),
                source,
            })?;
            let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            progress.on_progress(&ProgressEvent::FileFetched {
                file: file.clone(),
                bytes,
            });
        }

        let report = self.inspect(spec);
        progress.on_progress(&ProgressEvent::PrefetchComplete {
            model: spec.id.clone(),
            total_bytes: report.total_bytes,
            duration: start.elapsed(),
        });

        if !report.is_complete() {
            return Err(CacheError::Incomplete {
                model: spec.id.clone(),
                hub_dir: self.hub_dir.clone(),
                missing: report.missing,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Lays out `files` the way the hub client stores a downloaded snapshot
    pub fn populate(hub_dir: &Path, spec: &ModelSpec, files: &[&str]) {
        let repo_dir = hub_dir.join(format!("models--{}", spec.id.replace('/', "--")));
        let commit = "0123456789abcdef0123456789abcdef01234567";

        std::fs::create_dir_all(repo_dir.join("refs")).unwrap();
        std::fs::write(repo_dir.join("refs").join(&spec.revision), commit).unwrap();

        let snapshot = repo_dir.join("snapshots").join(commit);
        for file in files {
            let path = snapshot.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"{}").unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::populate;
    use super::*;
    use crate::progress::NoOpHandler;
    use tempfile::TempDir;

    fn small_spec() -> ModelSpec {
        ModelSpec {
            files: vec![
                "config.json".to_string(),
                "model.safetensors".to_string(),
                "1_Pooling/config.json".to_string(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_cache_verifies() {
        let dir = TempDir::new().unwrap();
        let spec = small_spec();
        populate(
            dir.path(),
            &spec,
            &["config.json", "model.safetensors", "1_Pooling/config.json"],
        );

        let cache = ModelCache::new(dir.path());
        let report = cache.verify(&spec, &NoOpHandler).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.found.len(), 3);
        assert!(report.total_bytes > 0);
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let dir = TempDir::new().unwrap();
        let spec = small_spec();
        populate(dir.path(), &spec, &["config.json"]);

        let cache = ModelCache::new(dir.path());
        match cache.verify(&spec, &NoOpHandler) {
            Err(CacheError::Incomplete { missing, .. }) => {
                assert_eq!(missing.len(), 2);
                assert!(missing.contains(&"model.safetensors".to_string()));
            }
            other => panic!("Expected Incomplete, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_cache_dir() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::new(dir.path().join("hub"));
        let report = cache.inspect(&small_spec());
        assert!(!report.is_complete());
        assert_eq!(report.missing.len(), 3);
    }

    #[test]
    fn test_truncated_file_counts_as_missing() {
        let dir = TempDir::new().unwrap();
        let spec = small_spec();
        populate(
            dir.path(),
            &spec,
            &["config.json", "model.safetensors", "1_Pooling/config.json"],
        );

        let repo_dir = dir
            .path()
            .join("models--sentence-transformers--all-MiniLM-L6-v2");
        let snapshot = std::fs::read_dir(repo_dir.join("snapshots"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        std::fs::write(snapshot.join("model.safetensors"), b"").unwrap();

        let report = ModelCache::new(dir.path()).inspect(&spec);
        assert_eq!(report.missing, vec!["model.safetensors (empty)".to_string()]);
    }

    #[test]
    fn test_from_hf_home() {
        let cache = ModelCache::from_hf_home(Path::new("/home/app/.cache/huggingface"));
        assert_eq!(
            cache.hub_dir(),
            Path::new("/home/app/.cache/huggingface/hub")
        );
    }
}

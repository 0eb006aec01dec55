//! Deployment profile
//!
//! The profile (`boot.toml`) is the one place where values that must agree between the
//! image build and the running container are declared: the default listening port, the
//! health-check contract, the model identifier and cache roots, the non-root identity and
//! the dependency tiering. Both the plan renderer and the launcher read it, so the
//! Dockerfile's `HEALTHCHECK` and the launcher's port default can never drift apart.
//!
//! # Environment Variables
//!
//! - `BOOT_PROFILE`: Path to the profile file - default: "boot.toml"
//!
//! A missing profile file is not an error; the built-in defaults describe the
//! FindMyRepo API deployed on Render.
//!
//! # Example
//!
//! ```toml
//! [deploy]
//! target = "cloud-run"
//!
//! [model]
//! id = "sentence-transformers/all-MiniLM-L6-v2"
//! cache_policy = "require"
//! ```

use crate::health::HealthCheckPolicy;
use crate::identity::ExecutionIdentity;
use crate::model::{CachePolicy, ModelSpec};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const PROFILE_ENV_VAR: &str = "BOOT_PROFILE";
const DEFAULT_PROFILE_PATH: &str = "boot.toml";

/// Profile loading and validation errors
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse profile {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Deploy target 'custom' requires an explicit default_port")]
    MissingDefaultPort,

    #[error("Profile validation failed: {0}")]
    ValidationFailed(String),
}

/// Platform the image is deployed to; each carries its conventional port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeployTarget {
    #[default]
    Render,
    CloudRun,
    Custom,
}

impl DeployTarget {
    /// Port the platform routes to when the service does not choose one
    pub fn conventional_port(&self) -> Option<u16> {
        match self {
            DeployTarget::Render => Some(10000),
            DeployTarget::CloudRun => Some(8080),
            DeployTarget::Custom => None,
        }
    }
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployTarget::Render => write!(f, "render"),
            DeployTarget::CloudRun => write!(f, "cloud-run"),
            DeployTarget::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    /// Server program exec'd by the launcher
    pub server: String,
    /// ASGI application target passed to the server
    pub app: String,
    pub host: String,
    pub workers: u32,
    pub app_dir: PathBuf,
    /// Secrets that must be present before the server starts
    pub required_env: Vec<String>,
    pub env_file: Option<PathBuf>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "findmyrepo-api".to_string(),
            server: "uvicorn".to_string(),
            app: "main:app".to_string(),
            host: "0.0.0.0".to_string(),
            workers: 1,
            app_dir: PathBuf::from("/app"),
            required_env: vec!["GEMINI_API_KEY".to_string(), "WEAVIATE_API_KEY".to_string()],
            env_file: Some(PathBuf::from(".env")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeploySection {
    pub target: DeployTarget,
    pub default_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthcheckSection {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    pub retries: u32,
}

impl Default for HealthcheckSection {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_secs: 30,
            timeout_secs: 30,
            start_period_secs: 5,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub id: String,
    pub revision: String,
    pub files: Vec<String>,
    pub cache_policy: CachePolicy,
    /// Cache root in the runtime image (`HF_HOME`)
    pub hf_home: PathBuf,
    /// Cache root used while assembling the build stage
    pub build_cache: PathBuf,
}

impl Default for ModelSection {
    fn default() -> Self {
        let spec = ModelSpec::default();
        Self {
            id: spec.id,
            revision: spec.revision,
            files: spec.files,
            cache_policy: CachePolicy::default(),
            hf_home: PathBuf::from("/home/app/.cache/huggingface"),
            build_cache: PathBuf::from("/opt/hf-cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub builder_image: String,
    pub runtime_image: String,
    pub launcher_image: String,
    /// Directory of this crate inside the docker build context
    pub launcher_source: String,
    pub venv: PathBuf,
    pub toolchain_packages: Vec<String>,
    pub runtime_packages: Vec<String>,
    pub installer_packages: Vec<String>,
    pub manifest: PathBuf,
    pub heavy_packages: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            builder_image: "python:3.11-slim".to_string(),
            runtime_image: "python:3.11-slim".to_string(),
            launcher_image: "rust:1.83-slim".to_string(),
            launcher_source: "boot".to_string(),
            venv: PathBuf::from("/opt/venv"),
            toolchain_packages: vec![
                "build-essential".to_string(),
                "gcc".to_string(),
                "g++".to_string(),
            ],
            runtime_packages: vec!["ca-certificates".to_string()],
            installer_packages: vec![
                "pip".to_string(),
                "setuptools".to_string(),
                "wheel".to_string(),
            ],
            manifest: PathBuf::from("requirements.txt"),
            heavy_packages: vec![
                "google-genai".to_string(),
                "sentence-transformers".to_string(),
                "huggingface-hub".to_string(),
                "weaviate-client".to_string(),
                "torch".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    /// Refuse to launch as root and check ownership of app and cache dirs
    pub enforce: bool,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            user: "app".to_string(),
            group: "app".to_string(),
            uid: 1000,
            gid: 1000,
            enforce: true,
        }
    }
}

/// Parsed `boot.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeployProfile {
    pub service: ServiceSection,
    pub deploy: DeploySection,
    pub healthcheck: HealthcheckSection,
    pub model: ModelSection,
    pub build: BuildSection,
    pub identity: IdentitySection,
}

impl DeployProfile {
    /// Loads the profile at `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        if !path.exists() {
            debug!(path = %path.display(), "Profile not found, using built-in defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Path named by `BOOT_PROFILE`, or `boot.toml` in the working directory
    pub fn path_from_env() -> PathBuf {
        env::var(PROFILE_ENV_VAR)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_PATH))
    }

    pub fn from_env() -> Result<Self, ProfileError> {
        Self::load(&Self::path_from_env())
    }

    /// Default listening port: the explicit override, else the target's convention
    pub fn default_port(&self) -> Result<u16, ProfileError> {
        match self.deploy.default_port {
            Some(port) => Ok(port),
            None => self
                .deploy
                .target
                .conventional_port()
                .ok_or(ProfileError::MissingDefaultPort),
        }
    }

    pub fn health_policy(&self) -> HealthCheckPolicy {
        HealthCheckPolicy {
            path: self.healthcheck.path.clone(),
            interval: Duration::from_secs(self.healthcheck.interval_secs),
            timeout: Duration::from_secs(self.healthcheck.timeout_secs),
            start_period: Duration::from_secs(self.healthcheck.start_period_secs),
            retries: self.healthcheck.retries,
        }
    }

    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            id: self.model.id.clone(),
            revision: self.model.revision.clone(),
            files: self.model.files.clone(),
        }
    }

    pub fn execution_identity(&self) -> ExecutionIdentity {
        ExecutionIdentity {
            user: self.identity.user.clone(),
            group: self.identity.group.clone(),
            uid: self.identity.uid,
            gid: self.identity.gid,
        }
    }

    /// Validates cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ProfileError` for the first violated constraint
    pub fn validate(&self) -> Result<(), ProfileError> {
        let port = self.default_port()?;
        if port == 0 {
            return Err(ProfileError::ValidationFailed(
                "default_port must be between 1 and 65535".to_string(),
            ));
        }

        // Concurrency is scaled by replica count, never by in-process workers
        if self.service.workers != 1 {
            return Err(ProfileError::ValidationFailed(format!(
                "service.workers must be 1, got {}",
                self.service.workers
            )));
        }
        if self.service.server.trim().is_empty() || self.service.app.trim().is_empty() {
            return Err(ProfileError::ValidationFailed(
                "service.server and service.app cannot be empty".to_string(),
            ));
        }

        if !self.healthcheck.path.starts_with('/') {
            return Err(ProfileError::ValidationFailed(format!(
                "healthcheck.path must start with '/', got '{}'",
                self.healthcheck.path
            )));
        }
        if self.healthcheck.interval_secs == 0 || self.healthcheck.timeout_secs == 0 {
            return Err(ProfileError::ValidationFailed(
                "healthcheck interval and timeout must be at least 1 second".to_string(),
            ));
        }
        if self.healthcheck.retries == 0 {
            return Err(ProfileError::ValidationFailed(
                "healthcheck.retries must be at least 1".to_string(),
            ));
        }

        if self.model.id.trim().is_empty() {
            return Err(ProfileError::ValidationFailed(
                "model.id cannot be empty".to_string(),
            ));
        }
        if self.model.files.is_empty() {
            return Err(ProfileError::ValidationFailed(
                "model.files must list at least one file".to_string(),
            ));
        }
        if !self.model.hf_home.is_absolute() || !self.model.build_cache.is_absolute() {
            return Err(ProfileError::ValidationFailed(
                "model.hf_home and model.build_cache must be absolute paths".to_string(),
            ));
        }
        if !self.build.venv.is_absolute() {
            return Err(ProfileError::ValidationFailed(
                "build.venv must be an absolute path".to_string(),
            ));
        }

        if self.identity.uid == 0 || self.identity.gid == 0 {
            return Err(ProfileError::ValidationFailed(
                "identity uid/gid must not be 0".to_string(),
            ));
        }
        if self.identity.user == "root" {
            return Err(ProfileError::ValidationFailed(
                "identity.user must not be root".to_string(),
            ));
        }

        Ok(())
    }
}

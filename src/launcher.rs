//! Container entrypoint
//!
//! Runs the startup checks in a fixed order and then replaces this process with the
//! ASGI server, so the server receives signals directly from the container runtime.
//! Every check fails fast; nothing is retried.
//!
//! 1. Load the deployment profile and the optional dotenv file (existing variables win,
//!    and the file never sets the port)
//! 2. Build [`BootConfig`], which resolves the port exactly once
//! 3. Require the declared uid and check ownership of the app and cache directories
//! 4. Verify the model cache according to [`CachePolicy`]
//! 5. Check required secrets
//! 6. `exec` the server with a single worker on the resolved port

use crate::config::{BootConfig, ConfigError, BAKED_DEFAULT_PORT_VAR, HF_HOME_VAR, PORT_VAR};
use crate::identity::{self, IdentityError};
use crate::model::{CacheError, CachePolicy, ModelCache};
use crate::profile::{DeployProfile, ProfileError};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::env;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Failed to exec {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Whether the failure is a configuration problem rather than a runtime one
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LaunchError::Profile(_)
                | LaunchError::Config(_)
                | LaunchError::EnvFile { .. }
                | LaunchError::MissingEnv(_)
        )
    }
}

/// Fully resolved server invocation
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl ServerCommand {
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        command
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.env {
            write!(f, "{}={} ", k, v)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Port variables only the container environment may set; the image healthcheck never
/// sees the dotenv file
const CONTAINER_ONLY_VARS: [&str; 2] = [PORT_VAR, BAKED_DEFAULT_PORT_VAR];

/// Loads the profile's dotenv file if it exists; returns the path that was loaded
///
/// Variables already present in the environment are left untouched, and port variables
/// in the file are ignored.
pub fn load_env_file(profile: &DeployProfile) -> Result<Option<PathBuf>, LaunchError> {
    let Some(path) = profile.service.env_file.as_ref() else {
        return Ok(None);
    };
    if !path.is_file() {
        debug!(path = %path.display(), "No environment file");
        return Ok(None);
    }

    let env_file_error = |source| LaunchError::EnvFile {
        path: path.clone(),
        source,
    };
    let mut loaded = 0usize;
    for entry in dotenvy::from_path_iter(path).map_err(env_file_error)? {
        let (key, value) = entry.map_err(env_file_error)?;
        if CONTAINER_ONLY_VARS.contains(&key.as_str()) {
            warn!(
                path = %path.display(),
                "Ignoring {} from environment file; set it in the container environment",
                key
            );
            continue;
        }
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            loaded += 1;
        }
    }
    info!("Loaded {} variables from {}", loaded, path.display());
    Ok(Some(path.clone()))
}

pub struct Launcher {
    config: BootConfig,
    progress: Arc<dyn ProgressHandler>,
    uid_source: fn() -> Result<u32, IdentityError>,
}

impl Launcher {
    pub fn new(config: BootConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoOpHandler),
            uid_source: identity::current_uid,
        }
    }

    /// Loads profile, dotenv file and environment in startup order
    pub fn from_env() -> Result<Self, LaunchError> {
        let profile = DeployProfile::from_env()?;
        Self::from_profile(&profile)
    }

    pub fn from_profile(profile: &DeployProfile) -> Result<Self, LaunchError> {
        load_env_file(profile)?;
        let config = BootConfig::from_env(profile)?;
        Ok(Self::new(config))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    fn with_uid_source(mut self, uid_source: fn() -> Result<u32, IdentityError>) -> Self {
        self.uid_source = uid_source;
        self
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    fn check_identity(&self) -> Result<(), LaunchError> {
        if !self.config.enforce_identity {
            debug!("Identity enforcement disabled");
            return Ok(());
        }

        let uid = (self.uid_source)()?;
        self.config.identity.ensure_running_as(uid)?;

        for dir in [&self.config.app_dir, &self.config.hf_home] {
            if dir.exists() {
                self.config.identity.check_ownership(dir)?;
            }
        }
        debug!(identity = %self.config.identity, "Execution identity verified");
        Ok(())
    }

    fn check_model_cache(&self) -> Result<(), LaunchError> {
        let cache = ModelCache::from_hf_home(&self.config.hf_home);
        match self.config.cache_policy {
            CachePolicy::Require => {
                let report = cache.verify(&self.config.model, self.progress.as_ref())?;
                info!(
                    model = %report.model,
                    files = report.found.len(),
                    bytes = report.total_bytes,
                    "Model cache verified"
                );
            }
            CachePolicy::Fetch => {
                let report = cache.inspect(&self.config.model);
                self.progress.on_progress(&ProgressEvent::CacheVerified {
                    model: report.model.clone(),
                    complete: report.is_complete(),
                });
                if !report.is_complete() {
                    warn!(
                        model = %report.model,
                        missing = %report.missing.join(", "),
                        "Model cache incomplete; the runtime will download on first use"
                    );
                }
            }
        }
        Ok(())
    }

    fn check_required_env(&self) -> Result<(), LaunchError> {
        let missing = self.config.missing_required_env();
        if !missing.is_empty() {
            return Err(LaunchError::MissingEnv(missing.to_vec()));
        }
        Ok(())
    }

    /// The server invocation for the resolved configuration, without any checks
    pub fn server_command(&self) -> ServerCommand {
        let config = &self.config;
        let mut env = BTreeMap::new();
        env.insert(PORT_VAR.to_string(), config.port.port.to_string());
        env.insert(HF_HOME_VAR.to_string(), config.hf_home.display().to_string());
        env.insert(
            "SENTENCE_TRANSFORMERS_HOME".to_string(),
            config.hub_cache_dir().display().to_string(),
        );
        if config.cache_policy == CachePolicy::Require {
            env.insert("HF_HUB_OFFLINE".to_string(), "1".to_string());
            env.insert("TRANSFORMERS_OFFLINE".to_string(), "1".to_string());
        }

        ServerCommand {
            program: config.server.clone(),
            args: vec![
                config.app.clone(),
                "--host".to_string(),
                config.host.clone(),
                "--port".to_string(),
                config.port.port.to_string(),
                "--workers".to_string(),
                config.workers.to_string(),
            ],
            env,
        }
    }

    /// Runs every startup check and returns the command that would be executed
    pub fn prepare(&self) -> Result<ServerCommand, LaunchError> {
        self.check_identity()?;
        self.check_model_cache()?;
        self.check_required_env()?;
        Ok(self.server_command())
    }

    /// Replaces this process with the server; only returns on failure
    pub fn launch(&self) -> Result<Infallible, LaunchError> {
        let command = self.prepare()?;

        self.progress.on_progress(&ProgressEvent::Launching {
            program: command.program.clone(),
            port: self.config.port.port,
        });
        info!(
            "Starting {} on {} (health {})",
            command.program,
            self.config.bind_address(),
            self.config.health_url()
        );

        let source = command.to_command().exec();
        Err(LaunchError::Exec {
            program: command.program,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::populate;
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn profile(hf_home: &Path, app_dir: &Path) -> DeployProfile {
        let mut profile = DeployProfile::default();
        profile.model.hf_home = hf_home.to_path_buf();
        profile.service.app_dir = app_dir.to_path_buf();
        profile.identity.enforce = false;
        profile
    }

    fn config(profile: &DeployProfile, vars: &[(&str, &str)]) -> BootConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BootConfig::from_source(profile, |k| vars.get(k).cloned()).unwrap()
    }

    const SECRETS: [(&str, &str); 2] = [("GEMINI_API_KEY", "g"), ("WEAVIATE_API_KEY", "w")];

    fn populated_home() -> TempDir {
        let dir = TempDir::new().unwrap();
        let spec = DeployProfile::default().model_spec();
        let files: Vec<&str> = spec.files.iter().map(String::as_str).collect();
        populate(&dir.path().join("hub"), &spec, &files);
        dir
    }

    #[test]
    fn test_port_flows_into_command() {
        let home = populated_home();
        let profile = profile(home.path(), home.path());
        let mut vars = SECRETS.to_vec();
        vars.push(("PORT", "3000"));

        let launcher = Launcher::new(config(&profile, &vars));
        let command = launcher.prepare().unwrap();

        assert_eq!(command.program, "uvicorn");
        assert_eq!(
            command.args,
            vec!["main:app", "--host", "0.0.0.0", "--port", "3000", "--workers", "1"]
        );
        assert_eq!(command.env.get("PORT").map(String::as_str), Some("3000"));
        assert_eq!(launcher.config().health_url(), "http://127.0.0.1:3000/health");
    }

    #[test]
    fn test_default_port_on_cloud_run() {
        let home = populated_home();
        let mut profile = profile(home.path(), home.path());
        profile.deploy.target = crate::profile::DeployTarget::CloudRun;

        let command = Launcher::new(config(&profile, &SECRETS)).prepare().unwrap();
        assert!(command.args.windows(2).any(|w| w == ["--port", "8080"]));
    }

    #[test]
    fn test_missing_cache_fails_under_require() {
        let home = TempDir::new().unwrap();
        let profile = profile(home.path(), home.path());
        let result = Launcher::new(config(&profile, &SECRETS)).prepare();
        assert!(matches!(
            result,
            Err(LaunchError::Cache(CacheError::Incomplete { .. }))
        ));
    }

    #[test]
    fn test_missing_cache_tolerated_under_fetch() {
        let home = TempDir::new().unwrap();
        let mut profile = profile(home.path(), home.path());
        profile.model.cache_policy = CachePolicy::Fetch;

        let command = Launcher::new(config(&profile, &SECRETS)).prepare().unwrap();
        assert!(!command.env.contains_key("HF_HUB_OFFLINE"));
    }

    #[test]
    fn test_offline_flags_under_require() {
        let home = populated_home();
        let profile = profile(home.path(), home.path());
        let command = Launcher::new(config(&profile, &SECRETS)).prepare().unwrap();
        assert_eq!(command.env.get("HF_HUB_OFFLINE").map(String::as_str), Some("1"));
        assert_eq!(
            command.env.get("SENTENCE_TRANSFORMERS_HOME"),
            Some(&home.path().join("hub").display().to_string())
        );
    }

    #[test]
    fn test_missing_secrets() {
        let home = populated_home();
        let profile = profile(home.path(), home.path());
        let result = Launcher::new(config(&profile, &[("GEMINI_API_KEY", "g")])).prepare();
        match result {
            Err(LaunchError::MissingEnv(missing)) => {
                assert_eq!(missing, vec!["WEAVIATE_API_KEY".to_string()])
            }
            other => panic!("Expected MissingEnv, got {:?}", other),
        }
    }

    #[test]
    fn test_root_refused_when_enforced() {
        let home = populated_home();
        let mut profile = profile(home.path(), home.path());
        profile.identity.enforce = true;

        let launcher = Launcher::new(config(&profile, &SECRETS)).with_uid_source(|| Ok(0));
        assert!(matches!(
            launcher.prepare(),
            Err(LaunchError::Identity(IdentityError::Privileged { .. }))
        ));
    }

    #[test]
    fn test_foreign_uid_refused_when_enforced() {
        let home = populated_home();
        let mut profile = profile(home.path(), home.path());
        profile.identity.enforce = true;
        profile.identity.uid = 1000;

        let launcher = Launcher::new(config(&profile, &SECRETS)).with_uid_source(|| Ok(4321));
        assert!(matches!(
            launcher.prepare(),
            Err(LaunchError::Identity(IdentityError::WrongUser { actual: 4321, .. }))
        ));
    }

    #[test]
    fn test_ownership_checked_when_enforced() {
        let home = populated_home();
        let mut profile = profile(home.path(), home.path());
        profile.identity.enforce = true;
        // Nobody in a test environment owns the temp dir under this uid
        profile.identity.uid = 54321;

        let launcher = Launcher::new(config(&profile, &SECRETS)).with_uid_source(|| Ok(54321));
        assert!(matches!(
            launcher.prepare(),
            Err(LaunchError::Identity(IdentityError::OwnershipMismatch { .. }))
        ));
    }

    #[test]
    fn test_config_error_classification() {
        assert!(LaunchError::MissingEnv(vec!["X".to_string()]).is_config_error());
        assert!(!LaunchError::Exec {
            program: "uvicorn".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .is_config_error());
    }

    #[test]
    fn test_exec_missing_program() {
        let home = populated_home();
        let mut profile = profile(home.path(), home.path());
        profile.service.server = "/nonexistent/uvicorn".to_string();

        let result = Launcher::new(config(&profile, &SECRETS)).launch();
        assert!(matches!(result, Err(LaunchError::Exec { .. })));
    }

    #[test]
    fn test_command_display() {
        let home = populated_home();
        let profile = profile(home.path(), home.path());
        let text = Launcher::new(config(&profile, &SECRETS))
            .server_command()
            .to_string();
        assert!(text.contains("uvicorn main:app --host 0.0.0.0 --port 10000 --workers 1"));
    }
}

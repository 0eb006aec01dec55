//! Runtime configuration for the launcher
//!
//! `BootConfig` is built once at process start from the deployment profile and the process
//! environment, validated, and then treated as immutable. The listening port is resolved
//! here and nowhere else: the bind address and the health-check target both derive from
//! the same [`PortBinding`].
//!
//! # Environment Variables
//!
//! - `PORT`: Listening port (1-65535) - default: the profile's default port
//! - `BOOT_DEFAULT_PORT`: Default port baked into the image at build time; when present it
//!   must equal the profile's default port
//! - `HF_HOME`: Model-hub cache root - default: the profile's `model.hf_home`
//!
//! # Example
//!
//! ```no_run
//! use findmyrepo_boot::{BootConfig, DeployProfile};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = DeployProfile::from_env()?;
//! let config = BootConfig::from_env(&profile)?;
//! println!("binding {}", config.bind_address());
//! # Ok(())
//! # }
//! ```

use crate::health::HealthCheckPolicy;
use crate::identity::ExecutionIdentity;
use crate::model::{CachePolicy, ModelSpec};
use crate::profile::{DeployProfile, ProfileError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub const PORT_VAR: &str = "PORT";
pub const BAKED_DEFAULT_PORT_VAR: &str = "BOOT_DEFAULT_PORT";
pub const HF_HOME_VAR: &str = "HF_HOME";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// PORT is set but is not a usable port number
    #[error("Invalid PORT value '{value}': {reason}")]
    InvalidPort { value: String, reason: String },

    /// The image's baked default port disagrees with the profile
    #[error(
        "Default port mismatch: image declares {baked} but profile resolves {profile}; \
         rebuild the image or fix the profile"
    )]
    DefaultPortMismatch { baked: u16, profile: u16 },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Where the resolved port came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSource {
    Environment,
    Default,
}

/// The port the server binds, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub port: u16,
    pub source: PortSource,
}

/// Resolves the listening port from the raw `PORT` value
///
/// Unset or blank values fall back to `default`. Anything else must be an integer in
/// 1..=65535.
pub fn resolve_port(raw: Option<&str>, default: u16) -> Result<PortBinding, ConfigError> {
    let value = match raw.map(str::trim) {
        None | Some("") => {
            return Ok(PortBinding {
                port: default,
                source: PortSource::Default,
            })
        }
        Some(v) => v,
    };

    // Digits only: `u32::from_str` would also take a leading '+'
    let parsed: u32 = value
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| value.parse().ok())
        .flatten()
        .ok_or_else(|| ConfigError::InvalidPort {
            value: value.to_string(),
            reason: "not a positive integer".to_string(),
        })?;

    if parsed == 0 || parsed > u16::MAX as u32 {
        return Err(ConfigError::InvalidPort {
            value: value.to_string(),
            reason: "must be between 1 and 65535".to_string(),
        });
    }

    Ok(PortBinding {
        port: parsed as u16,
        source: PortSource::Environment,
    })
}

/// Validated launcher configuration
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub service_name: String,
    pub server: String,
    pub app: String,
    pub host: String,
    pub workers: u32,
    pub port: PortBinding,
    pub default_port: u16,
    pub health: HealthCheckPolicy,
    pub model: ModelSpec,
    pub cache_policy: CachePolicy,
    pub hf_home: PathBuf,
    pub app_dir: PathBuf,
    pub identity: ExecutionIdentity,
    pub enforce_identity: bool,
    pub required_env: Vec<String>,
    missing_env: Vec<String>,
}

impl BootConfig {
    /// Builds the configuration from the process environment
    pub fn from_env(profile: &DeployProfile) -> Result<Self, ConfigError> {
        Self::from_source(profile, |key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Fails on an invalid profile, a malformed `PORT`, or a baked default port that
    /// disagrees with the profile.
    pub fn from_source<F>(profile: &DeployProfile, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        profile.validate()?;
        let default_port = profile.default_port()?;

        if let Some(baked) = lookup(BAKED_DEFAULT_PORT_VAR).filter(|v| !v.trim().is_empty()) {
            let baked: u16 = baked.trim().parse().map_err(|e| ConfigError::ParseError {
                field: BAKED_DEFAULT_PORT_VAR.to_string(),
                error: format!("{}", e),
            })?;
            if baked != default_port {
                return Err(ConfigError::DefaultPortMismatch {
                    baked,
                    profile: default_port,
                });
            }
        }

        let port = resolve_port(lookup(PORT_VAR).as_deref(), default_port)?;

        let hf_home = lookup(HF_HOME_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| profile.model.hf_home.clone());

        let missing_env = profile
            .service
            .required_env
            .iter()
            .filter(|key| lookup(key.as_str()).map_or(true, |v| v.trim().is_empty()))
            .cloned()
            .collect();

        Ok(Self {
            service_name: profile.service.name.clone(),
            server: profile.service.server.clone(),
            app: profile.service.app.clone(),
            host: profile.service.host.clone(),
            workers: profile.service.workers,
            port,
            default_port,
            health: profile.health_policy(),
            model: profile.model_spec(),
            cache_policy: profile.model.cache_policy,
            hf_home,
            app_dir: profile.service.app_dir.clone(),
            identity: profile.execution_identity(),
            enforce_identity: profile.identity.enforce,
            required_env: profile.service.required_env.clone(),
            missing_env,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port.port)
    }

    /// Health endpoint on the resolved port, as the platform probes it from inside the container
    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port.port, self.health.path)
    }

    /// Model-hub cache directory (`$HF_HOME/hub`)
    pub fn hub_cache_dir(&self) -> PathBuf {
        self.hf_home.join("hub")
    }

    /// Required variables that were unset or blank at startup
    pub fn missing_required_env(&self) -> &[String] {
        &self.missing_env
    }

    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();

        map.insert("service".to_string(), self.service_name.clone());
        map.insert("server".to_string(), self.server.clone());
        map.insert("app".to_string(), self.app.clone());
        map.insert("bind_address".to_string(), self.bind_address());
        map.insert(
            "port_source".to_string(),
            format!("{:?}", self.port.source).to_lowercase(),
        );
        map.insert("default_port".to_string(), self.default_port.to_string());
        map.insert("workers".to_string(), self.workers.to_string());
        map.insert("health_url".to_string(), self.health_url());
        map.insert("model".to_string(), self.model.id.clone());
        map.insert("cache_policy".to_string(), self.cache_policy.to_string());
        map.insert("hf_home".to_string(), self.hf_home.display().to_string());
        map.insert("identity".to_string(), self.identity.to_string());
        if !self.missing_env.is_empty() {
            map.insert("missing_env".to_string(), self.missing_env.join(","));
        }

        map
    }
}

impl fmt::Display for BootConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Launcher Configuration:")?;
        writeln!(f, "  Service: {}", self.service_name)?;
        writeln!(f, "  Server: {} {}", self.server, self.app)?;
        writeln!(
            f,
            "  Bind: {} ({})",
            self.bind_address(),
            match self.port.source {
                PortSource::Environment => "from PORT",
                PortSource::Default => "default",
            }
        )?;
        writeln!(f, "  Workers: {}", self.workers)?;
        writeln!(f, "  Health: {}", self.health_url())?;
        writeln!(f, "  Model: {} ({})", self.model.id, self.cache_policy)?;
        writeln!(f, "  Cache: {}", self.hf_home.display())?;
        writeln!(f, "  Identity: {}", self.identity)?;
        if !self.missing_env.is_empty() {
            writeln!(f, "  Missing: {}", self.missing_env.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::DeployTarget;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_resolve_port_unset_uses_default() {
        let binding = resolve_port(None, 10000).unwrap();
        assert_eq!(binding.port, 10000);
        assert_eq!(binding.source, PortSource::Default);
    }

    #[test]
    fn test_resolve_port_empty_uses_default() {
        assert_eq!(resolve_port(Some(""), 8080).unwrap().port, 8080);
        assert_eq!(resolve_port(Some("   "), 8080).unwrap().port, 8080);
    }

    #[test]
    fn test_resolve_port_from_env() {
        let binding = resolve_port(Some("3000"), 10000).unwrap();
        assert_eq!(binding.port, 3000);
        assert_eq!(binding.source, PortSource::Environment);
    }

    #[test]
    fn test_resolve_port_rejects_garbage() {
        for raw in ["abc", "-1", "0", "65536", "80.5", "3000abc", "+3000", "99999999999"] {
            let result = resolve_port(Some(raw), 10000);
            assert!(
                matches!(result, Err(ConfigError::InvalidPort { .. })),
                "expected {} to be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_resolve_port_bounds() {
        assert_eq!(resolve_port(Some("1"), 10000).unwrap().port, 1);
        assert_eq!(resolve_port(Some("65535"), 10000).unwrap().port, 65535);
    }

    #[test]
    fn test_port_drives_bind_and_health() {
        let profile = DeployProfile::default();
        let config = BootConfig::from_source(&profile, lookup_from(&[("PORT", "3000")])).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.health_url(), "http://127.0.0.1:3000/health");
    }

    #[test]
    fn test_cloud_run_unset_port_binds_8080() {
        let mut profile = DeployProfile::default();
        profile.deploy.target = DeployTarget::CloudRun;

        let config = BootConfig::from_source(&profile, lookup_from(&[])).unwrap();
        assert_eq!(config.port.port, 8080);
        assert_eq!(config.port.source, PortSource::Default);
    }

    #[test]
    fn test_baked_default_must_match_profile() {
        let profile = DeployProfile::default();
        let result =
            BootConfig::from_source(&profile, lookup_from(&[("BOOT_DEFAULT_PORT", "8080")]));

        match result {
            Err(ConfigError::DefaultPortMismatch { baked, profile }) => {
                assert_eq!(baked, 8080);
                assert_eq!(profile, 10000);
            }
            other => panic!("Expected DefaultPortMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_baked_default_matching_is_accepted() {
        let profile = DeployProfile::default();
        let config =
            BootConfig::from_source(&profile, lookup_from(&[("BOOT_DEFAULT_PORT", "10000")]))
                .unwrap();
        assert_eq!(config.port.port, 10000);
    }

    #[test]
    fn test_missing_required_env() {
        let profile = DeployProfile::default();
        let config =
            BootConfig::from_source(&profile, lookup_from(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert_eq!(config.missing_required_env(), &["WEAVIATE_API_KEY".to_string()]);
    }

    #[test]
    fn test_hf_home_env_overrides_profile() {
        let profile = DeployProfile::default();
        let config =
            BootConfig::from_source(&profile, lookup_from(&[("HF_HOME", "/data/hf")])).unwrap();
        assert_eq!(config.hub_cache_dir(), PathBuf::from("/data/hf/hub"));
    }

    #[test]
    fn test_config_display() {
        let profile = DeployProfile::default();
        let config = BootConfig::from_source(&profile, lookup_from(&[])).unwrap();
        let display = format!("{}", config);
        assert!(display.contains("Launcher Configuration:"));
        assert!(display.contains("0.0.0.0:10000"));
    }
}

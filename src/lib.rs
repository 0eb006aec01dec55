//! findmyrepo-boot - image build plan and container launcher for the FindMyRepo API
//!
//! The FindMyRepo search API is a Python ASGI service that needs a generative-AI key, a
//! vector-database connection and a locally cached sentence-embedding model. This crate
//! produces the multi-stage image that packages it and is the process that starts it inside
//! the container.
//!
//! # Core Concepts
//!
//! - **Deployment profile**: `boot.toml`, the single declaration of everything the build
//!   and the running container must agree on (default port, health check, model, identity)
//! - **Dependency tiers**: light packages install before heavy ones so that routine edits
//!   keep the expensive layers cached
//! - **Build plan**: typed stages and instructions, validated and rendered to a Dockerfile
//! - **Launcher**: resolves the port once, checks identity, cache and secrets, then `exec`s
//!   the server with a single worker
//!
//! # Example Usage
//!
//! ```no_run
//! use findmyrepo_boot::{Assembler, DependencyManifest, DeployProfile};
//! use findmyrepo_boot::plan::dockerfile;
//!
//! # fn main() -> anyhow::Result<()> {
//! let profile = DeployProfile::from_env()?;
//! let manifest =
//!     DependencyManifest::load(&profile.build.manifest, &profile.build.heavy_packages)?;
//! let plan = Assembler::new(&profile, &manifest).assemble()?;
//! println!("{}", dockerfile::render(&plan));
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod health;
pub mod identity;
pub mod launcher;
pub mod manifest;
pub mod model;
pub mod plan;
pub mod profile;
pub mod progress;
pub mod util;

pub use config::{resolve_port, BootConfig, ConfigError, PortBinding, PortSource};
pub use health::{HealthCheckPolicy, HealthMonitor, HealthProber, HealthStatus, ProbeOutcome};
pub use identity::{ExecutionIdentity, IdentityError};
pub use launcher::{LaunchError, Launcher, ServerCommand};
pub use manifest::{DependencyManifest, ManifestError, Requirement, Tier};
pub use model::{CacheError, CachePolicy, CacheReport, ModelCache, ModelSpec};
pub use plan::{Assembler, BuildPlan, Instruction, RuntimeImage, Stage, StepKind};
pub use profile::{DeployProfile, DeployTarget, ProfileError};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name, also the launcher binary name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_binary_name() {
        assert_eq!(NAME, "findmyrepo-boot");
    }
}

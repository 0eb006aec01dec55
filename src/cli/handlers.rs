//! Command handlers
//!
//! Each handler returns the process exit code: 0 on success, [`EXIT_FAILURE`] when the
//! operation itself failed and [`EXIT_CONFIG`] when configuration was invalid.

use super::commands::{
    CacheArgs, ConfigArgs, LaunchArgs, LayersArgs, PlanArgs, PlanFormatArg, ProbeArgs,
};
use super::output::OutputFormatter;
use super::{EXIT_CONFIG, EXIT_FAILURE};
use crate::config::{BootConfig, HF_HOME_VAR};
use crate::health::{HealthProber, HealthStatus};
use crate::launcher::{load_env_file, Launcher};
use crate::manifest::DependencyManifest;
use crate::model::ModelCache;
use crate::plan::{dockerfile, Assembler, BuildPlan};
use crate::profile::DeployProfile;
use crate::progress::{LoggingHandler, ProgressEvent, ProgressHandler};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

fn load_profile(path: Option<&Path>) -> Result<DeployProfile> {
    let profile = match path {
        Some(path) => DeployProfile::load(path)?,
        None => DeployProfile::from_env()?,
    };
    profile.validate().context("Invalid deployment profile")?;
    Ok(profile)
}

fn emit(output: &str, file: Option<&PathBuf>) -> Result<()> {
    match file {
        Some(path) => {
            std::fs::write(path, output)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", output),
    }
    Ok(())
}

fn config_failure(e: anyhow::Error) -> i32 {
    error!("{:#}", e);
    eprintln!("Error: {:#}", e);
    EXIT_CONFIG
}

fn failure(e: anyhow::Error) -> i32 {
    error!("{:#}", e);
    eprintln!("Error: {:#}", e);
    EXIT_FAILURE
}

fn assemble_plan(profile: &DeployProfile, manifest: Option<&PathBuf>) -> Result<BuildPlan> {
    let manifest_path = manifest.unwrap_or(&profile.build.manifest);
    let manifest = DependencyManifest::load(manifest_path, &profile.build.heavy_packages)
        .with_context(|| format!("Invalid requirements file {}", manifest_path.display()))?;
    debug!(
        requirements = manifest.requirements().len(),
        explicit_tiers = manifest.has_explicit_tiers(),
        "Loaded manifest"
    );
    Assembler::new(profile, &manifest).assemble()
}

pub fn handle_plan(args: &PlanArgs, profile_path: Option<&Path>) -> i32 {
    let plan = load_profile(profile_path)
        .and_then(|profile| assemble_plan(&profile, args.manifest.as_ref()));
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => return config_failure(e),
    };

    LoggingHandler.on_progress(&ProgressEvent::PlanRendered {
        stages: plan.stages.len(),
        instructions: plan.instruction_count(),
    });

    let rendered = match args.format {
        PlanFormatArg::Dockerfile => Ok(dockerfile::render(&plan)),
        PlanFormatArg::Json => plan.to_json().map(|s| s + "\n"),
        PlanFormatArg::Yaml => plan.to_yaml(),
        PlanFormatArg::Human => Ok(plan.to_string()),
    };

    match rendered.and_then(|text| emit(&text, args.output.as_ref())) {
        Ok(()) => 0,
        Err(e) => failure(e),
    }
}

pub fn handle_layers(args: &LayersArgs, profile_path: Option<&Path>) -> i32 {
    let plan = load_profile(profile_path)
        .and_then(|profile| assemble_plan(&profile, args.manifest.as_ref()));
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => return config_failure(e),
    };

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_layers(&plan.layer_keys()) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => failure(e),
    }
}

/// Explicit directory, else `$HF_HOME/hub`, else the user's default hub cache
fn resolve_cache(cache_dir: Option<&PathBuf>) -> ModelCache {
    if let Some(dir) = cache_dir {
        return ModelCache::new(dir);
    }
    match env::var(HF_HOME_VAR) {
        Ok(home) if !home.trim().is_empty() => ModelCache::from_hf_home(Path::new(&home)),
        _ => ModelCache::user_default(),
    }
}

pub async fn handle_prefetch(args: &CacheArgs, profile_path: Option<&Path>) -> i32 {
    let profile = match load_profile(profile_path) {
        Ok(p) => p,
        Err(e) => return config_failure(e),
    };

    let cache = resolve_cache(args.cache_dir.as_ref());
    let spec = profile.model_spec();
    let progress: Arc<dyn ProgressHandler> = Arc::new(LoggingHandler);

    let result = tokio::task::spawn_blocking(move || cache.prefetch(&spec, progress.as_ref()))
        .await
        .context("Prefetch task panicked")
        .and_then(|r| r.map_err(anyhow::Error::from));

    let formatter = OutputFormatter::new(args.format.into());
    match result.and_then(|report| formatter.format_cache_report(&report)) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => failure(e),
    }
}

pub fn handle_verify(args: &CacheArgs, profile_path: Option<&Path>) -> i32 {
    let profile = match load_profile(profile_path) {
        Ok(p) => p,
        Err(e) => return config_failure(e),
    };

    let cache = resolve_cache(args.cache_dir.as_ref());
    let report = cache.inspect(&profile.model_spec());
    LoggingHandler.on_progress(&ProgressEvent::CacheVerified {
        model: report.model.clone(),
        complete: report.is_complete(),
    });

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_cache_report(&report) {
        Ok(text) => print!("{}", text),
        Err(e) => return failure(e),
    }
    if !report.is_complete() {
        return EXIT_FAILURE;
    }

    // Ownership only matters for the runtime cache location
    let runtime_hub = profile.model.hf_home.join("hub");
    if profile.identity.enforce && cache.hub_dir() == runtime_hub {
        if let Err(e) = profile
            .execution_identity()
            .check_ownership(&profile.model.hf_home)
        {
            return failure(e.into());
        }
    }
    0
}

pub fn handle_config(args: &ConfigArgs, profile_path: Option<&Path>) -> i32 {
    let config = load_profile(profile_path).and_then(|profile| {
        load_env_file(&profile)?;
        Ok(BootConfig::from_env(&profile)?)
    });
    let config = match config {
        Ok(c) => c,
        Err(e) => return config_failure(e),
    };

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_config(&config) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => failure(e),
    }
}

pub fn handle_launch(args: &LaunchArgs, profile_path: Option<&Path>) -> i32 {
    let profile = match load_profile(profile_path) {
        Ok(p) => p,
        Err(e) => return config_failure(e),
    };

    let launcher = match Launcher::from_profile(&profile) {
        Ok(l) => l.with_progress(Arc::new(LoggingHandler)),
        Err(e) => return config_failure(e.into()),
    };

    if !args.dry_run {
        return match launcher.launch() {
            Ok(never) => match never {},
            Err(e) if e.is_config_error() => config_failure(e.into()),
            Err(e) => failure(e.into()),
        };
    }

    let command = match launcher.prepare() {
        Ok(command) => command,
        Err(e) if e.is_config_error() => return config_failure(e.into()),
        Err(e) => return failure(e.into()),
    };
    match OutputFormatter::new(args.format.into()).format_server_command(&command) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => failure(e),
    }
}

pub async fn handle_probe(args: &ProbeArgs, profile_path: Option<&Path>) -> i32 {
    let profile = match load_profile(profile_path) {
        Ok(p) => p,
        Err(e) => return config_failure(e),
    };

    // Same resolution as `launch`, so the probe targets the port the server bound
    let url = match &args.url {
        Some(url) => url.clone(),
        None => {
            let config = load_env_file(&profile)
                .map_err(anyhow::Error::from)
                .and_then(|_| Ok(BootConfig::from_env(&profile)?));
            match config {
                Ok(config) => config.health_url(),
                Err(e) => return config_failure(e),
            }
        }
    };

    let prober = match HealthProber::new(profile.health_policy()) {
        Ok(p) => p,
        Err(e) => return failure(e.into()),
    };
    let formatter = OutputFormatter::new(args.format.into());

    if args.watch {
        info!(
            "Watching {} every {}s (unhealthy no earlier than {}s)",
            url,
            prober.policy().interval.as_secs(),
            prober.policy().earliest_unhealthy().as_secs()
        );
        let status = prober.watch(&url, args.max_probes).await;
        return match formatter.format_watch(&url, status) {
            Ok(text) => {
                print!("{}", text);
                if status == HealthStatus::Healthy {
                    0
                } else {
                    EXIT_FAILURE
                }
            }
            Err(e) => failure(e),
        };
    }

    let outcome = prober.probe(&url).await;
    match formatter.format_probe(&outcome) {
        Ok(text) => {
            print!("{}", text);
            if outcome.healthy {
                0
            } else {
                EXIT_FAILURE
            }
        }
        Err(e) => failure(e),
    }
}

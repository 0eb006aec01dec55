//! Build-stage assembly
//!
//! Steps are ordered from least to most likely to change so that routine edits reuse as
//! many cached layers as possible: system toolchain, isolated environment, installer
//! upgrade, light tier, heavy tier, model prefetch.

use super::{
    BuildPlan, Instruction, RuntimeImage, Stage, StepKind, BUILDER_STAGE, LAUNCHER_STAGE,
};
use crate::manifest::{DependencyManifest, Tier};
use crate::profile::DeployProfile;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub(crate) const APT_CACHE_MOUNTS: &[&str] = &["/var/cache/apt", "/var/lib/apt"];
const PIP_CACHE_MOUNTS: &[&str] = &["/root/.cache/pip"];
const CARGO_CACHE_MOUNTS: &[&str] = &["/usr/local/cargo/registry", "/src/target"];

/// Where the compiled launcher is installed in both the launcher and runtime stages
pub fn launcher_binary_path() -> PathBuf {
    Path::new("/usr/local/bin").join(crate::NAME)
}

pub(crate) fn apt_install(packages: &[String]) -> String {
    format!(
        "apt-get update && apt-get install -y --no-install-recommends {}",
        packages.join(" ")
    )
}

pub struct Assembler<'a> {
    profile: &'a DeployProfile,
    manifest: &'a DependencyManifest,
}

impl<'a> Assembler<'a> {
    pub fn new(profile: &'a DeployProfile, manifest: &'a DependencyManifest) -> Self {
        Self { profile, manifest }
    }

    /// Compiles the launcher with cargo's registry and target dirs on cache mounts
    pub fn launcher_stage(&self) -> Stage {
        let mut stage = Stage::new(LAUNCHER_STAGE, &self.profile.build.launcher_image);
        stage
            .push(Instruction::Workdir {
                path: PathBuf::from("/src"),
            })
            .push(Instruction::Copy {
                from: None,
                src: self.profile.build.launcher_source.clone(),
                dest: PathBuf::from("/src"),
                chown: None,
                chmod: None,
            })
            .push(Instruction::run_cached(
                StepKind::CompileLauncher,
                format!(
                    "cargo build --release --locked && install -m 0755 target/release/{} {}",
                    crate::NAME,
                    launcher_binary_path().display()
                ),
                CARGO_CACHE_MOUNTS,
            ));
        stage
    }

    pub fn builder_stage(&self) -> Stage {
        let build = &self.profile.build;
        let venv = build.venv.display().to_string();
        let mut stage = Stage::new(BUILDER_STAGE, &build.builder_image);

        if !build.toolchain_packages.is_empty() {
            stage.push(Instruction::run_cached(
                StepKind::Toolchain,
                apt_install(&build.toolchain_packages),
                APT_CACHE_MOUNTS,
            ));
        }

        stage
            .push(Instruction::run(
                StepKind::CreateEnvironment,
                format!("python -m venv {}", venv),
            ))
            .push(Instruction::env([
                ("VIRTUAL_ENV", venv.clone()),
                ("PATH", format!("{}/bin:$PATH", venv)),
                ("PIP_DISABLE_PIP_VERSION_CHECK", "1".to_string()),
            ]))
            .push(Instruction::run_cached(
                StepKind::UpgradeInstaller,
                format!("pip install --upgrade {}", build.installer_packages.join(" ")),
                PIP_CACHE_MOUNTS,
            ));

        for (tier, requirements) in self.manifest.install_order() {
            let args: Vec<String> = requirements.iter().map(|r| r.install_arg()).collect();
            debug!(%tier, count = args.len(), "Adding install step");
            stage.push(Instruction::run_cached(
                StepKind::InstallTier(tier),
                format!("pip install {}", args.join(" ")),
                PIP_CACHE_MOUNTS,
            ));
        }

        let build_cache = self.profile.model.build_cache.display().to_string();
        stage
            .push(Instruction::env([
                ("HF_HOME", build_cache.clone()),
                ("SENTENCE_TRANSFORMERS_HOME", format!("{}/hub", build_cache)),
            ]))
            .push(Instruction::run(
                StepKind::PrefetchModel,
                self.profile.model_spec().python_prefetch_command(),
            ));

        stage
    }

    /// Assembles and validates the full plan
    pub fn assemble(&self) -> Result<BuildPlan> {
        self.profile
            .validate()
            .context("Deployment profile is invalid")?;
        let default_port = self.profile.default_port()?;

        if self.manifest.tier(Tier::Heavy).is_empty() {
            debug!("Manifest has no heavy tier; all dependencies share one layer");
        }

        let plan = BuildPlan::new(vec![
            self.launcher_stage(),
            self.builder_stage(),
            RuntimeImage::new(self.profile, default_port).stage(),
        ]);
        plan.validate().context("Assembled build plan is inconsistent")?;

        debug!(
            stages = plan.stages.len(),
            instructions = plan.instruction_count(),
            "Assembled build plan"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(profile: &DeployProfile) -> DependencyManifest {
        DependencyManifest::parse(
            "fastapi==0.115.0\nweaviate-client>=4.7\n",
            &profile.build.heavy_packages,
        )
        .unwrap()
    }

    #[test]
    fn test_builder_step_order() {
        let profile = DeployProfile::default();
        let manifest = manifest(&profile);
        let stage = Assembler::new(&profile, &manifest).builder_stage();

        let steps: Vec<StepKind> = stage.instructions.iter().filter_map(|i| i.step()).collect();
        assert_eq!(
            steps,
            vec![
                StepKind::Toolchain,
                StepKind::CreateEnvironment,
                StepKind::UpgradeInstaller,
                StepKind::InstallTier(Tier::Light),
                StepKind::InstallTier(Tier::Heavy),
                StepKind::PrefetchModel,
            ]
        );
    }

    #[test]
    fn test_prefetch_uses_build_cache() {
        let profile = DeployProfile::default();
        let manifest = manifest(&profile);
        let stage = Assembler::new(&profile, &manifest).builder_stage();
        assert_eq!(stage.env_value("HF_HOME"), Some("/opt/hf-cache"));

        let prefetch = &stage.instructions[stage.position(StepKind::PrefetchModel).unwrap()];
        match prefetch {
            Instruction::Run { command, .. } => {
                assert!(command.contains("sentence-transformers/all-MiniLM-L6-v2"))
            }
            other => panic!("Expected RUN, got {:?}", other),
        }
    }

    #[test]
    fn test_tier_install_commands() {
        let profile = DeployProfile::default();
        let manifest = manifest(&profile);
        let stage = Assembler::new(&profile, &manifest).builder_stage();

        let heavy = &stage.instructions[stage.position(StepKind::InstallTier(Tier::Heavy)).unwrap()];
        match heavy {
            Instruction::Run {
                command,
                cache_mounts,
                ..
            } => {
                assert_eq!(command, "pip install 'weaviate-client>=4.7'");
                assert_eq!(cache_mounts, &vec![PathBuf::from("/root/.cache/pip")]);
            }
            other => panic!("Expected RUN, got {:?}", other),
        }
    }

    #[test]
    fn test_light_only_manifest() {
        let profile = DeployProfile::default();
        let manifest =
            DependencyManifest::parse("fastapi\nuvicorn\n", &profile.build.heavy_packages)
                .unwrap();
        let plan = Assembler::new(&profile, &manifest).assemble().unwrap();
        let builder = plan.stage(BUILDER_STAGE).unwrap();
        assert!(builder.position(StepKind::InstallTier(Tier::Heavy)).is_none());
    }

    #[test]
    fn test_no_toolchain_packages_skips_step() {
        let mut profile = DeployProfile::default();
        profile.build.toolchain_packages.clear();
        let manifest = manifest(&profile);
        let stage = Assembler::new(&profile, &manifest).builder_stage();
        assert!(stage.position(StepKind::Toolchain).is_none());
    }

    #[test]
    fn test_launcher_stage() {
        let profile = DeployProfile::default();
        let manifest = manifest(&profile);
        let stage = Assembler::new(&profile, &manifest).launcher_stage();
        assert_eq!(stage.base, "rust:1.83-slim");
        assert!(stage.position(StepKind::CompileLauncher).is_some());
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let mut profile = DeployProfile::default();
        profile.service.workers = 4;
        let manifest = manifest(&profile);
        assert!(Assembler::new(&profile, &manifest).assemble().is_err());
    }
}

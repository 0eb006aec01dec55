//! Runtime stage: the minimal image the server runs in

use super::assembler::{apt_install, launcher_binary_path, APT_CACHE_MOUNTS};
use super::{Instruction, Stage, StepKind, BUILDER_STAGE, LAUNCHER_STAGE, RUNTIME_STAGE};
use crate::config::{BAKED_DEFAULT_PORT_VAR, HF_HOME_VAR};
use crate::model::CachePolicy;
use crate::profile::{DeployProfile, PROFILE_ENV_VAR};
use std::collections::BTreeMap;

/// Profile file name inside the application directory
pub const PROFILE_FILE: &str = "boot.toml";

pub struct RuntimeImage<'a> {
    profile: &'a DeployProfile,
    default_port: u16,
}

impl<'a> RuntimeImage<'a> {
    pub fn new(profile: &'a DeployProfile, default_port: u16) -> Self {
        Self {
            profile,
            default_port,
        }
    }

    /// Environment baked into the image
    pub fn env(&self) -> BTreeMap<String, String> {
        let build = &self.profile.build;
        let venv = build.venv.display().to_string();
        let hf_home = self.profile.model.hf_home.display().to_string();

        let mut env = BTreeMap::new();
        env.insert("VIRTUAL_ENV".to_string(), venv.clone());
        env.insert("PATH".to_string(), format!("{}/bin:$PATH", venv));
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
        env.insert(HF_HOME_VAR.to_string(), hf_home.clone());
        env.insert(
            "SENTENCE_TRANSFORMERS_HOME".to_string(),
            format!("{}/hub", hf_home),
        );
        env.insert(
            BAKED_DEFAULT_PORT_VAR.to_string(),
            self.default_port.to_string(),
        );
        env.insert(
            PROFILE_ENV_VAR.to_string(),
            self.profile
                .service
                .app_dir
                .join(PROFILE_FILE)
                .display()
                .to_string(),
        );
        if self.profile.model.cache_policy == CachePolicy::Require {
            env.insert("HF_HUB_OFFLINE".to_string(), "1".to_string());
            env.insert("TRANSFORMERS_OFFLINE".to_string(), "1".to_string());
        }
        env
    }

    pub fn stage(&self) -> Stage {
        let build = &self.profile.build;
        let identity = self.profile.execution_identity();
        let launcher = launcher_binary_path();
        let mut stage = Stage::new(RUNTIME_STAGE, &build.runtime_image);

        if !build.runtime_packages.is_empty() {
            stage.push(Instruction::run_cached(
                StepKind::RuntimePackages,
                apt_install(&build.runtime_packages),
                APT_CACHE_MOUNTS,
            ));
        }

        stage
            .push(Instruction::run(
                StepKind::CreateIdentity,
                identity.useradd_command(),
            ))
            .push(Instruction::Env { vars: self.env() })
            .push(Instruction::Copy {
                from: Some(BUILDER_STAGE.to_string()),
                src: build.venv.display().to_string(),
                dest: build.venv.clone(),
                chown: None,
                chmod: None,
            })
            .push(Instruction::Copy {
                from: Some(BUILDER_STAGE.to_string()),
                src: self.profile.model.build_cache.display().to_string(),
                dest: self.profile.model.hf_home.clone(),
                chown: Some(identity.chown()),
                chmod: None,
            })
            .push(Instruction::Copy {
                from: Some(LAUNCHER_STAGE.to_string()),
                src: launcher.display().to_string(),
                dest: launcher.clone(),
                chown: None,
                chmod: Some("0755".to_string()),
            })
            // Copying first lets the app directory itself be created with the owner
            .push(Instruction::Copy {
                from: None,
                src: ".".to_string(),
                dest: self.profile.service.app_dir.clone(),
                chown: Some(identity.chown()),
                chmod: None,
            })
            .push(Instruction::Workdir {
                path: self.profile.service.app_dir.clone(),
            })
            .push(Instruction::User {
                name: identity.user.clone(),
            })
            .push(Instruction::Expose {
                port: self.default_port,
            })
            .push(Instruction::Healthcheck {
                policy: self.profile.health_policy(),
                argv: vec![crate::NAME.to_string(), "probe".to_string()],
            })
            .push(Instruction::Cmd {
                argv: vec![crate::NAME.to_string(), "launch".to_string()],
            });

        stage
    }
}

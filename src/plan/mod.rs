//! Multi-stage image build plan
//!
//! A [`BuildPlan`] is an ordered list of stages, each an ordered list of instructions.
//! Every instruction is a layer-cache boundary: the builder reuses a cached layer only
//! while the base image and every preceding instruction are unchanged. [`BuildPlan::layer_keys`]
//! models that rule with chained digests so the effect of a manifest edit can be checked
//! without running a build.

pub mod assembler;
pub mod dockerfile;
pub mod runtime;

pub use assembler::Assembler;
pub use runtime::RuntimeImage;

use crate::health::HealthCheckPolicy;
use crate::manifest::Tier;
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

pub const PLAN_VERSION: &str = "1.0";

pub const LAUNCHER_STAGE: &str = "launcher";
pub const BUILDER_STAGE: &str = "builder";
pub const RUNTIME_STAGE: &str = "runtime";

/// What a `RUN` instruction is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Toolchain,
    CreateEnvironment,
    UpgradeInstaller,
    InstallTier(Tier),
    PrefetchModel,
    CompileLauncher,
    RuntimePackages,
    CreateIdentity,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Toolchain => write!(f, "toolchain"),
            StepKind::CreateEnvironment => write!(f, "create-environment"),
            StepKind::UpgradeInstaller => write!(f, "upgrade-installer"),
            StepKind::InstallTier(tier) => write!(f, "install-{}", tier),
            StepKind::PrefetchModel => write!(f, "prefetch-model"),
            StepKind::CompileLauncher => write!(f, "compile-launcher"),
            StepKind::RuntimePackages => write!(f, "runtime-packages"),
            StepKind::CreateIdentity => write!(f, "create-identity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    Run {
        step: StepKind,
        command: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        cache_mounts: Vec<PathBuf>,
    },
    Env {
        vars: BTreeMap<String, String>,
    },
    Copy {
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        src: String,
        dest: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        chown: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chmod: Option<String>,
    },
    Workdir {
        path: PathBuf,
    },
    User {
        name: String,
    },
    Expose {
        port: u16,
    },
    Healthcheck {
        policy: HealthCheckPolicy,
        /// Check command; it resolves the port the same way the launcher does
        argv: Vec<String>,
    },
    Cmd {
        argv: Vec<String>,
    },
}

impl Instruction {
    pub fn run(step: StepKind, command: impl Into<String>) -> Self {
        Instruction::Run {
            step,
            command: command.into(),
            cache_mounts: Vec::new(),
        }
    }

    pub fn run_cached(step: StepKind, command: impl Into<String>, mounts: &[&str]) -> Self {
        Instruction::Run {
            step,
            command: command.into(),
            cache_mounts: mounts.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn env<K, V, I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Instruction::Env {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn step(&self) -> Option<StepKind> {
        match self {
            Instruction::Run { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Short label used in summaries and layer listings
    pub fn label(&self) -> String {
        match self {
            Instruction::Run { step, .. } => format!("RUN {}", step),
            Instruction::Env { vars } => {
                format!("ENV {}", vars.keys().cloned().collect::<Vec<_>>().join(" "))
            }
            Instruction::Copy { from, dest, .. } => match from {
                Some(stage) => format!("COPY --from={} {}", stage, dest.display()),
                None => format!("COPY {}", dest.display()),
            },
            Instruction::Workdir { path } => format!("WORKDIR {}", path.display()),
            Instruction::User { name } => format!("USER {}", name),
            Instruction::Expose { port } => format!("EXPOSE {}", port),
            Instruction::Healthcheck { policy, .. } => format!("HEALTHCHECK {}", policy.path),
            Instruction::Cmd { argv } => format!("CMD {}", argv.join(" ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    pub base: String,
    pub instructions: Vec<Instruction>,
}

impl Stage {
    pub fn new(name: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    /// Index of the first `RUN` tagged `step`
    pub fn position(&self, step: StepKind) -> Option<usize> {
        self.instructions.iter().position(|i| i.step() == Some(step))
    }

    /// Value of an `ENV` variable as set by the last instruction defining it
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.instructions.iter().rev().find_map(|i| match i {
            Instruction::Env { vars } => vars.get(key).map(String::as_str),
            _ => None,
        })
    }
}

/// Cache key of one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerKey {
    pub index: usize,
    pub label: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub version: String,
    pub stages: Vec<Stage>,
}

impl BuildPlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            version: PLAN_VERSION.to_string(),
            stages,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn instruction_count(&self) -> usize {
        self.stages.iter().map(|s| s.instructions.len()).sum()
    }

    /// Chained layer keys for every stage, in stage order
    ///
    /// `key_0 = sha256(base)`, `key_i = sha256(key_{i-1} || instruction_i)`. A `COPY --from`
    /// also folds in the final key of the source stage, since its layer changes whenever
    /// anything in that stage does.
    pub fn layer_keys(&self) -> Vec<(String, Vec<LayerKey>)> {
        let mut finals: HashMap<&str, String> = HashMap::new();
        let mut result = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let mut prev = hex::encode(Sha256::digest(stage.base.as_bytes()));
            let mut keys = Vec::with_capacity(stage.instructions.len());

            for (index, instruction) in stage.instructions.iter().enumerate() {
                let mut hasher = Sha256::new();
                hasher.update(prev.as_bytes());
                hasher.update(dockerfile::render_instruction(instruction).as_bytes());
                if let Instruction::Copy {
                    from: Some(source), ..
                } = instruction
                {
                    if let Some(source_key) = finals.get(source.as_str()) {
                        hasher.update(source_key.as_bytes());
                    }
                }
                prev = hex::encode(hasher.finalize());
                keys.push(LayerKey {
                    index,
                    label: instruction.label(),
                    key: prev.clone(),
                });
            }

            finals.insert(stage.name.as_str(), prev);
            result.push((stage.name.clone(), keys));
        }

        result
    }

    /// Layer keys of a single stage
    pub fn stage_layer_keys(&self, name: &str) -> Option<Vec<LayerKey>> {
        self.layer_keys()
            .into_iter()
            .find(|(stage, _)| stage == name)
            .map(|(_, keys)| keys)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize build plan to YAML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize build plan to JSON")
    }

    /// Checks the ordering and consistency rules every plan must satisfy
    ///
    /// Checks:
    /// - stage names are unique and `COPY --from` only names earlier stages
    /// - the builder creates the environment, upgrades the installer, installs light
    ///   before heavy and prefetches the model last
    /// - the runtime stage never installs the compiler toolchain
    /// - the model cache lands exactly at the runtime `HF_HOME`
    /// - the runtime switches to a non-root user before `CMD`
    /// - exposed port and `BOOT_DEFAULT_PORT` agree; the healthcheck runs the launcher's `probe`
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            anyhow::bail!("Plan version cannot be empty");
        }
        if self.stages.is_empty() {
            anyhow::bail!("Plan has no stages");
        }

        let mut seen: Vec<&str> = Vec::new();
        for stage in &self.stages {
            if stage.base.is_empty() {
                anyhow::bail!("Stage '{}' has an empty base image", stage.name);
            }
            if seen.contains(&stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name '{}'", stage.name);
            }
            for instruction in &stage.instructions {
                if let Instruction::Copy {
                    from: Some(source), ..
                } = instruction
                {
                    if !seen.contains(&source.as_str()) {
                        anyhow::bail!(
                            "Stage '{}' copies from '{}', which is not an earlier stage",
                            stage.name,
                            source
                        );
                    }
                }
            }
            seen.push(stage.name.as_str());
        }

        self.validate_builder()?;
        self.validate_runtime()
    }

    fn validate_builder(&self) -> Result<()> {
        let builder = self
            .stage(BUILDER_STAGE)
            .context("Plan has no builder stage")?;

        let env = builder
            .position(StepKind::CreateEnvironment)
            .context("Builder never creates the isolated environment")?;
        let upgrade = builder
            .position(StepKind::UpgradeInstaller)
            .context("Builder never upgrades the package installer")?;
        let prefetch = builder
            .position(StepKind::PrefetchModel)
            .context("Builder never prefetches the embedding model")?;
        let light = builder.position(StepKind::InstallTier(Tier::Light));
        let heavy = builder.position(StepKind::InstallTier(Tier::Heavy));

        if upgrade < env {
            anyhow::bail!("Installer upgrade runs before the environment exists");
        }
        if let Some(toolchain) = builder.position(StepKind::Toolchain) {
            if toolchain > env {
                anyhow::bail!("Compiler toolchain is installed after the environment is created");
            }
        }
        for (tier, pos) in [(Tier::Light, light), (Tier::Heavy, heavy)] {
            if let Some(pos) = pos {
                if pos < upgrade {
                    anyhow::bail!("{} tier installs before the installer upgrade", tier);
                }
                if pos > prefetch {
                    anyhow::bail!("{} tier installs after the model prefetch", tier);
                }
            }
        }
        if let (Some(light), Some(heavy)) = (light, heavy) {
            if heavy < light {
                anyhow::bail!("Heavy tier installs before the light tier");
            }
        }
        if light.is_none() && heavy.is_none() {
            anyhow::bail!("Builder installs no dependency tier");
        }

        Ok(())
    }

    fn validate_runtime(&self) -> Result<()> {
        let runtime = self
            .stage(RUNTIME_STAGE)
            .context("Plan has no runtime stage")?;

        if runtime.position(StepKind::Toolchain).is_some() {
            anyhow::bail!("Runtime stage installs the compiler toolchain");
        }

        let cmd = runtime
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::Cmd { .. }))
            .context("Runtime stage has no CMD")?;
        let user = runtime
            .instructions
            .iter()
            .rposition(|i| matches!(i, Instruction::User { .. }))
            .context("Runtime stage never switches user")?;
        if user > cmd {
            anyhow::bail!("Runtime stage switches user after CMD");
        }
        if let Instruction::User { name } = &runtime.instructions[user] {
            if name == "root" || name == "0" || name.starts_with("0:") || name.starts_with("root:") {
                anyhow::bail!("Runtime stage runs as root");
            }
        }

        let hf_home = runtime
            .env_value("HF_HOME")
            .context("Runtime stage does not set HF_HOME")?;
        let build_cache = self
            .stage(BUILDER_STAGE)
            .and_then(|b| b.env_value("HF_HOME"))
            .context("Builder stage does not set HF_HOME for the prefetch")?;
        let cache_copied = runtime.instructions.iter().any(|i| {
            matches!(i, Instruction::Copy { from: Some(from), src, dest, .. }
                if from == BUILDER_STAGE
                    && src.as_str() == build_cache
                    && dest.as_os_str() == hf_home)
        });
        if !cache_copied {
            anyhow::bail!(
                "Runtime stage does not copy the model cache {} to HF_HOME ({})",
                build_cache,
                hf_home
            );
        }

        let baked: u16 = runtime
            .env_value("BOOT_DEFAULT_PORT")
            .context("Runtime stage does not set BOOT_DEFAULT_PORT")?
            .parse()
            .context("BOOT_DEFAULT_PORT is not a port number")?;
        for instruction in &runtime.instructions {
            match instruction {
                Instruction::Expose { port } if *port != baked => {
                    anyhow::bail!("EXPOSE {} disagrees with default port {}", port, baked);
                }
                Instruction::Healthcheck { argv, .. }
                    if argv.first().map(String::as_str) != Some(crate::NAME)
                        || argv.get(1).map(String::as_str) != Some("probe") =>
                {
                    anyhow::bail!(
                        "Healthcheck must run `{} probe` so it targets the bound port, got `{}`",
                        crate::NAME,
                        argv.join(" ")
                    );
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build Plan (v{})", self.version)?;
        writeln!(f, "================")?;
        for stage in &self.stages {
            writeln!(f)?;
            writeln!(f, "Stage {} (FROM {})", stage.name, stage.base)?;
            for (i, instruction) in stage.instructions.iter().enumerate() {
                writeln!(f, "  {:>2}. {}", i + 1, instruction.label())?;
            }
        }
        Ok(())
    }
}

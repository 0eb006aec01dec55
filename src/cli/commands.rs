use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Build plan generator and container launcher for the FindMyRepo API
#[derive(Parser, Debug)]
#[command(
    name = "findmyrepo-boot",
    about = "Build plan generator and container launcher for the FindMyRepo API",
    version,
    long_about = "findmyrepo-boot renders the multi-stage image for the FindMyRepo search API \
                  from a deployment profile and a tiered requirements file, pre-populates and \
                  verifies the embedding-model cache, and is the container entrypoint that \
                  resolves the listening port and starts the ASGI server."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "BOOT_PROFILE",
        help = "Deployment profile (defaults to boot.toml)"
    )]
    pub profile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Render the image build plan",
        long_about = "Assembles the launcher, builder and runtime stages from the profile and \
                      the requirements file, validates them and prints the result.\n\n\
                      Examples:\n  \
                      findmyrepo-boot plan > Dockerfile\n  \
                      findmyrepo-boot plan --format yaml\n  \
                      findmyrepo-boot plan --manifest requirements.txt -o Dockerfile"
    )]
    Plan(PlanArgs),

    #[command(about = "Print the layer-cache key of every build instruction")]
    Layers(LayersArgs),

    #[command(
        about = "Download the embedding model into the cache",
        long_about = "Fetches every model file into the hub cache. This is the native \
                      counterpart of the builder stage's prefetch step.\n\n\
                      Examples:\n  \
                      findmyrepo-boot prefetch\n  \
                      findmyrepo-boot prefetch --cache-dir /opt/hf-cache/hub"
    )]
    Prefetch(CacheArgs),

    #[command(about = "Check the embedding-model cache offline")]
    Verify(CacheArgs),

    #[command(about = "Show the resolved runtime configuration")]
    Config(ConfigArgs),

    #[command(
        about = "Start the API server (container entrypoint)",
        long_about = "Resolves PORT, validates configuration, identity, model cache and secrets, \
                      then replaces this process with the ASGI server.\n\n\
                      Examples:\n  \
                      findmyrepo-boot launch\n  \
                      PORT=3000 findmyrepo-boot launch --dry-run"
    )]
    Launch(LaunchArgs),

    #[command(
        about = "Probe the health endpoint",
        long_about = "Issues GET requests against the health endpoint using the profile's \
                      health-check policy. Exits 0 when healthy, 1 otherwise.\n\n\
                      Examples:\n  \
                      findmyrepo-boot probe\n  \
                      findmyrepo-boot probe --url http://localhost:3000/health\n  \
                      findmyrepo-boot probe --watch --max-probes 10"
    )]
    Probe(ProbeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "dockerfile",
        help = "Output format"
    )]
    pub format: PlanFormatArg,

    #[arg(
        short = 'm',
        long,
        value_name = "FILE",
        help = "Requirements file (defaults to the profile's build.manifest)"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct LayersArgs {
    #[arg(
        short = 'm',
        long,
        value_name = "FILE",
        help = "Requirements file (defaults to the profile's build.manifest)"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    #[arg(
        long,
        value_name = "DIR",
        help = "Hub cache directory (defaults to $HF_HOME/hub)"
    )]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct LaunchArgs {
    #[arg(long, help = "Run all checks and print the server command without starting it")]
    pub dry_run: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        requires = "dry_run",
        help = "Output format for --dry-run"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(
        long,
        value_name = "URL",
        help = "Health URL (defaults to the resolved port and the profile's health path)"
    )]
    pub url: Option<String>,

    #[arg(long, help = "Keep probing at the policy interval until unhealthy")]
    pub watch: bool,

    #[arg(
        long,
        value_name = "N",
        requires = "watch",
        help = "Stop watching after N probes"
    )]
    pub max_probes: Option<usize>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormatArg {
    Dockerfile,
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

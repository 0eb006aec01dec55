use findmyrepo_boot::cli::commands::{CliArgs, Commands};
use findmyrepo_boot::cli::handlers::{
    handle_config, handle_launch, handle_layers, handle_plan, handle_prefetch, handle_probe,
    handle_verify,
};
use findmyrepo_boot::util::logging::{self, parse_level};
use findmyrepo_boot::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("findmyrepo-boot v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let profile = args.profile.as_deref();
    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args, profile),
        Commands::Layers(layers_args) => handle_layers(layers_args, profile),
        Commands::Prefetch(cache_args) => handle_prefetch(cache_args, profile).await,
        Commands::Verify(cache_args) => handle_verify(cache_args, profile),
        Commands::Config(config_args) => handle_config(config_args, profile),
        Commands::Launch(launch_args) => handle_launch(launch_args, profile),
        Commands::Probe(probe_args) => handle_probe(probe_args, profile).await,
    };

    std::process::exit(exit_code);
}

/// Command-line flags win over `BOOT_LOG_LEVEL`
fn init_logging_from_args(args: &CliArgs) {
    let mut config = logging::config_from_env();
    if let Some(level) = &args.log_level {
        config.level = parse_level(level);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    logging::init_logging(config);
}

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands};
pub use output::{OutputFormat, OutputFormatter};

/// Exit code for a failed operation
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for invalid configuration
pub const EXIT_CONFIG: i32 = 2;

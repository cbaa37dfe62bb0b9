use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "netbake")]
#[command(
    author,
    version,
    about = "Bake multi-node blockchain test networks on pre-provisioned servers"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "NETBAKE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a settings file. Defaults to ./Netbake.toml when it exists.
    ///
    /// Values can be overridden with NETBAKE_* environment variables, with
    /// nested keys separated by a double underscore (NETBAKE_SSH__USER).
    #[arg(short, long, alias = "conf", env = "NETBAKE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a deployment request without touching any server.
    Validate {
        /// Request file (TOML, or JSON by extension).
        request: PathBuf,
    },

    /// Build the network described by a deployment request.
    Build {
        /// Request file (TOML, or JSON by extension).
        request: PathBuf,

        /// Server inventory file (TOML, or JSON by extension).
        #[arg(short, long, env = "NETBAKE_INVENTORY")]
        inventory: PathBuf,

        /// Keep build artifacts and the build record in this directory.
        #[arg(long, env = "NETBAKE_ARTIFACTS_DIR")]
        artifacts_dir: Option<PathBuf>,
    },

    /// List the registered protocols.
    Protocols,

    /// Print the default parameters of a protocol.
    Defaults {
        protocol: String,
    },

    /// Print the parameter schema of a protocol.
    Params {
        protocol: String,
    },
}
